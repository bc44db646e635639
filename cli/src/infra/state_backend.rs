//! Filesystem implementation of the `StateBackend` port.
//!
//! Layout under the backend root:
//!
//! ```text
//! <root>/<storage_account>/<container>/<key>        state document (JSON)
//! <root>/<storage_account>/<container>/<key>.lock   lock file (JSON LockInfo)
//! ```
//!
//! The lock file is created by hard-linking a fully written temp file onto
//! the lock path, which either succeeds atomically or fails with
//! `AlreadyExists`. Readers therefore never see a half-written lock.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use infrasync_common::{LockInfo, StateDocument};

use crate::application::ports::StateBackend;
use crate::domain::error::StateError;
use crate::domain::state::{LockAttempt, StateRef};
use crate::infra::fs::{remove_if_exists, restrict_permissions, temp_sibling, write_atomic};

/// Attempts before giving up on a lock that keeps vanishing as we read it.
const LOCK_READ_ATTEMPTS: usize = 3;

/// State backend rooted at a local (or network-mounted) directory.
#[derive(Debug, Clone)]
pub struct FsStateBackend {
    root: PathBuf,
}

impl FsStateBackend {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn state_path(&self, state: &StateRef) -> PathBuf {
        let mut path = self.root.join(&state.storage_account).join(&state.container);
        for segment in state.key.split('/') {
            path.push(segment);
        }
        path
    }

    fn lock_path(&self, state: &StateRef) -> PathBuf {
        let path = self.state_path(state);
        let name = path
            .file_name()
            .map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        path.with_file_name(format!("{name}.lock"))
    }
}

fn read_lock(path: &Path) -> Result<Option<LockInfo>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let info = serde_json::from_str(&content)
                .with_context(|| format!("parsing lock file {}", path.display()))?;
            Ok(Some(info))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading lock file {}", path.display())),
    }
}

fn try_lock_sync(lock_path: &Path, info: &LockInfo) -> Result<LockAttempt> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let content = serde_json::to_vec_pretty(info).context("serializing lock info")?;
    let temp = temp_sibling(lock_path);
    std::fs::write(&temp, &content)
        .with_context(|| format!("writing temp lock {}", temp.display()))?;
    restrict_permissions(&temp)?;

    let mut attempt = 0;
    let outcome = loop {
        attempt += 1;
        match std::fs::hard_link(&temp, lock_path) {
            Ok(()) => break Ok(LockAttempt::Acquired),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_lock(lock_path) {
                    Ok(Some(holder)) => break Ok(LockAttempt::Held(holder)),
                    // Released between our link and our read; try again.
                    Ok(None) if attempt < LOCK_READ_ATTEMPTS => {}
                    Ok(None) => {
                        break Err(anyhow::anyhow!(
                            "lock file {} keeps changing; retry later",
                            lock_path.display()
                        ));
                    }
                    Err(e) => break Err(e),
                }
            }
            Err(e) => {
                break Err(e).with_context(|| format!("creating lock file {}", lock_path.display()));
            }
        }
    };
    let _ = std::fs::remove_file(&temp);
    outcome
}

fn unlock_sync(state: &StateRef, lock_path: &Path, lock_id: &str) -> Result<()> {
    let Some(holder) = read_lock(lock_path)? else {
        return Err(StateError::NotLocked {
            state: state.to_string(),
        }
        .into());
    };
    if holder.id != lock_id {
        return Err(StateError::LockMismatch {
            state: state.to_string(),
            expected: lock_id.to_string(),
            actual: holder.id,
        }
        .into());
    }
    remove_if_exists(lock_path)?;
    Ok(())
}

fn read_state_sync(path: &Path) -> Result<Option<StateDocument>> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let doc = serde_json::from_str(&content)
                .with_context(|| format!("parsing state file {}", path.display()))?;
            Ok(Some(doc))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading state file {}", path.display())),
    }
}

fn write_state_sync(
    state: &StateRef,
    state_path: &Path,
    lock_path: &Path,
    doc: &StateDocument,
    lock_id: &str,
) -> Result<()> {
    match read_lock(lock_path)? {
        Some(holder) if holder.id == lock_id => {}
        Some(holder) => {
            return Err(StateError::LockMismatch {
                state: state.to_string(),
                expected: lock_id.to_string(),
                actual: holder.id,
            }
            .into());
        }
        None => {
            return Err(StateError::NotLocked {
                state: state.to_string(),
            }
            .into());
        }
    }
    let content = serde_json::to_vec_pretty(doc).context("serializing state")?;
    write_atomic(state_path, &content)
}

impl StateBackend for FsStateBackend {
    async fn try_lock(&self, state: &StateRef, info: &LockInfo) -> Result<LockAttempt> {
        let lock_path = self.lock_path(state);
        let info = info.clone();
        tokio::task::spawn_blocking(move || try_lock_sync(&lock_path, &info))
            .await
            .context("lock task panicked")?
    }

    async fn unlock(&self, state: &StateRef, lock_id: &str) -> Result<()> {
        let lock_path = self.lock_path(state);
        let state = state.clone();
        let lock_id = lock_id.to_string();
        tokio::task::spawn_blocking(move || unlock_sync(&state, &lock_path, &lock_id))
            .await
            .context("unlock task panicked")?
    }

    async fn lock_info(&self, state: &StateRef) -> Result<Option<LockInfo>> {
        let lock_path = self.lock_path(state);
        tokio::task::spawn_blocking(move || read_lock(&lock_path))
            .await
            .context("lock read task panicked")?
    }

    async fn read_state(&self, state: &StateRef) -> Result<Option<StateDocument>> {
        let path = self.state_path(state);
        tokio::task::spawn_blocking(move || read_state_sync(&path))
            .await
            .context("state load task panicked")?
    }

    async fn write_state(&self, state: &StateRef, doc: &StateDocument, lock_id: &str) -> Result<()> {
        let state_path = self.state_path(state);
        let lock_path = self.lock_path(state);
        let state = state.clone();
        let doc = doc.clone();
        let lock_id = lock_id.to_string();
        tokio::task::spawn_blocking(move || {
            write_state_sync(&state, &state_path, &lock_path, &doc, &lock_id)
        })
        .await
        .context("state save task panicked")?
    }
}
