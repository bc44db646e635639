//! Remote state references, lock policy and lock identity.
//!
//! Pure types and validators only: no I/O, no async, no filesystem access.

use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use infrasync_common::{LockInfo, LockOperation};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::error::StateError;

static STORAGE_ACCOUNT_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9]{3,24}$").expect("valid regex")
});

static CONTAINER_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"^[a-z0-9][a-z0-9-]{1,61}[a-z0-9]$").expect("valid regex")
});

/// Location of one environment's state file: `(storage account, container, key)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StateRef {
    pub storage_account: String,
    pub container: String,
    pub key: String,
}

impl StateRef {
    /// Build a validated state reference.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidReference`] if any component is malformed.
    pub fn new(storage_account: &str, container: &str, key: &str) -> Result<Self> {
        validate_storage_account(storage_account)?;
        validate_container(container)?;
        validate_state_key(key)?;
        Ok(Self {
            storage_account: storage_account.to_string(),
            container: container.to_string(),
            key: key.to_string(),
        })
    }
}

impl fmt::Display for StateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.storage_account, self.container, self.key)
    }
}

impl std::str::FromStr for StateRef {
    type Err = anyhow::Error;

    /// Parse `account/container/key`; the key may itself contain `/`.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(account), Some(container), Some(key)) => Self::new(account, container, key),
            _ => Err(StateError::InvalidReference(format!(
                "'{s}' is not of the form <storage_account>/<container>/<key>"
            ))
            .into()),
        }
    }
}

/// Storage account names: 3-24 lowercase letters and digits.
///
/// # Errors
///
/// Returns an error if the name does not match.
pub fn validate_storage_account(name: &str) -> Result<()> {
    if !STORAGE_ACCOUNT_RE.is_match(name) {
        return Err(StateError::InvalidReference(format!(
            "storage account '{name}' must be 3-24 lowercase letters or digits"
        ))
        .into());
    }
    Ok(())
}

/// Container names: 3-63 lowercase letters, digits and single hyphens,
/// starting and ending with a letter or digit.
///
/// # Errors
///
/// Returns an error if the name does not match.
pub fn validate_container(name: &str) -> Result<()> {
    if !CONTAINER_RE.is_match(name) || name.contains("--") {
        return Err(StateError::InvalidReference(format!(
            "container '{name}' must be 3-63 lowercase letters, digits or single hyphens"
        ))
        .into());
    }
    Ok(())
}

/// State keys are relative blob names: non-empty, no leading `/`, no empty
/// segments, no backslashes. Segments may not start with `.` (traversal and
/// temp files) or end in `.lock` (lock files sit next to the state).
///
/// # Errors
///
/// Returns an error if the key could escape its container or collide with a
/// lock or temp file.
pub fn validate_state_key(key: &str) -> Result<()> {
    let bad_segment = key
        .split('/')
        .any(|seg| seg.is_empty() || seg.starts_with('.') || seg.ends_with(".lock"));
    if key.is_empty() || key.len() > 1024 || key.contains('\\') || bad_segment {
        return Err(StateError::InvalidReference(format!(
            "state key '{key}' is not a valid blob name"
        ))
        .into());
    }
    Ok(())
}

/// How long to wait for a held lock, and how often to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl LockPolicy {
    /// Fail immediately when the lock is held.
    #[must_use]
    pub fn no_wait() -> Self {
        Self {
            timeout: Duration::ZERO,
            poll_interval: Duration::from_millis(500),
        }
    }

    /// A zero timeout turns a held lock into contention instead of a wait.
    #[must_use]
    pub fn fails_fast(&self) -> bool {
        self.timeout.is_zero()
    }
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self::no_wait()
    }
}

/// Outcome of a single non-blocking lock attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAttempt {
    Acquired,
    Held(LockInfo),
}

/// Fresh lock info for `operation`, owned by `who`.
#[must_use]
pub fn new_lock_info(operation: LockOperation, who: &str) -> LockInfo {
    LockInfo {
        id: uuid::Uuid::new_v4().to_string(),
        operation,
        who: who.to_string(),
        created: Utc::now(),
    }
}
