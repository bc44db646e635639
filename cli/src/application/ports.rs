//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain`, never from `crate::infra`,
//! `crate::commands`, or `crate::output`.

use std::path::PathBuf;
use std::process::Output;

use anyhow::Result;
use infrasync_common::{LockInfo, RunRecord, StateDocument};

use crate::domain::config::InfrasyncConfig;
use crate::domain::mirror::{CommitId, Lease};
use crate::domain::plan::PlanArtifact;
use crate::domain::state::{LockAttempt, StateRef};

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Process execution for the git client. Tests replace it with canned output.
#[allow(async_fn_in_trait)]
pub trait CommandRunner {
    /// Run `program` to completion and capture its output.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or outlives the
    /// runner's deadline. A timed-out child must be killed, not orphaned.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;
}

// ── Progress Reporting Port ───────────────────────────────────────────────────

/// Abstracts progress reporting so services can emit events without
/// depending on the Presentation layer. Sync trait.
pub trait ProgressReporter {
    /// Emit an in-progress step message.
    fn step(&self, message: &str);
    /// Emit a success message.
    fn success(&self, message: &str);
    /// Emit a warning message.
    fn warn(&self, message: &str);
}

// ── Configuration Port ────────────────────────────────────────────────────────

/// Abstracts loading and saving the tool configuration.
pub trait ConfigStore {
    /// Load configuration, returning defaults when no file exists.
    fn load(&self) -> Result<InfrasyncConfig>;
    /// Persist configuration.
    fn save(&self, config: &InfrasyncConfig) -> Result<()>;
    /// Location of the configuration file.
    fn path(&self) -> Result<PathBuf>;
}

// ── State Backend Port ────────────────────────────────────────────────────────

/// Remote state storage with exclusive per-key locks.
///
/// `try_lock` must be atomic: of any number of concurrent callers on the same
/// reference, at most one observes [`LockAttempt::Acquired`].
#[allow(async_fn_in_trait)]
pub trait StateBackend {
    /// Attempt to take the lock once, without waiting.
    async fn try_lock(&self, state: &StateRef, info: &LockInfo) -> Result<LockAttempt>;
    /// Release the lock held under `lock_id`.
    ///
    /// # Errors
    ///
    /// `StateError::NotLocked` if no lock exists, `StateError::LockMismatch`
    /// if it is held under another id.
    async fn unlock(&self, state: &StateRef, lock_id: &str) -> Result<()>;
    /// Current lock holder, if any.
    async fn lock_info(&self, state: &StateRef) -> Result<Option<LockInfo>>;
    /// Read the state document; `None` if it was never written.
    async fn read_state(&self, state: &StateRef) -> Result<Option<StateDocument>>;
    /// Replace the state document. The caller must hold the lock as `lock_id`.
    async fn write_state(&self, state: &StateRef, doc: &StateDocument, lock_id: &str) -> Result<()>;
}

// ── Artifact Store Port ───────────────────────────────────────────────────────

/// Persistence for plan artifacts and the per-state run record.
#[allow(async_fn_in_trait)]
pub trait ArtifactStore {
    /// Persist a new artifact.
    async fn save_artifact(&self, artifact: &PlanArtifact) -> Result<()>;
    /// Load an artifact by id.
    ///
    /// # Errors
    ///
    /// `PlanError::ArtifactNotFound` if absent, `PlanError::CorruptArtifact`
    /// if unreadable.
    async fn load_artifact(&self, id: &str) -> Result<PlanArtifact>;
    /// Delete an artifact; returns `false` if it did not exist.
    async fn delete_artifact(&self, id: &str) -> Result<bool>;
    /// All readable artifacts, oldest first.
    async fn list_artifacts(&self) -> Result<Vec<PlanArtifact>>;
    /// The run record for a state reference.
    async fn load_run(&self, state: &StateRef) -> Result<Option<RunRecord>>;
    /// Replace the run record for a state reference.
    async fn save_run(&self, state: &StateRef, record: &RunRecord) -> Result<()>;
}

// ── Git Port ──────────────────────────────────────────────────────────────────

/// Git operations against a local mirror repository.
///
/// Implementations surface rejected credentials as
/// `domain::error::AuthenticationError` and lease rejections as
/// `MirrorError::LeaseConflict`.
#[allow(async_fn_in_trait)]
pub trait GitClient {
    /// Create the local mirror repository if needed.
    async fn ensure_repository(&self) -> Result<()>;
    /// Fetch `branch` from `remote` and return its head.
    async fn fetch_branch(&self, remote: &str, branch: &str) -> Result<CommitId>;
    /// Point the local `branch` at `commit`.
    async fn reset_branch(&self, branch: &str, commit: &CommitId) -> Result<()>;
    /// Current head of `branch` on `remote`; `None` if the branch is absent.
    async fn remote_head(&self, remote: &str, branch: &str) -> Result<Option<CommitId>>;
    /// Push the local `branch` to `remote`.
    ///
    /// With `Some(lease)` the push only succeeds if the remote head still
    /// matches; `None` is an explicit force push.
    async fn push(&self, remote: &str, branch: &str, lease: Option<&Lease>) -> Result<()>;
}
