//! Typed domain error enums.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All error types implement `thiserror::Error` and convert to `anyhow::Error`
//! via the `?` operator. [`classify`] maps an error chain back to its
//! process exit code.

use chrono::{DateTime, Utc};
use infrasync_common::LockInfo;
use thiserror::Error;

// ── Plan / apply errors ───────────────────────────────────────────────────────

/// Why an artifact can no longer be applied.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StaleReason {
    #[error("configuration fingerprint changed (planned {planned}, current {current})")]
    FingerprintMismatch { planned: String, current: String },

    #[error("it was planned for state '{planned}' but the manifest targets '{current}'")]
    DifferentState { planned: String, current: String },

    #[error("a newer plan ({latest}) supersedes it")]
    Superseded { latest: String },

    #[error("no plan is awaiting apply for this state")]
    NotRecorded,

    #[error("it has already been consumed by an apply")]
    AlreadyConsumed,

    #[error("it expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },

    #[error("state moved from serial {planned} to {current} since it was planned")]
    StateMoved { planned: u64, current: u64 },

    #[error("state lineage changed since it was planned")]
    LineageChanged,
}

/// Errors raised by the plan/apply orchestrator.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("Plan {artifact_id} is stale: {reason}. Run 'infrasync plan' again.")]
    StaleArtifact {
        artifact_id: String,
        reason: StaleReason,
    },

    #[error("Plan artifact '{0}' not found.")]
    ArtifactNotFound(String),

    #[error("Plan artifact '{id}' is unreadable: {reason}")]
    CorruptArtifact { id: String, reason: String },

    #[error("Invalid plan artifact id '{0}': expected a UUID")]
    InvalidArtifactId(String),
}

impl PlanError {
    pub(crate) fn stale(artifact_id: &str, reason: StaleReason) -> Self {
        Self::StaleArtifact {
            artifact_id: artifact_id.to_string(),
            reason,
        }
    }
}

// ── State backend errors ──────────────────────────────────────────────────────

/// Errors raised by the state backend and lock handling.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("State '{state}' is locked: {holder}")]
    LockContention { state: String, holder: LockInfo },

    #[error("Timed out after {waited_secs}s waiting for the lock on '{state}' (held: {holder})")]
    LockTimeout {
        state: String,
        waited_secs: u64,
        holder: LockInfo,
    },

    #[error("State '{state}' is locked by {actual}, not by lock id {expected}")]
    LockMismatch {
        state: String,
        expected: String,
        actual: String,
    },

    #[error("State '{state}' is not locked")]
    NotLocked { state: String },

    #[error("Invalid state reference: {0}")]
    InvalidReference(String),
}

// ── Mirror errors ─────────────────────────────────────────────────────────────

/// Errors raised by the repository mirror syncer.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error(
        "Branch '{branch}' on {remote} moved since it was observed at {expected}. \
Re-run to refresh the lease, or pass --force to override."
    )]
    LeaseConflict {
        remote: String,
        branch: String,
        expected: String,
    },

    #[error("Branch '{branch}' does not exist on {remote}")]
    BranchNotFound { remote: String, branch: String },

    #[error("Invalid branch name '{0}'")]
    InvalidBranch(String),

    #[error("Invalid commit id '{0}'")]
    InvalidCommit(String),

    #[error("Source and destination are the same remote: {0}")]
    SameRemote(String),

    #[error("git {command} failed: {stderr}")]
    GitFailed { command: String, stderr: String },
}

/// A remote rejected the credentials presented to it.
#[derive(Debug, Error)]
#[error("Authentication to {remote} failed: {detail}")]
pub struct AuthenticationError {
    pub remote: String,
    pub detail: String,
}

// ── Manifest errors ───────────────────────────────────────────────────────────

/// Errors found while resolving a deployment manifest.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Invalid environment name '{0}': must match ^[a-z0-9][a-z0-9-]{{0,30}}$")]
    InvalidEnvironment(String),

    #[error("Invalid resource address '{0}'")]
    InvalidAddress(String),

    #[error("Invalid kind '{kind}' for resource '{address}'")]
    InvalidKind { address: String, kind: String },

    #[error("Undefined variable '{name}' referenced in {at}")]
    UndefinedVariable { name: String, at: String },

    #[error("Environment variable '{name}' referenced in {at} is not set")]
    UndefinedEnv { name: String, at: String },

    #[error("Unsupported reference '${{{reference}}}' in {at}")]
    UnsupportedReference { reference: String, at: String },

    #[error("Unterminated '${{' in {at}")]
    UnterminatedReference { at: String },

    #[error(
        "'{0}' looks like a secret but has a literal value. \
Inject it from the pipeline secret store with ${{env.NAME}} instead."
    )]
    EmbeddedSecret(String),
}

// ── Config errors ─────────────────────────────────────────────────────────────

/// Errors related to configuration key/value validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown setting: {key}\n\nValid settings: {valid}")]
    UnknownKey { key: String, valid: String },

    #[error("Invalid value for {key}: {value}\n\n{expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: String,
    },
}

// ── Exit codes ────────────────────────────────────────────────────────────────

/// Process exit codes.
pub mod exit_code {
    pub const FAILURE: u8 = 1;
    /// `plan --detailed-exitcode` found changes.
    pub const CHANGES_PRESENT: u8 = 2;
    pub const STALE_ARTIFACT: u8 = 3;
    pub const LOCK_CONTENTION: u8 = 4;
    pub const LOCK_TIMEOUT: u8 = 5;
    pub const LEASE_CONFLICT: u8 = 6;
    pub const AUTHENTICATION: u8 = 7;
}

/// Map an error chain to `(exit code, machine-readable code)`.
///
/// The first typed error found in the chain wins; anything else is a generic
/// failure.
#[must_use]
pub fn classify(err: &anyhow::Error) -> (u8, &'static str) {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<PlanError>() {
            return match e {
                PlanError::StaleArtifact { .. } => (exit_code::STALE_ARTIFACT, "stale_artifact"),
                PlanError::ArtifactNotFound(_) => (exit_code::FAILURE, "artifact_not_found"),
                PlanError::CorruptArtifact { .. } => (exit_code::FAILURE, "corrupt_artifact"),
                PlanError::InvalidArtifactId(_) => (exit_code::FAILURE, "invalid_artifact_id"),
            };
        }
        if let Some(e) = cause.downcast_ref::<StateError>() {
            return match e {
                StateError::LockContention { .. } => {
                    (exit_code::LOCK_CONTENTION, "lock_contention")
                }
                StateError::LockTimeout { .. } => (exit_code::LOCK_TIMEOUT, "lock_timeout"),
                StateError::LockMismatch { .. } | StateError::NotLocked { .. } => {
                    (exit_code::FAILURE, "lock_mismatch")
                }
                StateError::InvalidReference(_) => (exit_code::FAILURE, "invalid_state_reference"),
            };
        }
        if let Some(e) = cause.downcast_ref::<MirrorError>() {
            if matches!(e, MirrorError::LeaseConflict { .. }) {
                return (exit_code::LEASE_CONFLICT, "lease_conflict");
            }
            return (exit_code::FAILURE, "mirror_failed");
        }
        if cause.downcast_ref::<AuthenticationError>().is_some() {
            return (exit_code::AUTHENTICATION, "authentication_failed");
        }
        if cause.downcast_ref::<ManifestError>().is_some() {
            return (exit_code::FAILURE, "invalid_manifest");
        }
        if cause.downcast_ref::<ConfigError>().is_some() {
            return (exit_code::FAILURE, "invalid_config");
        }
    }
    (exit_code::FAILURE, "error")
}
