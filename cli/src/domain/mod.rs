//! Domain layer: pure business logic, types, and validation.
//!
//! This module has zero imports from `crate::infra`, `crate::commands`,
//! `crate::application`, `tokio`, `std::fs`, `std::process`, or `std::net`.
//! All functions are synchronous and take data in, returning data out.

pub mod config;
pub mod error;
pub mod manifest;
pub mod mirror;
pub mod plan;
pub mod state;

pub use config::{InfrasyncConfig, validate_config_key, validate_config_value};
pub use error::{
    AuthenticationError, ConfigError, ManifestError, MirrorError, PlanError, StaleReason,
    StateError, classify,
};
pub use manifest::{DeploymentManifest, Fingerprint, ResolvedManifest};
pub use mirror::{CommitId, Lease, MirrorSpec, SyncOutcome};
pub use plan::{PlanArtifact, PlanSummary, ResourceChange};
pub use state::{LockAttempt, LockPolicy, StateRef};
