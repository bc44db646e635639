//! Loading `deployment.yaml` from disk and resolving it against the process
//! environment.

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::manifest::{DeploymentManifest, ResolvedManifest};

/// Read and parse a manifest file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid manifest.
pub fn load_manifest(path: &Path) -> Result<DeploymentManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read manifest {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("cannot parse manifest {}", path.display()))
}

/// Read a manifest and resolve `${env.*}` references from the process
/// environment.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded or fails validation.
pub fn resolve_manifest(path: &Path) -> Result<ResolvedManifest> {
    let manifest = load_manifest(path)?;
    let resolved = manifest
        .resolve(&|name| std::env::var(name).ok())
        .with_context(|| format!("invalid manifest {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        environment = %resolved.environment,
        state = %resolved.state_ref,
        fingerprint = %resolved.fingerprint.short(),
        "manifest resolved"
    );
    Ok(resolved)
}
