//! Default on-disk locations and the identity recorded in lock files.

use std::path::PathBuf;

use anyhow::Result;

use crate::domain::config::InfrasyncConfig;

/// `~/.infrasync`.
///
/// # Errors
///
/// Returns an error if the home directory cannot be determined.
pub fn infrasync_home() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.join(".infrasync"))
}

/// State backend root: `backend.root` or `~/.infrasync/backend`.
///
/// # Errors
///
/// Returns an error if no root is configured and the home directory is unknown.
pub fn backend_root(config: &InfrasyncConfig) -> Result<PathBuf> {
    match &config.backend.root {
        Some(root) => Ok(root.clone()),
        None => Ok(infrasync_home()?.join("backend")),
    }
}

/// Plan artifact directory: `artifacts.dir` or `~/.infrasync/plans`.
///
/// # Errors
///
/// Returns an error if no directory is configured and the home directory is unknown.
pub fn artifacts_dir(config: &InfrasyncConfig) -> Result<PathBuf> {
    match &config.artifacts.dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(infrasync_home()?.join("plans")),
    }
}

/// Mirror cache directory: `mirror.cache_dir` or `~/.infrasync/mirrors`.
///
/// # Errors
///
/// Returns an error if no directory is configured and the home directory is unknown.
pub fn mirror_cache_dir(config: &InfrasyncConfig) -> Result<PathBuf> {
    match &config.mirror.cache_dir {
        Some(dir) => Ok(dir.clone()),
        None => Ok(infrasync_home()?.join("mirrors")),
    }
}

/// Bare repository name for a destination remote: stable, filesystem-safe
/// and free of credentials.
#[must_use]
pub fn mirror_repo_name(destination: &str) -> String {
    let digest = crate::domain::manifest::sha256_hex(destination.as_bytes());
    format!("{}.git", &digest[..16])
}

/// `user@host` for lock files.
#[must_use]
pub fn current_identity() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());
    let host = std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .ok()
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
        })
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}")
}
