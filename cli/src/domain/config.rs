//! Domain types and validators for infrasync configuration.
//!
//! Pure functions only: no I/O, no async, no filesystem access.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::ConfigError;
use crate::domain::state::LockPolicy;

// ── Constants ────────────────────────────────────────────────────────────────

pub const VALID_CONFIG_KEYS: &[&str] = &[
    "backend.root",
    "lock.timeout_secs",
    "lock.poll_interval_ms",
    "artifacts.dir",
    "artifacts.ttl_secs",
    "mirror.cache_dir",
    "mirror.retries",
    "mirror.timeout_secs",
];

const MIN_POLL_INTERVAL_MS: u64 = 50;
const MIN_ARTIFACT_TTL_SECS: u64 = 60;
const MAX_ARTIFACT_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const MAX_MIRROR_RETRIES: u32 = 10;

// ── Config schema ────────────────────────────────────────────────────────────

/// Top-level configuration stored in `~/.infrasync/config.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct InfrasyncConfig {
    pub backend: BackendConfig,
    pub lock: LockConfig,
    pub artifacts: ArtifactConfig,
    pub mirror: MirrorConfig,
}

/// State backend location. `None` means `~/.infrasync/backend`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
}

/// Lock acquisition behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LockConfig {
    /// `0` fails immediately when the state is locked.
    pub timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            poll_interval_ms: 500,
        }
    }
}

/// Plan artifact storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ArtifactConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
    pub ttl_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: None,
            ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Repository mirror behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MirrorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,
    /// Lease-conflict retries with a refreshed lease.
    pub retries: u32,
    /// Per git invocation.
    pub timeout_secs: u64,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            retries: 0,
            timeout_secs: 300,
        }
    }
}

impl InfrasyncConfig {
    /// Lock policy derived from `lock.*`.
    #[must_use]
    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_secs(self.lock.timeout_secs),
            poll_interval: Duration::from_millis(self.lock.poll_interval_ms),
        }
    }

    /// Artifact lifetime derived from `artifacts.ttl_secs`.
    #[must_use]
    pub fn artifact_ttl(&self) -> chrono::Duration {
        let secs = self.artifacts.ttl_secs.min(MAX_ARTIFACT_TTL_SECS);
        chrono::Duration::seconds(i64::try_from(secs).unwrap_or(0))
    }

    /// Set a whitelisted key from its string form.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unknown keys or invalid values.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_config_key(key)?;
        validate_config_value(key, value)?;
        match key {
            "backend.root" => self.backend.root = Some(PathBuf::from(value)),
            "lock.timeout_secs" => self.lock.timeout_secs = parse_u64(key, value)?,
            "lock.poll_interval_ms" => self.lock.poll_interval_ms = parse_u64(key, value)?,
            "artifacts.dir" => self.artifacts.dir = Some(PathBuf::from(value)),
            "artifacts.ttl_secs" => self.artifacts.ttl_secs = parse_u64(key, value)?,
            "mirror.cache_dir" => self.mirror.cache_dir = Some(PathBuf::from(value)),
            "mirror.retries" => {
                self.mirror.retries = u32::try_from(parse_u64(key, value)?).unwrap_or(u32::MAX);
            }
            "mirror.timeout_secs" => self.mirror.timeout_secs = parse_u64(key, value)?,
            _ => anyhow::bail!("Unknown setting: {key}"),
        }
        Ok(())
    }
}

// ── Validators ───────────────────────────────────────────────────────────────

/// Validates a configuration key against the whitelist.
///
/// # Errors
///
/// Returns an error if the key is not in the allowed list.
pub fn validate_config_key(key: &str) -> Result<()> {
    if !VALID_CONFIG_KEYS.contains(&key) {
        return Err(ConfigError::UnknownKey {
            key: key.to_string(),
            valid: VALID_CONFIG_KEYS.join(", "),
        }
        .into());
    }
    Ok(())
}

/// Validates a configuration value for the given key.
///
/// # Errors
///
/// Returns an error if the value is not valid for the key.
pub fn validate_config_value(key: &str, value: &str) -> Result<()> {
    let invalid = |expected: String| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
        expected,
    };
    match key {
        "backend.root" | "artifacts.dir" | "mirror.cache_dir" => {
            if value.trim().is_empty() {
                return Err(invalid("Expected a non-empty path".to_string()).into());
            }
        }
        "lock.timeout_secs" => {
            parse_u64(key, value)?;
        }
        "lock.poll_interval_ms" => {
            if parse_u64(key, value)? < MIN_POLL_INTERVAL_MS {
                return Err(invalid(format!("Expected at least {MIN_POLL_INTERVAL_MS}")).into());
            }
        }
        "artifacts.ttl_secs" => {
            if parse_u64(key, value)? < MIN_ARTIFACT_TTL_SECS {
                return Err(invalid(format!("Expected at least {MIN_ARTIFACT_TTL_SECS}")).into());
            }
        }
        "mirror.retries" => {
            if parse_u64(key, value)? > u64::from(MAX_MIRROR_RETRIES) {
                return Err(invalid(format!("Expected at most {MAX_MIRROR_RETRIES}")).into());
            }
        }
        "mirror.timeout_secs" => {
            if parse_u64(key, value)? == 0 {
                return Err(invalid("Expected a positive number of seconds".to_string()).into());
            }
        }
        _ => {}
    }
    Ok(())
}

fn parse_u64(key: &str, value: &str) -> Result<u64> {
    value.trim().parse::<u64>().map_err(|_| {
        ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: "Expected a non-negative integer".to_string(),
        }
        .into()
    })
}

// ── Unit tests ───────────────────────────────────────────────────────────────
