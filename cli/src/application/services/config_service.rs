//! Application service: configuration use-cases.

use crate::application::ports::ConfigStore;
use crate::domain::config::InfrasyncConfig;
use anyhow::Result;

/// Load configuration.
pub fn load_config(store: &impl ConfigStore) -> Result<InfrasyncConfig> {
    store.load()
}

/// Validate and persist a single `key = value` setting.
///
/// Returns the updated configuration. The file is left untouched when the
/// key or value is rejected.
///
/// # Errors
///
/// Returns a `ConfigError` for unknown keys or invalid values, or an I/O
/// error if the file cannot be written.
pub fn set_value(store: &impl ConfigStore, key: &str, value: &str) -> Result<InfrasyncConfig> {
    let mut config = store.load()?;
    config.set(key, value)?;
    store.save(&config)?;
    tracing::info!(key, value, "configuration updated");
    Ok(config)
}
