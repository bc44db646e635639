//! Infrastructure implementation of the `ConfigStore` port.

use anyhow::{Context, Result};
use std::path::PathBuf;

use crate::application::ports::ConfigStore;
use crate::domain::config::InfrasyncConfig;
use crate::infra::fs::write_atomic;

/// Environment variable that overrides the configuration file location.
pub const CONFIG_ENV: &str = "INFRASYNC_CONFIG";

/// Production implementation of `ConfigStore` that uses a YAML file on disk.
pub struct YamlConfigStore;

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<InfrasyncConfig> {
        let path = self.path()?;
        if !path.exists() {
            return Ok(InfrasyncConfig::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))
    }

    fn save(&self, config: &InfrasyncConfig) -> Result<()> {
        let path = self.path()?;
        let content = serde_yaml::to_string(config).context("cannot serialize config")?;
        write_atomic(&path, content.as_bytes())
            .with_context(|| format!("cannot write {}", path.display()))
    }

    fn path(&self) -> Result<PathBuf> {
        if let Ok(val) = std::env::var(CONFIG_ENV)
            && !val.is_empty()
        {
            return Ok(PathBuf::from(val));
        }
        Ok(super::paths::infrasync_home()?.join("config.yaml"))
    }
}
