// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Configuration management for the daemon: the three router timeouts
//! and the hotword auto-resume policy, loaded from `auroute.toml` with
//! a load-or-default fallback.

use auroute_core::backend::RouterTiming;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
    #[error("no config directory found")]
    NoConfigDir,
}

/// The router's tunable timeouts plus hotword auto-resume policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub idle_grace_ms: u64,
    pub init_retry_delay_ms: u64,
    pub drain_min_ms: u64,
    pub hotword_pause_at_suspend: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            idle_grace_ms: 10_000,
            init_retry_delay_ms: 1_000,
            drain_min_ms: 10,
            hotword_pause_at_suspend: false,
        }
    }
}

impl RouterConfig {
    pub fn from_toml(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn timing(&self) -> RouterTiming {
        RouterTiming {
            idle_grace: Duration::from_millis(self.idle_grace_ms),
            init_retry_delay: Duration::from_millis(self.init_retry_delay_ms),
            drain_min: Duration::from_millis(self.drain_min_ms),
        }
    }
}

pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self, ConfigError> {
        let config_dir = directories::ProjectDirs::from("io", "auroute", "auroute")
            .map(|d| d.config_dir().to_path_buf())
            .ok_or(ConfigError::NoConfigDir)?;

        fs::create_dir_all(&config_dir)?;
        debug!(?config_dir, "config directory");
        Ok(ConfigManager { config_dir })
    }

    fn config_path(&self) -> PathBuf {
        self.config_dir.join("auroute.toml")
    }

    pub fn load(&self) -> Result<RouterConfig, ConfigError> {
        let path = self.config_path();
        if !path.exists() {
            debug!("no config found, using defaults");
            return Ok(RouterConfig::default());
        }

        let content = fs::read_to_string(&path)?;
        let config = RouterConfig::from_toml(&content)?;
        info!(?path, "loaded router config");
        Ok(config)
    }

    pub fn save(&self, config: &RouterConfig) -> Result<(), ConfigError> {
        let path = self.config_path();
        let content = config.to_toml()?;
        fs::write(&path, content)?;
        debug!(?path, "saved router config");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_timeouts() {
        let cfg = RouterConfig::default();
        assert_eq!(cfg.idle_grace_ms, 10_000);
        assert_eq!(cfg.init_retry_delay_ms, 1_000);
        assert_eq!(cfg.drain_min_ms, 10);
        assert!(!cfg.hotword_pause_at_suspend);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = RouterConfig { idle_grace_ms: 5_000, hotword_pause_at_suspend: true, ..Default::default() };
        let toml_str = cfg.to_toml().unwrap();
        let parsed = RouterConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.idle_grace_ms, 5_000);
        assert!(parsed.hotword_pause_at_suspend);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let parsed = RouterConfig::from_toml("idle_grace_ms = 2000\n").unwrap();
        assert_eq!(parsed.idle_grace_ms, 2_000);
        assert_eq!(parsed.init_retry_delay_ms, 1_000);
    }
}
