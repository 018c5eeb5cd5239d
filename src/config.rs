use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Which hosting strategies the host may try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyPreference {
    /// Service control manager first, console otherwise.
    #[default]
    Auto,
    Native,
    Console,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub strategy: StrategyPreference,
    /// Wait hint reported while start or stop is pending.
    #[serde(default)]
    pub pending_wait_hint_ms: u64,
}

fn default_log_level() -> String { "info".to_string() }

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            strategy: StrategyPreference::Auto,
            pending_wait_hint_ms: 0,
        }
    }
}

impl HostConfig {
    pub fn pending_wait_hint(&self) -> Duration {
        Duration::from_millis(self.pending_wait_hint_ms)
    }
}

/// Load configuration from `SERVHOST_CONFIG` (TOML) if set, otherwise `servhost.toml`.
/// If the file doesn't exist, return defaults.
pub fn load_config() -> Result<HostConfig> {
    let config_path = std::env::var("SERVHOST_CONFIG").unwrap_or_else(|_| "servhost.toml".into());
    load_config_from(config_path)
}

pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<HostConfig> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(HostConfig::default());
    }
    let content = std::fs::read_to_string(path)?;
    let cfg: HostConfig = toml::from_str(&content)?;
    Ok(cfg)
}
