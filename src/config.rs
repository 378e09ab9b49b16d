use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn default_config_path() -> PathBuf {
    PathBuf::from("/etc/wg-sentry/config.json")
}

/// Optional JSON config file. Command-line arguments and environment
/// variables override anything set here.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub command_url: Option<String>,
    #[serde(default)]
    pub interface: Option<String>,
    #[serde(default)]
    pub heartbeat_interval: Option<u64>,
    #[serde(default)]
    pub http_port: Option<u16>,
}

pub fn load_config(path: &Path) -> Result<FileConfig> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display())),
        Err(_) => Ok(FileConfig::default()),
    }
}

/// Fully resolved agent configuration. The server identity is the one
/// mandatory field; everything else has a default or is optional.
#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub backend_url: String,
    pub server_id: String,
    pub api_key: Option<String>,
    pub command_url: Option<String>,
    pub interface: String,
    pub heartbeat_period: Duration,
    pub http_port: Option<u16>,
}
