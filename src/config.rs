use crate::constants::{
    DEFAULT_LISTEN_PORT, DEFAULT_TIMEOUT_SECS, EPHEMERAL_PORT_MAX, EPHEMERAL_PORT_MIN,
    MAX_PORT_PROBES, MAX_RETRIES,
};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,
    pub listen_port: u16,
    pub root_dir: String,
    pub allow_write: bool,
    pub timeout_secs: u64, // Retransmission window of one exchange
    pub max_retries: u32,
    pub port_range_start: u16,
    pub port_range_end: u16,
    pub max_port_probes: usize,
    pub max_sessions: Option<usize>, // None means bounded only by the port range
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: String::from("0.0.0.0"),
            listen_port: DEFAULT_LISTEN_PORT,
            root_dir: String::from("/srv/tftp"),
            allow_write: true,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: MAX_RETRIES,
            port_range_start: EPHEMERAL_PORT_MIN,
            port_range_end: EPHEMERAL_PORT_MAX,
            max_port_probes: MAX_PORT_PROBES,
            max_sessions: None,
        }
    }
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {}", path))?;
        Self::from_toml(&config_str)
            .with_context(|| format!("Failed to parse configuration file: {}", path))
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config = toml::from_str(config_str)?;
        Ok(config)
    }

    /// Rejects settings the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if server.port_range_start == 0 || server.port_range_start > server.port_range_end {
            bail!(
                "Invalid session port range: {}-{}",
                server.port_range_start,
                server.port_range_end
            );
        }
        if server.timeout_secs == 0 {
            bail!("timeout_secs must be at least 1");
        }
        if server.max_port_probes == 0 {
            bail!("max_port_probes must be at least 1");
        }
        if !Path::new(&server.root_dir).is_dir() {
            bail!("Root directory does not exist: {}", server.root_dir);
        }
        Ok(())
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }
}
