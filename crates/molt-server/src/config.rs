//! Server configuration from an optional TOML file and `MOLT_*` variables.
//!
//! Successor processes are started without arguments, so nothing is read
//! from the command line. The environment is inherited across generations,
//! which keeps every generation on the same configuration.
//!
//! # Environment Variables
//!
//! - `MOLT_CONFIG`: path to a TOML file (optional)
//! - `MOLT_ADDR`: listen address. Default: `:8000`
//! - `MOLT_SOCK_FILE`: handoff socket path. Default: `/tmp/molt.sock`
//! - `MOLT_SHUTDOWN_TIMEOUT_SECS`: drain deadline. Default: `5`
//! - `MOLT_CHILD_TIMEOUT_SECS`: successor rendezvous deadline. Default: `5`
//!
//! Variables override values from the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use molt::ProcessConfig;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
    pub sock_file: PathBuf,
    pub shutdown_timeout_secs: u64,
    pub child_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: molt::DEFAULT_ADDR.to_string(),
            sock_file: PathBuf::from(molt::DEFAULT_SOCK_FILE),
            shutdown_timeout_secs: 5,
            child_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Load from `MOLT_CONFIG` (if set) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var_os("MOLT_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `lookup`, which maps variable names to values.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(addr) = lookup("MOLT_ADDR") {
            self.addr = addr;
        }
        if let Some(path) = lookup("MOLT_SOCK_FILE") {
            self.sock_file = PathBuf::from(path);
        }
        if let Some(secs) = lookup("MOLT_SHUTDOWN_TIMEOUT_SECS") {
            self.shutdown_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid MOLT_SHUTDOWN_TIMEOUT_SECS: {secs}"))?;
        }
        if let Some(secs) = lookup("MOLT_CHILD_TIMEOUT_SECS") {
            self.child_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid MOLT_CHILD_TIMEOUT_SECS: {secs}"))?;
        }
        Ok(())
    }

    pub fn process_config(&self) -> ProcessConfig {
        ProcessConfig::new(self.addr.clone())
            .with_sock_file(&self.sock_file)
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs))
            .with_child_timeout(Duration::from_secs(self.child_timeout_secs))
    }

    /// Log the current server configuration.
    pub fn log_config(&self) {
        info!("Listen address: {}", self.addr);
        info!("Handoff socket: {}", self.sock_file.display());
        info!("Shutdown timeout: {}s", self.shutdown_timeout_secs);
        info!("Child timeout: {}s", self.child_timeout_secs);
    }
}
