//! Per-process handoff configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default listen address.
pub const DEFAULT_ADDR: &str = ":8000";

/// Default handoff transport path.
pub const DEFAULT_SOCK_FILE: &str = "/tmp/molt.sock";

/// Immutable configuration for one process instance.
///
/// Built once at startup and shared by reference (usually behind an `Arc`)
/// with every component that needs it. Successor processes are started with
/// no arguments, so every generation must be able to rebuild the same value
/// from its inherited environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Address the network listener binds to. Compared verbatim against the
    /// address a predecessor advertises.
    pub addr: String,
    /// Filesystem path of the handoff transport.
    pub sock_file: PathBuf,
    /// Upper bound on draining in-flight requests during shutdown.
    pub shutdown_timeout: Duration,
    /// Upper bound on waiting for a successor to connect during a restart.
    pub child_timeout: Duration,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            sock_file: PathBuf::from(DEFAULT_SOCK_FILE),
            shutdown_timeout: Duration::from_secs(5),
            child_timeout: Duration::from_secs(5),
        }
    }
}

impl ProcessConfig {
    /// Create a configuration for `addr` with the default transport path and timeouts.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            ..Self::default()
        }
    }

    pub fn with_sock_file(mut self, path: impl AsRef<Path>) -> Self {
        self.sock_file = path.as_ref().to_path_buf();
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_child_timeout(mut self, timeout: Duration) -> Self {
        self.child_timeout = timeout;
        self
    }

    /// The address in a form `std::net` can bind.
    ///
    /// A bare `:port` means every interface, as in Go-style listen addresses.
    pub fn bind_addr(&self) -> String {
        if self.addr.starts_with(':') {
            format!("0.0.0.0{}", self.addr)
        } else {
            self.addr.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProcessConfig::default();
        assert_eq!(config.addr, ":8000");
        assert_eq!(config.sock_file, PathBuf::from("/tmp/molt.sock"));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.child_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_bind_addr_expands_bare_port() {
        assert_eq!(ProcessConfig::new(":8000").bind_addr(), "0.0.0.0:8000");
        assert_eq!(
            ProcessConfig::new("127.0.0.1:9000").bind_addr(),
            "127.0.0.1:9000"
        );
    }

    #[test]
    fn test_builders() {
        let config = ProcessConfig::new("127.0.0.1:0")
            .with_sock_file("/run/app.sock")
            .with_child_timeout(Duration::from_millis(250))
            .with_shutdown_timeout(Duration::from_secs(1));
        assert_eq!(config.sock_file, PathBuf::from("/run/app.sock"));
        assert_eq!(config.child_timeout, Duration::from_millis(250));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }
}
