//! Startup listener resolution: import from a predecessor, else bind fresh.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ProcessConfig;
use crate::error::{HandoffError, Result};
use crate::listener::ListenerHandle;
use crate::transport::request_listener;

/// Resolves the listener every process instance starts with.
///
/// The first generation finds no transport and binds; every later generation
/// finds its parent's transport and inherits. Callers see the same call
/// either way.
#[derive(Debug, Clone)]
pub struct BootstrapResolver {
    config: Arc<ProcessConfig>,
}

impl BootstrapResolver {
    pub fn new(config: Arc<ProcessConfig>) -> Self {
        Self { config }
    }

    /// Obtain a listener. Only a failed fresh bind is an error.
    pub async fn resolve(&self) -> Result<ListenerHandle> {
        match self.import().await {
            Ok(listener) => {
                info!(
                    pid = std::process::id(),
                    addr = %self.config.addr,
                    "Imported listener from predecessor"
                );
                return Ok(listener);
            }
            Err(e) if e.is_expected() => {
                debug!(path = %self.config.sock_file.display(), "No predecessor to import from");
            }
            Err(e) => {
                warn!(error = %e, "Listener import failed, binding a fresh listener");
            }
        }

        let listener = ListenerHandle::bind(&self.config)?;
        info!(
            pid = std::process::id(),
            addr = %self.config.addr,
            "Bound fresh listener"
        );
        Ok(listener)
    }

    /// Import the listener a predecessor is handing off.
    pub async fn import(&self) -> Result<ListenerHandle> {
        let metadata = request_listener(&self.config.sock_file).await?;
        debug!(
            addr = %metadata.addr,
            fd = metadata.fd,
            filename = %metadata.filename,
            "Received listener metadata"
        );

        if metadata.addr != self.config.addr {
            return Err(HandoffError::MetadataMismatch {
                expected: self.config.addr.clone(),
                received: metadata.addr,
            });
        }

        if metadata.fd < 0 {
            return Err(HandoffError::malformed(format!(
                "negative fd {}",
                metadata.fd
            )));
        }

        // SAFETY: the predecessor placed the listener at this index of our
        // file table before exec; nothing else in this process owns it.
        let listener = unsafe { ListenerHandle::from_inherited(metadata.addr, metadata.fd) }?;
        info!(
            fd = metadata.fd,
            filename = %metadata.filename,
            "Rebuilt inherited listener"
        );
        Ok(listener)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ListenerMetadata;
    use crate::transport::HandoffServer;
    use std::time::Duration;

    fn config(dir: &tempfile::TempDir) -> Arc<ProcessConfig> {
        Arc::new(ProcessConfig::new("127.0.0.1:0").with_sock_file(dir.path().join("h.sock")))
    }

    #[tokio::test]
    async fn test_no_predecessor_binds_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BootstrapResolver::new(config(&dir));

        let listener = resolver.resolve().await.unwrap();
        assert_eq!(listener.addr(), "127.0.0.1:0");
        assert!(listener.local_addr().unwrap().port() > 0);
    }

    #[tokio::test]
    async fn test_repeated_bootstrap_does_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = BootstrapResolver::new(config(&dir));

        for _ in 0..5 {
            let listener = resolver.resolve().await.unwrap();
            assert_eq!(listener.addr(), "127.0.0.1:0");
        }
        assert!(!dir.path().join("h.sock").exists());
    }

    #[tokio::test]
    async fn test_mismatched_address_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let server = HandoffServer::bind(&config.sock_file).unwrap();

        let serve = tokio::spawn(async move {
            let mut conn = server.accept_within(Duration::from_secs(5)).await.unwrap();
            conn.read_command().await.unwrap();
            conn.send_metadata(&ListenerMetadata {
                addr: ":9999".into(),
                fd: 3,
                filename: "tcp:0.0.0.0:9999".into(),
            })
            .await
            .unwrap();
        });

        let resolver = BootstrapResolver::new(Arc::clone(&config));
        assert!(matches!(
            resolver.import().await,
            Err(HandoffError::MetadataMismatch { .. })
        ));
        serve.await.unwrap();

        // The transport is gone now, so resolve binds fresh.
        let listener = resolver.resolve().await.unwrap();
        assert_eq!(listener.addr(), "127.0.0.1:0");
    }

    #[tokio::test]
    async fn test_malformed_metadata_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let server = HandoffServer::bind(&config.sock_file).unwrap();

        let serve = tokio::spawn(async move {
            let mut conn = server.accept_within(Duration::from_secs(5)).await.unwrap();
            conn.read_command().await.unwrap();
            conn.send_metadata(&ListenerMetadata {
                addr: "127.0.0.1:0".into(),
                fd: -1,
                filename: String::new(),
            })
            .await
            .unwrap();
        });

        let listener = BootstrapResolver::new(config).resolve().await.unwrap();
        assert!(listener.local_addr().unwrap().port() > 0);
        serve.await.unwrap();
    }
}
