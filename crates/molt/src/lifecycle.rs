//! Serving loop lifecycle with bounded graceful shutdown.
//!
//! The request handler is supplied by the caller as a future that serves
//! until its [`CancellationToken`] fires. Shutdown cancels the token, waits
//! for the future to finish draining, and aborts it when the deadline passes.

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A running serving loop.
pub struct ServerLifecycle {
    /// Cancelled when the server should stop accepting new connections.
    stop_accepting: CancellationToken,
    task: JoinHandle<io::Result<()>>,
}

impl ServerLifecycle {
    /// Spawn the serving loop.
    ///
    /// `serve` receives the stop token and must stop accepting once it is
    /// cancelled, returning after in-flight requests complete.
    pub fn start<F, Fut>(serve: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = io::Result<()>> + Send + 'static,
    {
        let stop_accepting = CancellationToken::new();
        let task = tokio::spawn(serve(stop_accepting.clone()));
        Self {
            stop_accepting,
            task,
        }
    }

    /// Get a `CancellationToken` that fires when the accept loop should stop.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop_accepting.clone()
    }

    /// Whether the serving loop has already returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop accepting and drain, forcing the loop down after `timeout`.
    ///
    /// Returns `true` if the loop finished within the deadline, `false` if it
    /// was aborted.
    pub async fn shutdown(mut self, timeout: Duration) -> bool {
        info!(
            pid = std::process::id(),
            timeout_ms = timeout.as_millis() as u64,
            "Server shutting down"
        );
        self.stop_accepting.cancel();

        tokio::select! {
            result = &mut self.task => {
                match result {
                    Ok(Ok(())) => info!("Server drained cleanly"),
                    Ok(Err(e)) => error!(error = %e, "Server exited with an error"),
                    Err(e) => error!(error = %e, "Server task failed"),
                }
                true
            }
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Shutdown deadline expired, aborting in-flight requests"
                );
                self.task.abort();
                false
            }
        }
    }
}
