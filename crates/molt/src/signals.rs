//! Signal-driven control loop.
//!
//! - `SIGHUP` → restart: hand the listener to a successor, then drain and exit
//! - `SIGINT` / `SIGTERM` → graceful shutdown: drain and exit
//!
//! A failed restart leaves the process serving; another `SIGHUP` is needed
//! to try again.

use std::io;

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::coordinator::RestartCoordinator;
use crate::lifecycle::ServerLifecycle;
use crate::spawner::{ProcessSpawner, Spawn};

/// Capacity of the buffered signal queue.
pub const SIGNAL_QUEUE_DEPTH: usize = 1024;

/// What a received signal asks the controller to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Hang-up class: hand off to a successor.
    Restart,
    /// Interrupt/terminate class: stop serving.
    Shutdown,
}

/// Why the controller loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A successor took over the listener.
    HandedOff,
    /// A shutdown signal was received.
    Shutdown,
    /// The signal queue closed.
    QueueClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerExit {
    pub reason: ExitReason,
    /// Whether in-flight requests finished before the shutdown deadline.
    pub drained: bool,
}

/// Forward OS signals into a buffered queue of [`ControlSignal`]s.
///
/// Must be called from within a tokio runtime.
pub fn signal_queue() -> io::Result<mpsc::Receiver<ControlSignal>> {
    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let (tx, rx) = mpsc::channel(SIGNAL_QUEUE_DEPTH);

    tokio::spawn(async move {
        loop {
            let sig = tokio::select! {
                Some(()) = hangup.recv() => {
                    info!("Received SIGHUP, initiating graceful restart");
                    ControlSignal::Restart
                }
                Some(()) = interrupt.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    ControlSignal::Shutdown
                }
                Some(()) = terminate.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    ControlSignal::Shutdown
                }
                else => break,
            };
            if tx.send(sig).await.is_err() {
                break;
            }
        }
    });

    Ok(rx)
}

/// Top-level loop owning the restart coordinator.
pub struct SignalController<S = ProcessSpawner> {
    coordinator: RestartCoordinator<S>,
}

impl<S: Spawn> SignalController<S> {
    pub fn new(coordinator: RestartCoordinator<S>) -> Self {
        Self { coordinator }
    }

    /// Process signals until the server is handed off or told to stop.
    ///
    /// Restart attempts run inline, so a second `SIGHUP` arriving mid-attempt
    /// waits in the queue until the first one finishes.
    pub async fn run(
        self,
        mut signals: mpsc::Receiver<ControlSignal>,
        server: ServerLifecycle,
    ) -> ControllerExit {
        let shutdown_timeout = self.coordinator.registry().config().shutdown_timeout;

        let reason = loop {
            match signals.recv().await {
                Some(ControlSignal::Restart) => match self.coordinator.restart().await {
                    Ok(_) => {
                        info!("Listener sent, shutting down");
                        break ExitReason::HandedOff;
                    }
                    Err(e) => {
                        warn!(error = %e, "Restart aborted, continuing to serve");
                    }
                },
                Some(ControlSignal::Shutdown) => break ExitReason::Shutdown,
                None => {
                    warn!("Signal queue closed, shutting down");
                    break ExitReason::QueueClosed;
                }
            }
        };

        let drained = server.shutdown(shutdown_timeout).await;
        ControllerExit { reason, drained }
    }
}
