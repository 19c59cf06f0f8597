//! Restart coordinator: the parent's side of one handoff attempt.
//!
//! ```text
//! Idle -> SocketOpening -> SocketOpen -> HandoffComplete
//!              |               |
//!              +---> Failed <--+
//! ```
//!
//! A transport worker binds the handoff socket, accepts one successor and
//! answers its request, reporting progress as [`SessionEvent`]s. The
//! coordinator spawns the successor when the socket is open and returns once
//! the listener has been sent or the attempt has failed. A failed attempt
//! leaves the parent's listener untouched.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::config::ProcessConfig;
use crate::error::{HandoffError, Result};
use crate::listener::{ListenerHandle, ListenerRegistry};
use crate::protocol::{Command, ListenerMetadata, INHERITED_LISTENER_FD};
use crate::spawner::{ProcessSpawner, Spawn, SpawnedChild};
use crate::transport::HandoffServer;

/// States of one restart attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartState {
    Idle,
    SocketOpening,
    SocketOpen,
    HandoffComplete,
    Failed,
}

/// Progress reported by the transport worker.
#[derive(Debug)]
enum SessionEvent {
    SocketOpened,
    ListenerSent(ListenerMetadata),
}

/// A completed handoff.
#[derive(Debug, Clone)]
pub struct Handoff {
    /// The successor started for this attempt, if the spawn succeeded.
    pub child: Option<SpawnedChild>,
    /// What was sent to the successor.
    pub metadata: ListenerMetadata,
}

/// Transient state of one attempt. Dropped when the attempt ends.
struct RestartSession {
    state: RestartState,
    events: mpsc::Receiver<SessionEvent>,
    errors: oneshot::Receiver<HandoffError>,
    placement: Option<oneshot::Sender<Option<SpawnedChild>>>,
    child: Option<SpawnedChild>,
}

impl RestartSession {
    fn transition(&mut self, to: RestartState) {
        debug!(from = ?self.state, to = ?to, "Restart state transition");
        self.state = to;
    }
}

/// Runs restart attempts for the process-wide listener.
pub struct RestartCoordinator<S = ProcessSpawner> {
    registry: ListenerRegistry,
    spawner: S,
}

impl RestartCoordinator<ProcessSpawner> {
    pub fn new(registry: ListenerRegistry) -> Self {
        Self::with_spawner(registry, ProcessSpawner::new())
    }
}

impl<S: Spawn> RestartCoordinator<S> {
    pub fn with_spawner(registry: ListenerRegistry, spawner: S) -> Self {
        Self { registry, spawner }
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    /// Run one restart attempt to completion.
    ///
    /// Returns once the successor has received the listener metadata, or with
    /// the reason the attempt failed. Spawning is not retried.
    pub async fn restart(&self) -> Result<Handoff> {
        let config = Arc::clone(self.registry.config());
        let listener = Arc::clone(self.registry.listener());

        let (event_tx, events) = mpsc::channel(4);
        let (error_tx, errors) = oneshot::channel();
        let (placement_tx, placement_rx) = oneshot::channel();

        let mut session = RestartSession {
            state: RestartState::Idle,
            events,
            errors,
            placement: Some(placement_tx),
            child: None,
        };
        session.transition(RestartState::SocketOpening);

        let worker = tokio::spawn({
            let config = Arc::clone(&config);
            let listener = Arc::clone(&listener);
            async move {
                if let Err(e) = serve_handoff(config, listener, event_tx, placement_rx).await {
                    let _ = error_tx.send(e);
                }
            }
        });

        let outcome = self.drive(&mut session, &listener).await;
        // The worker owns the transport; waiting for it guarantees the socket
        // file is gone before the caller acts on the outcome.
        let _ = worker.await;

        match &outcome {
            Ok(handoff) => info!(
                child_pid = handoff.child.map(|c| c.pid),
                fd = handoff.metadata.fd,
                "Listener handed off to successor"
            ),
            Err(e) => error!(state = ?session.state, error = %e, "Restart attempt failed"),
        }
        outcome
    }

    async fn drive(
        &self,
        session: &mut RestartSession,
        listener: &ListenerHandle,
    ) -> Result<Handoff> {
        loop {
            tokio::select! {
                Some(event) = session.events.recv() => match event {
                    SessionEvent::SocketOpened => {
                        session.transition(RestartState::SocketOpen);
                        match self.spawner.spawn(listener) {
                            Ok(child) => {
                                info!(child_pid = child.pid, "Forked successor, waiting for spin-up");
                                session.child = Some(child);
                            }
                            Err(e) => error!(error = %e, "Unable to spawn successor"),
                        }
                        if let Some(placement) = session.placement.take() {
                            let _ = placement.send(session.child);
                        }
                    }
                    SessionEvent::ListenerSent(metadata) => {
                        session.transition(RestartState::HandoffComplete);
                        return Ok(Handoff {
                            child: session.child,
                            metadata,
                        });
                    }
                },
                Ok(err) = &mut session.errors => {
                    session.transition(RestartState::Failed);
                    return Err(err);
                }
                else => {
                    session.transition(RestartState::Failed);
                    return Err(std::io::Error::other("handoff worker exited without an outcome").into());
                }
            }
        }
    }
}

/// Transport side of an attempt: bind, accept one successor, answer it.
async fn serve_handoff(
    config: Arc<ProcessConfig>,
    listener: Arc<ListenerHandle>,
    events: mpsc::Sender<SessionEvent>,
    placement: oneshot::Receiver<Option<SpawnedChild>>,
) -> Result<()> {
    let server = HandoffServer::bind(&config.sock_file)?;
    if events.send(SessionEvent::SocketOpened).await.is_err() {
        return Ok(());
    }

    let mut conn = server.accept_within(config.child_timeout).await?;
    debug!("Successor connected to handoff transport");

    match conn.read_command().await? {
        Command::GetListener => {}
        Command::Unknown(other) => return Err(HandoffError::UnrecognizedCommand(other)),
    }

    // The coordinator always answers once the spawn has been attempted.
    let fd = placement
        .await
        .ok()
        .flatten()
        .map(|child| child.listener_fd)
        .unwrap_or(INHERITED_LISTENER_FD);

    let metadata = ListenerMetadata {
        addr: config.addr.clone(),
        fd,
        filename: listener.descriptor_name()?,
    };
    info!(
        addr = %metadata.addr,
        fd = metadata.fd,
        filename = %metadata.filename,
        "get_listener received, sending listener metadata"
    );
    conn.send_metadata(&metadata).await?;

    let _ = events.send(SessionEvent::ListenerSent(metadata)).await;
    Ok(())
}
