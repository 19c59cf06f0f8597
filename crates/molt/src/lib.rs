//! # molt
//!
//! Zero-downtime process replacement for a network server. On restart the
//! running process spawns a successor that inherits the live listening
//! socket, and exits only after the successor has confirmed the handoff.
//!
//! ## Overview
//!
//! 1. Every process starts with [`ListenerRegistry::acquire`]: it asks a
//!    predecessor for its listener over the handoff transport and binds a
//!    fresh one if nobody answers
//! 2. The request handler serves on that listener under a [`ServerLifecycle`]
//! 3. [`SignalController`] waits for signals; a restart opens the handoff
//!    transport, spawns the successor with the listener at fd 3 and answers
//!    its `get_listener` request
//! 4. Once the metadata is sent the old process drains and exits. If anything
//!    fails before that it keeps serving
//!
//! ## Signal Conventions
//!
//! - `SIGHUP`: graceful restart (spawn successor, hand off, drain, exit)
//! - `SIGINT`, `SIGTERM`: graceful shutdown (drain, exit)
//!
//! ## Platform
//!
//! This crate requires Unix (Linux / macOS). It will not compile on other platforms.

#[cfg(not(unix))]
compile_error!("molt requires a Unix platform (Linux or macOS)");

mod bootstrap;
mod config;
mod coordinator;
mod error;
mod lifecycle;
mod listener;
pub mod protocol;
mod signals;
mod spawner;
mod transport;

pub use bootstrap::BootstrapResolver;
pub use config::{ProcessConfig, DEFAULT_ADDR, DEFAULT_SOCK_FILE};
pub use coordinator::{Handoff, RestartCoordinator, RestartState};
pub use error::{HandoffError, Result};
pub use lifecycle::ServerLifecycle;
pub use listener::{ExportedDescriptor, ListenerHandle, ListenerKind, ListenerRegistry};
pub use protocol::{ListenerMetadata, GET_LISTENER, INHERITED_LISTENER_FD};
pub use signals::{signal_queue, ControlSignal, ControllerExit, ExitReason, SignalController};
pub use spawner::{ProcessSpawner, Spawn, SpawnedChild};
pub use transport::{request_listener, HandoffConn, HandoffServer};
