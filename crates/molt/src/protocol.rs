//! Handoff wire protocol.
//!
//! The client sends the bare ASCII token [`GET_LISTENER`] with no length
//! prefix or terminator. The server answers with a single JSON object
//! describing the listener and then closes the connection:
//!
//! ```text
//! {"addr":":8000","fd":3,"filename":"tcp:0.0.0.0:8000"}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{HandoffError, Result};

/// Request token a successor sends to ask for the listener.
pub const GET_LISTENER: &str = "get_listener";

/// File-table index the listener occupies in a successor: right after
/// stdin, stdout and stderr.
pub const INHERITED_LISTENER_FD: i32 = 3;

/// Largest request the server reads from a client.
pub const MAX_REQUEST_LEN: usize = 512;

/// Largest metadata response the client accepts.
pub const MAX_RESPONSE_LEN: usize = 1024;

/// Description of a listener that a successor already holds in its file table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerMetadata {
    /// Configured address of the listener.
    pub addr: String,
    /// Position of the descriptor in the successor's file table.
    pub fd: i32,
    /// OS-level name of the exported descriptor.
    pub filename: String,
}

impl ListenerMetadata {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(HandoffError::NoMetadata);
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A request received on the handoff transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    GetListener,
    Unknown(String),
}

impl Command {
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes == GET_LISTENER.as_bytes() {
            Command::GetListener
        } else {
            Command::Unknown(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}
