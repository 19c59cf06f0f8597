//! Error types for listener handoff.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, HandoffError>;

/// Errors raised while acquiring, exporting or handing off a listener.
///
/// Bootstrap treats everything except [`HandoffError::BindFailed`] as a reason
/// to fall back to a fresh bind. Restart attempts never propagate past the
/// signal controller: the parent keeps serving.
#[derive(Debug, Error)]
pub enum HandoffError {
    /// No predecessor is listening on the handoff path. This is the normal
    /// state on a cold start.
    #[error("no handoff transport at {}", .path.display())]
    TransportUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The predecessor advertised a listener for a different address.
    #[error("metadata is for {received}, expected {expected}")]
    MetadataMismatch { expected: String, received: String },

    /// The metadata could not be parsed or describes an unusable descriptor.
    #[error("malformed listener metadata: {0}")]
    MetadataMalformed(String),

    /// The predecessor closed the connection without sending metadata.
    #[error("listener metadata not received from handoff transport")]
    NoMetadata,

    /// A fresh listener could not be bound.
    #[error("failed to bind listener on {addr}: {source}")]
    BindFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The successor process could not be started.
    #[error("failed to spawn successor: {0}")]
    SpawnFailed(#[source] std::io::Error),

    /// No successor connected to the handoff transport in time.
    #[error("no child connected within {0:?}")]
    HandoffTimeout(std::time::Duration),

    /// The descriptor is not a byte-stream listener.
    #[error("unsupported listener kind: {0}")]
    UnsupportedListenerKind(String),

    /// A peer sent something other than the listener request.
    #[error("unrecognized handoff command: {0:?}")]
    UnrecognizedCommand(String),

    /// The handoff transport could not be bound (for example the path is in use).
    #[error("failed to open handoff transport at {}: {source}", .path.display())]
    TransportBind {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Any other IO failure on the handoff transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HandoffError {
    /// Create a new malformed-metadata error.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MetadataMalformed(msg.into())
    }

    /// Create a new unsupported-kind error.
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedListenerKind(msg.into())
    }

    /// Whether this error is part of normal operation rather than a failure.
    pub fn is_expected(&self) -> bool {
        matches!(self, Self::TransportUnavailable { .. })
    }
}

impl From<serde_json::Error> for HandoffError {
    fn from(err: serde_json::Error) -> Self {
        Self::MetadataMalformed(err.to_string())
    }
}
