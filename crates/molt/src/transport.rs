//! Handoff transport: a Unix domain socket private to one restart attempt.
//!
//! The parent binds [`HandoffServer`] at the configured path, accepts one
//! successor, answers its request and drops the server, which unlinks the
//! path. The successor uses [`request_listener`] as a client.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{HandoffError, Result};
use crate::protocol::{
    Command, ListenerMetadata, GET_LISTENER, MAX_REQUEST_LEN, MAX_RESPONSE_LEN,
};

/// Server side of the handoff transport, owned by the parent.
#[derive(Debug)]
pub struct HandoffServer {
    listener: Arc<UnixListener>,
    path: PathBuf,
}

impl HandoffServer {
    /// Bind the transport at `path`.
    ///
    /// Fails if the path already exists, including a stale file left behind
    /// by a crashed process.
    pub fn bind(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let listener = UnixListener::bind(&path).map_err(|source| HandoffError::TransportBind {
            path: path.clone(),
            source,
        })?;
        debug!(path = %path.display(), "Handoff transport bound");
        Ok(Self {
            listener: Arc::new(listener),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept exactly one connection, giving up after `timeout`.
    ///
    /// The accept runs on a worker task raced against a timer. When the timer
    /// wins the worker is aborted; dropping the server afterwards closes the
    /// socket.
    pub async fn accept_within(&self, timeout: Duration) -> Result<HandoffConn> {
        let listener = Arc::clone(&self.listener);
        let (tx, rx) = oneshot::channel();
        let worker = tokio::spawn(async move {
            let _ = tx.send(listener.accept().await);
        });

        tokio::select! {
            accepted = rx => match accepted {
                Ok(Ok((stream, _))) => Ok(HandoffConn { stream }),
                Ok(Err(e)) => {
                    warn!(error = %e, "Error accepting handoff connection");
                    Err(e.into())
                }
                Err(_) => Err(io::Error::other("accept worker exited without a result").into()),
            },
            _ = tokio::time::sleep(timeout) => {
                worker.abort();
                Err(HandoffError::HandoffTimeout(timeout))
            }
        }
    }
}

impl Drop for HandoffServer {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to remove handoff socket");
            }
        }
    }
}

/// One accepted handoff connection.
#[derive(Debug)]
pub struct HandoffConn {
    stream: UnixStream,
}

impl HandoffConn {
    /// Read a single request message.
    pub async fn read_command(&mut self) -> Result<Command> {
        let mut buf = [0u8; MAX_REQUEST_LEN];
        let n = self.stream.read(&mut buf).await?;
        Ok(Command::parse(&buf[..n]))
    }

    /// Write the metadata as one message and close the connection.
    pub async fn send_metadata(mut self, metadata: &ListenerMetadata) -> Result<()> {
        let payload = metadata.encode()?;
        self.stream.write_all(&payload).await?;
        self.stream.shutdown().await?;
        Ok(())
    }
}

/// Ask a predecessor at `path` for its listener metadata.
///
/// A worker task reads the response while the request is written; the
/// response ends when the peer closes or [`MAX_RESPONSE_LEN`] bytes arrive.
/// There is no timeout on the read: the predecessor paces the exchange.
pub async fn request_listener(path: impl AsRef<Path>) -> Result<ListenerMetadata> {
    let path = path.as_ref();
    let stream = UnixStream::connect(path)
        .await
        .map_err(|source| HandoffError::TransportUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
    debug!(path = %path.display(), "Connected to handoff transport");

    let (mut reader, mut writer) = stream.into_split();
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut buf = Vec::with_capacity(MAX_RESPONSE_LEN);
        let read = (&mut reader)
            .take(MAX_RESPONSE_LEN as u64)
            .read_to_end(&mut buf)
            .await
            .map(|_| buf);
        let _ = tx.send(read);
    });

    writer.write_all(GET_LISTENER.as_bytes()).await?;

    let bytes = rx.await.map_err(|_| HandoffError::NoMetadata)??;
    ListenerMetadata::decode(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ListenerMetadata {
        ListenerMetadata {
            addr: ":8000".into(),
            fd: 3,
            filename: "tcp:0.0.0.0:8000".into(),
        }
    }

    #[tokio::test]
    async fn test_request_without_server_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let err = request_listener(dir.path().join("none.sock"))
            .await
            .unwrap_err();
        assert!(err.is_expected());
    }

    #[tokio::test]
    async fn test_exchange() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.sock");
        let server = HandoffServer::bind(&path).unwrap();

        let serve = tokio::spawn(async move {
            let mut conn = server.accept_within(Duration::from_secs(5)).await.unwrap();
            assert_eq!(conn.read_command().await.unwrap(), Command::GetListener);
            conn.send_metadata(&sample()).await.unwrap();
        });

        let metadata = request_listener(&path).await.unwrap();
        assert_eq!(metadata, sample());
        serve.await.unwrap();
    }

    #[tokio::test]
    async fn test_drop_unlinks_socket() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.sock");
        let server = HandoffServer::bind(&path).unwrap();
        assert!(path.exists());
        drop(server);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_bind_existing_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.sock");
        std::fs::write(&path, b"stale").unwrap();
        let err = HandoffServer::bind(&path).unwrap_err();
        assert!(matches!(err, HandoffError::TransportBind { .. }));
    }

    #[tokio::test]
    async fn test_accept_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let server = HandoffServer::bind(dir.path().join("handoff.sock")).unwrap();
        let err = server
            .accept_within(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, HandoffError::HandoffTimeout(_)));
    }

    #[tokio::test]
    async fn test_closed_without_reply_is_no_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("handoff.sock");
        let server = HandoffServer::bind(&path).unwrap();

        let serve = tokio::spawn(async move {
            let mut conn = server.accept_within(Duration::from_secs(5)).await.unwrap();
            conn.read_command().await.unwrap();
            drop(conn);
        });

        let err = request_listener(&path).await.unwrap_err();
        assert!(matches!(err, HandoffError::NoMetadata));
        serve.await.unwrap();
    }
}
