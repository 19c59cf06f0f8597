//! In-process handoff tests.
//!
//! A test spawner plays the successor: instead of starting a process it
//! duplicates the listener into a fresh descriptor slot (standing in for the
//! child's file table) and runs the successor's bootstrap on a task.

use std::net::TcpListener;
use std::os::fd::IntoRawFd;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use molt::{
    BootstrapResolver, ControlSignal, ExitReason, HandoffError, ListenerHandle,
    ListenerRegistry, ProcessConfig, ProcessSpawner, RestartCoordinator, ServerLifecycle,
    SignalController, Spawn, SpawnedChild,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};

type Imported = oneshot::Receiver<molt::Result<ListenerHandle>>;

struct InProcessSuccessor {
    config: Arc<ProcessConfig>,
    imported: Mutex<Option<oneshot::Sender<molt::Result<ListenerHandle>>>>,
}

impl InProcessSuccessor {
    fn new(config: Arc<ProcessConfig>) -> (Self, Imported) {
        let (tx, rx) = oneshot::channel();
        let successor = Self {
            config,
            imported: Mutex::new(Some(tx)),
        };
        (successor, rx)
    }
}

impl Spawn for InProcessSuccessor {
    fn spawn(&self, listener: &ListenerHandle) -> molt::Result<SpawnedChild> {
        let slot = listener.export_descriptor()?.fd.into_raw_fd();
        let config = Arc::clone(&self.config);
        let reply = self.imported.lock().unwrap().take();

        tokio::spawn(async move {
            let imported = BootstrapResolver::new(config).import().await;
            if let Some(reply) = reply {
                let _ = reply.send(imported);
            }
        });

        Ok(SpawnedChild {
            pid: std::process::id(),
            listener_fd: slot,
        })
    }
}

fn parent(dir: &tempfile::TempDir, child_timeout: Duration) -> (Arc<ProcessConfig>, ListenerRegistry) {
    let config = Arc::new(
        ProcessConfig::new("127.0.0.1:0")
            .with_sock_file(dir.path().join("handoff.sock"))
            .with_child_timeout(child_timeout)
            .with_shutdown_timeout(Duration::from_secs(2)),
    );
    let listener = ListenerHandle::from_tcp(
        config.addr.clone(),
        TcpListener::bind(config.bind_addr()).unwrap(),
    );
    let registry = ListenerRegistry::new(Arc::clone(&config), listener);
    (config, registry)
}

/// Serve a one-line greeting on `listener` until stopped.
fn greeter(registry: &ListenerRegistry, greeting: &'static str) -> ServerLifecycle {
    let listener = registry.listener().tokio_tcp().unwrap();
    ServerLifecycle::start(move |stop| async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (mut stream, _) = accepted?;
                    stream.write_all(greeting.as_bytes()).await?;
                }
            }
        }
    })
}

async fn greeting(addr: std::net::SocketAddr) -> String {
    let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
    let mut out = String::new();
    stream.read_to_string(&mut out).await.unwrap();
    out
}

#[tokio::test]
async fn handoff_transfers_listener_to_successor() {
    let dir = tempfile::tempdir().unwrap();
    let (config, registry) = parent(&dir, Duration::from_secs(5));
    let addr = registry.listener().local_addr().unwrap();

    let (successor, imported) = InProcessSuccessor::new(Arc::clone(&config));
    let coordinator = RestartCoordinator::with_spawner(registry, successor);

    let handoff = coordinator.restart().await.unwrap();
    assert_eq!(handoff.metadata.addr, "127.0.0.1:0");
    assert_eq!(handoff.metadata.filename, format!("tcp:{addr}"));
    assert_eq!(Some(handoff.metadata.fd), handoff.child.map(|c| c.listener_fd));
    assert!(!config.sock_file.exists());

    let inherited = imported.await.unwrap().unwrap();
    assert_eq!(inherited.local_addr().unwrap(), addr);

    // The parent lets go; the successor keeps accepting on the same socket.
    drop(coordinator);
    let successor_registry = ListenerRegistry::new(Arc::clone(&config), inherited);
    let server = greeter(&successor_registry, "from successor");
    assert_eq!(greeting(addr).await, "from successor");
    assert!(server.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn timeout_leaves_parent_listener_accepting() {
    let dir = tempfile::tempdir().unwrap();
    let (_config, registry) = parent(&dir, Duration::from_millis(100));
    let addr = registry.listener().local_addr().unwrap();
    let server = greeter(&registry, "from parent");

    let coordinator = RestartCoordinator::with_spawner(
        registry,
        ProcessSpawner::with_program("/nonexistent/molt-successor"),
    );
    let err = coordinator.restart().await.unwrap_err();
    assert!(matches!(err, HandoffError::HandoffTimeout(_)));

    assert_eq!(greeting(addr).await, "from parent");
    assert!(server.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn controller_hands_off_then_drains() {
    let dir = tempfile::tempdir().unwrap();
    let (config, registry) = parent(&dir, Duration::from_secs(5));
    let addr = registry.listener().local_addr().unwrap();
    let server = greeter(&registry, "from parent");
    let stop = server.stop_token();

    let (successor, imported) = InProcessSuccessor::new(Arc::clone(&config));
    let controller = SignalController::new(RestartCoordinator::with_spawner(registry, successor));

    let (tx, rx) = mpsc::channel(8);
    tx.send(ControlSignal::Restart).await.unwrap();
    let exit = controller.run(rx, server).await;

    assert_eq!(exit.reason, ExitReason::HandedOff);
    assert!(exit.drained);
    assert!(stop.is_cancelled());

    let inherited = imported.await.unwrap().unwrap();
    let successor_registry = ListenerRegistry::new(config, inherited);
    let server = greeter(&successor_registry, "from successor");
    assert_eq!(greeting(addr).await, "from successor");
    assert!(server.shutdown(Duration::from_secs(1)).await);
}

#[tokio::test]
async fn bootstrap_is_idempotent_without_predecessor() {
    let dir = tempfile::tempdir().unwrap();
    let taken = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = taken.local_addr().unwrap().port();
    drop(taken);

    let config = Arc::new(
        ProcessConfig::new(format!("127.0.0.1:{port}"))
            .with_sock_file(dir.path().join("absent.sock")),
    );

    for _ in 0..3 {
        let registry = ListenerRegistry::acquire(Arc::clone(&config)).await.unwrap();
        assert_eq!(registry.listener().local_addr().unwrap().port(), port);
        // Dropping the registry releases the port for the next round.
    }
    assert!(!config.sock_file.exists());
}
