//! Listener ownership and descriptor export.
//!
//! A process owns exactly one [`ListenerHandle`] for its lifetime. The
//! [`ListenerRegistry`] holds it alongside the process configuration and
//! produces duplicated descriptors for successors. Handles rebuilt from an
//! inherited descriptor are validated with `fstat`/`getsockopt` before they
//! are trusted: anything that is not a listening stream socket is refused.

use std::io;
use std::net::TcpListener;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixListener;
use std::sync::Arc;

use tracing::info;

use crate::bootstrap::BootstrapResolver;
use crate::config::ProcessConfig;
use crate::error::{HandoffError, Result};

/// Byte-stream socket families a listener can be exported from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerKind {
    Tcp,
    Unix,
}

#[derive(Debug)]
enum Inner {
    Tcp(TcpListener),
    Unix(UnixListener),
}

/// The live listening socket of this process instance.
#[derive(Debug)]
pub struct ListenerHandle {
    addr: String,
    inner: Inner,
}

/// A close-on-exec duplicate of a listener descriptor, ready to be placed in
/// a successor's file table.
#[derive(Debug)]
pub struct ExportedDescriptor {
    pub fd: OwnedFd,
    pub name: String,
}

impl ListenerHandle {
    /// Bind a fresh TCP listener for `config.addr`.
    pub fn bind(config: &ProcessConfig) -> Result<Self> {
        let listener =
            TcpListener::bind(config.bind_addr()).map_err(|source| HandoffError::BindFailed {
                addr: config.addr.clone(),
                source,
            })?;
        Ok(Self::from_tcp(config.addr.clone(), listener))
    }

    pub fn from_tcp(addr: impl Into<String>, listener: TcpListener) -> Self {
        Self {
            addr: addr.into(),
            inner: Inner::Tcp(listener),
        }
    }

    pub fn from_unix(addr: impl Into<String>, listener: UnixListener) -> Self {
        Self {
            addr: addr.into(),
            inner: Inner::Unix(listener),
        }
    }

    /// Rebuild a handle from a descriptor inherited from a predecessor.
    ///
    /// The descriptor is checked before ownership is taken: if it is not a
    /// listening stream socket it is left untouched and an error is returned.
    /// On success it is marked close-on-exec so only explicitly exported
    /// copies reach later generations.
    ///
    /// # Safety
    ///
    /// `fd` must not be owned by anything else in this process.
    pub unsafe fn from_inherited(addr: impl Into<String>, fd: RawFd) -> Result<Self> {
        if !validate_fd(fd) {
            return Err(HandoffError::malformed(format!(
                "inherited fd {fd} is not a valid socket"
            )));
        }

        let kind = classify(BorrowedFd::borrow_raw(fd))?;
        set_cloexec(fd)?;

        let owned = OwnedFd::from_raw_fd(fd);
        let inner = match kind {
            ListenerKind::Tcp => Inner::Tcp(TcpListener::from(owned)),
            ListenerKind::Unix => Inner::Unix(UnixListener::from(owned)),
        };

        Ok(Self {
            addr: addr.into(),
            inner,
        })
    }

    /// Configured address this listener serves.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn kind(&self) -> ListenerKind {
        match self.inner {
            Inner::Tcp(_) => ListenerKind::Tcp,
            Inner::Unix(_) => ListenerKind::Unix,
        }
    }

    /// Actual bound address of a TCP listener.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        match &self.inner {
            Inner::Tcp(l) => Ok(l.local_addr()?),
            Inner::Unix(_) => Err(HandoffError::unsupported(
                "unix listener has no socket address",
            )),
        }
    }

    /// OS-level name of the descriptor, e.g. `tcp:0.0.0.0:8000`.
    pub fn descriptor_name(&self) -> Result<String> {
        match &self.inner {
            Inner::Tcp(l) => Ok(format!("tcp:{}", l.local_addr()?)),
            Inner::Unix(l) => {
                let addr = l.local_addr()?;
                let path = addr
                    .as_pathname()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                Ok(format!("unix:{path}"))
            }
        }
    }

    /// Duplicate the descriptor for inheritance by a successor.
    pub fn export_descriptor(&self) -> Result<ExportedDescriptor> {
        let fd = self.as_fd().try_clone_to_owned()?;
        Ok(ExportedDescriptor {
            fd,
            name: self.descriptor_name()?,
        })
    }

    /// A tokio listener sharing this socket, for the serving loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn tokio_tcp(&self) -> Result<tokio::net::TcpListener> {
        match &self.inner {
            Inner::Tcp(l) => {
                let std = l.try_clone()?;
                std.set_nonblocking(true)?;
                Ok(tokio::net::TcpListener::from_std(std)?)
            }
            Inner::Unix(_) => Err(HandoffError::unsupported(
                "expected a tcp listener, found a unix listener",
            )),
        }
    }

    /// A tokio listener sharing this socket, for a Unix-socket serving loop.
    pub fn tokio_unix(&self) -> Result<tokio::net::UnixListener> {
        match &self.inner {
            Inner::Unix(l) => {
                let std = l.try_clone()?;
                std.set_nonblocking(true)?;
                Ok(tokio::net::UnixListener::from_std(std)?)
            }
            Inner::Tcp(_) => Err(HandoffError::unsupported(
                "expected a unix listener, found a tcp listener",
            )),
        }
    }
}

impl AsFd for ListenerHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        match &self.inner {
            Inner::Tcp(l) => l.as_fd(),
            Inner::Unix(l) => l.as_fd(),
        }
    }
}

impl AsRawFd for ListenerHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.as_fd().as_raw_fd()
    }
}

/// Process-wide owner of the configuration and the active listener.
///
/// Written once during startup, read-only afterwards.
#[derive(Debug, Clone)]
pub struct ListenerRegistry {
    config: Arc<ProcessConfig>,
    listener: Arc<ListenerHandle>,
}

impl ListenerRegistry {
    /// Obtain this instance's listener, inheriting it from a predecessor when
    /// one is mid-restart and binding a fresh one otherwise.
    pub async fn acquire(config: Arc<ProcessConfig>) -> Result<Self> {
        let listener = BootstrapResolver::new(Arc::clone(&config)).resolve().await?;
        Ok(Self::new(config, listener))
    }

    pub fn new(config: Arc<ProcessConfig>, listener: ListenerHandle) -> Self {
        info!(
            pid = std::process::id(),
            addr = %listener.addr(),
            fd = listener.as_raw_fd(),
            "Listener registered"
        );
        Self {
            config,
            listener: Arc::new(listener),
        }
    }

    pub fn config(&self) -> &Arc<ProcessConfig> {
        &self.config
    }

    pub fn listener(&self) -> &Arc<ListenerHandle> {
        &self.listener
    }

    pub fn export_descriptor(&self) -> Result<ExportedDescriptor> {
        self.listener.export_descriptor()
    }
}

/// Validate that a file descriptor is a valid socket using fstat.
fn validate_fd(fd: RawFd) -> bool {
    let mut stat: libc::stat = unsafe { std::mem::zeroed() };
    let result = unsafe { libc::fstat(fd, &mut stat) };
    if result != 0 {
        return false;
    }
    (stat.st_mode & libc::S_IFMT) == libc::S_IFSOCK
}

fn classify(fd: BorrowedFd<'_>) -> Result<ListenerKind> {
    let sock_type = sock_opt(fd, libc::SO_TYPE)?;
    if sock_type != libc::SOCK_STREAM {
        return Err(HandoffError::unsupported(format!(
            "socket type {sock_type} is not a byte stream"
        )));
    }

    if sock_opt(fd, libc::SO_ACCEPTCONN)? == 0 {
        return Err(HandoffError::unsupported("socket is not listening"));
    }

    let mut storage: libc::sockaddr_storage = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockname(
            fd.as_raw_fd(),
            &mut storage as *mut _ as *mut libc::sockaddr,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error().into());
    }

    match storage.ss_family as libc::c_int {
        libc::AF_INET | libc::AF_INET6 => Ok(ListenerKind::Tcp),
        libc::AF_UNIX => Ok(ListenerKind::Unix),
        family => Err(HandoffError::unsupported(format!(
            "address family {family}"
        ))),
    }
}

fn sock_opt(fd: BorrowedFd<'_>, opt: libc::c_int) -> io::Result<libc::c_int> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd.as_raw_fd(),
            libc::SOL_SOCKET,
            opt,
            &mut value as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(value)
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
