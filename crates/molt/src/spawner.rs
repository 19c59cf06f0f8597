//! Successor process creation with the listener in its file table.
//!
//! The successor is the running executable, started with no arguments from
//! its own directory. Its file table is stdin, stdout, stderr and then the
//! listener at [`INHERITED_LISTENER_FD`]. The index is reported back in
//! [`SpawnedChild`] so the coordinator advertises exactly where the child
//! will find the descriptor.

use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tracing::info;

use crate::error::{HandoffError, Result};
use crate::listener::ListenerHandle;
use crate::protocol::INHERITED_LISTENER_FD;

/// A successor that has been started but not yet confirmed ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedChild {
    pub pid: u32,
    /// Index of the listener in the child's file table.
    pub listener_fd: RawFd,
}

/// Starts successor processes for the restart coordinator.
pub trait Spawn: Send + Sync {
    fn spawn(&self, listener: &ListenerHandle) -> Result<SpawnedChild>;
}

/// Spawns a new instance of an executable, by default the current one.
#[derive(Debug, Clone, Default)]
pub struct ProcessSpawner {
    program: Option<PathBuf>,
}

impl ProcessSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `program` instead of the current executable.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: Some(program.into()),
        }
    }

    fn program(&self) -> io::Result<PathBuf> {
        match &self.program {
            Some(p) => Ok(p.clone()),
            None => std::env::current_exe(),
        }
    }
}

impl Spawn for ProcessSpawner {
    fn spawn(&self, listener: &ListenerHandle) -> Result<SpawnedChild> {
        let exported = listener.export_descriptor().map_err(|e| match e {
            HandoffError::Io(io) => HandoffError::SpawnFailed(io),
            other => other,
        })?;

        let exe = self.program().map_err(HandoffError::SpawnFailed)?;
        let dir = exe
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("/"));

        info!(
            exe = %exe.display(),
            filename = %exported.name,
            "Spawning successor"
        );

        // The exported fd is a close-on-exec duplicate allocated at 3 or above,
        // so it never collides with the standard streams.
        let source_fd = exported.fd.as_raw_fd();
        let target_fd = INHERITED_LISTENER_FD;

        let mut command = Command::new(&exe);
        command
            .current_dir(&dir)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        // SAFETY: the closure only calls async-signal-safe libc functions.
        unsafe {
            command.pre_exec(move || place_fd(source_fd, target_fd));
        }

        let child = command.spawn().map_err(HandoffError::SpawnFailed)?;
        let pid = child.id();
        // The parent's copy of the export closes here; the child keeps its own.
        drop(exported);

        info!(child_pid = pid, fd = target_fd, "Successor spawned");
        Ok(SpawnedChild {
            pid,
            listener_fd: target_fd,
        })
    }
}

/// Put `source` at `target` without close-on-exec so it survives exec.
fn place_fd(source: RawFd, target: RawFd) -> io::Result<()> {
    if source == target {
        // dup2 is a no-op here and would leave CLOEXEC set.
        let flags = unsafe { libc::fcntl(target, libc::F_GETFD) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if unsafe { libc::fcntl(target, libc::F_SETFD, flags & !libc::FD_CLOEXEC) } < 0 {
            return Err(io::Error::last_os_error());
        }
    } else if unsafe { libc::dup2(source, target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn cloexec_set(fd: RawFd) -> bool {
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        flags & libc::FD_CLOEXEC != 0
    }

    #[test]
    fn test_place_fd_clears_cloexec() {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM, 0) };
        assert!(fd >= 0);
        let high = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 200) };
        assert!(high >= 200);
        assert!(cloexec_set(high));

        // Same slot: only the flag changes.
        place_fd(high, high).unwrap();
        assert!(!cloexec_set(high));

        // Different slot: dup2 produces an inheritable copy. The slot is
        // reserved first so a concurrently opened fd is never clobbered.
        let target = unsafe { libc::fcntl(fd, libc::F_DUPFD_CLOEXEC, 300) };
        assert!(target >= 300);
        place_fd(fd, target).unwrap();
        assert!(!cloexec_set(target));

        unsafe {
            libc::close(fd);
            libc::close(high);
            libc::close(target);
        }
    }

    #[test]
    fn test_missing_program_is_spawn_failed() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let handle = ListenerHandle::from_tcp("127.0.0.1:0", listener);

        let spawner = ProcessSpawner::with_program("/nonexistent/molt-successor");
        let err = spawner.spawn(&handle).unwrap_err();
        assert!(matches!(err, HandoffError::SpawnFailed(_)));
    }

    #[test]
    fn test_spawn_reports_pid_and_fd() {
        let program = ["/bin/true", "/usr/bin/true"]
            .into_iter()
            .map(PathBuf::from)
            .find(|p| p.exists());
        let Some(program) = program else {
            return;
        };

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let handle = ListenerHandle::from_tcp("127.0.0.1:0", listener);

        let child = ProcessSpawner::with_program(program).spawn(&handle).unwrap();
        assert!(child.pid > 0);
        assert_eq!(child.listener_fd, INHERITED_LISTENER_FD);
        assert!(handle.local_addr().is_ok());
    }
}
