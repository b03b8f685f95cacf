//! Signal plumbing for the supervisor loop.
//!
//! The supervisor has to wait on two things at once: child deaths (SIGCHLD)
//! and control traffic from the property service. Signals are therefore
//! routed into a self-pipe with `signal_hook`, and the supervisor polls the
//! pipe's read end next to the internal socket. When the pipe becomes
//! readable the pending children are drained with non-blocking `waitpid`.

use std::os::fd::{AsRawFd, OwnedFd};

use log::trace;

/// How a child left us.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum ChildTermination {
    Signal(nix::sys::signal::Signal),
    Exit(i32),
}

impl std::fmt::Display for ChildTermination {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Signal(sig) => write!(f, "signal {sig}"),
            Self::Exit(code) => write!(f, "exit code {code}"),
        }
    }
}

impl ChildTermination {
    #[must_use]
    pub const fn success(&self) -> bool {
        match self {
            Self::Signal(_) => false,
            Self::Exit(code) => *code == 0,
        }
    }
}

/// Register SIGCHLD delivery into a fresh pipe and return the read end.
/// The write end is owned by signal_hook for the lifetime of the process.
pub fn register_signal_pipe() -> Result<OwnedFd, String> {
    let (read_end, write_end) = nix::unistd::pipe2(
        nix::fcntl::OFlag::O_CLOEXEC | nix::fcntl::OFlag::O_NONBLOCK,
    )
    .map_err(|e| format!("Could not create signal pipe: {e}"))?;

    signal_hook::low_level::pipe::register(signal_hook::consts::SIGCHLD, write_end)
        .map_err(|e| format!("Could not register SIGCHLD on the signal pipe: {e}"))?;

    Ok(read_end)
}

/// Empty the signal pipe after poll reported it readable. The byte count is
/// meaningless, SIGCHLD coalesces anyway; waitpid below finds every child.
pub fn drain_signal_pipe(fd: &OwnedFd) {
    let mut buf = [0u8; 64];
    loop {
        match nix::unistd::read(fd.as_raw_fd(), &mut buf) {
            Ok(n) if n == buf.len() => {}
            _ => break,
        }
    }
}

pub type ChildIterElem = Result<(nix::unistd::Pid, ChildTermination), nix::Error>;

/// Reap the next child that changed state, without blocking.
pub fn next_exited_child() -> Option<ChildIterElem> {
    let wait_any_pid = nix::unistd::Pid::from_raw(-1);
    let wait_flags = nix::sys::wait::WaitPidFlag::WNOHANG;
    match nix::sys::wait::waitpid(wait_any_pid, Some(wait_flags)) {
        Ok(exit_status) => match exit_status {
            nix::sys::wait::WaitStatus::Exited(pid, code) => {
                Some(Ok((pid, ChildTermination::Exit(code))))
            }
            nix::sys::wait::WaitStatus::Signaled(pid, signal, _dumped_core) => {
                Some(Ok((pid, ChildTermination::Signal(signal))))
            }
            nix::sys::wait::WaitStatus::StillAlive => {
                trace!("No more state changes to poll");
                None
            }
            _ => {
                // stop/continue events of children are not interesting here
                next_exited_child()
            }
        },
        Err(e) => {
            if e != nix::Error::ECHILD {
                trace!("Error while waiting: {e}");
            }
            Some(Err(e))
        }
    }
}
