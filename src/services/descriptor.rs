//! Descriptors a service declares: sockets and fifos that init creates in
//! the child right before exec and hands over through the environment.

use std::os::fd::{AsRawFd, IntoRawFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Stream,
    Dgram,
    SeqPacket,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorKind {
    Socket(SocketKind),
    Fifo,
}

#[derive(Debug, Clone)]
pub struct DescriptorInfo {
    pub name: String,
    pub kind: DescriptorKind,
    pub perm: u32,
    pub uid: Uid,
    pub gid: Gid,
    /// Explicit label; the service's computed context is used otherwise.
    pub context: Option<String>,
}

impl DescriptorInfo {
    fn path(&self, publish_dir: &Path) -> PathBuf {
        publish_dir.join(&self.name)
    }

    /// Environment variable the child finds the descriptor under.
    #[must_use]
    pub fn env_key(&self) -> String {
        match self.kind {
            DescriptorKind::Socket(_) => format!("ANDROID_SOCKET_{}", self.name),
            DescriptorKind::Fifo => format!("ANDROID_FILE_{}", self.name),
        }
    }

    /// Create the descriptor, apply ownership/mode/label, and export its fd
    /// number into the environment. Child-only; the descriptor must survive
    /// the coming exec, so the fd is deliberately leaked into the child.
    pub fn create_and_publish(
        &self,
        publish_dir: &Path,
        fallback_context: Option<&str>,
        selinux: bool,
    ) -> Result<RawFd, String> {
        let path = self.path(publish_dir);
        let _ = std::fs::remove_file(&path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Could not create {parent:?}: {e}"))?;
        }

        let fd = match self.kind {
            DescriptorKind::Socket(kind) => {
                let sock_type = match kind {
                    SocketKind::Stream => nix::sys::socket::SockType::Stream,
                    SocketKind::Dgram => nix::sys::socket::SockType::Datagram,
                    SocketKind::SeqPacket => nix::sys::socket::SockType::SeqPacket,
                };
                let socket = nix::sys::socket::socket(
                    nix::sys::socket::AddressFamily::Unix,
                    sock_type,
                    nix::sys::socket::SockFlag::empty(),
                    None,
                )
                .map_err(|e| format!("Could not create socket '{}': {e}", self.name))?;
                let addr = nix::sys::socket::UnixAddr::new(&path)
                    .map_err(|e| format!("Bad socket path {path:?}: {e}"))?;
                nix::sys::socket::bind(socket.as_raw_fd(), &addr)
                    .map_err(|e| format!("Could not bind socket '{}': {e}", self.name))?;
                socket.into_raw_fd()
            }
            DescriptorKind::Fifo => {
                nix::unistd::mkfifo(&path, nix::sys::stat::Mode::from_bits_truncate(self.perm))
                    .map_err(|e| format!("Could not create fifo '{}': {e}", self.name))?;
                nix::fcntl::open(
                    &path,
                    nix::fcntl::OFlag::O_RDWR | nix::fcntl::OFlag::O_NONBLOCK,
                    nix::sys::stat::Mode::empty(),
                )
                .map_err(|e| format!("Could not open fifo '{}': {e}", self.name))?
            }
        };

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(self.perm))
            .map_err(|e| format!("Could not chmod {path:?}: {e}"))?;
        nix::unistd::chown(&path, Some(self.uid), Some(self.gid))
            .map_err(|e| format!("Could not chown {path:?}: {e}"))?;

        if selinux {
            let context = self.context.as_deref().or(fallback_context);
            if let Some(context) = context {
                crate::platform::selinux::set_file_context(&path, context)?;
            }
        }

        std::env::set_var(self.env_key(), fd.to_string());
        Ok(fd)
    }

    /// Remove the filesystem node again. Parent-side, on reap.
    pub fn clean(&self, publish_dir: &Path) {
        let _ = std::fs::remove_file(self.path(publish_dir));
    }
}
