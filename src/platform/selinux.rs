//! SELinux plumbing over the kernel's stable text interfaces.
//!
//! Contexts live in procfs (`/proc/self/attr/*`), on files as the
//! `security.selinux` xattr, and on socket peers behind `SO_PEERSEC`.
//! Access decisions and process-create context computations go through
//! selinuxfs (`/sys/fs/selinux/{access,create,class}`). When selinuxfs is
//! not mounted every check passes and labeling is skipped, which is what a
//! kernel without the LSM gives us anyway.

use std::io::{Read, Seek, Write};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use log::{error, warn};

const SELINUXFS: &str = crate::config::Config::SELINUXFS;
const XATTR_NAME: &[u8] = b"security.selinux\0";

/// Peer identity of a property-socket client, carried into every access
/// check so denials can be attributed.
#[derive(Debug, Clone, Copy)]
pub struct AuditData<'a> {
    pub name: &'a str,
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

pub fn is_enabled() -> bool {
    Path::new(SELINUXFS).join("enforce").exists()
}

fn trim_context(mut raw: Vec<u8>) -> String {
    while matches!(raw.last(), Some(0) | Some(b'\n')) {
        raw.pop();
    }
    String::from_utf8_lossy(&raw).into_owned()
}

/// Context of the calling process.
pub fn current_context() -> Result<String, String> {
    let raw = std::fs::read("/proc/self/attr/current")
        .map_err(|e| format!("Could not read own security context: {e}"))?;
    Ok(trim_context(raw))
}

/// Context stored on a file.
pub fn file_context(path: &Path) -> Result<String, String> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| format!("Path contains a NUL byte: {path:?}"))?;
    let mut buf = vec![0u8; 256];
    let len = unsafe {
        libc::lgetxattr(
            c_path.as_ptr(),
            XATTR_NAME.as_ptr().cast(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if len < 0 {
        return Err(format!(
            "Could not get file context of {path:?}: {}",
            std::io::Error::last_os_error()
        ));
    }
    buf.truncate(len as usize);
    Ok(trim_context(buf))
}

pub fn set_file_context(path: &Path, context: &str) -> Result<(), String> {
    let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
        .map_err(|_| format!("Path contains a NUL byte: {path:?}"))?;
    let ret = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            XATTR_NAME.as_ptr().cast(),
            context.as_ptr().cast(),
            context.len(),
            0,
        )
    };
    if ret != 0 {
        return Err(format!(
            "Could not set file context of {path:?} to '{context}': {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

/// Context of the process on the other end of a unix socket.
pub fn peer_context(fd: RawFd) -> Result<String, String> {
    let mut buf = vec![0u8; 256];
    let mut len = buf.len() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERSEC,
            buf.as_mut_ptr().cast(),
            &mut len,
        )
    };
    if ret != 0 {
        return Err(format!(
            "getsockopt(SO_PEERSEC) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    buf.truncate(len as usize);
    Ok(trim_context(buf))
}

/// Label the program will exec into, consumed by the kernel at the next
/// execve. Child-only.
pub fn set_exec_context(context: &str) -> Result<(), String> {
    std::fs::write("/proc/self/attr/exec", context)
        .map_err(|e| format!("Could not set exec context to '{context}': {e}"))
}

fn class_index(class: &str) -> Result<u64, String> {
    let path = Path::new(SELINUXFS).join("class").join(class).join("index");
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Could not read class index {path:?}: {e}"))?;
    content
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("Bad class index in {path:?}: {e}"))
}

fn permission_bit(class: &str, perm: &str) -> Result<u64, String> {
    let path = Path::new(SELINUXFS)
        .join("class")
        .join(class)
        .join("perms")
        .join(perm);
    let content = std::fs::read_to_string(&path)
        .map_err(|e| format!("Could not read permission {path:?}: {e}"))?;
    let n = content
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("Bad permission index in {path:?}: {e}"))?;
    if n == 0 || n > 32 {
        return Err(format!("Permission index {n} out of range in {path:?}"));
    }
    Ok(1 << (n - 1))
}

fn query_selinuxfs(node: &str, request: &str) -> Result<String, String> {
    let path = Path::new(SELINUXFS).join(node);
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| format!("Could not open {path:?}: {e}"))?;
    file.write_all(request.as_bytes())
        .map_err(|e| format!("Could not write query to {path:?}: {e}"))?;
    file.rewind()
        .map_err(|e| format!("Could not rewind {path:?}: {e}"))?;
    let mut response = String::new();
    file.read_to_string(&mut response)
        .map_err(|e| format!("Could not read response from {path:?}: {e}"))?;
    Ok(response)
}

/// The context a process created from `file_con` by a `source_con` process
/// would run in (type_transition lookup).
pub fn compute_create(source_con: &str, file_con: &str, class: &str) -> Result<String, String> {
    let class_id = class_index(class)?;
    let response = query_selinuxfs("create", &format!("{source_con} {file_con} {class_id}"))?;
    let context = response.trim_end_matches(['\0', '\n']).to_owned();
    if context.is_empty() {
        return Err("Empty context from process-create computation".to_owned());
    }
    Ok(context)
}

/// Ask the policy whether `source_con` may exercise `perm` of `class` on
/// `target_con`. Denials are logged with the property audit data unless
/// `audit` is `None`; a broken selinuxfs fails open with a warning because
/// a property service that denies everything is a brick.
pub fn check_access(
    source_con: &str,
    target_con: &str,
    class: &str,
    perm: &str,
    audit: Option<&AuditData>,
) -> bool {
    if !is_enabled() {
        return true;
    }
    let decision = (|| -> Result<bool, String> {
        let class_id = class_index(class)?;
        let perm_bit = permission_bit(class, perm)?;
        let response = query_selinuxfs(
            "access",
            &format!("{source_con} {target_con} {class_id} {perm_bit:x}"),
        )?;
        let allowed = response
            .split_whitespace()
            .next()
            .and_then(|tok| u64::from_str_radix(tok, 16).ok())
            .ok_or_else(|| format!("Unparsable access response: '{response}'"))?;
        Ok(allowed & perm_bit == perm_bit)
    })();

    match decision {
        Ok(true) => true,
        Ok(false) => {
            if let Some(d) = audit {
                error!(
                    "avc: denied {{ {perm} }} for property={} pid={} uid={} gid={} \
                     scontext={source_con} tcontext={target_con} tclass={class}",
                    d.name, d.pid, d.uid, d.gid
                );
            }
            false
        }
        Err(e) => {
            warn!("SELinux access query failed, allowing: {e}");
            true
        }
    }
}

/// file_contexts database for restorecon. Patterns are matched as literal
/// prefixes; the longest match wins. (Full regex file_contexts support is
/// not needed for the paths init relabels.)
#[derive(Debug, Default)]
pub struct FileContexts {
    entries: Vec<(String, String)>,
}

impl FileContexts {
    pub fn load(sources: &[PathBuf]) -> Self {
        let mut entries = Vec::new();
        for source in sources {
            let Ok(content) = std::fs::read_to_string(source) else {
                continue;
            };
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                let mut fields = line.split_whitespace();
                let (Some(pattern), Some(context)) = (fields.next(), fields.last()) else {
                    continue;
                };
                let prefix: String = pattern
                    .chars()
                    .take_while(|c| !matches!(c, '(' | '[' | '*' | '?' | '+' | '\\' | '^' | '$'))
                    .collect();
                if !prefix.is_empty() && context != "<<none>>" {
                    entries.push((prefix, context.to_owned()));
                }
            }
        }
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
        Self { entries }
    }

    fn lookup(&self, path: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(_, context)| context.as_str())
    }

    /// Restore the policy label on `path`, optionally walking the tree.
    pub fn restorecon(&self, path: &Path, recursive: bool) -> Result<(), String> {
        if !is_enabled() {
            return Ok(());
        }
        let Some(context) = self.lookup(&path.to_string_lossy()) else {
            return Ok(());
        };
        set_file_context(path, context)?;
        if recursive && path.is_dir() {
            let entries = std::fs::read_dir(path)
                .map_err(|e| format!("Could not list {path:?} for restorecon: {e}"))?;
            for entry in entries.flatten() {
                self.restorecon(&entry.path(), true)?;
            }
        }
        Ok(())
    }
}
