//! Per-service process cgroups.
//!
//! Every started service gets a `<root>/uid_<uid>/pid_<pid>` group so the
//! supervisor can signal the whole process tree at once and apply memory
//! limits. The group is removed on the first successful bulk kill.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;
use nix::unistd::Pid;

fn group_path(root: &Path, uid: nix::unistd::Uid, pid: Pid) -> PathBuf {
    root.join(format!("uid_{}", uid.as_raw()))
        .join(format!("pid_{}", pid.as_raw()))
}

/// Create the service's cgroup and move `pid` into it.
pub fn create_process_group(
    root: &Path,
    uid: nix::unistd::Uid,
    pid: Pid,
) -> std::io::Result<()> {
    let path = group_path(root, uid, pid);
    std::fs::create_dir_all(&path)?;
    let mut procs = std::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path.join("cgroup.procs"))?;
    writeln!(procs, "{}", pid.as_raw())
}

fn write_knob(root: &Path, uid: nix::unistd::Uid, pid: Pid, knob: &str, value: u64) -> std::io::Result<()> {
    let path = group_path(root, uid, pid).join(knob);
    std::fs::write(path, format!("{value}\n"))
}

pub fn set_swappiness(root: &Path, uid: nix::unistd::Uid, pid: Pid, value: u64) -> std::io::Result<()> {
    write_knob(root, uid, pid, "memory.swappiness", value)
}

pub fn set_soft_limit(root: &Path, uid: nix::unistd::Uid, pid: Pid, bytes: u64) -> std::io::Result<()> {
    write_knob(root, uid, pid, "memory.soft_limit_in_bytes", bytes)
}

pub fn set_limit(root: &Path, uid: nix::unistd::Uid, pid: Pid, bytes: u64) -> std::io::Result<()> {
    write_knob(root, uid, pid, "memory.limit_in_bytes", bytes)
}

fn signal_members(path: &Path, signal: nix::sys::signal::Signal) -> usize {
    let Ok(procs) = std::fs::read_to_string(path.join("cgroup.procs")) else {
        return 0;
    };
    let mut signalled = 0;
    for line in procs.lines() {
        let Ok(raw) = line.trim().parse::<i32>() else {
            continue;
        };
        let member = Pid::from_raw(raw);
        if let Err(e) = nix::sys::signal::kill(member, signal) {
            if e != nix::Error::ESRCH {
                warn!("Failed to send {signal} to pid {member} of group {path:?}: {e}");
            }
        } else {
            signalled += 1;
        }
    }
    signalled
}

/// Send `signal` to every process of the service's group once, without
/// waiting for the group to empty. Used for SIGTERM.
pub fn kill_process_group_once(
    root: &Path,
    uid: nix::unistd::Uid,
    pid: Pid,
    signal: nix::sys::signal::Signal,
) -> Result<(), String> {
    let path = group_path(root, uid, pid);
    let _ = nix::sys::signal::kill(pid, signal);
    signal_members(&path, signal);
    Ok(())
}

/// Send `signal` to every process of the group and keep at it until the
/// group is empty, then remove the group directories. The retry bound keeps
/// a stuck (uninterruptible) member from wedging the supervisor.
pub fn kill_process_group(
    root: &Path,
    uid: nix::unistd::Uid,
    pid: Pid,
    signal: nix::sys::signal::Signal,
) -> Result<(), String> {
    let path = group_path(root, uid, pid);
    let _ = nix::sys::signal::kill(pid, signal);

    let mut remaining = signal_members(&path, signal);
    for _ in 0..40 {
        if remaining == 0 {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
        remaining = signal_members(&path, signal);
    }
    if remaining != 0 {
        return Err(format!(
            "{remaining} processes of group {path:?} survived {signal}"
        ));
    }

    std::fs::remove_dir(&path).map_err(|e| format!("Could not remove group {path:?}: {e}"))?;
    // The uid_ directory is shared between services of the same uid, removal
    // only succeeds when this was the last one.
    if let Some(uid_dir) = path.parent() {
        let _ = std::fs::remove_dir(uid_dir);
    }
    Ok(())
}

/// Total physical memory, for percentage-based limits. Saturates instead of
/// overflowing on weird sysconf answers.
pub fn physical_memory_bytes() -> Option<u64> {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    let num_pages = unsafe { libc::sysconf(libc::_SC_PHYS_PAGES) };
    if page_size <= 0 || num_pages <= 0 {
        return None;
    }
    Some((num_pages as u64).saturating_mul(page_size as u64))
}
