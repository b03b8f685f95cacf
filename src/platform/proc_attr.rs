//! Credential and scheduling transitions applied to a freshly forked child.
//!
//! The order is security relevant: I/O priority and niceness need the old
//! privileges, supplementary groups must be in place before the gid changes,
//! and the uid drop comes last because it takes everything else away.

use nix::unistd::{Gid, Uid};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoSchedClass {
    None,
    Rt,
    Be,
    Idle,
}

impl IoSchedClass {
    const fn kernel_class(self) -> u64 {
        match self {
            Self::None => 0,
            Self::Rt => 1,
            Self::Be => 2,
            Self::Idle => 3,
        }
    }
}

/// Everything Start declares about the child's identity and scheduling.
#[derive(Debug, Clone)]
pub struct ProcAttr {
    pub ioprio_class: IoSchedClass,
    pub ioprio_pri: i32,
    pub uid: Uid,
    pub gid: Gid,
    pub supp_gids: Vec<Gid>,
    pub priority: i32,
}

impl Default for ProcAttr {
    fn default() -> Self {
        Self {
            ioprio_class: IoSchedClass::None,
            ioprio_pri: 0,
            uid: Uid::from_raw(0),
            gid: Gid::from_raw(0),
            supp_gids: Vec::new(),
            priority: 0,
        }
    }
}

const IOPRIO_WHO_PROCESS: libc::c_int = 1;
const IOPRIO_CLASS_SHIFT: u64 = 13;

fn set_io_priority(class: IoSchedClass, prio: i32) -> Result<(), String> {
    let ioprio = (class.kernel_class() << IOPRIO_CLASS_SHIFT) | (prio as u64 & 0xff);
    let ret = unsafe {
        libc::syscall(
            libc::SYS_ioprio_set,
            IOPRIO_WHO_PROCESS as libc::c_long,
            0 as libc::c_long, // current process
            ioprio as libc::c_long,
        )
    };
    if ret != 0 {
        return Err(format!(
            "ioprio_set({class:?}, {prio}) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

fn set_priority(priority: i32) -> Result<(), String> {
    // setpriority returns -1 both for errors and as a legal niceness, clear
    // errno first to tell them apart.
    let ret = unsafe {
        *libc::__errno_location() = 0;
        libc::setpriority(libc::PRIO_PROCESS, 0, priority)
    };
    if ret == -1 && unsafe { *libc::__errno_location() } != 0 {
        return Err(format!(
            "setpriority({priority}) failed: {}",
            std::io::Error::last_os_error()
        ));
    }
    Ok(())
}

/// Apply all declared attributes to the calling process. Returns the first
/// failure; the caller (the child between fork and exec) aborts on error.
pub fn apply(attr: &ProcAttr) -> Result<(), String> {
    if attr.ioprio_class != IoSchedClass::None {
        set_io_priority(attr.ioprio_class, attr.ioprio_pri)?;
    }
    if attr.priority != 0 {
        set_priority(attr.priority)?;
    }
    if !attr.supp_gids.is_empty() {
        nix::unistd::setgroups(&attr.supp_gids)
            .map_err(|e| format!("setgroups({:?}) failed: {e}", attr.supp_gids))?;
    }
    if attr.gid.as_raw() != 0 {
        nix::unistd::setgid(attr.gid).map_err(|e| format!("setgid({}) failed: {e}", attr.gid))?;
    }
    if !attr.uid.is_root() {
        nix::unistd::setuid(attr.uid).map_err(|e| format!("setuid({}) failed: {e}", attr.uid))?;
    }
    Ok(())
}
