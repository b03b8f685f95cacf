//! The child-only path between fork and exec.
//!
//! DO NOT USE THE LOGGER HERE. It acquires a global lock which might be held
//! at the time of forking, and since this is the only thread in the child
//! that lock would never be released. Failures are reported with raw writes
//! to stderr and `_exit(127)`; the parent must never see this path return.
//!
//! Step order is security-critical: capabilities are finalized before exec,
//! the exec label before the capability set, groups before the uid drop.

use std::path::{Path, PathBuf};

use nix::sched::CloneFlags;

use super::descriptor::DescriptorInfo;
use crate::platform::{caps, proc_attr, selinux};

/// Everything the child needs, assembled by the parent before fork. The
/// argv has already been property-expanded (argv[0] excepted) and turned
/// into C strings, so the child does not have to allocate for the exec.
pub struct ChildSpec<'a> {
    pub name: &'a str,
    pub cmd: &'a std::ffi::CStr,
    pub argv: &'a [std::ffi::CString],
    pub env: &'a [(String, String)],
    pub attr: &'a proc_attr::ProcAttr,
    pub capabilities: Option<u64>,
    pub namespaces_to_enter: &'a [(CloneFlags, PathBuf)],
    pub descriptors: &'a [DescriptorInfo],
    pub writepid_files: &'a [PathBuf],
    pub scon: Option<&'a str>,
    pub sigstop: bool,
    pub publish_dir: &'a Path,
    pub selinux: bool,
}

fn write_to_stderr(msg: &str) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            msg.as_bytes().as_ptr().cast(),
            msg.len(),
        );
        libc::write(libc::STDERR_FILENO, [b'\n'].as_ptr().cast(), 1);
    }
}

fn child_fail(name: &str, msg: &str) -> ! {
    write_to_stderr(&format!("[{name}] {msg}"));
    unsafe { libc::_exit(127) }
}

fn enter_namespaces(spec: &ChildSpec) -> Result<(), String> {
    for (flag, path) in spec.namespaces_to_enter {
        let fd = nix::fcntl::open(
            path,
            nix::fcntl::OFlag::O_RDONLY | nix::fcntl::OFlag::O_CLOEXEC,
            nix::sys::stat::Mode::empty(),
        )
        .map_err(|e| format!("Could not open namespace {path:?}: {e}"))?;
        let result = nix::sched::setns(unsafe {
            std::os::fd::BorrowedFd::borrow_raw(fd)
        }, *flag)
        .map_err(|e| format!("Could not enter namespace {path:?}: {e}"));
        let _ = nix::unistd::close(fd);
        result?;
    }
    Ok(())
}

fn write_pid_to_files(files: &[PathBuf]) -> Result<(), String> {
    let pid = nix::unistd::getpid();
    for file in files {
        std::fs::write(file, pid.to_string())
            .map_err(|e| format!("Could not write pid to {file:?}: {e}"))?;
    }
    Ok(())
}

/// Turn the expanded argv into exec-ready C strings. Called by the parent
/// before fork.
pub fn prepare_exec_args(
    args: &[String],
) -> Result<(std::ffi::CString, Vec<std::ffi::CString>), String> {
    let cmd = std::ffi::CString::new(args[0].as_str())
        .map_err(|_| "argv[0] contains a NUL byte".to_owned())?;
    let mut c_args = Vec::with_capacity(args.len());
    for arg in args {
        c_args.push(
            std::ffi::CString::new(arg.as_str())
                .map_err(|_| format!("argument '{arg}' contains a NUL byte"))?,
        );
    }
    Ok((cmd, c_args))
}

/// Run the whole child setup and exec. Every failure aborts the child.
pub fn run(spec: &ChildSpec) -> ! {
    let name = spec.name;

    // Keep capabilities across the coming uid change. Some securebits may
    // already be locked when init runs in a container, leave those alone.
    if spec.capabilities.is_some() && !spec.attr.uid.is_root() {
        if let Err(e) = caps::keep_caps_across_uid_change() {
            child_fail(name, &e);
        }
    }

    if let Err(e) = proc_attr::apply(spec.attr) {
        child_fail(name, &e);
    }

    if let Err(e) = enter_namespaces(spec) {
        child_fail(name, &e);
    }

    for (key, value) in spec.env {
        std::env::set_var(key, value);
    }

    let fallback_context = spec.scon;
    for descriptor in spec.descriptors {
        if let Err(e) =
            descriptor.create_and_publish(spec.publish_dir, fallback_context, spec.selinux)
        {
            child_fail(name, &e);
        }
    }

    if let Err(e) = write_pid_to_files(spec.writepid_files) {
        child_fail(name, &format!("failed to write pid to files: {e}"));
    }

    if spec.selinux {
        if let Some(scon) = spec.scon {
            if !scon.is_empty() {
                if let Err(e) = selinux::set_exec_context(scon) {
                    child_fail(name, &e);
                }
            }
        }
    }

    if let Some(capabilities) = spec.capabilities {
        if let Err(e) = caps::set_caps_for_exec(capabilities) {
            child_fail(name, &e);
        }
    } else if !spec.attr.uid.is_root() {
        // Inheritable caps can be non-zero when running in a container.
        if let Err(e) = caps::drop_inheritable_caps() {
            child_fail(name, &e);
        }
    }

    if spec.sigstop {
        let _ = nix::sys::signal::kill(nix::unistd::getpid(), nix::sys::signal::Signal::SIGSTOP);
    }

    let _ = nix::unistd::execv(spec.cmd, spec.argv);
    child_fail(name, &format!("cannot execv('{}')", spec.cmd.to_string_lossy()));
}

/// Plain fork, or clone with the requested new namespaces. Same calling
/// convention as fork: the child sees `Child`, the parent gets the pid.
pub fn fork_with_flags(flags: CloneFlags) -> nix::Result<nix::unistd::ForkResult> {
    if flags.is_empty() {
        return unsafe { nix::unistd::fork() };
    }
    let combined = flags.bits() as libc::c_ulong | libc::SIGCHLD as libc::c_ulong;
    let ret = unsafe {
        libc::syscall(
            libc::SYS_clone,
            combined,
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
            std::ptr::null_mut::<libc::c_void>(),
        )
    };
    match ret {
        -1 => Err(nix::Error::last()),
        0 => Ok(nix::unistd::ForkResult::Child),
        pid => Ok(nix::unistd::ForkResult::Parent {
            child: nix::unistd::Pid::from_raw(pid as libc::pid_t),
        }),
    }
}
