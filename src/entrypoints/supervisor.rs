//! The PID-1 main loop.
//!
//! The supervisor thread owns the service registry and every service
//! mutation. It waits on two descriptors: the SIGCHLD self-pipe (reaping)
//! and its end of the internal socketpair to the property service (control
//! requests and change notifications), processed strictly in arrival order.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::sync::Arc;

use log::{error, info, trace, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};

use crate::config;
use crate::logging;
use crate::platform::selinux::FileContexts;
use crate::properties::messages::{recv_message, send_message, InitMessage, PropertyMessage};
use crate::properties::persistent::PersistentStore;
use crate::properties::store::PropertyStore;
use crate::properties::{load, server, PropError, PROP_SUCCESS};
use crate::runtime_info::RuntimeInfo;
use crate::services::{ControlAction, ServiceRegistry};
use crate::signal_handler;

fn find_shell_path() -> Option<std::path::PathBuf> {
    let possible_paths = [
        std::path::PathBuf::from("/bin/sh"),
        std::path::PathBuf::from("/sbin/sh"),
        std::path::PathBuf::from("/usr/bin/sh"),
    ];
    possible_paths.into_iter().find(|p| p.exists())
}

/// As PID 1 a plain exit would panic the kernel; drop into a shell so
/// whoever is at the console can debug, then give up.
fn unrecoverable_error(error: String) -> ! {
    eprintln!("Unrecoverable error: {error}");
    if nix::unistd::getpid().as_raw() == 1 {
        if let Some(shell_path) = find_shell_path() {
            if let Ok(mut child) = std::process::Command::new(shell_path).spawn() {
                let _ = child.wait();
            }
        }
        loop {
            std::thread::sleep(std::time::Duration::from_secs(1_000_000));
        }
    }
    std::process::exit(1);
}

/// Answer a control request whose client descriptor was handed over by the
/// property service: the result code goes straight back to the client.
fn send_control_reply(fd: &OwnedFd, code: u32) {
    if let Err(e) = nix::unistd::write(fd.as_fd(), &code.to_ne_bytes()) {
        warn!("Could not send control message reply to client: {e}");
    }
}

fn handle_property_message(
    registry: &mut ServiceRegistry,
    ctx: &RuntimeInfo,
    supervisor_socket: &OwnedFd,
) {
    let (message, fd): (PropertyMessage, Option<OwnedFd>) =
        match recv_message(supervisor_socket.as_raw_fd()) {
            Ok(received) => received,
            Err(e) => {
                error!("Could not read message from property service: {e}");
                return;
            }
        };

    match message {
        PropertyMessage::Changed { name, value } => {
            // Triggers for property changes would fire here; the supervisor
            // core only records them.
            trace!("Property changed: {name}={value}");
        }
        PropertyMessage::Control {
            msg,
            name,
            pid,
            has_fd,
        } => {
            let reply_fd = if has_fd { fd } else { None };
            let result = match ControlAction::parse(&msg) {
                Some(action) => registry.handle_control_message(action, &name, pid, ctx),
                None => {
                    error!("Unknown control message '{msg}' from pid {pid}");
                    false
                }
            };
            if let Some(reply_fd) = reply_fd {
                let code = if result {
                    PROP_SUCCESS
                } else {
                    PropError::HandleControlMessage.code()
                };
                send_control_reply(&reply_fd, code);
            }
        }
    }
}

fn reap_any_outstanding_children(registry: &mut ServiceRegistry, ctx: &RuntimeInfo) {
    while let Some(next) = signal_handler::next_exited_child() {
        match next {
            Ok((pid, code)) => {
                trace!("Child {pid} exited with {code}");
                if !registry.reap(pid, &code, ctx) {
                    // Not one of ours: a rerooted orphan that got killed.
                    trace!("Untracked process {pid} exited with {code}");
                }
            }
            Err(_) => break,
        }
    }
}

pub fn run_supervisor() {
    let (log_conf, config) = config::load_config();
    if let Err(e) = logging::setup_logging(&log_conf) {
        eprintln!("{e}");
    }

    info!("initd-rs starting");

    let file_contexts = Arc::new(FileContexts::load(&config.file_contexts));

    // Denials of property writes are logged with the writer's identity by
    // the access-check layer; building the trie is the first init step.
    let property_info = load::load_property_info(&config);
    let persist = PersistentStore::new(config.persist_dir.clone());
    let props = Arc::new(PropertyStore::new(property_info, persist));
    let ctx = Arc::new(RuntimeInfo {
        config,
        props: Arc::clone(&props),
    });

    // Kernel-provided values and the *.prop files, before anything else can
    // observe the store.
    load::property_init(&ctx);

    let mut registry = ServiceRegistry::default();

    let supervisor_socket = match server::start_property_service(&ctx, file_contexts) {
        Ok(socket) => socket,
        Err(e) => unrecoverable_error(e),
    };

    let signal_pipe = match signal_handler::register_signal_pipe() {
        Ok(pipe) => pipe,
        Err(e) => unrecoverable_error(e),
    };

    // Mount orchestration is outside the supervisor; by the time this loop
    // runs userdata is available, so persistent properties can load.
    if let Err(e) = send_message(
        supervisor_socket.as_raw_fd(),
        &InitMessage::LoadPersistentProperties,
        None,
    ) {
        error!("Could not request persistent property load: {e}");
    }

    loop {
        let mut fds = [
            PollFd::new(signal_pipe.as_fd(), PollFlags::POLLIN),
            PollFd::new(supervisor_socket.as_fd(), PollFlags::POLLIN),
        ];
        if let Err(e) = poll(&mut fds, PollTimeout::NONE) {
            if e != nix::Error::EINTR {
                error!("Supervisor poll failed: {e}");
            }
            continue;
        }

        let signal_ready = fds[0]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN));
        let property_ready = fds[1]
            .revents()
            .is_some_and(|r| r.contains(PollFlags::POLLIN));

        if signal_ready {
            signal_handler::drain_signal_pipe(&signal_pipe);
            reap_any_outstanding_children(&mut registry, &ctx);
        }
        if property_ready {
            handle_property_message(&mut registry, &ctx, &supervisor_socket);
        }
    }
}
