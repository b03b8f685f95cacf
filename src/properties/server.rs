//! The property-service socket server.
//!
//! One dedicated thread owns the client listen socket and the store's write
//! path. Client connections are handled inline: every request is tiny and
//! bounded by a 2 second receive budget, so there is nothing to gain from
//! per-connection threads. The same poll loop also watches the internal
//! socketpair for state commands from the supervisor
//! (load-persistent/start/stop-sending).

use std::os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::io::RawFd;
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, trace};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::socket::{MsgFlags, SockFlag};

use super::async_restorecon::AsyncRestorecon;
use super::messages::{recv_message, send_message, InitMessage, PropertyMessage};
use super::{
    is_legal_property_name, load, PropError, CTL_PREFIX, POWERCTL_PROPERTY, PROP_NAME_MAX,
    PROP_SUCCESS, PROP_VALUE_MAX, RESTORECON_PROPERTY,
};
use crate::platform::selinux;
use crate::platform::selinux::FileContexts;
use crate::runtime_info::RuntimeInfo;

pub const PROP_MSG_SETPROP: u32 = 1;
pub const PROP_MSG_SETPROP2: u32 = 0x0002_0001;

const DEFAULT_SOCKET_TIMEOUT_MS: u32 = 2000;
/// Strings above this length are rejected before allocation; a client must
/// not be able to make init allocate arbitrarily.
const MAX_STRING_LEN: usize = 0xffff;

/// Identity of the connected client, captured once per connection.
#[derive(Debug, Clone, Copy)]
pub struct PeerCred {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// One accepted client connection with its receive budget handling.
pub struct SocketConnection {
    socket: Option<OwnedFd>,
    cred: PeerCred,
}

impl SocketConnection {
    fn new(socket: OwnedFd, cred: PeerCred) -> Self {
        Self {
            socket: Some(socket),
            cred,
        }
    }

    #[must_use]
    pub const fn cred(&self) -> &PeerCred {
        &self.cred
    }

    /// Give up ownership of the descriptor so it can be shipped to the
    /// supervisor. After this every send on the connection is a no-op.
    pub fn release(&mut self) -> Option<RawFd> {
        self.socket.take().map(std::os::fd::IntoRawFd::into_raw_fd)
    }

    /// Wait for readability, charging the elapsed time against the
    /// remaining request budget.
    fn poll_in(&self, timeout_ms: &mut u32) -> bool {
        let Some(socket) = &self.socket else {
            return false;
        };
        while *timeout_ms > 0 {
            let mut fds = [PollFd::new(socket.as_fd(), PollFlags::POLLIN)];
            let poll_timeout =
                PollTimeout::try_from(*timeout_ms).unwrap_or(PollTimeout::MAX);
            let start = Instant::now();
            let nr = poll(&mut fds, poll_timeout);
            let elapsed = start.elapsed().as_millis() as u32;
            *timeout_ms = timeout_ms.saturating_sub(elapsed);

            match nr {
                Ok(n) if n > 0 => return true,
                Ok(_) => break, // timeout
                Err(nix::Error::EINTR) => {
                    // poll rounds down; round the budget up so a storm of
                    // sub-millisecond EINTRs still makes progress
                    *timeout_ms = timeout_ms.saturating_sub(1);
                }
                Err(e) => {
                    error!(
                        "sys_prop: error waiting for uid {} to send property message: {e}",
                        self.cred.uid
                    );
                    return false;
                }
            }
        }
        error!(
            "sys_prop: timeout waiting for uid {} to send property message",
            self.cred.uid
        );
        false
    }

    fn recv_fully(&self, buf: &mut [u8], timeout_ms: &mut u32) -> bool {
        let mut received = 0;
        while *timeout_ms > 0 && received < buf.len() {
            if !self.poll_in(timeout_ms) {
                return false;
            }
            let Some(socket) = &self.socket else {
                return false;
            };
            match nix::sys::socket::recv(
                socket.as_raw_fd(),
                &mut buf[received..],
                MsgFlags::MSG_DONTWAIT,
            ) {
                Ok(0) | Err(_) => {
                    error!("sys_prop: recv error");
                    return false;
                }
                Ok(n) => received += n,
            }
        }
        received == buf.len()
    }

    pub fn recv_u32(&self, timeout_ms: &mut u32) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.recv_fully(&mut buf, timeout_ms)
            .then(|| u32::from_ne_bytes(buf))
    }

    pub fn recv_chars(&self, len: usize, timeout_ms: &mut u32) -> Option<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.recv_fully(&mut buf, timeout_ms).then_some(buf)
    }

    pub fn recv_string(&self, timeout_ms: &mut u32) -> Option<String> {
        let len = self.recv_u32(timeout_ms)? as usize;
        if len == 0 {
            return Some(String::new());
        }
        if len > MAX_STRING_LEN {
            error!("sys_prop: asked to read huge string: {len}");
            return None;
        }
        let buf = self.recv_chars(len, timeout_ms)?;
        Some(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send the result code. Succeeds trivially when the descriptor was
    /// released to the supervisor, which then owns the reply.
    pub fn send_u32(&self, value: u32) -> bool {
        let Some(socket) = &self.socket else {
            return true;
        };
        nix::sys::socket::send(
            socket.as_raw_fd(),
            &value.to_ne_bytes(),
            MsgFlags::empty(),
        )
        .map(|sent| sent == 4)
        .unwrap_or(false)
    }

    fn source_context(&self, ctx: &RuntimeInfo) -> Result<String, String> {
        if !ctx.config.selinux {
            return Ok(String::new());
        }
        let Some(socket) = &self.socket else {
            return Err("connection already released".to_owned());
        };
        selinux::peer_context(socket.as_raw_fd())
    }
}

fn check_mac_perms(
    ctx: &RuntimeInfo,
    name: &str,
    target_context: &str,
    source_context: &str,
    cr: &PeerCred,
    audit: bool,
) -> bool {
    if !ctx.config.selinux {
        return true;
    }
    if target_context.is_empty() || source_context.is_empty() {
        return false;
    }
    let audit_data = selinux::AuditData {
        name,
        pid: cr.pid,
        uid: cr.uid,
        gid: cr.gid,
    };
    selinux::check_access(
        source_context,
        target_context,
        "property_service",
        "set",
        audit.then_some(&audit_data),
    )
}

/// Read-side access test: whether `source_context` may read `name`. The
/// property files are world-readable, the policy check is the only gate.
pub fn can_read_property(ctx: &RuntimeInfo, source_context: &str, name: &str) -> bool {
    if !ctx.config.selinux {
        return true;
    }
    let (target_context, _) = ctx.props.property_info().query(name);
    let audit_data = selinux::AuditData {
        name,
        pid: 0,
        uid: 0,
        gid: 0,
    };
    selinux::check_access(
        source_context,
        target_context,
        "file",
        "read",
        Some(&audit_data),
    )
}

fn check_control_perms(
    ctx: &RuntimeInfo,
    name: &str,
    value: &str,
    source_context: &str,
    cr: &PeerCred,
) -> bool {
    // The legacy model names permissions after the target service:
    // `ctl.<service>`. Those rules are dontaudit, so a legacy denial stays
    // quiet and only the full check below gets audited.
    if matches!(name, "ctl.start" | "ctl.stop" | "ctl.restart") {
        let legacy = format!("ctl.{value}");
        let (target_context, _) = ctx.props.property_info().query(&legacy);
        let target_context = target_context.to_owned();
        if check_mac_perms(ctx, &legacy, &target_context, source_context, cr, false) {
            return true;
        }
    }

    let full = format!("{name}${value}");
    let (target_context, _) = ctx.props.property_info().query(&full);
    let target_context = target_context.to_owned();
    check_mac_perms(ctx, &full, &target_context, source_context, cr, true)
}

/// Authorization and type validation, before any side effect.
pub fn check_permissions(
    ctx: &RuntimeInfo,
    name: &str,
    value: &str,
    source_context: &str,
    cr: &PeerCred,
) -> Result<(), PropError> {
    if !is_legal_property_name(name) {
        return Err(PropError::InvalidName);
    }

    if name.starts_with(CTL_PREFIX) {
        if !check_control_perms(ctx, name, value, source_context, cr) {
            error!(
                "Invalid permissions to perform '{}' on '{value}'",
                &name[CTL_PREFIX.len()..]
            );
            return Err(PropError::HandleControlMessage);
        }
        return Ok(());
    }

    let (target_context, type_str) = ctx.props.property_info().query(name);
    let (target_context, type_str) = (target_context.to_owned(), type_str.to_owned());
    if !check_mac_perms(ctx, name, &target_context, source_context, cr, true) {
        return Err(PropError::PermissionDenied);
    }

    if !super::property_type::check_type(&type_str, value) {
        error!("Property type check failed for '{name}', expected type '{type_str}'");
        return Err(PropError::InvalidValue);
    }

    Ok(())
}

pub struct PropertyServer {
    ctx: Arc<RuntimeInfo>,
    listen_socket: OwnedFd,
    /// Server-thread end of the socketpair to the supervisor.
    init_socket: Arc<OwnedFd>,
    restorecon: Arc<AsyncRestorecon>,
}

impl PropertyServer {
    fn send_control_message(
        &self,
        msg: &str,
        name: &str,
        pid: i32,
        socket: Option<&mut SocketConnection>,
    ) -> Result<(), PropError> {
        if !self.ctx.props.accept_messages() {
            error!("Received control message after shutdown, ignoring");
            return Err(PropError::HandleControlMessage);
        }

        // The descriptor must be released before sendmsg: once the
        // supervisor owns it, closing it here would race the reply.
        let fd = match socket {
            Some(conn) if self.ctx.config.vendor_api_level > 29 => conn.release(),
            _ => None,
        };

        let control = PropertyMessage::Control {
            msg: msg.to_owned(),
            name: name.to_owned(),
            pid,
            has_fd: fd.is_some(),
        };
        if let Err(e) = send_message(self.init_socket.as_raw_fd(), &control, fd) {
            // The send failed, so ownership of the descriptor is back here
            // and it must not leak.
            if let Some(fd) = fd {
                drop(unsafe { OwnedFd::from_raw_fd(fd) });
            }
            error!("Failed to send control message: {e}");
            return Err(PropError::HandleControlMessage);
        }
        Ok(())
    }

    /// Full server-side handling of one set request: authorization, the
    /// distinguished-name side channels, then the plain store write.
    pub fn handle_property_set(
        &self,
        name: &str,
        value: &str,
        source_context: &str,
        cr: &PeerCred,
        socket: Option<&mut SocketConnection>,
    ) -> Result<(), PropError> {
        check_permissions(&self.ctx, name, value, source_context, cr)?;

        if let Some(action) = name.strip_prefix(CTL_PREFIX) {
            return self.send_control_message(action, value, cr.pid, socket);
        }

        if name == POWERCTL_PROPERTY {
            // Log who asked for the shutdown so a reboot can be blamed.
            let cmdline_path = self
                .ctx
                .config
                .proc_dir
                .join(cr.pid.to_string())
                .join("cmdline");
            let process = std::fs::read(&cmdline_path)
                .map(|raw| {
                    String::from_utf8_lossy(raw.split(|b| *b == 0).next().unwrap_or(&raw))
                        .into_owned()
                })
                .unwrap_or_default();
            info!(
                "Received sys.powerctl='{value}' from pid: {} ({process})",
                cr.pid
            );
        }

        // A non-init process writing a path here asks init to relabel that
        // path; the store only learns the value once the worker is done.
        if name == RESTORECON_PROPERTY
            && cr.pid != nix::unistd::getpid().as_raw()
            && !value.is_empty()
        {
            self.restorecon.trigger(value.to_owned());
            return Ok(());
        }

        self.ctx.props.set(name, value)
    }

    fn handle_connection(&self, socket: OwnedFd) {
        let cred = match nix::sys::socket::getsockopt(
            &socket,
            nix::sys::socket::sockopt::PeerCredentials,
        ) {
            Ok(cred) => PeerCred {
                pid: cred.pid(),
                uid: cred.uid(),
                gid: cred.gid(),
            },
            Err(e) => {
                error!("sys_prop: unable to get SO_PEERCRED: {e}");
                return;
            }
        };

        let mut conn = SocketConnection::new(socket, cred);
        let mut timeout_ms = DEFAULT_SOCKET_TIMEOUT_MS;

        let Some(cmd) = conn.recv_u32(&mut timeout_ms) else {
            error!("sys_prop: error while reading command from the socket");
            conn.send_u32(PropError::ReadCmd.code());
            return;
        };

        match cmd {
            PROP_MSG_SETPROP => {
                let Some(name_buf) = conn.recv_chars(PROP_NAME_MAX, &mut timeout_ms) else {
                    error!("sys_prop(SETPROP): error while reading name from the socket");
                    return;
                };
                let Some(value_buf) = conn.recv_chars(PROP_VALUE_MAX, &mut timeout_ms) else {
                    error!("sys_prop(SETPROP): error while reading value from the socket");
                    return;
                };
                let name = cstr_field(&name_buf);
                let value = cstr_field(&value_buf);

                let source_context = match conn.source_context(&self.ctx) {
                    Ok(source_context) => source_context,
                    Err(e) => {
                        error!("Unable to set property '{name}': getpeercon() failed: {e}");
                        return;
                    }
                };

                let cr = *conn.cred();
                // Legacy requests get no reply body, success or not.
                if let Err(e) =
                    self.handle_property_set(&name, &value, &source_context, &cr, None)
                {
                    error!(
                        "Unable to set property '{name}' from uid:{} gid:{} pid:{}: {e}",
                        cr.uid, cr.gid, cr.pid
                    );
                }
            }
            PROP_MSG_SETPROP2 => {
                let (name, value) = match (
                    conn.recv_string(&mut timeout_ms),
                    conn.recv_string(&mut timeout_ms),
                ) {
                    (Some(name), Some(value)) => (name, value),
                    _ => {
                        error!(
                            "sys_prop(SETPROP2): error while reading name/value from the socket"
                        );
                        conn.send_u32(PropError::ReadData.code());
                        return;
                    }
                };

                let source_context = match conn.source_context(&self.ctx) {
                    Ok(source_context) => source_context,
                    Err(e) => {
                        error!("Unable to set property '{name}': getpeercon() failed: {e}");
                        conn.send_u32(PropError::PermissionDenied.code());
                        return;
                    }
                };

                let cr = *conn.cred();
                let result =
                    self.handle_property_set(&name, &value, &source_context, &cr, Some(&mut conn));
                match result {
                    Ok(()) => {
                        conn.send_u32(PROP_SUCCESS);
                    }
                    Err(e) => {
                        error!(
                            "Unable to set property '{name}' from uid:{} gid:{} pid:{}: {e}",
                            cr.uid, cr.gid, cr.pid
                        );
                        conn.send_u32(e.code());
                    }
                }
            }
            _ => {
                error!("sys_prop: invalid command {cmd}");
                conn.send_u32(PropError::InvalidCmd.code());
            }
        }
    }

    fn handle_init_socket(&self) {
        let message: Result<(InitMessage, _), String> =
            recv_message(self.init_socket.as_raw_fd());
        let msg = match message {
            Ok((msg, _fd)) => msg,
            Err(e) => {
                error!("Could not read message from init: {e}");
                return;
            }
        };

        match msg {
            InitMessage::LoadPersistentProperties => {
                load::load_override_properties(&self.ctx);
                // Persistent values are only read back after every default
                // has been loaded, so defaults never clobber them.
                for (name, value) in self.ctx.props.persistent_store().load() {
                    self.ctx.props.init_set(&name, &value);
                }
                self.ctx.props.set_persistent_loaded();
                self.ctx
                    .props
                    .init_set("ro.persistent_properties.ready", "true");
            }
            InitMessage::StopSendingMessages => {
                self.ctx.props.set_accept_messages(false);
            }
            InitMessage::StartSendingMessages => {
                self.ctx.props.set_accept_messages(true);
            }
        }
    }

    fn run(&self) {
        loop {
            let mut fds = [
                PollFd::new(self.listen_socket.as_fd(), PollFlags::POLLIN),
                PollFd::new(self.init_socket.as_fd(), PollFlags::POLLIN),
            ];
            if let Err(e) = poll(&mut fds, PollTimeout::NONE) {
                if e != nix::Error::EINTR {
                    error!("Property service poll failed: {e}");
                }
                continue;
            }

            let listen_ready = fds[0]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN));
            let init_ready = fds[1]
                .revents()
                .is_some_and(|r| r.contains(PollFlags::POLLIN));

            if listen_ready {
                match nix::sys::socket::accept4(
                    self.listen_socket.as_raw_fd(),
                    SockFlag::SOCK_CLOEXEC,
                ) {
                    Ok(client) => {
                        let client = unsafe { OwnedFd::from_raw_fd(client) };
                        self.handle_connection(client);
                    }
                    Err(nix::Error::EAGAIN) => {}
                    Err(e) => error!("Could not accept property client: {e}"),
                }
            }
            if init_ready {
                self.handle_init_socket();
            }
        }
    }
}

fn cstr_field(buf: &[u8]) -> String {
    let end = buf.iter().position(|b| *b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

fn create_client_socket(ctx: &RuntimeInfo) -> Result<OwnedFd, String> {
    let path = &ctx.config.property_socket_path;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| format!("Could not create socket dir {parent:?}: {e}"))?;
    }
    let _ = std::fs::remove_file(path);

    let socket = nix::sys::socket::socket(
        nix::sys::socket::AddressFamily::Unix,
        nix::sys::socket::SockType::Stream,
        SockFlag::SOCK_CLOEXEC | SockFlag::SOCK_NONBLOCK,
        None,
    )
    .map_err(|e| format!("Could not create property socket: {e}"))?;

    let addr = nix::sys::socket::UnixAddr::new(path.as_path())
        .map_err(|e| format!("Bad property socket path {path:?}: {e}"))?;
    nix::sys::socket::bind(socket.as_raw_fd(), &addr)
        .map_err(|e| format!("Could not bind property socket {path:?}: {e}"))?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o666))
        .map_err(|e| format!("Could not chmod property socket {path:?}: {e}"))?;
    nix::sys::socket::listen(&socket, nix::sys::socket::Backlog::new(8).unwrap())
        .map_err(|e| format!("Could not listen on property socket: {e}"))?;

    Ok(socket)
}

/// Bring up the property service thread. Returns the supervisor's end of the
/// internal socketpair: control requests and change notifications arrive on
/// it, init-state messages go out on it.
pub fn start_property_service(
    ctx: &Arc<RuntimeInfo>,
    file_contexts: Arc<FileContexts>,
) -> Result<OwnedFd, String> {
    ctx.props.init_set("ro.property_service.version", "2");

    let (supervisor_socket, server_socket) = nix::sys::socket::socketpair(
        nix::sys::socket::AddressFamily::Unix,
        nix::sys::socket::SockType::SeqPacket,
        None,
        SockFlag::SOCK_CLOEXEC,
    )
    .map_err(|e| format!("Failed to socketpair() between property service and init: {e}"))?;

    let server_socket = Arc::new(server_socket);
    ctx.props.set_notify_socket(Arc::clone(&server_socket));
    ctx.props.set_accept_messages(true);

    let listen_socket = create_client_socket(ctx)?;
    trace!(
        "Property service listening on {:?}",
        ctx.config.property_socket_path
    );

    let restorecon = Arc::new(AsyncRestorecon::new(
        file_contexts,
        ctx.config.property_socket_path.clone(),
    ));

    let server = PropertyServer {
        ctx: Arc::clone(ctx),
        listen_socket,
        init_socket: server_socket,
        restorecon,
    };
    std::thread::Builder::new()
        .name("property_service".to_owned())
        .spawn(move || server.run())
        .map_err(|e| format!("Could not spawn the property service thread: {e}"))?;

    Ok(supervisor_socket)
}
