//! The property service: a shared key/value namespace with access control,
//! persistence, and a control side-channel into the service supervisor.

pub mod async_restorecon;
pub mod client;
pub mod expand;
pub mod load;
pub mod messages;
pub mod persistent;
pub mod property_info;
pub mod property_type;
pub mod server;
pub mod store;

/// Maximum property name length including the terminator of the legacy wire
/// format, so 31 usable characters.
pub const PROP_NAME_MAX: usize = 32;
/// Maximum property value length including the terminator, so 91 usable
/// bytes.
pub const PROP_VALUE_MAX: usize = 92;

/// Properties whose write is interpreted as a service-lifecycle command.
pub const CTL_PREFIX: &str = "ctl.";
/// Reboot/shutdown request property, logged with the writer's identity.
pub const POWERCTL_PROPERTY: &str = "sys.powerctl";
/// Writes to this property queue an asynchronous recursive relabel.
pub const RESTORECON_PROPERTY: &str = "selinux.restorecon_recursive";

/// Wire result codes of the property socket (§ external interface). The
/// discriminants are the protocol, do not renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PropError {
    ReadCmd = 1,
    ReadData = 2,
    InvalidCmd = 3,
    InvalidName = 4,
    InvalidValue = 5,
    PermissionDenied = 6,
    SetFailed = 7,
    ReadOnlyProperty = 8,
    HandleControlMessage = 9,
}

pub const PROP_SUCCESS: u32 = 0;

impl PropError {
    #[must_use]
    pub const fn code(self) -> u32 {
        self as u32
    }
}

impl std::fmt::Display for PropError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        let msg = match self {
            Self::ReadCmd => "could not read command",
            Self::ReadData => "could not read request data",
            Self::InvalidCmd => "unknown command",
            Self::InvalidName => "illegal property name",
            Self::InvalidValue => "illegal property value",
            Self::PermissionDenied => "permission denied",
            Self::SetFailed => "property set failed",
            Self::ReadOnlyProperty => "read-only property was already set",
            Self::HandleControlMessage => "could not handle control message",
        };
        fmt.write_str(msg)
    }
}

/// A legal property name is non-empty, at most 31 characters, drawn from
/// `[A-Za-z0-9._-]`, and has no empty dot-separated segments.
#[must_use]
pub fn is_legal_property_name(name: &str) -> bool {
    if name.is_empty() || name.len() >= PROP_NAME_MAX {
        return false;
    }
    if name.starts_with('.') || name.ends_with('.') || name.contains("..") {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}
