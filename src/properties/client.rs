//! Minimal property-service client: the `SETPROP2` side of the wire
//! protocol. Used by in-process helpers that must route their writes through
//! the server thread like any other client (the async restorecon worker),
//! and by the tests.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use super::server::PROP_MSG_SETPROP2;

/// Send one set request and return the server's result code.
pub fn set_property(socket_path: &Path, name: &str, value: &str) -> std::io::Result<u32> {
    let mut stream = UnixStream::connect(socket_path)?;
    stream.set_read_timeout(Some(std::time::Duration::from_secs(5)))?;

    let mut request = Vec::with_capacity(12 + name.len() + value.len());
    request.extend_from_slice(&PROP_MSG_SETPROP2.to_ne_bytes());
    request.extend_from_slice(&(name.len() as u32).to_ne_bytes());
    request.extend_from_slice(name.as_bytes());
    request.extend_from_slice(&(value.len() as u32).to_ne_bytes());
    request.extend_from_slice(value.as_bytes());
    stream.write_all(&request)?;

    let mut reply = [0u8; 4];
    stream.read_exact(&mut reply)?;
    Ok(u32::from_ne_bytes(reply))
}
