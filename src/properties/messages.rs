//! Messages on the internal socketpair between the property service thread
//! and the supervisor main loop. The pair is SEQPACKET so each sendmsg is
//! one message; the payload is serde_json, a control request may carry the
//! client's socket descriptor as SCM_RIGHTS ancillary data.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{FromRawFd, OwnedFd};
use std::os::unix::io::RawFd;

use nix::sys::socket::{ControlMessage, ControlMessageOwned, MsgFlags};
use serde::{Deserialize, Serialize};

/// Server → supervisor.
#[derive(Debug, Serialize, Deserialize)]
pub enum PropertyMessage {
    Changed {
        name: String,
        value: String,
    },
    Control {
        msg: String,
        name: String,
        pid: i32,
        /// True when the client socket rides along as ancillary data; the
        /// supervisor writes the result code directly to it.
        has_fd: bool,
    },
}

/// Supervisor → server.
#[derive(Debug, Serialize, Deserialize)]
pub enum InitMessage {
    LoadPersistentProperties,
    StopSendingMessages,
    StartSendingMessages,
}

const MAX_MESSAGE: usize = 8192;

/// Serialize `msg` onto the socketpair. `fd_payload` is the raw descriptor
/// to attach; ownership has already been released by the caller, who must
/// close it again if this fails.
pub fn send_message<T: Serialize>(
    socket: RawFd,
    msg: &T,
    fd_payload: Option<RawFd>,
) -> Result<(), String> {
    let payload =
        serde_json::to_vec(msg).map_err(|e| format!("Could not serialize message: {e}"))?;
    if payload.len() > MAX_MESSAGE {
        return Err(format!("Message too large: {} bytes", payload.len()));
    }

    let iov = [IoSlice::new(&payload)];
    let fds;
    let cmsgs: &[ControlMessage] = match &fd_payload {
        Some(fd) => {
            fds = [*fd];
            &[ControlMessage::ScmRights(&fds)]
        }
        None => &[],
    };

    nix::sys::socket::sendmsg::<()>(socket, &iov, cmsgs, MsgFlags::empty(), None)
        .map_err(|e| format!("sendmsg on the init socket failed: {e}"))?;
    Ok(())
}

/// Receive one message, together with a passed descriptor if the sender
/// attached one.
pub fn recv_message<T: for<'de> Deserialize<'de>>(
    socket: RawFd,
) -> Result<(T, Option<OwnedFd>), String> {
    let mut buf = vec![0u8; MAX_MESSAGE];
    let mut cmsg_buf = nix::cmsg_space!([RawFd; 1]);

    let (len, fd) = {
        let mut iov = [IoSliceMut::new(&mut buf)];
        let received = nix::sys::socket::recvmsg::<()>(
            socket,
            &mut iov,
            Some(&mut cmsg_buf),
            MsgFlags::empty(),
        )
        .map_err(|e| format!("recvmsg on the init socket failed: {e}"))?;

        let mut fd = None;
        for cmsg in received
            .cmsgs()
            .map_err(|e| format!("Bad control message: {e}"))?
        {
            if let ControlMessageOwned::ScmRights(received_fds) = cmsg {
                if let Some(raw) = received_fds.first() {
                    fd = Some(unsafe { OwnedFd::from_raw_fd(*raw) });
                }
            }
        }
        (received.bytes, fd)
    };

    let msg = serde_json::from_slice(&buf[..len])
        .map_err(|e| format!("Could not parse message from the init socket: {e}"))?;
    Ok((msg, fd))
}
