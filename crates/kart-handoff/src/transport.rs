use std::io;
use std::os::unix::io::AsRawFd as _;
use std::os::unix::net::UnixStream;

use kart_contracts::DESCRIPTOR_COUNT;
use tracing::debug;

use crate::descriptors::DescriptorBundle;
use crate::HandoffError;

#[cfg(any(target_os = "linux", target_os = "android"))]
const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
const SEND_FLAGS: libc::c_int = 0;

/// Sends `payload` with the bundle's descriptors attached as one
/// `SCM_RIGHTS` message. A short write is an error; nothing is retried once
/// any byte may have been consumed.
pub fn send_handoff(
    stream: &UnixStream,
    payload: &[u8],
    bundle: &DescriptorBundle<'_>,
) -> Result<(), HandoffError> {
    let fds = bundle.raw_fds();
    suppress_sigpipe(stream).map_err(HandoffError::Transport)?;

    let fds_len = std::mem::size_of_val(&fds);
    let space = unsafe { libc::CMSG_SPACE(fds_len as libc::c_uint) } as usize;
    // u64 backing keeps the buffer aligned for cmsghdr.
    let mut control = vec![0u64; space.div_ceil(std::mem::size_of::<u64>())];

    let mut iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = space as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        if cmsg.is_null() {
            return Err(HandoffError::Transport(io::Error::from_raw_os_error(
                libc::EINVAL,
            )));
        }
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(fds_len as libc::c_uint) as _;
        std::ptr::copy_nonoverlapping(
            fds.as_ptr() as *const u8,
            libc::CMSG_DATA(cmsg),
            fds_len,
        );
        msg.msg_controllen = (*cmsg).cmsg_len as _;
    }

    let sent = loop {
        let rc = unsafe { libc::sendmsg(stream.as_raw_fd(), &msg, SEND_FLAGS) };
        if rc >= 0 {
            break rc as usize;
        }
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(HandoffError::Transport(err));
    };

    if sent != payload.len() {
        return Err(HandoffError::PartialSend {
            sent,
            expected: payload.len(),
        });
    }

    debug!(
        event = "handoff_sent",
        bytes = sent,
        descriptors = DESCRIPTOR_COUNT
    );
    Ok(())
}

#[cfg(any(target_os = "macos", target_os = "ios"))]
fn suppress_sigpipe(stream: &UnixStream) -> io::Result<()> {
    let on: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_NOSIGPIPE,
            &on as *const libc::c_int as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(any(target_os = "macos", target_os = "ios")))]
fn suppress_sigpipe(_stream: &UnixStream) -> io::Result<()> {
    Ok(())
}
