#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::{self, Read as _};
use std::os::unix::io::{AsRawFd as _, FromRawFd as _, OwnedFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kart_handoff::{ConnectRetry, CounterId, HandoffConfig, InvocationContext};
use serde::Deserialize;

pub const CONTROL: &str = "KART_USE_HELPER";

#[derive(Debug, Deserialize)]
pub struct WirePayload {
    pub pid: u32,
    pub environ: BTreeMap<String, String>,
    pub argv: Vec<String>,
    pub semid: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdIdentity {
    pub dev: u64,
    pub ino: u64,
    pub is_dir: bool,
}

#[derive(Debug)]
pub struct Received {
    pub payload: WirePayload,
    pub fds: Vec<FdIdentity>,
}

#[derive(Debug, Clone, Copy)]
pub enum Reply {
    ExitCode(i32),
    /// Publish and also raise SIGALRM on the client, like older helpers.
    ExitCodeWithAlarm(i32),
    Never,
}

pub fn identity(fd: RawFd) -> io::Result<FdIdentity> {
    let mut st: libc::stat = unsafe { std::mem::zeroed() };
    if unsafe { libc::fstat(fd, &mut st) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(FdIdentity {
        dev: st.st_dev as u64,
        ino: st.st_ino as u64,
        is_dir: (st.st_mode & libc::S_IFMT) == libc::S_IFDIR,
    })
}

pub fn path_identity(path: &Path) -> FdIdentity {
    use std::os::unix::fs::MetadataExt as _;
    let md = std::fs::metadata(path).expect("stat path");
    FdIdentity {
        dev: md.dev(),
        ino: md.ino(),
        is_dir: md.is_dir(),
    }
}

/// Reads one handoff message: JSON bytes plus `SCM_RIGHTS` descriptors.
pub fn recv_handoff(stream: &mut UnixStream) -> io::Result<(Vec<u8>, Vec<OwnedFd>)> {
    let mut buf = vec![0u8; 64 * 1024];
    let space = unsafe { libc::CMSG_SPACE((8 * std::mem::size_of::<libc::c_int>()) as u32) };
    let mut control = vec![0u64; (space as usize).div_ceil(8)];

    let mut iov = libc::iovec {
        iov_base: buf.as_mut_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let mut msg: libc::msghdr = unsafe { std::mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = control.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = space as _;

    let n = unsafe { libc::recvmsg(stream.as_raw_fd(), &mut msg, 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }

    let mut fds = Vec::new();
    unsafe {
        let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
        while !cmsg.is_null() {
            if (*cmsg).cmsg_level == libc::SOL_SOCKET && (*cmsg).cmsg_type == libc::SCM_RIGHTS {
                let data_len = (*cmsg).cmsg_len as usize - libc::CMSG_LEN(0) as usize;
                let count = data_len / std::mem::size_of::<libc::c_int>();
                let data = libc::CMSG_DATA(cmsg) as *const libc::c_int;
                for i in 0..count {
                    let fd = std::ptr::read_unaligned(data.add(i));
                    fds.push(OwnedFd::from_raw_fd(fd));
                }
            }
            cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
        }
    }

    let mut bytes = buf[..n as usize].to_vec();
    while serde_json::from_slice::<serde_json::Value>(&bytes).is_err() {
        let mut more = [0u8; 4096];
        let m = stream.read(&mut more)?;
        if m == 0 {
            break;
        }
        bytes.extend_from_slice(&more[..m]);
    }
    Ok((bytes, fds))
}

/// One-shot helper stand-in listening on `socket`.
pub fn spawn_fake_helper(socket: &Path, reply: Reply) -> JoinHandle<io::Result<Received>> {
    let listener = UnixListener::bind(socket).expect("bind fake helper socket");
    thread::spawn(move || {
        let (mut stream, _) = listener.accept()?;
        let (bytes, fds) = recv_handoff(&mut stream)?;
        let payload: WirePayload = serde_json::from_slice(&bytes)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let ids = fds
            .iter()
            .map(|fd| identity(fd.as_raw_fd()))
            .collect::<io::Result<Vec<_>>>()?;

        let counter = CounterId::from_raw(payload.semid);
        match reply {
            Reply::ExitCode(code) => counter.publish_exit_code(code)?,
            Reply::ExitCodeWithAlarm(code) => {
                counter.publish_exit_code(code)?;
                unsafe {
                    libc::kill(payload.pid as libc::pid_t, libc::SIGALRM);
                }
            }
            Reply::Never => {}
        }

        Ok(Received { payload, fds: ids })
    })
}

pub fn config_for(socket: PathBuf, helper_program: PathBuf) -> HandoffConfig {
    HandoffConfig {
        control_var: CONTROL.to_string(),
        socket_path: socket,
        helper_program,
        connect: ConnectRetry {
            attempts: 10,
            interval: Duration::from_millis(5),
        },
        wait_timeout: Duration::from_secs(20),
    }
}

pub fn context_in(cwd: &Path, extra_env: &[&str], argv: &[&str]) -> InvocationContext {
    let mut env = vec!["PATH=/usr/bin:/bin".to_string(), format!("{CONTROL}=1")];
    env.extend(extra_env.iter().map(|s| s.to_string()));
    InvocationContext::from_raw_environ(
        std::process::id(),
        env,
        argv.iter().map(|a| std::ffi::OsString::from(*a)),
        cwd.to_path_buf(),
        CONTROL,
    )
}
