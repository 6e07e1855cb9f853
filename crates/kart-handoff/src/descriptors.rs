use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt as _;
use std::os::unix::io::{AsFd as _, AsRawFd as _, BorrowedFd, RawFd};
use std::path::Path;

use kart_contracts::{CWD_SLOT, DESCRIPTOR_COUNT, STDERR_SLOT, STDIN_SLOT, STDOUT_SLOT};

/// The four descriptors handed to the helper, in wire order. The working
/// directory descriptor is owned and closes when the bundle is dropped.
#[derive(Debug)]
pub struct DescriptorBundle<'a> {
    stdin: BorrowedFd<'a>,
    stdout: BorrowedFd<'a>,
    stderr: BorrowedFd<'a>,
    cwd: File,
}

impl DescriptorBundle<'static> {
    /// Standard streams of this process plus a read-only handle on `cwd`.
    pub fn for_process(cwd: &Path) -> io::Result<Self> {
        // SAFETY: descriptors 0-2 stay reserved for the life of the process;
        // if one was closed, sendmsg reports EBADF.
        let (stdin, stdout, stderr) = unsafe {
            (
                BorrowedFd::borrow_raw(libc::STDIN_FILENO),
                BorrowedFd::borrow_raw(libc::STDOUT_FILENO),
                BorrowedFd::borrow_raw(libc::STDERR_FILENO),
            )
        };
        Ok(DescriptorBundle::new(stdin, stdout, stderr, open_cwd(cwd)?))
    }
}

impl<'a> DescriptorBundle<'a> {
    pub fn new(
        stdin: BorrowedFd<'a>,
        stdout: BorrowedFd<'a>,
        stderr: BorrowedFd<'a>,
        cwd: File,
    ) -> Self {
        DescriptorBundle {
            stdin,
            stdout,
            stderr,
            cwd,
        }
    }

    pub fn raw_fds(&self) -> [RawFd; DESCRIPTOR_COUNT] {
        let mut fds = [-1; DESCRIPTOR_COUNT];
        fds[STDIN_SLOT] = self.stdin.as_raw_fd();
        fds[STDOUT_SLOT] = self.stdout.as_raw_fd();
        fds[STDERR_SLOT] = self.stderr.as_raw_fd();
        fds[CWD_SLOT] = self.cwd.as_fd().as_raw_fd();
        fds
    }
}

pub fn open_cwd(cwd: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(cwd)
}
