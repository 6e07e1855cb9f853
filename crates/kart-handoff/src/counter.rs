//! Completion counter: a single System V semaphore per invocation.
//!
//! The client creates it at the resting value, the helper overwrites it once
//! with `exit_code + COUNTER_OFFSET`, and the client removes it afterwards.

use std::io;

use kart_contracts::{COUNTER_OFFSET, COUNTER_RESTING};
use tracing::{debug, trace};

/// Kernel handle of a counter. Carries no ownership; see [`CompletionCounter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CounterId(i32);

impl CounterId {
    pub fn from_raw(semid: i32) -> Self {
        CounterId(semid)
    }

    pub fn raw(self) -> i32 {
        self.0
    }

    pub fn value(self) -> io::Result<i32> {
        let v = unsafe { libc::semctl(self.0, 0, libc::GETVAL) };
        if v < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(v)
    }

    fn set_value(self, value: i32) -> io::Result<()> {
        let rc = unsafe { libc::semctl(self.0, 0, libc::SETVAL, value as libc::c_int) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Helper side of the protocol: store `exit_code + COUNTER_OFFSET`.
    pub fn publish_exit_code(self, exit_code: i32) -> io::Result<()> {
        let encoded = exit_code
            .checked_add(COUNTER_OFFSET)
            .filter(|v| *v != COUNTER_RESTING && *v >= 0)
            .ok_or_else(|| io::Error::from_raw_os_error(libc::ERANGE))?;
        self.set_value(encoded)
    }

    /// Removes the counter from the kernel namespace. A second removal fails
    /// with `EINVAL` (or `EIDRM`), which callers can treat as "not found".
    pub fn remove(self) -> io::Result<()> {
        let rc = unsafe { libc::semctl(self.0, 0, libc::IPC_RMID) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Blocks until the value leaves the resting state without altering it.
    ///
    /// The `[-1, +1]` pair is admitted by the kernel only once the value is at
    /// least 1 and nets to zero. Returns `EIDRM` when the counter is removed
    /// while waiting.
    pub fn wait_signaled(self) -> io::Result<()> {
        let mut ops = [
            libc::sembuf {
                sem_num: 0,
                sem_op: -1,
                sem_flg: 0,
            },
            libc::sembuf {
                sem_num: 0,
                sem_op: 1,
                sem_flg: 0,
            },
        ];
        loop {
            let rc = unsafe { libc::semop(self.0, ops.as_mut_ptr(), ops.len() as _) };
            if rc == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }
}

impl std::fmt::Display for CounterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owning guard: the counter is removed when this is dropped unless
/// [`CompletionCounter::destroy`] already did so.
#[derive(Debug)]
pub struct CompletionCounter {
    id: CounterId,
    removed: bool,
}

impl CompletionCounter {
    pub fn create_exclusive() -> io::Result<Self> {
        let mode = libc::S_IRUSR as libc::c_int | libc::S_IWUSR as libc::c_int;
        let semid = unsafe {
            libc::semget(
                libc::IPC_PRIVATE,
                1,
                libc::IPC_CREAT | libc::IPC_EXCL | mode,
            )
        };
        if semid < 0 {
            return Err(io::Error::last_os_error());
        }

        let counter = CompletionCounter {
            id: CounterId(semid),
            removed: false,
        };
        // Dropping `counter` on error removes the half-initialised semaphore.
        counter.id.set_value(COUNTER_RESTING)?;
        debug!(event = "counter_created", semid);
        Ok(counter)
    }

    pub fn id(&self) -> CounterId {
        self.id
    }

    pub fn value(&self) -> io::Result<i32> {
        self.id.value()
    }

    pub fn destroy(&mut self) -> io::Result<()> {
        if self.removed {
            return Ok(());
        }
        self.removed = true;
        trace!(event = "counter_removed", semid = self.id.0);
        self.id.remove()
    }
}

impl Drop for CompletionCounter {
    fn drop(&mut self) {
        let _ = self.destroy();
    }
}

/// `None` while the counter still holds the resting value.
pub fn decode_exit_code(raw: i32) -> Option<i32> {
    if raw == COUNTER_RESTING {
        return None;
    }
    Some(raw - COUNTER_OFFSET)
}

/// Maps a helper-reported code onto a process exit status byte. Negative
/// codes are signal deaths (`-n`) and follow the shell's `128 + n`.
pub fn exit_status_byte(code: i32) -> u8 {
    match code {
        0..=255 => code as u8,
        c if c < 0 => (128i32.saturating_add(c.saturating_neg()) & 0xff) as u8,
        c => (c & 0xff) as u8,
    }
}
