use std::io;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::counter::{decode_exit_code, CompletionCounter};
use crate::HandoffError;

/// Older helpers raise `SIGALRM` on the client after publishing the exit
/// code. Ignoring it keeps that from terminating the process; completion is
/// observed through the counter instead.
pub fn ignore_legacy_alarm() {
    unsafe {
        libc::signal(libc::SIGALRM, libc::SIG_IGN);
    }
}

/// Blocks until the helper publishes an exit code or `timeout` elapses.
///
/// Takes ownership of the counter and removes it before returning on every
/// path. A monitor thread parks in the kernel wait; removing the counter
/// releases it.
pub fn wait_for_completion(
    mut counter: CompletionCounter,
    timeout: Duration,
) -> Result<i32, HandoffError> {
    let id = counter.id();
    let (tx, rx) = mpsc::channel::<io::Result<()>>();

    let monitor = thread::Builder::new()
        .name("kart-completion-monitor".to_string())
        .spawn(move || {
            let _ = tx.send(id.wait_signaled());
        })
        .map_err(HandoffError::CounterLost)?;

    let outcome = match rx.recv_timeout(timeout) {
        Ok(Ok(())) => match counter.value() {
            Ok(raw) => decode_exit_code(raw).ok_or_else(|| {
                HandoffError::CounterLost(io::Error::new(
                    io::ErrorKind::Other,
                    "woken while counter still at resting value",
                ))
            }),
            Err(err) => Err(HandoffError::CounterLost(err)),
        },
        Ok(Err(err)) => Err(HandoffError::CounterLost(err)),
        Err(mpsc::RecvTimeoutError::Timeout) => {
            match counter.value().ok().and_then(decode_exit_code) {
                Some(code) => {
                    debug!(event = "completion_raced_deadline", semid = %id, code);
                    Ok(code)
                }
                None => Err(HandoffError::WaitTimeout { waited: timeout }),
            }
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(HandoffError::CounterLost(
            io::Error::new(io::ErrorKind::Other, "completion monitor exited"),
        )),
    };

    match counter.destroy() {
        Ok(()) => {
            let _ = monitor.join();
        }
        Err(err) => debug!(event = "counter_remove_failed", semid = %id, error = %err),
    }

    outcome
}
