//! Collects exit statuses of helpers this process bootstrapped.
//!
//! A bootstrapped helper normally outlives the client, but one that loses the
//! bind race against a concurrently started helper quits at once and would
//! otherwise stay a zombie until the client exits.

use std::path::{Path, PathBuf};
use std::process::Child;
use std::sync::{mpsc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

static WATCHER: OnceLock<mpsc::Sender<SpawnedHelper>> = OnceLock::new();

#[derive(Debug)]
struct SpawnedHelper {
    child: Child,
    socket: PathBuf,
    started: Instant,
}

#[derive(Debug, Default)]
struct Reaper {
    helpers: Vec<SpawnedHelper>,
}

impl Reaper {
    fn adopt(&mut self, helper: SpawnedHelper) {
        self.helpers.push(helper);
    }

    /// Drops helpers that have exited; returns how many are still running.
    fn collect(&mut self) -> usize {
        self.helpers.retain_mut(|h| match h.child.try_wait() {
            Ok(Some(status)) => {
                debug!(
                    event = "helper_exited",
                    pid = h.child.id(),
                    status = %status,
                    lived_ms = h.started.elapsed().as_millis() as u64,
                    socket = %h.socket.display()
                );
                false
            }
            Ok(None) => true,
            // ECHILD: somebody else already waited for it.
            Err(err) => err.raw_os_error() != Some(libc::ECHILD),
        });
        self.helpers.len()
    }
}

/// Hands `child` to the background watcher thread, starting it on first use.
pub(crate) fn watch(child: Child, socket: &Path) {
    let helper = SpawnedHelper {
        child,
        socket: socket.to_path_buf(),
        started: Instant::now(),
    };

    let tx = WATCHER.get_or_init(|| {
        let (tx, rx) = mpsc::channel();
        let _ = thread::Builder::new()
            .name("kart-helper-reaper".to_string())
            .spawn(move || watch_loop(rx));
        tx
    });

    // The watcher thread failed to start; wait on a dedicated thread instead.
    if let Err(mpsc::SendError(mut helper)) = tx.send(helper) {
        let _ = thread::Builder::new()
            .name("kart-helper-wait".to_string())
            .spawn(move || {
                let _ = helper.child.wait();
            });
    }
}

fn watch_loop(rx: mpsc::Receiver<SpawnedHelper>) {
    let mut reaper = Reaper::default();
    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(helper) => reaper.adopt(helper),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                if reaper.collect() == 0 {
                    return;
                }
                thread::sleep(POLL_INTERVAL);
                continue;
            }
        }
        reaper.collect();
    }
}
