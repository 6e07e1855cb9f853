use std::ffi::OsString;
use std::io;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use kart_contracts::{HELPER_SOCKET_FLAG, HELPER_SUBCOMMAND};
use tracing::{debug, info};

use crate::config::ConnectRetry;
use crate::{helper_reaper, HandoffError};

/// Something that can be connected to, and started when it is not running.
pub trait HelperEndpoint {
    type Conn;

    fn connect(&mut self) -> io::Result<Self::Conn>;

    fn spawn_helper(&mut self) -> io::Result<()>;

    fn address(&self) -> PathBuf;

    fn helper_program(&self) -> PathBuf;
}

/// Returns a connection to a live helper, starting one if none answers.
///
/// At most one helper is spawned per call; the retries only reconnect.
pub fn locate_helper<E: HelperEndpoint>(
    endpoint: &mut E,
    retry: &ConnectRetry,
) -> Result<E::Conn, HandoffError> {
    match endpoint.connect() {
        Ok(conn) => {
            debug!(event = "helper_connected", attempt = 0);
            return Ok(conn);
        }
        Err(err) => debug!(event = "helper_unreachable", error = %err),
    }

    endpoint
        .spawn_helper()
        .map_err(|source| HandoffError::Bootstrap {
            program: endpoint.helper_program(),
            source,
        })?;

    for attempt in 1..=retry.attempts {
        match endpoint.connect() {
            Ok(conn) => {
                debug!(event = "helper_connected", attempt);
                return Ok(conn);
            }
            Err(err) => debug!(event = "helper_connect_retry", attempt, error = %err),
        }
        if attempt < retry.attempts {
            thread::sleep(retry.interval);
        }
    }

    Err(HandoffError::ConnectTimeout {
        socket: endpoint.address(),
        attempts: retry.attempts,
    })
}

/// The real helper: a Unix socket at a fixed path, bootstrapped by
/// re-executing this program as `<program> helper --socket <path>`.
#[derive(Debug, Clone)]
pub struct UnixHelperEndpoint {
    pub socket_path: PathBuf,
    pub helper_program: PathBuf,
    pub spawn_env: Vec<(OsString, OsString)>,
}

impl UnixHelperEndpoint {
    pub fn helper_command(&self) -> Command {
        let mut cmd = Command::new(&self.helper_program);
        cmd.arg(HELPER_SUBCOMMAND)
            .arg(HELPER_SOCKET_FLAG)
            .arg(&self.socket_path);
        cmd.env_clear();
        cmd.envs(self.spawn_env.iter().map(|(k, v)| (k, v)));
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::null());

        {
            use std::os::unix::process::CommandExt as _;
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() == -1 && libc::setpgid(0, 0) == -1 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        cmd
    }
}

impl HelperEndpoint for UnixHelperEndpoint {
    type Conn = UnixStream;

    fn connect(&mut self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.socket_path)
    }

    fn spawn_helper(&mut self) -> io::Result<()> {
        let child = self.helper_command().spawn()?;
        info!(
            event = "helper_spawned",
            pid = child.id(),
            program = %self.helper_program.display(),
            socket = %self.socket_path.display()
        );
        helper_reaper::watch(child, &self.socket_path);
        Ok(())
    }

    fn address(&self) -> PathBuf {
        self.socket_path.clone()
    }

    fn helper_program(&self) -> PathBuf {
        self.helper_program.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct FakeEndpoint {
        connects: u32,
        spawns: u32,
        reachable_after_spawn_on: Option<u32>,
        reachable_now: bool,
        spawn_fails: bool,
        retry_connects: u32,
    }

    impl FakeEndpoint {
        fn new() -> Self {
            FakeEndpoint {
                connects: 0,
                spawns: 0,
                reachable_after_spawn_on: None,
                reachable_now: false,
                spawn_fails: false,
                retry_connects: 0,
            }
        }
    }

    impl HelperEndpoint for FakeEndpoint {
        type Conn = u32;

        fn connect(&mut self) -> io::Result<u32> {
            self.connects += 1;
            if self.reachable_now {
                return Ok(self.connects);
            }
            if self.spawns > 0 {
                self.retry_connects += 1;
                if self
                    .reachable_after_spawn_on
                    .is_some_and(|n| self.retry_connects >= n)
                {
                    return Ok(self.connects);
                }
            }
            Err(io::Error::from(io::ErrorKind::ConnectionRefused))
        }

        fn spawn_helper(&mut self) -> io::Result<()> {
            self.spawns += 1;
            if self.spawn_fails {
                return Err(io::Error::from_raw_os_error(libc::ENOENT));
            }
            Ok(())
        }

        fn address(&self) -> PathBuf {
            PathBuf::from("/fake/.kart.socket")
        }

        fn helper_program(&self) -> PathBuf {
            PathBuf::from("/fake/kart")
        }
    }

    fn fast_retry() -> ConnectRetry {
        ConnectRetry {
            attempts: 10,
            interval: Duration::from_millis(1),
        }
    }

    #[test]
    fn reachable_helper_needs_one_connect_and_no_spawn() {
        let mut ep = FakeEndpoint::new();
        ep.reachable_now = true;
        let conn = locate_helper(&mut ep, &fast_retry()).expect("connected");
        assert_eq!(conn, 1);
        assert_eq!(ep.connects, 1);
        assert_eq!(ep.spawns, 0);
    }

    #[test]
    fn spawn_failure_is_bootstrap_error_without_retries() {
        let mut ep = FakeEndpoint::new();
        ep.spawn_fails = true;
        let err = locate_helper(&mut ep, &fast_retry()).expect_err("spawn fails");
        match &err {
            HandoffError::Bootstrap { source, .. } => {
                assert_eq!(source.raw_os_error(), Some(libc::ENOENT))
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(ep.connects, 1);
        assert_eq!(ep.spawns, 1);
    }

    #[test]
    fn helper_reachable_on_fifth_retry_succeeds() {
        let mut ep = FakeEndpoint::new();
        ep.reachable_after_spawn_on = Some(5);
        locate_helper(&mut ep, &fast_retry()).expect("connected");
        assert_eq!(ep.spawns, 1);
        assert_eq!(ep.retry_connects, 5);
        assert_eq!(ep.connects, 6);
    }

    #[test]
    fn unreachable_helper_times_out_after_bounded_retries() {
        let mut ep = FakeEndpoint::new();
        let err = locate_helper(&mut ep, &fast_retry()).expect_err("timeout");
        assert!(matches!(
            err,
            HandoffError::ConnectTimeout { attempts: 10, .. }
        ));
        assert_eq!(err.exit_code(), 2);
        assert_eq!(ep.spawns, 1);
        assert_eq!(ep.retry_connects, 10);
    }

    #[test]
    fn retry_spacing_is_respected() {
        let mut ep = FakeEndpoint::new();
        let retry = ConnectRetry {
            attempts: 4,
            interval: Duration::from_millis(20),
        };
        let start = std::time::Instant::now();
        let _ = locate_helper(&mut ep, &retry);
        assert!(start.elapsed() >= Duration::from_millis(60));
    }

    #[test]
    fn helper_command_has_fixed_arguments_and_filtered_env() {
        let ep = UnixHelperEndpoint {
            socket_path: PathBuf::from("/home/u/.kart.socket"),
            helper_program: PathBuf::from("/opt/kart/kart"),
            spawn_env: vec![(OsString::from("PATH"), OsString::from("/usr/bin"))],
        };
        let cmd = ep.helper_command();
        assert_eq!(cmd.get_program(), "/opt/kart/kart");
        let args: Vec<_> = cmd.get_args().collect();
        assert_eq!(args, ["helper", "--socket", "/home/u/.kart.socket"]);
        let envs: Vec<_> = cmd.get_envs().collect();
        assert_eq!(
            envs,
            [(
                std::ffi::OsStr::new("PATH"),
                Some(std::ffi::OsStr::new("/usr/bin"))
            )]
        );
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn missing_helper_program_reports_bootstrap_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut ep = UnixHelperEndpoint {
            socket_path: dir.path().join(".kart.socket"),
            helper_program: dir.path().join("no-such-kart"),
            spawn_env: Vec::new(),
        };
        let err = locate_helper(&mut ep, &fast_retry()).expect_err("spawn fails");
        assert!(matches!(err, HandoffError::Bootstrap { .. }), "{err}");
        assert_eq!(err.exit_code(), 1);
    }
}
