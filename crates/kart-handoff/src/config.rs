use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use kart_contracts::{CONTROL_ENV_VAR, HELPER_SOCKET_FILE_NAME};

use crate::HandoffError;

pub const ENV_HELPER_WAIT_SECS: &str = "KART_HELPER_WAIT_SECS";

pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONNECT_INTERVAL: Duration = Duration::from_millis(250);
/// Longer than the slowest helper command (clone, large fetches).
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRetry {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for ConnectRetry {
    fn default() -> Self {
        ConnectRetry {
            attempts: DEFAULT_CONNECT_ATTEMPTS,
            interval: DEFAULT_CONNECT_INTERVAL,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HandoffConfig {
    pub control_var: String,
    pub socket_path: PathBuf,
    pub helper_program: PathBuf,
    pub connect: ConnectRetry,
    pub wait_timeout: Duration,
}

impl HandoffConfig {
    pub fn from_env() -> Result<Self, HandoffError> {
        let home = std::env::var_os("HOME")
            .filter(|h| !h.is_empty())
            .ok_or_else(|| {
                HandoffError::setup(
                    "locate helper socket",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "HOME is not set"),
                )
            })?;

        let helper_program = std::env::current_exe()
            .ok()
            .or_else(|| std::env::args_os().next().map(PathBuf::from))
            .ok_or_else(|| {
                HandoffError::setup(
                    "resolve helper program",
                    std::io::Error::new(std::io::ErrorKind::NotFound, "argv[0] is missing"),
                )
            })?;

        Ok(HandoffConfig {
            control_var: CONTROL_ENV_VAR.to_string(),
            socket_path: socket_path_in(home),
            helper_program,
            connect: ConnectRetry::default(),
            wait_timeout: wait_timeout_from(std::env::var(ENV_HELPER_WAIT_SECS).ok().as_deref()),
        })
    }
}

pub fn socket_path_in(home: impl Into<OsString>) -> PathBuf {
    PathBuf::from(home.into()).join(HELPER_SOCKET_FILE_NAME)
}

/// Positive whole seconds; anything else falls back to the default.
pub fn wait_timeout_from(raw: Option<&str>) -> Duration {
    raw.and_then(|s| s.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_WAIT_TIMEOUT)
}
