use std::io::Write as _;
use std::process::ExitCode;

use kart_handoff::{exit_status_byte, handoff_requested, run_handoff, HandoffConfig, HandoffError};
use tracing_subscriber::EnvFilter;

mod payload;

const ENV_LOG: &str = "KART_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

fn main() -> ExitCode {
    init_logging();

    if handoff_requested() {
        return match try_handoff() {
            Ok(code) => ExitCode::from(exit_status_byte(code)),
            Err(err) => {
                let _ = writeln_stderr(format!("kart: {err}\n"));
                ExitCode::from(err.exit_code())
            }
        };
    }

    match payload::exec_payload(std::env::args_os().collect()) {
        Ok(never) => match never {},
        Err(err) => {
            let _ = writeln_stderr(format!("kart: {err:#}\n"));
            ExitCode::from(payload::EXIT_EXEC_FAILED)
        }
    }
}

fn try_handoff() -> Result<i32, HandoffError> {
    let config = HandoffConfig::from_env()?;
    run_handoff(&config)
}

fn init_logging() {
    let filter =
        EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn writeln_stderr(msg: String) -> std::io::Result<()> {
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(msg.as_bytes())?;
    stderr.flush()
}
