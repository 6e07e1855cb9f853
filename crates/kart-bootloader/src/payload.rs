use std::ffi::OsString;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context as _, Result};
use kart_contracts::PAYLOAD_PROGRAM_NAME;
use tracing::debug;

/// Status used when the payload cannot be started, as a shell would.
pub const EXIT_EXEC_FAILED: u8 = 127;

/// `name` next to `exe`, or next to its parent when `exe` sits in a cargo
/// `deps/` directory.
pub fn sibling_of(exe: &Path, name: &str) -> Option<PathBuf> {
    let dir = exe.parent()?;

    let sibling = dir.join(name);
    if sibling.is_file() {
        return Some(sibling);
    }
    if dir
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n == "deps")
    {
        let sibling = dir.parent()?.join(name);
        if sibling.is_file() {
            return Some(sibling);
        }
    }
    None
}

/// Bare names are looked up on `PATH` by `exec`.
pub fn resolve_payload_program() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| sibling_of(&exe, PAYLOAD_PROGRAM_NAME))
        .unwrap_or_else(|| PathBuf::from(PAYLOAD_PROGRAM_NAME))
}

pub fn payload_command(program: &Path, argv: Vec<OsString>) -> Command {
    let mut args = argv.into_iter();
    let mut cmd = Command::new(program);
    if let Some(arg0) = args.next() {
        cmd.arg0(arg0);
    }
    cmd.args(args);
    cmd
}

/// Replaces this process with the payload. Only returns on failure.
pub fn exec_payload(argv: Vec<OsString>) -> Result<std::convert::Infallible> {
    let program = resolve_payload_program();
    debug!(event = "payload_exec", program = %program.display());
    let err = payload_command(&program, argv).exec();
    Err(err).with_context(|| format!("exec {}", program.display()))
}
