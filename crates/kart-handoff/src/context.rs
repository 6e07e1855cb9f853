use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};
use std::path::PathBuf;

use serde::Serialize;
use tracing::debug;

use crate::counter::CounterId;
use crate::HandoffError;

/// Environment and arguments of the invocation being handed off.
#[derive(Debug, Clone)]
pub struct InvocationContext {
    pub pid: u32,
    /// Wire view of the environment, control variable removed.
    pub environ: BTreeMap<String, String>,
    /// Exact environment for a bootstrapped helper, control variable removed.
    pub spawn_env: Vec<(OsString, OsString)>,
    pub argv: Vec<String>,
    pub cwd: PathBuf,
}

/// The single JSON document sent to the helper.
#[derive(Debug, Serialize)]
pub struct InvocationPayload<'a> {
    pub pid: u32,
    pub environ: &'a BTreeMap<String, String>,
    pub argv: &'a [String],
    pub semid: i32,
}

impl InvocationContext {
    pub fn capture(control_var: &str) -> Result<Self, HandoffError> {
        let cwd = std::env::current_dir()
            .map_err(|e| HandoffError::setup("resolve current directory", e))?;
        Ok(Self::from_parts(
            std::process::id(),
            std::env::vars_os(),
            std::env::args_os(),
            cwd,
            control_var,
        ))
    }

    /// Builds a context from raw `NAME=VALUE` environ entries.
    pub fn from_raw_environ<E, A>(
        pid: u32,
        entries: E,
        argv: A,
        cwd: PathBuf,
        control_var: &str,
    ) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<OsStr>,
        A: IntoIterator<Item = OsString>,
    {
        let pairs = entries
            .into_iter()
            .map(|entry| split_env_entry(entry.as_ref()))
            .collect::<Vec<_>>();
        Self::from_parts(pid, pairs, argv, cwd, control_var)
    }

    pub fn from_parts<E, A>(pid: u32, vars: E, argv: A, cwd: PathBuf, control_var: &str) -> Self
    where
        E: IntoIterator<Item = (OsString, OsString)>,
        A: IntoIterator<Item = OsString>,
    {
        let mut environ = BTreeMap::new();
        let mut spawn_env = Vec::new();
        for (name, value) in vars {
            if name == control_var {
                continue;
            }
            environ.insert(lossy(&name, "environ name"), lossy(&value, "environ value"));
            spawn_env.push((name, value));
        }

        let argv = argv.into_iter().map(|a| lossy(&a, "argv")).collect();

        InvocationContext {
            pid,
            environ,
            spawn_env,
            argv,
            cwd,
        }
    }

    pub fn payload(&self, semid: CounterId) -> InvocationPayload<'_> {
        InvocationPayload {
            pid: self.pid,
            environ: &self.environ,
            argv: &self.argv,
            semid: semid.raw(),
        }
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

impl InvocationPayload<'_> {
    pub fn to_json(&self) -> Result<Vec<u8>, HandoffError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Splits on the first `=`; the search starts at byte 1 so a leading `=`
/// stays part of the name. An entry without a separator is all name.
pub fn split_env_entry(entry: &OsStr) -> (OsString, OsString) {
    use std::os::unix::ffi::OsStrExt as _;

    let bytes = entry.as_bytes();
    match bytes.iter().skip(1).position(|&b| b == b'=') {
        Some(pos) => {
            let split = pos + 1;
            (
                OsStr::from_bytes(&bytes[..split]).to_os_string(),
                OsStr::from_bytes(&bytes[split + 1..]).to_os_string(),
            )
        }
        None => (entry.to_os_string(), OsString::new()),
    }
}

fn lossy(s: &OsStr, what: &'static str) -> String {
    match s.to_str() {
        Some(s) => s.to_string(),
        None => {
            debug!(event = "lossy_conversion", field = what);
            s.to_string_lossy().into_owned()
        }
    }
}
