//! Client half of the kart helper handoff.
//!
//! Instead of running the payload itself, a process started with
//! `KART_USE_HELPER` set passes its environment, arguments, standard
//! descriptors and working directory to a long-lived helper over
//! `$HOME/.kart.socket`, then waits on a per-invocation semaphore for the
//! helper's exit code and exits with it.

#[cfg(not(unix))]
compile_error!("kart-handoff passes descriptors over Unix sockets and needs a Unix target");

use std::fmt;

use tracing::debug;

pub mod config;
pub mod context;
pub mod counter;
pub mod descriptors;
pub mod error;
mod helper_reaper;
pub mod locator;
pub mod transport;
pub mod waiter;

pub use config::{ConnectRetry, HandoffConfig};
pub use context::{split_env_entry, InvocationContext, InvocationPayload};
pub use counter::{decode_exit_code, exit_status_byte, CompletionCounter, CounterId};
pub use descriptors::DescriptorBundle;
pub use error::HandoffError;
pub use locator::{locate_helper, HelperEndpoint, UnixHelperEndpoint};

pub use kart_contracts::CONTROL_ENV_VAR;

/// Client-side protocol states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffPhase {
    Idle,
    Locating,
    Connected,
    CounterAllocated,
    Sent,
    Waiting,
    Done,
    ConnectFailed,
    CounterAllocFailed,
    TransportFailed,
    TimedOut,
}

impl HandoffPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandoffPhase::Done
                | HandoffPhase::ConnectFailed
                | HandoffPhase::CounterAllocFailed
                | HandoffPhase::TransportFailed
                | HandoffPhase::TimedOut
        )
    }
}

impl fmt::Display for HandoffPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandoffPhase::Idle => "idle",
            HandoffPhase::Locating => "locating",
            HandoffPhase::Connected => "connected",
            HandoffPhase::CounterAllocated => "counter-allocated",
            HandoffPhase::Sent => "sent",
            HandoffPhase::Waiting => "waiting",
            HandoffPhase::Done => "done",
            HandoffPhase::ConnectFailed => "connect-failed",
            HandoffPhase::CounterAllocFailed => "counter-alloc-failed",
            HandoffPhase::TransportFailed => "transport-failed",
            HandoffPhase::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

impl HandoffError {
    /// Terminal state this error leaves the client in.
    pub fn phase(&self) -> HandoffPhase {
        match self {
            HandoffError::Setup { .. }
            | HandoffError::Bootstrap { .. }
            | HandoffError::ConnectTimeout { .. } => HandoffPhase::ConnectFailed,
            HandoffError::CounterAlloc(_) => HandoffPhase::CounterAllocFailed,
            HandoffError::Encode(_)
            | HandoffError::Transport(_)
            | HandoffError::PartialSend { .. } => HandoffPhase::TransportFailed,
            HandoffError::WaitTimeout { .. } | HandoffError::CounterLost(_) => {
                HandoffPhase::TimedOut
            }
        }
    }
}

fn enter(phase: HandoffPhase) {
    debug!(event = "handoff_phase", phase = %phase);
}

/// True when the control variable is present, whatever its value.
pub fn handoff_requested() -> bool {
    std::env::var_os(CONTROL_ENV_VAR).is_some()
}

/// Hands this process's invocation to the helper and returns the exit code
/// the helper reported.
pub fn run_handoff(config: &HandoffConfig) -> Result<i32, HandoffError> {
    enter(HandoffPhase::Idle);
    let ctx = InvocationContext::capture(&config.control_var)?;
    run_handoff_for(config, &ctx)
}

/// Same as [`run_handoff`] for an already captured context. The standard
/// descriptors sent are always this process's own.
pub fn run_handoff_for(
    config: &HandoffConfig,
    ctx: &InvocationContext,
) -> Result<i32, HandoffError> {
    let result = handoff_steps(config, ctx);
    match &result {
        Ok(code) => debug!(event = "handoff_phase", phase = %HandoffPhase::Done, code),
        Err(err) => debug!(event = "handoff_phase", phase = %err.phase(), error = %err),
    }
    result
}

fn handoff_steps(config: &HandoffConfig, ctx: &InvocationContext) -> Result<i32, HandoffError> {
    let bundle = DescriptorBundle::for_process(&ctx.cwd)
        .map_err(|e| HandoffError::setup("open working directory", e))?;

    enter(HandoffPhase::Locating);
    let mut endpoint = UnixHelperEndpoint {
        socket_path: config.socket_path.clone(),
        helper_program: config.helper_program.clone(),
        spawn_env: ctx.spawn_env.clone(),
    };
    let stream = locate_helper(&mut endpoint, &config.connect)?;
    enter(HandoffPhase::Connected);

    let counter = CompletionCounter::create_exclusive().map_err(HandoffError::CounterAlloc)?;
    enter(HandoffPhase::CounterAllocated);

    let payload = ctx.payload(counter.id()).to_json()?;
    waiter::ignore_legacy_alarm();
    transport::send_handoff(&stream, &payload, &bundle)?;
    enter(HandoffPhase::Sent);
    drop(bundle);

    enter(HandoffPhase::Waiting);
    let code = waiter::wait_for_completion(counter, config.wait_timeout)?;
    drop(stream);
    Ok(code)
}
