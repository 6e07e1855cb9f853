use std::io;
use std::path::PathBuf;
use std::time::Duration;

use kart_contracts::{
    EXIT_BOOTSTRAP_FAILED, EXIT_CONNECT_TIMEOUT, EXIT_COUNTER_ALLOC_FAILED, EXIT_SEND_FAILED,
    EXIT_SETUP_FAILED, EXIT_WAIT_TIMEOUT,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HandoffError {
    #[error("{what}: {source}")]
    Setup {
        what: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("error running kart helper {}: {source}", program.display())]
    Bootstrap {
        program: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("timeout connecting to kart helper at {} after {attempts} attempts", socket.display())]
    ConnectTimeout { socket: PathBuf, attempts: u32 },
    #[error("error encoding command for kart helper: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("error sending command to kart helper: {0}")]
    Transport(#[source] io::Error),
    #[error("error sending command to kart helper: sent {sent} of {expected} bytes")]
    PartialSend { sent: usize, expected: usize },
    #[error("timed out after {}s, no response from kart helper", waited.as_secs())]
    WaitTimeout { waited: Duration },
    #[error("lost result communication with kart helper: {0}")]
    CounterLost(#[source] io::Error),
    #[error("error setting up result communication with helper: {0}")]
    CounterAlloc(#[source] io::Error),
}

impl HandoffError {
    pub(crate) fn setup(what: &'static str, source: io::Error) -> Self {
        HandoffError::Setup { what, source }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            HandoffError::Setup { .. } => EXIT_SETUP_FAILED,
            HandoffError::Bootstrap { .. } => EXIT_BOOTSTRAP_FAILED,
            HandoffError::ConnectTimeout { .. } => EXIT_CONNECT_TIMEOUT,
            HandoffError::Encode(_)
            | HandoffError::Transport(_)
            | HandoffError::PartialSend { .. } => EXIT_SEND_FAILED,
            HandoffError::WaitTimeout { .. } | HandoffError::CounterLost(_) => EXIT_WAIT_TIMEOUT,
            HandoffError::CounterAlloc(_) => EXIT_COUNTER_ALLOC_FAILED,
        }
    }
}
