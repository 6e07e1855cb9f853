//! Shared protocol identifiers for the kart helper handoff.
//!
//! These constants are the single source of truth for values that both the
//! short-lived client and the long-lived helper must agree on: the trigger
//! variable, the channel location, the spawn argument shape, the descriptor
//! order, and the completion counter encoding.

/// Presence (not value) of this variable switches a process into handoff mode.
pub const CONTROL_ENV_VAR: &str = "KART_USE_HELPER";

/// Channel file name, joined onto `$HOME`.
pub const HELPER_SOCKET_FILE_NAME: &str = ".kart.socket";

pub const HELPER_SUBCOMMAND: &str = "helper";
pub const HELPER_SOCKET_FLAG: &str = "--socket";

pub const PAYLOAD_FIELD_PID: &str = "pid";
pub const PAYLOAD_FIELD_ENVIRON: &str = "environ";
pub const PAYLOAD_FIELD_ARGV: &str = "argv";
pub const PAYLOAD_FIELD_SEMID: &str = "semid";

pub const DESCRIPTOR_COUNT: usize = 4;
pub const STDIN_SLOT: usize = 0;
pub const STDOUT_SLOT: usize = 1;
pub const STDERR_SLOT: usize = 2;
pub const CWD_SLOT: usize = 3;

/// The helper stores `exit_code + COUNTER_OFFSET` in the counter.
pub const COUNTER_OFFSET: i32 = 1000;
/// Value the client initialises the counter to; never a valid encoded code.
pub const COUNTER_RESTING: i32 = 0;

pub const EXIT_SETUP_FAILED: u8 = 1;
pub const EXIT_BOOTSTRAP_FAILED: u8 = 1;
pub const EXIT_CONNECT_TIMEOUT: u8 = 2;
pub const EXIT_SEND_FAILED: u8 = 3;
pub const EXIT_WAIT_TIMEOUT: u8 = 4;
pub const EXIT_COUNTER_ALLOC_FAILED: u8 = 5;

/// Executable the bootloader runs when no handoff is requested.
pub const PAYLOAD_PROGRAM_NAME: &str = "kart-payload";
