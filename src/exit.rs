// src/exit.rs
//
// Process exit codes.

use crate::capture::{CaptureError, ExitReason};

/// Exit code constants.
pub mod codes {
    /// Stopped on request.
    pub const SUCCESS: i32 = 0;
    /// Invalid arguments or configuration.
    pub const INVALID_ARGS: i32 = 1;
    /// Log or mirror file could not be written.
    pub const IO_ERROR: i32 = 2;
    /// Link could not be opened at start.
    pub const LINK_OPEN_FAILED: i32 = 3;
    /// Reconnect attempts used up.
    pub const LINK_EXHAUSTED: i32 = 4;
    /// Captured bytes were left in the channel at shutdown.
    pub const UNDRAINED: i32 = 5;
}

/// Map a `CaptureError` to an exit code.
pub fn exit_code(error: &CaptureError) -> i32 {
    match error {
        CaptureError::Settings(_) => codes::INVALID_ARGS,
        CaptureError::Output(_) => codes::IO_ERROR,
        CaptureError::LinkOpen { .. } => codes::LINK_OPEN_FAILED,
        CaptureError::LinkExhausted { .. } => codes::LINK_EXHAUSTED,
        CaptureError::Undrained(_) => codes::UNDRAINED,
    }
}

/// Map how a capture ended to an exit code.
pub fn exit_code_for(reason: &ExitReason, undrained: usize) -> i32 {
    match reason {
        ExitReason::Stopped if undrained > 0 => codes::UNDRAINED,
        ExitReason::Stopped => codes::SUCCESS,
        ExitReason::LinkOpenFailed => codes::LINK_OPEN_FAILED,
        ExitReason::LinkExhausted => codes::LINK_EXHAUSTED,
        ExitReason::OutputFailed(_) => codes::IO_ERROR,
    }
}
