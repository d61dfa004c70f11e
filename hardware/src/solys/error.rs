use thiserror::Error;

use super::protocol::{Axis, ErrorCode};

/// Errors that can occur while talking to a Solys2.
///
/// Transport failures are normally absorbed by the
/// [`Connection`](super::Connection) reconnect loop and only surface as
/// [`Aborted`](SolysError::Aborted) when an operator cancels that loop.
#[derive(Error, Debug)]
pub enum SolysError {
    /// Low-level I/O error outside the recovery path (e.g. during a handshake).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to establish the TCP session or complete the handshake.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Device answered the command with an error code.
    #[error("Device error {code}. Raw response: {raw:?}")]
    Protocol {
        code: ErrorCode,
        raw: String,
    },

    /// Device rejected a move because it exceeds the travel bounds.
    #[error("{axis} position {degrees} is out of the travel range. Raw response: {raw:?}")]
    PositionOutOfRange {
        axis: Axis,
        degrees: f64,
        raw: String,
    },

    /// Device answered, but not in the shape the command expects.
    #[error("Unexpected reply to {command}: {raw:?}")]
    UnexpectedReply { command: String, raw: String },

    /// Command text is not a valid Solys2 command.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// The reconnect loop was cancelled by the operator.
    #[error("Device communication aborted")]
    Aborted,

    /// The device kept rejecting a command as protected after re-authenticating.
    #[error("Device still reports {code} after re-authenticating. Raw response: {raw:?}")]
    ProtectionLoop { code: ErrorCode, raw: String },
}

/// Result type for Solys2 operations.
pub type SolysResult<T> = Result<T, SolysError>;
