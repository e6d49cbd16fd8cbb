//! Status codes and error types for the acquisition platform
//!
//! Every fallible operation in the public API resolves to exactly one
//! [`ExitCode`]. Library code works with [`BoardError`], which carries
//! context for logs; foreign bindings flatten errors to the stable integer
//! via [`BoardError::code`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Exit Codes
// ============================================================================

/// Stable integer status codes returned across the binding boundary.
///
/// The numeric values are part of the external contract and must never be
/// reassigned.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ExitCode {
    /// Operation completed
    StatusOk = 0,
    /// Serial port is already held open
    PortAlreadyOpenError = 2,
    /// Serial port could not be opened
    UnableToOpenPortError = 3,
    /// Port settings (timeout, baud rate) rejected
    SetPortError = 4,
    /// Write to the device failed or was incomplete
    BoardWriteError = 5,
    /// Malformed or unexpected inbound message
    IncommingMsgError = 6,
    /// Device greeting did not match the expected banner
    InitialMsgError = 7,
    /// Transport is unavailable or the device is not paired/ready
    BoardNotReadyError = 8,
    /// `start_stream` called while the acquisition thread is running
    StreamAlreadyRunError = 9,
    /// Ring buffer capacity out of range
    InvalidBufferSizeError = 10,
    /// Acquisition thread could not be started
    StreamThreadError = 11,
    /// `stop_stream` called with no acquisition thread running
    StreamThreadIsNotRunning = 12,
    /// Data requested before any buffer was allocated
    EmptyBufferError = 13,
    /// Illegal argument (unknown preset, malformed URI, zero marker, ...)
    InvalidArgumentsError = 14,
    /// Board family is not supported on this platform
    UnsupportedBoardError = 15,
    /// No session exists for the requested board id
    BoardNotCreatedError = 16,
    /// A vendor SDK allowing one instance per process is already active
    AnotherBoardIsCreatedError = 17,
    /// Unclassified failure
    GeneralError = 18,
    /// No valid frame arrived within the startup window
    SyncTimeoutError = 19,
    /// Board descriptor lookup failed
    DescriptorNotFoundError = 20,
}

impl ExitCode {
    /// Integer value of the code.
    #[must_use]
    pub const fn value(self) -> i32 {
        self as i32
    }
}

// ============================================================================
// Board Error
// ============================================================================

/// Errors produced by sessions, drivers, streamers and the registry.
///
/// Each variant maps to exactly one [`ExitCode`]; the payloads exist for
/// diagnostics only and never change the code.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Serial port is already open
    #[error("port {0} is already open")]
    PortAlreadyOpen(String),

    /// Could not open the transport endpoint
    #[error("unable to open port {port}: {reason}")]
    UnableToOpenPort {
        /// Port path or address
        port: String,
        /// Underlying failure
        reason: String,
    },

    /// Port settings were rejected
    #[error("failed to apply port settings: {0}")]
    SetPort(String),

    /// Device write failed or was short
    #[error("board write failed: {0}")]
    BoardWrite(String),

    /// Inbound message could not be understood
    #[error("unexpected inbound message: {0}")]
    IncomingMsg(String),

    /// Greeting banner mismatch
    #[error("device greeting mismatch, got {0:?}")]
    InitialMsg(String),

    /// Device or transport is not ready
    #[error("board is not ready: {0}")]
    BoardNotReady(String),

    /// Acquisition already running
    #[error("streaming thread already running")]
    StreamAlreadyRun,

    /// Buffer capacity out of range
    #[error("invalid buffer size {0}")]
    InvalidBufferSize(i64),

    /// Acquisition thread failed to start
    #[error("failed to start streaming thread: {0}")]
    StreamThread(String),

    /// Stop requested with no stream running
    #[error("streaming thread is not running")]
    StreamThreadNotRunning,

    /// No buffer allocated for the preset
    #[error("no data buffer allocated for preset {0}")]
    EmptyBuffer(&'static str),

    /// Illegal argument
    #[error("invalid argument: {0}")]
    InvalidArguments(String),

    /// Board family unsupported on this platform
    #[error("board is not supported on this platform")]
    UnsupportedBoard,

    /// Session missing from the registry
    #[error("no session created for board id {0}")]
    BoardNotCreated(i32),

    /// Vendor SDK single-instance limit hit
    #[error("another board using the same vendor SDK is already created")]
    AnotherBoardIsCreated,

    /// Catch-all failure
    #[error("{0}")]
    General(String),

    /// First frame did not arrive in time
    #[error("no data received within {0} seconds")]
    SyncTimeout(u64),

    /// Descriptor lookup failed
    #[error("no descriptor for board id {board_id} preset {preset}")]
    DescriptorNotFound {
        /// Numeric board id
        board_id: i32,
        /// Preset name
        preset: &'static str,
    },
}

impl BoardError {
    /// Stable status code for this error.
    #[must_use]
    pub const fn code(&self) -> ExitCode {
        match self {
            Self::PortAlreadyOpen(_) => ExitCode::PortAlreadyOpenError,
            Self::UnableToOpenPort { .. } => ExitCode::UnableToOpenPortError,
            Self::SetPort(_) => ExitCode::SetPortError,
            Self::BoardWrite(_) => ExitCode::BoardWriteError,
            Self::IncomingMsg(_) => ExitCode::IncommingMsgError,
            Self::InitialMsg(_) => ExitCode::InitialMsgError,
            Self::BoardNotReady(_) => ExitCode::BoardNotReadyError,
            Self::StreamAlreadyRun => ExitCode::StreamAlreadyRunError,
            Self::InvalidBufferSize(_) => ExitCode::InvalidBufferSizeError,
            Self::StreamThread(_) => ExitCode::StreamThreadError,
            Self::StreamThreadNotRunning => ExitCode::StreamThreadIsNotRunning,
            Self::EmptyBuffer(_) => ExitCode::EmptyBufferError,
            Self::InvalidArguments(_) => ExitCode::InvalidArgumentsError,
            Self::UnsupportedBoard => ExitCode::UnsupportedBoardError,
            Self::BoardNotCreated(_) => ExitCode::BoardNotCreatedError,
            Self::AnotherBoardIsCreated => ExitCode::AnotherBoardIsCreatedError,
            Self::General(_) => ExitCode::GeneralError,
            Self::SyncTimeout(_) => ExitCode::SyncTimeoutError,
            Self::DescriptorNotFound { .. } => ExitCode::DescriptorNotFoundError,
        }
    }
}

/// Result type used across the platform.
pub type BoardResult<T> = Result<T, BoardError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_values_are_stable() {
        assert_eq!(ExitCode::StatusOk.value(), 0);
        assert_eq!(ExitCode::PortAlreadyOpenError.value(), 2);
        assert_eq!(ExitCode::InvalidBufferSizeError.value(), 10);
        assert_eq!(ExitCode::InvalidArgumentsError.value(), 14);
        assert_eq!(ExitCode::BoardNotCreatedError.value(), 16);
        assert_eq!(ExitCode::SyncTimeoutError.value(), 19);
    }

    #[test]
    fn test_error_maps_to_code() {
        let err = BoardError::InvalidBufferSize(-5);
        assert_eq!(err.code(), ExitCode::InvalidBufferSizeError);

        let err = BoardError::BoardNotCreated(7);
        assert_eq!(err.code(), ExitCode::BoardNotCreatedError);
        assert!(err.to_string().contains("board id 7"));
    }

    #[test]
    fn test_error_display() {
        let err = BoardError::UnableToOpenPort {
            port: "/dev/ttyUSB0".to_string(),
            reason: "permission denied".to_string(),
        };
        assert!(err.to_string().contains("/dev/ttyUSB0"));
        assert!(err.to_string().contains("permission denied"));
    }
}
