//! Error types for the Serial MCP Server.
//!
//! Two layers live here: the narrow errors a port reports at the device
//! boundary ([`OpenError`], [`ReadError`], [`WriteError`], [`UserCancelled`])
//! and the crate-wide [`Error`] surfaced to callers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{SessionId, SessionState};

/// Classification of failures reported to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ErrorKind {
    /// The port could not be opened (bad config, busy device)
    OpenFailed,
    /// Reading from the port failed
    ReadFailed,
    /// Writing to the port failed
    WriteFailed,
    /// The device disappeared from under an open port
    DeviceRemoved,
}

/// Failure to open a port.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OpenError(pub String);

/// Failure while waiting for inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadError {
    /// The read was cancelled deliberately (the port was closed under it)
    #[error("read cancelled")]
    Cancelled,
    /// The underlying transport vanished
    #[error("device removed")]
    DeviceRemoved,
    /// Any other I/O failure
    #[error("{0}")]
    Other(String),
}

/// Failure to write outbound bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct WriteError(pub String);

/// The user declined to pick a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no port selected")]
pub struct UserCancelled;

/// Main error type for Serial MCP operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// Opening the port failed
    #[error("Open failed: {0}")]
    OpenFailed(String),

    /// Reading from the port failed
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// Writing to the port failed
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// Device was removed
    #[error("Device removed: {0}")]
    DeviceRemoved(String),

    /// Device selection was declined
    #[error("No port selected")]
    UserCancelled,

    /// Operation requires a connected session
    #[error("Session is not connected")]
    NotConnected,

    /// Operation not permitted in the current state
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// Attempted operation
        operation: &'static str,
        /// State the session was in
        state: SessionState,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input or parameters (generic)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Port-level classification, if this error came from the device.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::OpenFailed(_) => Some(ErrorKind::OpenFailed),
            Self::ReadFailed(_) => Some(ErrorKind::ReadFailed),
            Self::WriteFailed(_) => Some(ErrorKind::WriteFailed),
            Self::DeviceRemoved(_) => Some(ErrorKind::DeviceRemoved),
            _ => None,
        }
    }
}

impl From<OpenError> for Error {
    fn from(err: OpenError) -> Self {
        Self::OpenFailed(err.0)
    }
}

impl From<WriteError> for Error {
    fn from(err: WriteError) -> Self {
        Self::WriteFailed(err.0)
    }
}

impl From<UserCancelled> for Error {
    fn from(_: UserCancelled) -> Self {
        Self::UserCancelled
    }
}

impl From<ReadError> for Error {
    fn from(err: ReadError) -> Self {
        match err {
            ReadError::DeviceRemoved => Self::DeviceRemoved("device removed".to_string()),
            other => Self::ReadFailed(other.to_string()),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
