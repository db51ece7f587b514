//! Error types for device transactions.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using [`DeviceError`].
pub type Result<T> = std::result::Result<T, DeviceError>;

/// Errors that can occur while talking to the device.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// Session could not be established (out of range, busy, asleep).
    #[error("Failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    /// Session opened but the identity exchange was malformed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Sample transaction failed after the session was established.
    #[error("Read failed: {0}")]
    Read(String),

    /// The device did not finish the transaction within the budget.
    #[error("Device did not respond within {budget:?}")]
    Timeout { budget: Duration },

    /// Another transaction already holds the device.
    #[error("Device busy: a transaction is already in flight")]
    Busy,
}

impl DeviceError {
    /// Create a connection error.
    pub fn connect(address: impl ToString, message: impl Into<String>) -> Self {
        Self::Connect {
            address: address.to_string(),
            message: message.into(),
        }
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a read error.
    pub fn read(msg: impl Into<String>) -> Self {
        Self::Read(msg.into())
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeviceError::Connect { .. } => ErrorKind::Connect,
            DeviceError::Protocol(_) => ErrorKind::Protocol,
            DeviceError::Read(_) => ErrorKind::Read,
            DeviceError::Timeout { .. } => ErrorKind::Timeout,
            DeviceError::Busy => ErrorKind::Busy,
        }
    }
}

/// Error classification recorded in the bridge state and exposed as a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Connect,
    Protocol,
    Read,
    Timeout,
    Busy,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Connect => "connect",
            ErrorKind::Protocol => "protocol",
            ErrorKind::Read => "read",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Busy => "busy",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
