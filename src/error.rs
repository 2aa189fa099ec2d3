//! Defines the custom `Error` and `Result` types for the stdio bridge.

use crate::types::ErrorData;
use std::fmt;
use std::time::Duration;

/// The step of the bring-up sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeStep {
    /// The `initialize` request or its response.
    Initialize,
    /// The `notifications/initialized` acknowledgement.
    Initialized,
    /// The `tools/list` request or its response.
    List,
}

impl fmt::Display for HandshakeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeStep::Initialize => f.write_str("initialize"),
            HandshakeStep::Initialized => f.write_str("initialized notification"),
            HandshakeStep::List => f.write_str("list"),
        }
    }
}

/// The primary error type for the bridge.
///
/// Transport failures (`Spawn`, `Write`, `Timeout`) are raised to the immediate
/// caller and never retried. A line from the child that is not valid JSON is
/// not an error at all: the drain loop drops it.
#[derive(Debug)]
pub enum Error {
    /// The child process could not be launched. Fatal to that client instance.
    Spawn {
        command: String,
        source: std::io::Error,
    },

    /// Writing to the child's stdin failed because the pipe is closed or the
    /// child has exited. The client should be considered dead.
    Write(std::io::Error),

    /// No response with the given id arrived within the window. Recoverable:
    /// the caller may retry with a new id.
    Timeout { id: i64, after: Duration },

    /// A well-formed response carried an `error` payload instead of a `result`.
    JsonRpc(ErrorData),

    /// A step of the initialize / initialized / list sequence failed.
    Handshake {
        step: HandshakeStep,
        source: Box<Error>,
    },

    /// An I/O error outside the write path (e.g. while serving stdio).
    Io(std::io::Error),

    /// JSON serialization or deserialization failed.
    Serialization(serde_json::Error),

    /// A general-purpose error for miscellaneous issues.
    Other(String),
}

/// A specialized `Result` type for the bridge.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` for `Timeout`, including one wrapped by a handshake step.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::Handshake { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

// --- Error Trait Implementation ---

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Spawn { command, source } => {
                write!(f, "Failed to spawn '{}': {}", command, source)
            }
            Error::Write(e) => write!(f, "Write to child stdin failed: {}", e),
            Error::Timeout { id, after } => {
                write!(f, "Timed out after {:?} waiting for response id {}", after, id)
            }
            Error::JsonRpc(e) => write!(f, "JSON-RPC error (code {}): {}", e.code, e.message),
            Error::Handshake { step, source } => {
                write!(f, "Handshake failed at '{}' step: {}", step, source)
            }
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Serialization(e) => write!(f, "Serialization error: {}", e),
            Error::Other(msg) => write!(f, "An internal error occurred: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Spawn { source, .. } => Some(source),
            Error::Write(e) | Error::Io(e) => Some(e),
            Error::Serialization(e) => Some(e),
            Error::Handshake { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

// --- From Implementations for Error Conversion ---

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err)
    }
}

impl From<ErrorData> for Error {
    fn from(err: ErrorData) -> Self {
        Error::JsonRpc(err)
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
