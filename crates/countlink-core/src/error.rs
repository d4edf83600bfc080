//! Error taxonomy for instrument communication.
//!
//! Every failure the engine can surface is one [`Error`] variant carrying
//! structured context (command text, timeout, response shape, or parameter
//! name/value/constraint). Callers branch on [`Error::kind`] instead of
//! parsing messages.
//!
//! # Retry classification
//!
//! Only [`ErrorKind::CommandTimeout`] and [`ErrorKind::Communication`] are
//! transient. Everything else is either a precondition failure, a protocol
//! mismatch, or a caller decision and must surface unchanged.
//!
//! ```
//! use countlink_core::{Error, ErrorKind};
//!
//! let err = Error::timeout("COUNTS?", 1000);
//! assert_eq!(err.kind(), ErrorKind::CommandTimeout);
//! assert!(err.is_retryable());
//!
//! let err = Error::invalid_response("COUNTS?", "1 2", "9 integers");
//! assert!(!err.is_retryable());
//! ```

use std::fmt;

/// Result type alias for countlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed cause attached to connection failures.
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while talking to the instrument.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The host does not provide the serial capability at all.
    #[error("Unsupported capability: {capability}")]
    UnsupportedCapability { capability: String },

    /// The user declined the device selection prompt.
    #[error("Device selection cancelled")]
    DeviceSelectionCancelled,

    /// Opening the channel failed.
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
        #[source]
        source: Option<BoxedCause>,
    },

    /// No channel is open.
    #[error("Not connected to instrument")]
    NotConnected,

    /// The round trip exceeded its deadline without any response bytes.
    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout { command: String, timeout_ms: u64 },

    /// The instrument answered, but with the wrong payload shape.
    #[error("Invalid response to '{command}': got '{response}', expected {expected}")]
    InvalidResponse {
        command: String,
        response: String,
        expected: String,
    },

    /// Generic I/O failure on the channel.
    #[error("Communication error during '{command}': {source}")]
    Communication {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The caller cancelled the operation.
    #[error("Operation aborted: {operation}")]
    OperationAborted { operation: String },

    /// A caller-supplied parameter violated its constraint.
    #[error("Invalid parameter '{name}' = {value}: must be {constraint}")]
    InvalidParameter {
        name: String,
        value: String,
        constraint: String,
    },

    /// The connection state machine was asked to take an undefined edge.
    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },
}

/// Discriminant of [`Error`] for catch-by-kind handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    UnsupportedCapability,
    DeviceSelectionCancelled,
    ConnectionFailed,
    NotConnected,
    CommandTimeout,
    InvalidResponse,
    Communication,
    OperationAborted,
    InvalidParameter,
    InvalidStateTransition,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::UnsupportedCapability => "UnsupportedCapability",
            Self::DeviceSelectionCancelled => "DeviceSelectionCancelled",
            Self::ConnectionFailed => "ConnectionFailed",
            Self::NotConnected => "NotConnected",
            Self::CommandTimeout => "CommandTimeout",
            Self::InvalidResponse => "InvalidResponse",
            Self::Communication => "Communication",
            Self::OperationAborted => "OperationAborted",
            Self::InvalidParameter => "InvalidParameter",
            Self::InvalidStateTransition => "InvalidStateTransition",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Get the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedCapability { .. } => ErrorKind::UnsupportedCapability,
            Self::DeviceSelectionCancelled => ErrorKind::DeviceSelectionCancelled,
            Self::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::CommandTimeout { .. } => ErrorKind::CommandTimeout,
            Self::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            Self::Communication { .. } => ErrorKind::Communication,
            Self::OperationAborted { .. } => ErrorKind::OperationAborted,
            Self::InvalidParameter { .. } => ErrorKind::InvalidParameter,
            Self::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
        }
    }

    /// Whether the command retry layer may attempt the command again.
    ///
    /// `ConnectionFailed` is deliberately excluded: it is only retried by the
    /// reconnect sequence, never by command retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::CommandTimeout | ErrorKind::Communication
        )
    }

    /// Create a new unsupported capability error.
    pub fn unsupported(capability: impl Into<String>) -> Self {
        Self::UnsupportedCapability {
            capability: capability.into(),
        }
    }

    /// Create a connection failure without an underlying cause.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection failure wrapping the error that caused it.
    pub fn connection_failed_with(
        message: impl Into<String>,
        source: impl Into<BoxedCause>,
    ) -> Self {
        Self::ConnectionFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new command timeout error.
    pub fn timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::CommandTimeout {
            command: command.into(),
            timeout_ms,
        }
    }

    /// Create a new invalid response error.
    pub fn invalid_response(
        command: impl Into<String>,
        response: impl Into<String>,
        expected: impl Into<String>,
    ) -> Self {
        Self::InvalidResponse {
            command: command.into(),
            response: response.into(),
            expected: expected.into(),
        }
    }

    /// Create a new communication error.
    pub fn communication(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::Communication {
            command: command.into(),
            source,
        }
    }

    /// Create a new operation aborted error.
    pub fn aborted(operation: impl Into<String>) -> Self {
        Self::OperationAborted {
            operation: operation.into(),
        }
    }

    /// Create a new invalid parameter error.
    pub fn invalid_parameter(
        name: impl Into<String>,
        value: impl fmt::Display,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            name: name.into(),
            value: value.to_string(),
            constraint: constraint.into(),
        }
    }
}
