//! Connector Error Types
//!
//! Transport failures are kept apart from engine errors so that the write
//! path can classify them without string matching.

use thiserror::Error;

use crate::model::ChannelId;

/// Result type for fieldlink-core operations
pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Coarse failure classes used to map write failures onto connection states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// The device refused the request (bad address, bad value, bad function)
    Validation,
    /// The device could not be reached or did not answer
    Unavailable,
    /// Anything else
    Other,
}

/// Errors raised by a [`Transport`](crate::traits::Transport) implementation
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// Could not open or keep a connection to the device
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timed out
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(String),

    /// Device answered with a protocol exception
    #[error("Device exception {code:#04x}: {message}")]
    Exception { code: u8, message: String },

    /// Request rejected by a status-code based transport
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// Response could not be interpreted
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransportError {
    pub fn connection(msg: impl Into<String>) -> Self {
        TransportError::Connection(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        TransportError::Timeout(msg.into())
    }

    pub fn io(msg: impl Into<String>) -> Self {
        TransportError::Io(msg.into())
    }

    pub fn exception(code: u8, msg: impl Into<String>) -> Self {
        TransportError::Exception {
            code,
            message: msg.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        TransportError::InvalidResponse(msg.into())
    }

    /// Classify the failure for write-failure state mapping
    ///
    /// Exception codes 0x01..=0x03 (illegal function, data address, data
    /// value) are validation failures. Device failure, busy and gateway
    /// exceptions count as unavailability, as do every I/O level error.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            TransportError::Exception { code, .. } => match code {
                0x01..=0x03 => FailureClass::Validation,
                0x04 | 0x06 | 0x0A | 0x0B => FailureClass::Unavailable,
                _ => FailureClass::Other,
            },
            TransportError::Rejected { status, .. } => match status {
                400..=499 => FailureClass::Validation,
                500..=599 => FailureClass::Unavailable,
                _ => FailureClass::Other,
            },
            TransportError::Connection(_) | TransportError::Timeout(_) | TransportError::Io(_) => {
                FailureClass::Unavailable
            },
            TransportError::InvalidResponse(_) => FailureClass::Other,
        }
    }

    /// Check if the link itself is gone (as opposed to a single bad request)
    pub fn is_connection_failure(&self) -> bool {
        matches!(self, TransportError::Connection(_) | TransportError::Io(_))
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io(err.to_string())
    }
}

/// Connector errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectorError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transport failures
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Value could not be validated or encoded
    #[error("Validation error: {0}")]
    Validation(String),

    /// Channel failed too many consecutive reads
    #[error("Channel {channel} exhausted {attempts} read attempts")]
    ExhaustedRetries { channel: ChannelId, attempts: u32 },

    /// Operation does not fit the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Device, channel or property not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Connector has been shut down
    #[error("Connector closed")]
    Closed,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

// Helper methods for creating errors
impl ConnectorError {
    pub fn config(msg: impl Into<String>) -> Self {
        ConnectorError::Configuration(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ConnectorError::Validation(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        ConnectorError::InvalidState(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ConnectorError::NotFound(msg.into())
    }

    pub fn not_supported(msg: impl Into<String>) -> Self {
        ConnectorError::NotSupported(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ConnectorError::Internal(msg.into())
    }
}
