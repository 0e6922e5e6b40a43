//! Error types for pump communication
//!
//! Transport, pump-reported faults and handshake failures each get their
//! own group so callers can tell a flaky radio from a pump that refuses a
//! command or a session that must be re-paired.

use std::time::Duration;

use pump_protocol::{AuthError, Characteristic, FramingError, MessageKind, ProtocolError};
use thiserror::Error;

use crate::fault::PumpFaultEvent;

/// Main error type for pump communication
#[derive(Error, Debug)]
pub enum PumpCommError {
    // ===== Transport Errors =====
    /// Transport write failed
    #[error("Write to {characteristic} failed: {reason}")]
    WriteFailed {
        /// Characteristic written
        characteristic: Characteristic,
        /// Failure reason
        reason: String,
    },

    /// Transport read failed
    #[error("Read from {characteristic} failed: {reason}")]
    ReadFailed {
        /// Characteristic read
        characteristic: Characteristic,
        /// Failure reason
        reason: String,
    },

    /// No response arrived in time
    #[error("Timed out after {duration_ms}ms waiting for {expected}")]
    Timeout {
        /// Response being waited for
        expected: &'static str,
        /// Timeout in milliseconds
        duration_ms: u64,
    },

    /// Connection closed, by us or the peer
    #[error("Connection closed")]
    ConnectionClosed,

    // ===== Pump Faults =====
    /// Pump rejected a request and retries are exhausted or not allowed
    #[error("Pump fault on {}: {} ({:?}, attempt {})", .0.request, .0.code, .0.category, .0.attempt)]
    PumpFault(PumpFaultEvent),

    /// Response did not match the request
    #[error("Unexpected response to {request}: got {got}")]
    UnexpectedResponse {
        /// Request sent
        request: MessageKind,
        /// Response received
        got: MessageKind,
    },

    // ===== Authentication Errors =====
    /// Handshake failed; the session must be re-paired
    #[error("Authentication failed: {0}")]
    Authentication(#[from] AuthError),

    /// Signed message sent before a session key exists
    #[error("Not authenticated: {0} requires a session key")]
    NotAuthenticated(&'static str),

    // ===== Protocol Errors =====
    /// Framing or codec failure on our side
    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// No pairing code configured
    #[error("No pairing code configured")]
    MissingPairingCode,
}

impl PumpCommError {
    /// Timeout error for `duration`
    pub fn timeout(expected: &'static str, duration: Duration) -> Self {
        PumpCommError::Timeout {
            expected,
            duration_ms: duration.as_millis() as u64,
        }
    }

    /// Check if this error is recoverable/retriable
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            PumpCommError::Timeout { .. }
                | PumpCommError::WriteFailed { .. }
                | PumpCommError::ReadFailed { .. }
        )
    }

    /// Check if this is a protocol error (bad data from the pump)
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            PumpCommError::Protocol(_) | PumpCommError::UnexpectedResponse { .. }
        )
    }

    /// Check if the session must be re-paired
    pub fn is_authentication_failure(&self) -> bool {
        match self {
            PumpCommError::Authentication(_) | PumpCommError::NotAuthenticated(_) => true,
            PumpCommError::PumpFault(event) => event.category.is_authentication(),
            _ => false,
        }
    }

    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            PumpCommError::WriteFailed { .. } => "WRITE_FAILED",
            PumpCommError::ReadFailed { .. } => "READ_FAILED",
            PumpCommError::Timeout { .. } => "TIMEOUT",
            PumpCommError::ConnectionClosed => "CONNECTION_CLOSED",
            PumpCommError::PumpFault(_) => "PUMP_FAULT",
            PumpCommError::UnexpectedResponse { .. } => "UNEXPECTED_RESPONSE",
            PumpCommError::Authentication(err) => err.error_code(),
            PumpCommError::NotAuthenticated(_) => "NOT_AUTHENTICATED",
            PumpCommError::Protocol(err) => err.error_code(),
            PumpCommError::InvalidConfig(_) => "INVALID_CONFIG",
            PumpCommError::MissingPairingCode => "MISSING_PAIRING_CODE",
        }
    }
}

/// Result type alias for pump communication
pub type Result<T> = std::result::Result<T, PumpCommError>;

// Handshake errors keep their own variant
impl From<ProtocolError> for PumpCommError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::Auth(err) => PumpCommError::Authentication(err),
            other => PumpCommError::Protocol(other),
        }
    }
}

impl From<FramingError> for PumpCommError {
    fn from(err: FramingError) -> Self {
        PumpCommError::Protocol(err.into())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for PumpCommError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        PumpCommError::ConnectionClosed
    }
}
