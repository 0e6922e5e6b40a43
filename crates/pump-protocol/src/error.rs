//! Error types for the pump protocol engine
//!
//! Errors are grouped the way the wire stack is layered: byte codec,
//! packet framing/reassembly, and the authentication handshakes. The
//! top-level [`ProtocolError`] wraps all of them.

use thiserror::Error;

use crate::characteristic::Characteristic;

/// Byte codec failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Input was not valid hexadecimal
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),

    /// A fixed-size field received the wrong number of bytes
    #[error("Invalid field length: expected {expected} bytes, got {got}")]
    InvalidLength {
        /// Expected byte count
        expected: usize,
        /// Actual byte count
        got: usize,
    },
}

/// Framing and reassembly failures
///
/// These never escape as user-visible errors on their own: the receiving
/// side drops the transaction and waits for the pump to retransmit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FramingError {
    /// Packet shorter than the 2-byte packet header
    #[error("Packet too short: {len} bytes")]
    PacketTooShort {
        /// Received length
        len: usize,
    },

    /// First packet did not contain the 3-byte message header
    #[error("First packet missing message header ({len} bytes)")]
    MissingHeader {
        /// Payload length of the first packet
        len: usize,
    },

    /// Transaction id changed in the middle of a transaction
    #[error("Transaction id mismatch: expected {expected}, got {got}")]
    TransactionIdMismatch {
        /// txId established by the first packet
        expected: u8,
        /// txId of the offending packet
        got: u8,
    },

    /// Message header txId disagrees with the packet header txId
    #[error("Header txId {header} does not match packet txId {packet}")]
    HeaderTransactionMismatch {
        /// txId inside the message header
        header: u8,
        /// txId of the packet carrying it
        packet: u8,
    },

    /// packets_remaining did not count down by one
    #[error("Packet out of order: expected {expected} remaining, got {got}")]
    PacketOrder {
        /// Expected packets_remaining value
        expected: u8,
        /// Received packets_remaining value
        got: u8,
    },

    /// A new transaction started on a characteristic with one still open
    #[error("Interleaved transaction on {characteristic}: txId {active} still open, got {incoming}")]
    InterleavedTransaction {
        /// Characteristic carrying both transactions
        characteristic: Characteristic,
        /// txId of the incomplete transaction
        active: u8,
        /// txId of the new transaction
        incoming: u8,
    },

    /// No catalog entry for this opcode/characteristic/length
    #[error("Unknown opcode {op_code} on {characteristic} (declared length {declared_len})")]
    UnknownOpcode {
        /// Opcode from the message header
        op_code: u8,
        /// Characteristic it arrived on
        characteristic: Characteristic,
        /// Declared cargo length
        declared_len: u8,
    },

    /// Assembled buffer is not consistent with its declared length
    #[error("Length mismatch: declared {declared} cargo bytes, assembled {assembled} bytes")]
    LengthMismatch {
        /// Declared cargo length from the header
        declared: usize,
        /// Total bytes collected
        assembled: usize,
    },

    /// Cargo (plus signature trailer) does not fit the 1-byte length field
    #[error("Cargo too large: {len} bytes exceeds maximum of {max}")]
    CargoTooLarge {
        /// Cargo length
        len: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Signed message framed without a signing key
    #[error("Signed message {name} requires a signing key")]
    MissingSigningKey {
        /// Message name
        name: &'static str,
    },
}

/// Authentication handshake failures
///
/// Every variant is fatal to the handshake in progress; the caller must
/// restart pairing from scratch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Message is not part of the handshake at its current step
    #[error("Unexpected authentication message {got} in state {state}")]
    UnknownAuthMessage {
        /// Name of the received message
        got: &'static str,
        /// Handshake state when it arrived
        state: &'static str,
    },

    /// advance() was called with a message before the handshake started
    #[error("Handshake not initialized")]
    HandshakeNotInitialized,

    /// Key confirmation did not match
    #[error("Key confirmation failed")]
    NotConfirmed,

    /// Pump rejected the pairing challenge
    #[error("Pairing rejected by pump")]
    Rejected,

    /// Challenge hash returned by the pump did not match the pairing code
    #[error("Challenge hash mismatch")]
    ChallengeHashMismatch,

    /// The handshake already reached a terminal state
    #[error("Handshake already terminated in state {0}")]
    HandshakeTerminated(&'static str),

    /// Pairing code is neither a 16-character nor a 6-digit code
    #[error("Invalid pairing code: {0}")]
    InvalidPairingCode(String),

    /// App instance id echoed by the peer differs from ours
    #[error("App instance id mismatch: expected {expected}, got {got}")]
    AppInstanceMismatch {
        /// Our app instance id
        expected: u16,
        /// Echoed value
        got: u16,
    },

    /// EC-JPAKE round data failed to parse or verify
    #[error("JPAKE crypto failure: {0}")]
    Crypto(String),

    /// Key derivation failed
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),
}

/// Main error type for protocol engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Codec error
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Framing/reassembly error
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// Handshake error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Decoded message kind did not match what the caller expected
    #[error("Unexpected message: expected {expected}, got {got}")]
    UnexpectedMessage {
        /// Expected message name
        expected: &'static str,
        /// Received message name
        got: &'static str,
    },
}

impl FramingError {
    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            FramingError::PacketTooShort { .. } => "PACKET_TOO_SHORT",
            FramingError::MissingHeader { .. } => "MISSING_HEADER",
            FramingError::TransactionIdMismatch { .. } => "TX_ID_MISMATCH",
            FramingError::HeaderTransactionMismatch { .. } => "HEADER_TX_ID_MISMATCH",
            FramingError::PacketOrder { .. } => "PACKET_ORDER",
            FramingError::InterleavedTransaction { .. } => "INTERLEAVED_TRANSACTION",
            FramingError::UnknownOpcode { .. } => "UNKNOWN_OPCODE",
            FramingError::LengthMismatch { .. } => "LENGTH_MISMATCH",
            FramingError::CargoTooLarge { .. } => "CARGO_TOO_LARGE",
            FramingError::MissingSigningKey { .. } => "MISSING_SIGNING_KEY",
        }
    }
}

impl AuthError {
    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::UnknownAuthMessage { .. } => "UNKNOWN_AUTH_MESSAGE",
            AuthError::HandshakeNotInitialized => "HANDSHAKE_NOT_INITIALIZED",
            AuthError::NotConfirmed => "NOT_CONFIRMED",
            AuthError::Rejected => "REJECTED",
            AuthError::ChallengeHashMismatch => "CHALLENGE_HASH_MISMATCH",
            AuthError::HandshakeTerminated(_) => "HANDSHAKE_TERMINATED",
            AuthError::InvalidPairingCode(_) => "INVALID_PAIRING_CODE",
            AuthError::AppInstanceMismatch { .. } => "APP_INSTANCE_MISMATCH",
            AuthError::Crypto(_) => "JPAKE_CRYPTO",
            AuthError::KeyDerivation(_) => "KEY_DERIVATION",
        }
    }
}

impl ProtocolError {
    /// Get an error code for logging/metrics
    pub fn error_code(&self) -> &'static str {
        match self {
            ProtocolError::Codec(CodecError::InvalidHex(_)) => "INVALID_HEX",
            ProtocolError::Codec(CodecError::InvalidLength { .. }) => "INVALID_LENGTH",
            ProtocolError::Framing(err) => err.error_code(),
            ProtocolError::Auth(err) => err.error_code(),
            ProtocolError::UnexpectedMessage { .. } => "UNEXPECTED_MESSAGE",
        }
    }
}

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = ProtocolError::from(FramingError::TransactionIdMismatch {
            expected: 1,
            got: 2,
        });
        assert_eq!(err.error_code(), "TX_ID_MISMATCH");

        let err = ProtocolError::from(AuthError::NotConfirmed);
        assert_eq!(err.error_code(), "NOT_CONFIRMED");
    }

    #[test]
    fn test_unknown_opcode_message() {
        let err = FramingError::UnknownOpcode {
            op_code: 0xEE,
            characteristic: Characteristic::Control,
            declared_len: 4,
        };
        let text = err.to_string();
        assert!(text.contains("238"));
        assert!(text.contains("control"));
    }
}
