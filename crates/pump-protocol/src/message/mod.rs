//! Message catalog
//!
//! Every message the engine understands is a small struct owning its typed
//! fields plus a static [`Descriptor`] with the protocol metadata. The
//! [`catalog!`] table below turns the closed set of structs into the
//! [`MessageKind`] tag and the [`Message`] sum type used everywhere else.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::characteristic::Characteristic;
use crate::error::ProtocolError;

pub mod auth;
pub mod control;
pub mod history;
pub mod status;

pub use auth::*;
pub use control::*;
pub use history::*;
pub use status::*;

/// Which side originates a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Central to pump
    Request,
    /// Pump to central
    Response,
}

/// Pump API version (major.minor)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApiVersion {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
}

impl ApiVersion {
    /// Oldest API the engine speaks
    pub const V2_1: ApiVersion = ApiVersion::new(2, 1);
    /// Adds the V2 battery report
    pub const V2_5: ApiVersion = ApiVersion::new(2, 5);
    /// Adds JPAKE pairing and remote insulin delivery control
    pub const V3_2: ApiVersion = ApiVersion::new(3, 2);

    /// Create a version
    pub const fn new(major: u16, minor: u16) -> Self {
        Self { major, minor }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Pump models a message applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportedDevices {
    /// Every model
    All,
    /// Mobi only
    MobiOnly,
    /// t:slim X2 only
    TslimX2Only,
}

/// Static protocol metadata for one message type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Catalog tag
    pub kind: MessageKind,
    /// Type name used in logs and errors
    pub name: &'static str,
    /// Wire opcode
    pub op_code: u8,
    /// Expected cargo length when fixed
    pub size: u8,
    /// Request or response
    pub direction: Direction,
    /// Characteristic the message travels on
    pub characteristic: Characteristic,
    /// Cargo length varies
    pub variable_size: bool,
    /// Delivered as part of a stream
    pub stream: bool,
    /// Carries the time-since-reset + HMAC trailer
    pub signed: bool,
    /// Minimum pump API version
    pub min_api: ApiVersion,
    /// Pump models that accept it
    pub supported_devices: SupportedDevices,
    /// Changes insulin delivery on the pump
    pub modifies_insulin_delivery: bool,
    /// Expected response for requests
    pub response: Option<MessageKind>,
    /// Accepted on every characteristic
    pub universal: bool,
}

impl Descriptor {
    /// Fixed-size request on `characteristic`
    pub const fn request(
        kind: MessageKind,
        name: &'static str,
        op_code: u8,
        size: u8,
        characteristic: Characteristic,
    ) -> Self {
        Self {
            kind,
            name,
            op_code,
            size,
            direction: Direction::Request,
            characteristic,
            variable_size: false,
            stream: false,
            signed: false,
            min_api: ApiVersion::V2_1,
            supported_devices: SupportedDevices::All,
            modifies_insulin_delivery: false,
            response: None,
            universal: false,
        }
    }

    /// Fixed-size response on `characteristic`
    pub const fn response(
        kind: MessageKind,
        name: &'static str,
        op_code: u8,
        size: u8,
        characteristic: Characteristic,
    ) -> Self {
        Self {
            direction: Direction::Response,
            ..Self::request(kind, name, op_code, size, characteristic)
        }
    }

    /// Set the paired response
    pub const fn responds_with(self, kind: MessageKind) -> Self {
        Self {
            response: Some(kind),
            ..self
        }
    }

    /// Mark as signed
    pub const fn signed(self) -> Self {
        Self {
            signed: true,
            ..self
        }
    }

    /// Mark as changing insulin delivery
    pub const fn modifies_insulin_delivery(self) -> Self {
        Self {
            modifies_insulin_delivery: true,
            ..self
        }
    }

    /// Mark as variable-size stream data
    pub const fn stream(self) -> Self {
        Self {
            variable_size: true,
            stream: true,
            ..self
        }
    }

    /// Register on every characteristic
    pub const fn universal(self) -> Self {
        Self {
            universal: true,
            ..self
        }
    }

    /// Set the minimum API version
    pub const fn min_api(self, min_api: ApiVersion) -> Self {
        Self { min_api, ..self }
    }

    /// Restrict to a set of pump models
    pub const fn devices(self, supported_devices: SupportedDevices) -> Self {
        Self {
            supported_devices,
            ..self
        }
    }

    /// Whether the cargo length is not fixed
    pub fn is_variable(&self) -> bool {
        self.variable_size || self.stream
    }

    /// Declared length on the wire for a cargo of `cargo_len` bytes
    pub fn declared_len(&self, cargo_len: usize) -> usize {
        if self.signed {
            cargo_len + crate::signing::SIGNATURE_TRAILER_LEN
        } else {
            cargo_len
        }
    }

    /// Whether this descriptor is accepted on `characteristic`
    pub fn accepts(&self, characteristic: Characteristic) -> bool {
        self.universal || self.characteristic == characteristic
    }
}

/// A typed message with a fixed-offset cargo layout
pub trait PumpMessage: Sized {
    /// Protocol metadata
    const DESCRIPTOR: Descriptor;

    /// Decode from cargo; short cargo yields zeroed fields
    fn from_cargo(cargo: &[u8]) -> Self;

    /// Encode typed fields to cargo
    fn to_cargo(&self) -> Vec<u8>;
}

macro_rules! catalog {
    ($($kind:ident),* $(,)?) => {
        /// Tag for every message in the catalog
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageKind {
            $(
                #[allow(missing_docs)]
                $kind,
            )*
        }

        static DESCRIPTORS: &[Descriptor] = &[$(<$kind as PumpMessage>::DESCRIPTOR),*];

        impl MessageKind {
            /// Every catalog entry, in declaration order
            pub const ALL: &'static [MessageKind] = &[$(MessageKind::$kind),*];

            /// Static metadata for this kind
            pub fn descriptor(self) -> &'static Descriptor {
                &DESCRIPTORS[self as usize]
            }

            /// Decode cargo as this kind
            pub fn decode(self, cargo: &[u8]) -> Message {
                match self {
                    $(MessageKind::$kind => Message::$kind($kind::from_cargo(cargo)),)*
                }
            }
        }

        /// Any decoded message
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Message {
            $(
                #[allow(missing_docs)]
                $kind($kind),
            )*
        }

        impl Message {
            /// Catalog tag
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$kind(_) => MessageKind::$kind,)*
                }
            }

            /// Encoded cargo
            pub fn cargo(&self) -> Vec<u8> {
                match self {
                    $(Message::$kind(m) => m.to_cargo(),)*
                }
            }
        }

        $(
            impl From<$kind> for Message {
                fn from(message: $kind) -> Self {
                    Message::$kind(message)
                }
            }

            impl TryFrom<Message> for $kind {
                type Error = ProtocolError;

                fn try_from(message: Message) -> Result<Self, Self::Error> {
                    match message {
                        Message::$kind(m) => Ok(m),
                        other => Err(ProtocolError::UnexpectedMessage {
                            expected: <$kind as PumpMessage>::DESCRIPTOR.name,
                            got: other.name(),
                        }),
                    }
                }
            }
        )*
    };
}

catalog! {
    // Authorization
    CentralChallengeRequest,
    CentralChallengeResponse,
    PumpChallengeRequest,
    PumpChallengeResponse,
    Jpake1aRequest,
    Jpake1aResponse,
    Jpake1bRequest,
    Jpake1bResponse,
    Jpake2Request,
    Jpake2Response,
    Jpake3SessionKeyRequest,
    Jpake3SessionKeyResponse,
    Jpake4KeyConfirmationRequest,
    Jpake4KeyConfirmationResponse,
    // Current status
    ApiVersionRequest,
    ApiVersionResponse,
    CurrentBatteryV1Request,
    CurrentBatteryV1Response,
    CurrentBatteryV2Request,
    CurrentBatteryV2Response,
    TimeSinceResetRequest,
    TimeSinceResetResponse,
    ErrorResponse,
    // History log
    HistoryLogRequest,
    HistoryLogResponse,
    HistoryLogStreamResponse,
    // Control
    ResumePumpingRequest,
    ResumePumpingResponse,
    SuspendPumpingRequest,
    SuspendPumpingResponse,
    SetTempRateRequest,
    SetTempRateResponse,
}

impl MessageKind {
    /// Type name
    pub fn name(self) -> &'static str {
        self.descriptor().name
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Message {
    /// Static metadata
    pub fn descriptor(&self) -> &'static Descriptor {
        self.kind().descriptor()
    }

    /// Type name
    pub fn name(&self) -> &'static str {
        self.descriptor().name
    }

    /// Wire opcode
    pub fn op_code(&self) -> u8 {
        self.descriptor().op_code
    }

    /// Whether this message must be signed
    pub fn is_signed(&self) -> bool {
        self.descriptor().signed
    }

    /// Decode `cargo` as `kind`
    pub fn decode(kind: MessageKind, cargo: &[u8]) -> Message {
        kind.decode(cargo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: MessageKind) -> Message {
        // Non-zero cargo so field ordering mistakes show up
        let descriptor = kind.descriptor();
        let len = if descriptor.is_variable() {
            2 + 2 * HISTORY_LOG_RECORD_LEN
        } else {
            descriptor.size as usize
        };
        let cargo: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(3)).collect();
        kind.decode(&cargo)
    }

    #[test]
    fn test_descriptor_table_matches_kinds() {
        for &kind in MessageKind::ALL {
            assert_eq!(kind.descriptor().kind, kind, "{kind}");
        }
    }

    #[test]
    fn test_fixed_size_cargo_lengths() {
        for &kind in MessageKind::ALL {
            let descriptor = kind.descriptor();
            if descriptor.is_variable() {
                continue;
            }
            let message = kind.decode(&[]);
            assert_eq!(
                message.cargo().len(),
                descriptor.size as usize,
                "{}",
                descriptor.name
            );
        }
    }

    #[test]
    fn test_decode_encode_fields() {
        for &kind in MessageKind::ALL {
            let message = sample(kind);
            let again = kind.decode(&message.cargo());
            assert_eq!(again, message, "{kind}");
        }
    }

    #[test]
    fn test_requests_name_a_response() {
        for &kind in MessageKind::ALL {
            let descriptor = kind.descriptor();
            if descriptor.direction == Direction::Request {
                let response = descriptor.response.expect("request without response");
                let response = response.descriptor();
                assert_eq!(response.direction, Direction::Response);
                assert_eq!(response.characteristic, descriptor.characteristic);
                assert_eq!(response.signed, descriptor.signed);
            }
        }
    }

    #[test]
    fn test_try_from_message() {
        let message = Message::from(ApiVersionResponse { major: 1, minor: 0 });
        let typed = ApiVersionResponse::try_from(message.clone()).unwrap();
        assert_eq!(typed.major, 1);

        let err = TimeSinceResetResponse::try_from(message).unwrap_err();
        assert_eq!(err.error_code(), "UNEXPECTED_MESSAGE");
    }

    #[test]
    fn test_api_version_ordering() {
        assert!(ApiVersion::V2_1 < ApiVersion::V2_5);
        assert!(ApiVersion::V3_2 > ApiVersion::new(3, 0));
        assert_eq!(ApiVersion::V3_2.to_string(), "3.2");
    }
}
