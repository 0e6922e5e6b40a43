//! Authorization characteristic messages
//!
//! Legacy challenge/response pairing and the four JPAKE rounds.

use super::{ApiVersion, Descriptor, MessageKind, PumpMessage};
use crate::characteristic::Characteristic::Authorization;
use crate::codec::{pad_to, CargoReader, CargoWriter};

/// Length of one EC-JPAKE round-one half or client round-two payload
pub const JPAKE_ROUND_LEN: usize = 165;
/// Length of the server's round-two payload (ECParameters prefix included)
pub const JPAKE_SERVER_ROUND2_LEN: usize = 168;

/// Opens legacy pairing with a random central challenge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralChallengeRequest {
    /// Client app instance
    pub app_instance_id: u16,
    /// 8 random bytes
    pub central_challenge: [u8; 8],
}

impl PumpMessage for CentralChallengeRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::CentralChallengeRequest,
        "CentralChallengeRequest",
        16,
        10,
        Authorization,
    )
    .responds_with(MessageKind::CentralChallengeResponse);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            app_instance_id: r.u16(),
            central_challenge: r.array(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(10)
            .u16(self.app_instance_id)
            .bytes(&self.central_challenge)
            .finish()
    }
}

/// Pump's answer to the central challenge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralChallengeResponse {
    /// Echoed app instance
    pub app_instance_id: u16,
    /// HMAC-SHA1(pairing code, central challenge)
    pub central_challenge_hash: [u8; 20],
    /// Key material the central must HMAC with the pairing code
    pub hmac_key: [u8; 8],
}

impl PumpMessage for CentralChallengeResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::CentralChallengeResponse,
        "CentralChallengeResponse",
        17,
        30,
        Authorization,
    );

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            app_instance_id: r.u16(),
            central_challenge_hash: r.array(),
            hmac_key: r.array(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(30)
            .u16(self.app_instance_id)
            .bytes(&self.central_challenge_hash)
            .bytes(&self.hmac_key)
            .finish()
    }
}

/// Central's proof of the pairing code
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpChallengeRequest {
    /// Client app instance
    pub app_instance_id: u16,
    /// HMAC-SHA1(pairing code, hmac key)
    pub pump_challenge_hash: [u8; 20],
}

impl PumpMessage for PumpChallengeRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::PumpChallengeRequest,
        "PumpChallengeRequest",
        18,
        22,
        Authorization,
    )
    .responds_with(MessageKind::PumpChallengeResponse);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            app_instance_id: r.u16(),
            pump_challenge_hash: r.array(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(22)
            .u16(self.app_instance_id)
            .bytes(&self.pump_challenge_hash)
            .finish()
    }
}

/// Final legacy pairing verdict
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpChallengeResponse {
    /// Echoed app instance
    pub app_instance_id: u16,
    /// Pairing accepted
    pub success: bool,
}

impl PumpMessage for PumpChallengeResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::PumpChallengeResponse,
        "PumpChallengeResponse",
        19,
        3,
        Authorization,
    );

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            app_instance_id: r.u16(),
            success: r.bool(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(3)
            .u16(self.app_instance_id)
            .bool(self.success)
            .finish()
    }
}

// JPAKE rounds 1a, 1b and 2 share one layout: app instance id followed by
// an opaque EC-JPAKE payload padded to a fixed length.
macro_rules! jpake_round {
    ($(#[$meta:meta])* $name:ident, $kind:ident, $dir:ident, $op:expr, $payload:expr $(, $response:ident)?) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            /// App instance id
            pub app_instance_id: u16,
            /// EC-JPAKE round payload
            pub payload: Vec<u8>,
        }

        impl $name {
            /// Build from a round payload, padding or truncating to length
            pub fn new(app_instance_id: u16, payload: &[u8]) -> Self {
                Self {
                    app_instance_id,
                    payload: pad_to(payload, $payload),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new(0, &[])
            }
        }

        impl PumpMessage for $name {
            const DESCRIPTOR: Descriptor = Descriptor::$dir(
                MessageKind::$kind,
                stringify!($name),
                $op,
                2 + $payload as u8,
                Authorization,
            )
            .min_api(ApiVersion::V3_2)
            $(.responds_with(MessageKind::$response))?;

            fn from_cargo(cargo: &[u8]) -> Self {
                let mut r = CargoReader::new(cargo);
                let app_instance_id = r.u16();
                Self::new(app_instance_id, &r.rest())
            }

            fn to_cargo(&self) -> Vec<u8> {
                CargoWriter::with_capacity(2 + $payload)
                    .u16(self.app_instance_id)
                    .bytes(&pad_to(&self.payload, $payload))
                    .finish()
            }
        }
    };
}

jpake_round!(
    /// Client round-one first half (x1 public point and proof)
    Jpake1aRequest, Jpake1aRequest, request, 32, JPAKE_ROUND_LEN, Jpake1aResponse
);
jpake_round!(
    /// Server round-one first half
    Jpake1aResponse, Jpake1aResponse, response, 33, JPAKE_ROUND_LEN
);
jpake_round!(
    /// Client round-one second half (x2 public point and proof)
    Jpake1bRequest, Jpake1bRequest, request, 34, JPAKE_ROUND_LEN, Jpake1bResponse
);
jpake_round!(
    /// Server round-one second half
    Jpake1bResponse, Jpake1bResponse, response, 35, JPAKE_ROUND_LEN
);
jpake_round!(
    /// Client round two
    Jpake2Request, Jpake2Request, request, 36, JPAKE_ROUND_LEN, Jpake2Response
);
jpake_round!(
    /// Server round two, prefixed with ECParameters
    Jpake2Response, Jpake2Response, response, 37, JPAKE_SERVER_ROUND2_LEN
);

/// Asks the pump for its session key nonce
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jpake3SessionKeyRequest {
    /// Always zero in practice
    pub challenge_param: u16,
}

impl PumpMessage for Jpake3SessionKeyRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::Jpake3SessionKeyRequest,
        "Jpake3SessionKeyRequest",
        38,
        2,
        Authorization,
    )
    .min_api(ApiVersion::V3_2)
    .responds_with(MessageKind::Jpake3SessionKeyResponse);

    fn from_cargo(cargo: &[u8]) -> Self {
        Self {
            challenge_param: CargoReader::new(cargo).u16(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(2).u16(self.challenge_param).finish()
    }
}

/// Pump nonce used as the HKDF salt
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Jpake3SessionKeyResponse {
    /// App instance id
    pub app_instance_id: u16,
    /// 8-byte server nonce
    pub device_key_nonce: [u8; 8],
    /// Reserved, zero
    pub device_key_reserved: [u8; 8],
}

impl PumpMessage for Jpake3SessionKeyResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::Jpake3SessionKeyResponse,
        "Jpake3SessionKeyResponse",
        39,
        18,
        Authorization,
    )
    .min_api(ApiVersion::V3_2);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            app_instance_id: r.u16(),
            device_key_nonce: r.array(),
            device_key_reserved: r.array(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(18)
            .u16(self.app_instance_id)
            .bytes(&self.device_key_nonce)
            .bytes(&self.device_key_reserved)
            .finish()
    }
}

macro_rules! jpake_confirmation {
    ($(#[$meta:meta])* $name:ident, $dir:ident, $op:expr $(, $response:ident)?) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            /// App instance id
            pub app_instance_id: u16,
            /// Sender's 8-byte nonce
            pub nonce: [u8; 8],
            /// Reserved, zero
            pub reserved: [u8; 8],
            /// HMAC-SHA256(auth key, nonce)
            pub hash_digest: [u8; 32],
        }

        impl PumpMessage for $name {
            const DESCRIPTOR: Descriptor =
                Descriptor::$dir(MessageKind::$name, stringify!($name), $op, 50, Authorization)
                    .min_api(ApiVersion::V3_2)
                    $(.responds_with(MessageKind::$response))?;

            fn from_cargo(cargo: &[u8]) -> Self {
                let mut r = CargoReader::new(cargo);
                Self {
                    app_instance_id: r.u16(),
                    nonce: r.array(),
                    reserved: r.array(),
                    hash_digest: r.array(),
                }
            }

            fn to_cargo(&self) -> Vec<u8> {
                CargoWriter::with_capacity(50)
                    .u16(self.app_instance_id)
                    .bytes(&self.nonce)
                    .bytes(&self.reserved)
                    .bytes(&self.hash_digest)
                    .finish()
            }
        }
    };
}

jpake_confirmation!(
    /// Client key confirmation
    Jpake4KeyConfirmationRequest, request, 40, Jpake4KeyConfirmationResponse
);
jpake_confirmation!(
    /// Server key confirmation
    Jpake4KeyConfirmationResponse, response, 41
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_central_challenge_request_cargo() {
        let request = CentralChallengeRequest {
            app_instance_id: 5,
            central_challenge: [0u8; 8],
        };
        let cargo = request.to_cargo();

        let mut expected = vec![0x05, 0x00];
        expected.extend_from_slice(&[0u8; 8]);
        assert_eq!(cargo, expected);

        let decoded = CentralChallengeRequest::from_cargo(&cargo);
        assert_eq!(decoded.app_instance_id, 5);
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_short_cargo_is_best_effort() {
        let decoded = CentralChallengeResponse::from_cargo(&[0x07]);
        assert_eq!(decoded.app_instance_id, 7);
        assert_eq!(decoded.central_challenge_hash, [0u8; 20]);
    }

    #[test]
    fn test_jpake_payload_lengths() {
        assert_eq!(Jpake1aRequest::DESCRIPTOR.size, 167);
        assert_eq!(Jpake2Request::DESCRIPTOR.size, 167);
        assert_eq!(Jpake2Response::DESCRIPTOR.size, 170);

        let request = Jpake1bRequest::new(1, &[0xAB; 10]);
        assert_eq!(request.payload.len(), JPAKE_ROUND_LEN);
        assert_eq!(request.to_cargo().len(), 167);
    }

    #[test]
    fn test_jpake_opcodes_overlap_status_opcodes() {
        // 32/33 are reused on the status characteristic by ApiVersion
        assert_eq!(Jpake1aRequest::DESCRIPTOR.op_code, 32);
        assert_eq!(Jpake1aRequest::DESCRIPTOR.characteristic, Authorization);
    }
}
