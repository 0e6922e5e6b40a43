//! Current status characteristic messages

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ApiVersion, Descriptor, MessageKind, PumpMessage};
use crate::characteristic::Characteristic::CurrentStatus;
use crate::codec::{CargoReader, CargoWriter};

/// Requests the pump API version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiVersionRequest;

impl PumpMessage for ApiVersionRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::ApiVersionRequest,
        "ApiVersionRequest",
        32,
        0,
        CurrentStatus,
    )
    .responds_with(MessageKind::ApiVersionResponse);

    fn from_cargo(_cargo: &[u8]) -> Self {
        Self
    }

    fn to_cargo(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Pump API version
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiVersionResponse {
    /// Major version
    pub major: u16,
    /// Minor version
    pub minor: u16,
}

impl ApiVersionResponse {
    /// As an [`ApiVersion`]
    pub fn version(&self) -> ApiVersion {
        ApiVersion::new(self.major, self.minor)
    }
}

impl PumpMessage for ApiVersionResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::ApiVersionResponse,
        "ApiVersionResponse",
        33,
        4,
        CurrentStatus,
    );

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            major: r.u16(),
            minor: r.u16(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(4)
            .u16(self.major)
            .u16(self.minor)
            .finish()
    }
}

/// Requests the V1 battery report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentBatteryV1Request;

impl PumpMessage for CurrentBatteryV1Request {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::CurrentBatteryV1Request,
        "CurrentBatteryV1Request",
        52,
        0,
        CurrentStatus,
    )
    .responds_with(MessageKind::CurrentBatteryV1Response);

    fn from_cargo(_cargo: &[u8]) -> Self {
        Self
    }

    fn to_cargo(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// V1 battery report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentBatteryV1Response {
    /// Battery percent, ABC reading
    pub current_battery_abc: u8,
    /// Battery percent, IBC reading
    pub current_battery_ibc: u8,
}

impl PumpMessage for CurrentBatteryV1Response {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::CurrentBatteryV1Response,
        "CurrentBatteryV1Response",
        53,
        2,
        CurrentStatus,
    );

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            current_battery_abc: r.u8(),
            current_battery_ibc: r.u8(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        vec![self.current_battery_abc, self.current_battery_ibc]
    }
}

/// Requests the V2 battery report
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentBatteryV2Request;

impl PumpMessage for CurrentBatteryV2Request {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::CurrentBatteryV2Request,
        "CurrentBatteryV2Request",
        144,
        0,
        CurrentStatus,
    )
    .min_api(ApiVersion::V2_5)
    .responds_with(MessageKind::CurrentBatteryV2Response);

    fn from_cargo(_cargo: &[u8]) -> Self {
        Self
    }

    fn to_cargo(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// V2 battery report
///
/// Shares opcode 53 with [`CurrentBatteryV1Response`]; the two are told
/// apart by cargo length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CurrentBatteryV2Response {
    /// Battery percent, ABC reading
    pub current_battery_abc: u8,
    /// Battery percent, IBC reading
    pub current_battery_ibc: u8,
    /// Non-zero while charging
    pub charging_status: u8,
    /// Undocumented
    pub unknown1: u16,
    /// Undocumented
    pub unknown2: u16,
    /// Undocumented
    pub unknown3: u16,
    /// Undocumented
    pub unknown4: u16,
}

impl CurrentBatteryV2Response {
    /// Whether the pump is on the charger
    pub fn is_charging(&self) -> bool {
        self.charging_status != 0
    }
}

impl PumpMessage for CurrentBatteryV2Response {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::CurrentBatteryV2Response,
        "CurrentBatteryV2Response",
        53,
        11,
        CurrentStatus,
    )
    .min_api(ApiVersion::V2_5);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            current_battery_abc: r.u8(),
            current_battery_ibc: r.u8(),
            charging_status: r.u8(),
            unknown1: r.u16(),
            unknown2: r.u16(),
            unknown3: r.u16(),
            unknown4: r.u16(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(11)
            .u8(self.current_battery_abc)
            .u8(self.current_battery_ibc)
            .u8(self.charging_status)
            .u16(self.unknown1)
            .u16(self.unknown2)
            .u16(self.unknown3)
            .u16(self.unknown4)
            .finish()
    }
}

/// Requests the pump clock
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSinceResetRequest;

impl PumpMessage for TimeSinceResetRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::TimeSinceResetRequest,
        "TimeSinceResetRequest",
        54,
        0,
        CurrentStatus,
    )
    .responds_with(MessageKind::TimeSinceResetResponse);

    fn from_cargo(_cargo: &[u8]) -> Self {
        Self
    }

    fn to_cargo(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Pump clock, in seconds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeSinceResetResponse {
    /// Pump wall clock (seconds since the pump epoch)
    pub current_time: u32,
    /// Seconds since the pump last reset; used in signed trailers
    pub pump_time_since_reset: u32,
}

impl PumpMessage for TimeSinceResetResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::TimeSinceResetResponse,
        "TimeSinceResetResponse",
        55,
        8,
        CurrentStatus,
    );

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            current_time: r.u32(),
            pump_time_since_reset: r.u32(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(8)
            .u32(self.current_time)
            .u32(self.pump_time_since_reset)
            .finish()
    }
}

/// Pump-reported fault code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// 0
    #[default]
    UndefinedError,
    /// 1: request failed its CRC check
    CrcMismatch,
    /// 2: header and packet txId disagree
    TransactionIdMismatch,
    /// 3: pump receive buffer is full
    MessageBufferFull,
    /// 4: cargo length does not match the opcode
    BadCargoLength,
    /// 5: opcode not accepted on this characteristic
    BadOpcode,
    /// 6: a parameter is out of range
    InvalidRequiredParameter,
    /// 7: signature missing or invalid
    InvalidAuthenticationError,
    /// Code outside the known table
    Other(u8),
}

impl ErrorCode {
    /// Wire value
    pub fn id(self) -> u8 {
        match self {
            ErrorCode::UndefinedError => 0,
            ErrorCode::CrcMismatch => 1,
            ErrorCode::TransactionIdMismatch => 2,
            ErrorCode::MessageBufferFull => 3,
            ErrorCode::BadCargoLength => 4,
            ErrorCode::BadOpcode => 5,
            ErrorCode::InvalidRequiredParameter => 6,
            ErrorCode::InvalidAuthenticationError => 7,
            ErrorCode::Other(id) => id,
        }
    }
}

impl From<u8> for ErrorCode {
    fn from(id: u8) -> Self {
        match id {
            0 => ErrorCode::UndefinedError,
            1 => ErrorCode::CrcMismatch,
            2 => ErrorCode::TransactionIdMismatch,
            3 => ErrorCode::MessageBufferFull,
            4 => ErrorCode::BadCargoLength,
            5 => ErrorCode::BadOpcode,
            6 => ErrorCode::InvalidRequiredParameter,
            7 => ErrorCode::InvalidAuthenticationError,
            other => ErrorCode::Other(other),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Other(id) => write!(f, "Other({id})"),
            known => write!(f, "{known:?}"),
        }
    }
}

/// Rejection of a request, sent on whichever characteristic the request used
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Opcode of the rejected request
    pub request_code_id: u8,
    /// Reason
    pub error_code: ErrorCode,
}

impl PumpMessage for ErrorResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::ErrorResponse,
        "ErrorResponse",
        77,
        2,
        CurrentStatus,
    )
    .universal();

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            request_code_id: r.u8(),
            error_code: ErrorCode::from(r.u8()),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        vec![self.request_code_id, self.error_code.id()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_table() {
        for id in 0..=u8::MAX {
            assert_eq!(ErrorCode::from(id).id(), id);
        }
        assert_eq!(ErrorCode::from(3), ErrorCode::MessageBufferFull);
        assert_eq!(ErrorCode::from(7), ErrorCode::InvalidAuthenticationError);
        assert_eq!(ErrorCode::from(200), ErrorCode::Other(200));
    }

    #[test]
    fn test_error_response_cargo() {
        let response = ErrorResponse::from_cargo(&[0x20, 0x03]);
        assert_eq!(response.request_code_id, 0x20);
        assert_eq!(response.error_code, ErrorCode::MessageBufferFull);
        assert_eq!(response.to_cargo(), vec![0x20, 0x03]);
    }

    #[test]
    fn test_api_version_response() {
        let response = ApiVersionResponse::from_cargo(&[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(response.version(), ApiVersion::new(1, 0));
    }

    #[test]
    fn test_battery_v2_layout() {
        let response = CurrentBatteryV2Response::from_cargo(&[
            0x50, 0x4F, 0x01, 0x02, 0x00, 0, 0, 0, 0, 0, 0,
        ]);
        assert_eq!(response.current_battery_abc, 0x50);
        assert!(response.is_charging());
        assert_eq!(response.unknown1, 2);
    }
}
