//! Control characteristic messages
//!
//! Everything here changes insulin delivery and must be signed with the
//! session key.

use super::{ApiVersion, Descriptor, MessageKind, PumpMessage};
use crate::characteristic::Characteristic::Control;
use crate::codec::{CargoReader, CargoWriter};

/// Resume insulin delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePumpingRequest;

impl PumpMessage for ResumePumpingRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::ResumePumpingRequest,
        "ResumePumpingRequest",
        154,
        0,
        Control,
    )
    .signed()
    .modifies_insulin_delivery()
    .min_api(ApiVersion::V3_2)
    .responds_with(MessageKind::ResumePumpingResponse);

    fn from_cargo(_cargo: &[u8]) -> Self {
        Self
    }

    fn to_cargo(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Result of a resume request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResumePumpingResponse {
    /// Zero on success
    pub status: u8,
}

impl PumpMessage for ResumePumpingResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::ResumePumpingResponse,
        "ResumePumpingResponse",
        155,
        1,
        Control,
    )
    .signed()
    .modifies_insulin_delivery()
    .min_api(ApiVersion::V3_2);

    fn from_cargo(cargo: &[u8]) -> Self {
        Self {
            status: CargoReader::new(cargo).u8(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        vec![self.status]
    }
}

/// Suspend insulin delivery
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspendPumpingRequest;

impl PumpMessage for SuspendPumpingRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::SuspendPumpingRequest,
        "SuspendPumpingRequest",
        156,
        0,
        Control,
    )
    .signed()
    .modifies_insulin_delivery()
    .min_api(ApiVersion::V3_2)
    .responds_with(MessageKind::SuspendPumpingResponse);

    fn from_cargo(_cargo: &[u8]) -> Self {
        Self
    }

    fn to_cargo(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// Result of a suspend request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SuspendPumpingResponse {
    /// Zero on success
    pub status: u8,
}

impl PumpMessage for SuspendPumpingResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::SuspendPumpingResponse,
        "SuspendPumpingResponse",
        157,
        1,
        Control,
    )
    .signed()
    .modifies_insulin_delivery()
    .min_api(ApiVersion::V3_2);

    fn from_cargo(cargo: &[u8]) -> Self {
        Self {
            status: CargoReader::new(cargo).u8(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        vec![self.status]
    }
}

/// Start a temporary basal rate
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetTempRateRequest {
    /// Duration in milliseconds
    pub time_ms: u32,
    /// Percent of the programmed basal rate
    pub percent: u16,
}

impl SetTempRateRequest {
    /// Temp rate for `minutes` at `percent`
    pub fn new(minutes: u32, percent: u16) -> Self {
        Self {
            time_ms: minutes.saturating_mul(60_000),
            percent,
        }
    }
}

impl PumpMessage for SetTempRateRequest {
    const DESCRIPTOR: Descriptor = Descriptor::request(
        MessageKind::SetTempRateRequest,
        "SetTempRateRequest",
        164,
        6,
        Control,
    )
    .signed()
    .modifies_insulin_delivery()
    .min_api(ApiVersion::V3_2)
    .responds_with(MessageKind::SetTempRateResponse);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            time_ms: r.u32(),
            percent: r.u16(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(6)
            .u32(self.time_ms)
            .u16(self.percent)
            .finish()
    }
}

/// Result of a temp rate request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetTempRateResponse {
    /// Zero on success
    pub status: u8,
    /// Id assigned to the temp rate
    pub temp_rate_id: u8,
    /// Undocumented
    pub unknown: u16,
}

impl PumpMessage for SetTempRateResponse {
    const DESCRIPTOR: Descriptor = Descriptor::response(
        MessageKind::SetTempRateResponse,
        "SetTempRateResponse",
        165,
        4,
        Control,
    )
    .signed()
    .modifies_insulin_delivery()
    .min_api(ApiVersion::V3_2);

    fn from_cargo(cargo: &[u8]) -> Self {
        let mut r = CargoReader::new(cargo);
        Self {
            status: r.u8(),
            temp_rate_id: r.u8(),
            unknown: r.u16(),
        }
    }

    fn to_cargo(&self) -> Vec<u8> {
        CargoWriter::with_capacity(4)
            .u8(self.status)
            .u8(self.temp_rate_id)
            .u16(self.unknown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_messages_are_signed() {
        for descriptor in [
            &ResumePumpingRequest::DESCRIPTOR,
            &SuspendPumpingRequest::DESCRIPTOR,
            &SetTempRateRequest::DESCRIPTOR,
        ] {
            assert!(descriptor.signed);
            assert!(descriptor.modifies_insulin_delivery);
            assert_eq!(descriptor.declared_len(descriptor.size as usize), descriptor.size as usize + 24);
        }
    }

    #[test]
    fn test_temp_rate_from_minutes() {
        let request = SetTempRateRequest::new(30, 150);
        assert_eq!(request.time_ms, 1_800_000);
        assert_eq!(request.to_cargo(), vec![0x40, 0x77, 0x1B, 0x00, 150, 0]);
    }
}
