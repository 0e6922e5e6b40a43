//! GATT characteristics exposed by the pump
//!
//! Every message travels on exactly one characteristic. Opcodes are only
//! unique per characteristic, so the characteristic is part of every
//! registry lookup.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Pump GATT service UUID
pub const PUMP_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_FDFB_0000_1000_8000_0080_5F9B_34FB);

/// Characteristics used by the message protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Characteristic {
    /// Status requests and their responses
    CurrentStatus,
    /// Unsolicited event bitmask notifications
    QualifyingEvents,
    /// History log stream
    HistoryLog,
    /// Pairing and authentication
    Authorization,
    /// Signed control requests
    Control,
    /// Streamed control progress
    ControlStream,
}

impl Characteristic {
    /// All characteristics, in UUID order
    pub const ALL: [Characteristic; 6] = [
        Characteristic::CurrentStatus,
        Characteristic::QualifyingEvents,
        Characteristic::HistoryLog,
        Characteristic::Authorization,
        Characteristic::Control,
        Characteristic::ControlStream,
    ];

    /// 128-bit characteristic UUID
    pub const fn uuid(self) -> Uuid {
        match self {
            Characteristic::CurrentStatus => Uuid::from_u128(0x7B83_FFF6_9F77_4E5C_8064_AAE2_C248_38B9),
            Characteristic::QualifyingEvents => Uuid::from_u128(0x7B83_FFF7_9F77_4E5C_8064_AAE2_C248_38B9),
            Characteristic::HistoryLog => Uuid::from_u128(0x7B83_FFF8_9F77_4E5C_8064_AAE2_C248_38B9),
            Characteristic::Authorization => Uuid::from_u128(0x7B83_FFF9_9F77_4E5C_8064_AAE2_C248_38B9),
            Characteristic::Control => Uuid::from_u128(0x7B83_FFFC_9F77_4E5C_8064_AAE2_C248_38B9),
            Characteristic::ControlStream => Uuid::from_u128(0x7B83_FFFD_9F77_4E5C_8064_AAE2_C248_38B9),
        }
    }

    /// Look up a characteristic by UUID
    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.uuid() == *uuid)
    }

    /// Short name used in logs
    pub const fn name(self) -> &'static str {
        match self {
            Characteristic::CurrentStatus => "current_status",
            Characteristic::QualifyingEvents => "qualifying_events",
            Characteristic::HistoryLog => "history_log",
            Characteristic::Authorization => "authorization",
            Characteristic::Control => "control",
            Characteristic::ControlStream => "control_stream",
        }
    }
}

impl fmt::Display for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuid_lookup() {
        for characteristic in Characteristic::ALL {
            assert_eq!(
                Characteristic::from_uuid(&characteristic.uuid()),
                Some(characteristic)
            );
        }
        assert_eq!(Characteristic::from_uuid(&PUMP_SERVICE_UUID), None);
    }

    #[test]
    fn test_uuid_format() {
        assert_eq!(
            Characteristic::Authorization.uuid().to_string(),
            "7b83fff9-9f77-4e5c-8064-aae2c24838b9"
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Characteristic::CurrentStatus.to_string(), "current_status");
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Characteristic::ControlStream).unwrap();
        assert_eq!(json, "\"control_stream\"");
    }
}
