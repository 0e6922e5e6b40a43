//! BLE packet unit

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FramingError;

/// Bytes of packet header before the payload
pub const PACKET_HEADER_LEN: usize = 2;

/// One characteristic write or notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packets still to come after this one (0 = last)
    pub packets_remaining: u8,
    /// Transaction id shared by every packet of a message
    pub tx_id: u8,
    /// Slice of the framed message
    pub cargo: Bytes,
}

impl Packet {
    /// Create a packet
    pub fn new(packets_remaining: u8, tx_id: u8, cargo: impl Into<Bytes>) -> Self {
        Self {
            packets_remaining,
            tx_id,
            cargo: cargo.into(),
        }
    }

    /// Whether this is the final packet of its message
    pub fn is_last(&self) -> bool {
        self.packets_remaining == 0
    }

    /// Wire form: `packets_remaining ‖ tx_id ‖ cargo`
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(PACKET_HEADER_LEN + self.cargo.len());
        buf.put_u8(self.packets_remaining);
        buf.put_u8(self.tx_id);
        buf.put_slice(&self.cargo);
        buf.freeze()
    }

    /// Parse the wire form
    pub fn from_bytes(data: &[u8]) -> Result<Self, FramingError> {
        if data.len() < PACKET_HEADER_LEN {
            return Err(FramingError::PacketTooShort { len: data.len() });
        }
        Ok(Self {
            packets_remaining: data[0],
            tx_id: data[1],
            cargo: Bytes::copy_from_slice(&data[PACKET_HEADER_LEN..]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_form() {
        let packet = Packet::new(2, 7, vec![0x20, 0x07, 0x00]);
        let bytes = packet.to_bytes();
        assert_eq!(&bytes[..], &[2, 7, 0x20, 0x07, 0x00]);
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
        assert!(!packet.is_last());
    }

    #[test]
    fn test_too_short() {
        assert_eq!(
            Packet::from_bytes(&[0]),
            Err(FramingError::PacketTooShort { len: 1 })
        );
        assert!(Packet::from_bytes(&[0, 1]).unwrap().cargo.is_empty());
    }
}
