//! CRC-16 message checksum
//!
//! CRC-16/CCITT-FALSE (poly 0x1021, init 0xFFFF, unreflected, no final XOR),
//! appended little-endian after the message body.

use crc::{Crc, CRC_16_IBM_3740};

/// Checksum length on the wire
pub const CRC_LEN: usize = 2;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

/// Append the little-endian checksum of `buf` to itself
pub fn append_crc(buf: &mut Vec<u8>) {
    let crc = crc16(buf);
    buf.extend_from_slice(&crc.to_le_bytes());
}

/// Split a checksummed buffer into `(body, received, computed)`
///
/// Returns `None` when the buffer is too short to carry a checksum.
pub fn split_crc(buf: &[u8]) -> Option<(&[u8], u16, u16)> {
    if buf.len() < CRC_LEN {
        return None;
    }
    let (body, trailer) = buf.split_at(buf.len() - CRC_LEN);
    let received = u16::from_le_bytes([trailer[0], trailer[1]]);
    Some((body, received, crc16(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_append_and_split() {
        let mut buf = vec![0x20, 0x01, 0x00];
        append_crc(&mut buf);
        assert_eq!(buf.len(), 5);

        let (body, received, computed) = split_crc(&buf).unwrap();
        assert_eq!(body, &[0x20, 0x01, 0x00]);
        assert_eq!(received, computed);
        assert!(split_crc(&[0x01]).is_none());
    }

    proptest! {
        #[test]
        fn prop_deterministic(data in proptest::collection::vec(any::<u8>(), 0..300)) {
            prop_assert_eq!(crc16(&data), crc16(&data));
        }

        #[test]
        fn prop_single_bit_flip_detected(
            data in proptest::collection::vec(any::<u8>(), 1..300),
            index in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut flipped = data.clone();
            let i = index.index(flipped.len());
            flipped[i] ^= 1 << bit;
            prop_assert_ne!(crc16(&data), crc16(&flipped));
        }
    }
}
