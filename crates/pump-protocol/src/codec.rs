//! Byte codec utilities
//!
//! Fixed-width little-endian helpers used by every message layout. Decoding
//! goes through [`CargoReader`], which never fails: reading past the end of
//! a short cargo yields zero bytes, so a truncated payload still produces a
//! best-effort message instead of an error.

use bytes::BufMut;

use crate::error::CodecError;

/// Best-effort little-endian cursor over message cargo
#[derive(Debug, Clone)]
pub struct CargoReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> CargoReader<'a> {
    /// Create a reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes left before the end of the cargo
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Current offset
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read a fixed-size array, zero-filling anything past the end
    pub fn array<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let start = self.pos.min(self.data.len());
        let end = (self.pos + N).min(self.data.len());
        out[..end - start].copy_from_slice(&self.data[start..end]);
        self.pos += N;
        out
    }

    /// Read a single byte
    pub fn u8(&mut self) -> u8 {
        self.array::<1>()[0]
    }

    /// Read a byte as a boolean (any non-zero value is true)
    pub fn bool(&mut self) -> bool {
        self.u8() != 0
    }

    /// Read a little-endian u16
    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.array())
    }

    /// Read a little-endian u32
    pub fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.array())
    }

    /// Read a little-endian u64
    pub fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.array())
    }

    /// Read a little-endian IEEE-754 f32
    pub fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.array())
    }

    /// Take everything that is left
    pub fn rest(&mut self) -> Vec<u8> {
        let start = self.pos.min(self.data.len());
        self.pos = self.data.len();
        self.data[start..].to_vec()
    }
}

/// Little-endian cargo builder
#[derive(Debug, Default, Clone)]
pub struct CargoWriter {
    buf: Vec<u8>,
}

impl CargoWriter {
    /// Create a writer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Append a byte
    pub fn u8(mut self, value: u8) -> Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a boolean as 0/1
    pub fn bool(self, value: bool) -> Self {
        self.u8(u8::from(value))
    }

    /// Append a little-endian u16
    pub fn u16(mut self, value: u16) -> Self {
        self.buf.put_u16_le(value);
        self
    }

    /// Append a little-endian u32
    pub fn u32(mut self, value: u32) -> Self {
        self.buf.put_u32_le(value);
        self
    }

    /// Append a little-endian u64
    pub fn u64(mut self, value: u64) -> Self {
        self.buf.put_u64_le(value);
        self
    }

    /// Append a little-endian f32
    pub fn f32(mut self, value: f32) -> Self {
        self.buf.put_f32_le(value);
        self
    }

    /// Append raw bytes
    pub fn bytes(mut self, value: &[u8]) -> Self {
        self.buf.put_slice(value);
        self
    }

    /// Finish and return the cargo
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Zero-pad (or truncate) `data` to exactly `len` bytes
pub fn pad_to(data: &[u8], len: usize) -> Vec<u8> {
    let mut out = data[..data.len().min(len)].to_vec();
    out.resize(len, 0);
    out
}

/// First `n` bytes (fewer if `data` is shorter)
pub fn first_n(data: &[u8], n: usize) -> &[u8] {
    &data[..n.min(data.len())]
}

/// Everything after the first `n` bytes
pub fn drop_first_n(data: &[u8], n: usize) -> &[u8] {
    &data[n.min(data.len())..]
}

/// Everything except the last `n` bytes
pub fn drop_last_n(data: &[u8], n: usize) -> &[u8] {
    &data[..data.len().saturating_sub(n)]
}

/// Concatenate slices into one buffer
pub fn combine(parts: &[&[u8]]) -> Vec<u8> {
    let total = parts.iter().map(|p| p.len()).sum();
    let mut out = Vec::with_capacity(total);
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Lowercase hex encoding
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// Decode hex, ignoring surrounding whitespace
pub fn from_hex(text: &str) -> Result<Vec<u8>, CodecError> {
    hex::decode(text.trim()).map_err(|e| CodecError::InvalidHex(e.to_string()))
}

/// Copy a slice into a fixed array, failing on a length mismatch
pub fn to_array<const N: usize>(data: &[u8]) -> Result<[u8; N], CodecError> {
    data.try_into().map_err(|_| CodecError::InvalidLength {
        expected: N,
        got: data.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_reader_little_endian() {
        let data = [0x05, 0x00, 0x78, 0x56, 0x34, 0x12];
        let mut reader = CargoReader::new(&data);
        assert_eq!(reader.u16(), 5);
        assert_eq!(reader.u32(), 0x1234_5678);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_short_cargo_zero_fills() {
        let data = [0xAA];
        let mut reader = CargoReader::new(&data);
        assert_eq!(reader.u32(), 0xAA);
        assert_eq!(reader.u16(), 0);
        assert!(reader.rest().is_empty());
    }

    #[test]
    fn test_writer() {
        let cargo = CargoWriter::default()
            .u16(5)
            .bytes(&[0u8; 8])
            .bool(true)
            .finish();
        assert_eq!(cargo.len(), 11);
        assert_eq!(&cargo[..2], &[0x05, 0x00]);
        assert_eq!(cargo[10], 1);
    }

    #[test]
    fn test_slicing_helpers() {
        let data = [1, 2, 3, 4, 5];
        assert_eq!(first_n(&data, 2), &[1, 2]);
        assert_eq!(drop_first_n(&data, 3), &[4, 5]);
        assert_eq!(drop_last_n(&data, 2), &[1, 2, 3]);
        assert_eq!(drop_last_n(&data, 10), &[] as &[u8]);
        assert_eq!(pad_to(&data, 7), vec![1, 2, 3, 4, 5, 0, 0]);
        assert_eq!(pad_to(&data, 2), vec![1, 2]);
        assert_eq!(combine(&[&[1], &[2, 3]]), vec![1, 2, 3]);
    }

    #[test]
    fn test_hex() {
        assert_eq!(to_hex(&[0x20, 0xff]), "20ff");
        assert_eq!(from_hex(" 20ff\n").unwrap(), vec![0x20, 0xff]);
        assert!(matches!(from_hex("zz"), Err(CodecError::InvalidHex(_))));
    }

    #[test]
    fn test_to_array() {
        let arr: [u8; 2] = to_array(&[1, 2]).unwrap();
        assert_eq!(arr, [1, 2]);
        assert_eq!(
            to_array::<3>(&[1, 2]),
            Err(CodecError::InvalidLength {
                expected: 3,
                got: 2
            })
        );
    }

    proptest! {
        #[test]
        fn prop_integers_roundtrip(a in any::<u8>(), b in any::<u16>(), c in any::<u32>(), d in any::<u64>()) {
            let cargo = CargoWriter::default().u8(a).u16(b).u32(c).u64(d).finish();
            let mut reader = CargoReader::new(&cargo);
            prop_assert_eq!(reader.u8(), a);
            prop_assert_eq!(reader.u16(), b);
            prop_assert_eq!(reader.u32(), c);
            prop_assert_eq!(reader.u64(), d);
        }

        #[test]
        fn prop_f32_bits_roundtrip(bits in any::<u32>()) {
            let value = f32::from_bits(bits);
            let cargo = CargoWriter::default().f32(value).finish();
            prop_assert_eq!(CargoReader::new(&cargo).f32().to_bits(), bits);
        }
    }
}
