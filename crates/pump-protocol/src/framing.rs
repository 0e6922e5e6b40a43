//! Message framing and packet splitting
//!
//! A framed message is `op ‖ tx_id ‖ declared_len ‖ cargo`, followed by the
//! signature trailer for signed messages and a CRC-16 over everything
//! before it. The framed buffer is then cut into fixed-size windows, each
//! carried by one [`Packet`].

use tracing::trace;

use crate::crc::append_crc;
use crate::error::{FramingError, Result};
use crate::message::{Descriptor, Message};
use crate::packet::Packet;
use crate::signing::{sign_in_place, SIGNATURE_TRAILER_LEN};

/// Message header length (`op ‖ tx_id ‖ declared_len`)
pub const MESSAGE_HEADER_LEN: usize = 3;
/// Chunk size for unsigned messages
pub const UNSIGNED_CHUNK_SIZE: usize = 18;
/// Chunk size for signed messages
pub const SIGNED_CHUNK_SIZE: usize = 40;
/// Largest value of the 1-byte declared length
pub const MAX_DECLARED_LEN: usize = u8::MAX as usize;

/// Key and clock used to sign a message
#[derive(Debug, Clone, Copy)]
pub struct SigningParams<'a> {
    /// HMAC key
    pub key: &'a [u8],
    /// Pump time since reset, in seconds
    pub time_since_reset: u32,
}

impl<'a> SigningParams<'a> {
    /// Create signing parameters
    pub fn new(key: &'a [u8], time_since_reset: u32) -> Self {
        Self {
            key,
            time_since_reset,
        }
    }
}

/// Frame raw cargo under `op_code`
///
/// Signs when `signing` is given; the declared length then includes the
/// 24-byte trailer.
pub fn encode_frame(
    op_code: u8,
    tx_id: u8,
    cargo: &[u8],
    signing: Option<SigningParams<'_>>,
) -> Result<Vec<u8>> {
    let trailer = if signing.is_some() { SIGNATURE_TRAILER_LEN } else { 0 };
    let declared = cargo.len() + trailer;
    if declared > MAX_DECLARED_LEN {
        return Err(FramingError::CargoTooLarge {
            len: declared,
            max: MAX_DECLARED_LEN,
        }
        .into());
    }

    let mut buf = Vec::with_capacity(MESSAGE_HEADER_LEN + declared + crate::crc::CRC_LEN);
    buf.push(op_code);
    buf.push(tx_id);
    buf.push(declared as u8);
    buf.extend_from_slice(cargo);

    if let Some(params) = signing {
        buf.resize(buf.len() + SIGNATURE_TRAILER_LEN, 0);
        sign_in_place(&mut buf, params.key, params.time_since_reset)?;
    }

    append_crc(&mut buf);
    Ok(buf)
}

/// Frame a catalog message
///
/// Signing parameters are required for signed messages and ignored for the
/// rest.
pub fn frame(message: &Message, tx_id: u8, signing: Option<SigningParams<'_>>) -> Result<Vec<u8>> {
    let descriptor = message.descriptor();
    let signing = match (descriptor.signed, signing) {
        (true, None) => {
            return Err(FramingError::MissingSigningKey {
                name: descriptor.name,
            }
            .into())
        }
        (true, params) => params,
        (false, _) => None,
    };
    encode_frame(descriptor.op_code, tx_id, &message.cargo(), signing)
}

/// Window size used for a descriptor
pub fn chunk_size_for(descriptor: &Descriptor) -> usize {
    if descriptor.signed {
        SIGNED_CHUNK_SIZE
    } else {
        UNSIGNED_CHUNK_SIZE
    }
}

/// Cut a framed buffer into packets counting down to zero
pub fn chunk(buffer: &[u8], tx_id: u8, chunk_size: usize) -> Vec<Packet> {
    let chunk_size = chunk_size.max(1);
    let count = buffer.len().div_ceil(chunk_size).max(1);

    let packets: Vec<Packet> = (0..count)
        .map(|i| {
            let start = (i * chunk_size).min(buffer.len());
            let end = (start + chunk_size).min(buffer.len());
            let remaining = (count - 1 - i).min(u8::MAX as usize) as u8;
            Packet::new(remaining, tx_id, buffer[start..end].to_vec())
        })
        .collect();

    trace!(
        tx_id,
        len = buffer.len(),
        packets = packets.len(),
        "Split message into packets"
    );
    packets
}

/// Frame and split a message in one step
pub fn packetize(
    message: &Message,
    tx_id: u8,
    signing: Option<SigningParams<'_>>,
) -> Result<Vec<Packet>> {
    let buffer = frame(message, tx_id, signing)?;
    Ok(chunk(&buffer, tx_id, chunk_size_for(message.descriptor())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::split_crc;
    use crate::message::{
        ApiVersionRequest, CentralChallengeRequest, HistoryLogRecord, HistoryLogStreamResponse,
        SuspendPumpingRequest,
    };
    use crate::signing::verify;

    #[test]
    fn test_api_version_request_frame() {
        let message = Message::from(ApiVersionRequest);
        let packets = packetize(&message, 4, None).unwrap();
        assert_eq!(packets.len(), 1);

        let packet = &packets[0];
        assert_eq!(packet.packets_remaining, 0);
        assert_eq!(packet.tx_id, 4);
        assert_eq!(&packet.cargo[..3], &[0x20, 0x04, 0x00]);
        let (_, received, computed) = split_crc(&packet.cargo).unwrap();
        assert_eq!(received, computed);
    }

    #[test]
    fn test_multi_packet_countdown() {
        let message = Message::from(CentralChallengeRequest {
            app_instance_id: 1,
            central_challenge: [9; 8],
        });
        // 3 header + 10 cargo + 2 crc = 15 bytes: one packet
        assert_eq!(packetize(&message, 0, None).unwrap().len(), 1);

        let stream = Message::from(HistoryLogStreamResponse {
            number_of_logs: 2,
            stream_id: 1,
            records: vec![HistoryLogRecord::default(); 2],
        });
        // 3 + 54 + 2 = 59 bytes: 18 + 18 + 18 + 5
        let packets = packetize(&stream, 9, None).unwrap();
        let counters: Vec<u8> = packets.iter().map(|p| p.packets_remaining).collect();
        assert_eq!(counters, vec![3, 2, 1, 0]);
        assert!(packets.iter().all(|p| p.tx_id == 9));
        assert_eq!(packets[3].cargo.len(), 5);
    }

    #[test]
    fn test_signed_frame() {
        let message = Message::from(SuspendPumpingRequest);
        let key = b"session-key";

        assert!(matches!(
            frame(&message, 1, None),
            Err(crate::ProtocolError::Framing(FramingError::MissingSigningKey { .. }))
        ));

        let buffer = frame(&message, 1, Some(SigningParams::new(key, 1234))).unwrap();
        assert_eq!(buffer.len(), 3 + 24 + 2);
        assert_eq!(buffer[2], 24);

        let (body, received, computed) = split_crc(&buffer).unwrap();
        assert_eq!(received, computed);
        assert!(verify(body, key, Some(1234)));

        let packets = chunk(&buffer, 1, chunk_size_for(message.descriptor()));
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_unsigned_ignores_signing_params() {
        let message = Message::from(ApiVersionRequest);
        let plain = frame(&message, 2, None).unwrap();
        let with_key = frame(&message, 2, Some(SigningParams::new(b"k", 1))).unwrap();
        assert_eq!(plain, with_key);
    }

    #[test]
    fn test_cargo_too_large() {
        let err = encode_frame(0x81, 0, &[0u8; 240], Some(SigningParams::new(b"k", 0))).unwrap_err();
        assert_eq!(err.error_code(), "CARGO_TOO_LARGE");
        assert!(encode_frame(0x81, 0, &[0u8; 255], None).is_ok());
    }

    #[test]
    fn test_chunks_concatenate_to_buffer() {
        let buffer: Vec<u8> = (0..100u8).collect();
        let packets = chunk(&buffer, 3, 18);
        let joined: Vec<u8> = packets.iter().flat_map(|p| p.cargo.iter().copied()).collect();
        assert_eq!(joined, buffer);
        assert_eq!(packets.first().unwrap().packets_remaining as usize, packets.len() - 1);
    }
}
