//! HMAC-SHA1 message signing
//!
//! A signed message reserves a 24-byte trailer at the end of its body:
//! 4 bytes of little-endian time-since-reset followed by a 20-byte
//! HMAC-SHA1 over everything before the digest.

use hmac::{Hmac, Mac};
use sha1::Sha1;

use crate::error::{AuthError, FramingError, Result};

type HmacSha1 = Hmac<Sha1>;

/// Length of the time-since-reset + digest trailer
pub const SIGNATURE_TRAILER_LEN: usize = 24;
/// HMAC-SHA1 digest length
pub const HMAC_LEN: usize = 20;

fn mac(key: &[u8]) -> Result<HmacSha1> {
    HmacSha1::new_from_slice(key).map_err(|e| AuthError::Crypto(e.to_string()).into())
}

fn check_len(buf: &[u8]) -> Result<()> {
    if buf.len() < SIGNATURE_TRAILER_LEN {
        return Err(FramingError::LengthMismatch {
            declared: SIGNATURE_TRAILER_LEN,
            assembled: buf.len(),
        }
        .into());
    }
    Ok(())
}

/// HMAC-SHA1 of `data` under `key`
pub fn hmac_sha1(key: &[u8], data: &[u8]) -> Result<[u8; HMAC_LEN]> {
    let mut mac = mac(key)?;
    mac.update(data);
    let mut digest = [0u8; HMAC_LEN];
    digest.copy_from_slice(&mac.finalize().into_bytes());
    Ok(digest)
}

/// Constant-time check of an HMAC-SHA1 tag over `data`
pub fn verify_hmac_sha1(key: &[u8], data: &[u8], tag: &[u8]) -> bool {
    match mac(key) {
        Ok(mut mac) => {
            mac.update(data);
            mac.verify_slice(tag).is_ok()
        }
        Err(_) => false,
    }
}

/// Fill the reserved trailer of `buf` with `time_since_reset` and the digest
pub fn sign_in_place(buf: &mut [u8], key: &[u8], time_since_reset: u32) -> Result<()> {
    check_len(buf)?;
    let tsr_at = buf.len() - SIGNATURE_TRAILER_LEN;
    let digest_at = buf.len() - HMAC_LEN;
    buf[tsr_at..digest_at].copy_from_slice(&time_since_reset.to_le_bytes());

    let digest = hmac_sha1(key, &buf[..digest_at])?;
    buf[digest_at..].copy_from_slice(&digest);
    Ok(())
}

/// Time-since-reset stored in a signed buffer's trailer
pub fn trailer_time_since_reset(buf: &[u8]) -> Option<u32> {
    let tsr_at = buf.len().checked_sub(SIGNATURE_TRAILER_LEN)?;
    let bytes: [u8; 4] = buf[tsr_at..tsr_at + 4].try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

/// Check the trailer of a signed buffer
///
/// When `expected_time_since_reset` is set, the stored value must match it
/// as well. The digest comparison is constant-time.
pub fn verify(buf: &[u8], key: &[u8], expected_time_since_reset: Option<u32>) -> bool {
    if check_len(buf).is_err() {
        return false;
    }
    if let Some(expected) = expected_time_since_reset {
        if trailer_time_since_reset(buf) != Some(expected) {
            return false;
        }
    }

    let (body, digest) = buf.split_at(buf.len() - HMAC_LEN);
    verify_hmac_sha1(key, body, digest)
}
