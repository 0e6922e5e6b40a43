//! Key derivation and key confirmation for JPAKE sessions
//!
//! The raw EC-JPAKE secret is never used to sign traffic directly. The
//! signing key is HKDF-SHA256 over that secret salted with the pump's
//! session nonce, and each side proves it holds the key by sending
//! HMAC-SHA256(key, own nonce).

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Length of the derived signing key and of the confirmation digest
pub const AUTH_KEY_LEN: usize = 32;

/// Derive the signing key from the raw JPAKE secret
pub fn derive_auth_key(nonce: &[u8], shared_secret: &[u8]) -> Result<[u8; AUTH_KEY_LEN], AuthError> {
    let hk = Hkdf::<Sha256>::new(Some(nonce), shared_secret);
    let mut okm = [0u8; AUTH_KEY_LEN];
    hk.expand(&[], &mut okm)
        .map_err(|e| AuthError::KeyDerivation(e.to_string()))?;
    Ok(okm)
}

/// HMAC-SHA256(auth_key, nonce)
pub fn confirmation_hash(auth_key: &[u8], nonce: &[u8]) -> Result<[u8; AUTH_KEY_LEN], AuthError> {
    let mut mac = HmacSha256::new_from_slice(auth_key)
        .map_err(|e| AuthError::KeyDerivation(e.to_string()))?;
    mac.update(nonce);
    Ok(mac.finalize().into_bytes().into())
}

/// Constant-time check of a peer's confirmation digest
pub fn verify_confirmation(auth_key: &[u8], nonce: &[u8], digest: &[u8]) -> bool {
    match HmacSha256::new_from_slice(auth_key) {
        Ok(mut mac) => {
            mac.update(nonce);
            mac.verify_slice(digest).is_ok()
        }
        Err(_) => false,
    }
}
