//! Opaque token values.
//!
//! Codes, refresh tokens and device codes are 256-bit random values handed
//! to the client. Only their SHA-256 digest is stored, as the token's
//! `reference_id`.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

/// Generates a 256-bit random value encoded as base64url (43 characters).
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hex-encoded SHA-256 of `value`: the stored lookup key for an opaque
/// token, and the `payload` digest of a JWT.
#[must_use]
pub fn hash_token(value: &str) -> String {
    hex::encode(Sha256::digest(value.as_bytes()))
}
