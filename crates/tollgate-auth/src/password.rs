//! Credential hashing for user passwords and client secrets.
//!
//! Hashes are PBKDF2-HMAC-SHA256 with a 16-byte random salt and a 32-byte
//! derived key, stored in a self-describing format:
//!
//! ```text
//! version:iterations:base64(salt):base64(hash)
//! ```
//!
//! Verification re-derives with the stored salt and iteration count, so the
//! policy can change without invalidating existing hashes. `needs_rehash`
//! reports hashes that were produced under an older policy.
//!
//! # Example
//!
//! ```
//! use tollgate_auth::password::PasswordHasher;
//!
//! let hasher = PasswordHasher::new(10_000);
//! let hash = hasher.hash("correct horse").unwrap();
//! assert!(hasher.verify(&hash, "correct horse").unwrap());
//! assert!(!hasher.verify(&hash, "battery staple").unwrap());
//! ```

use base64::{Engine, engine::general_purpose::STANDARD};
use rand::RngCore;
use sha2::Sha256;

/// Current hash format version.
pub const HASH_VERSION: u32 = 1;

/// Default PBKDF2 iteration count.
pub const DEFAULT_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

/// Errors returned for precondition violations.
///
/// A hash that cannot be parsed is not an error: it simply fails to verify.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    /// The plaintext was empty.
    #[error("plaintext must not be empty")]
    EmptyPlaintext,

    /// The stored hash was empty.
    #[error("hash must not be empty")]
    EmptyHash,
}

impl From<PasswordError> for crate::AuthError {
    fn from(err: PasswordError) -> Self {
        crate::AuthError::invalid_request(err.to_string())
    }
}

/// PBKDF2-HMAC-SHA256 hasher with a configurable iteration count.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl Default for PasswordHasher {
    fn default() -> Self {
        Self::new(DEFAULT_ITERATIONS)
    }
}

impl PasswordHasher {
    /// Creates a hasher that produces hashes with `iterations` rounds.
    #[must_use]
    pub fn new(iterations: u32) -> Self {
        Self {
            iterations: iterations.max(1),
        }
    }

    /// Returns the iteration count used for new hashes.
    #[must_use]
    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Hashes a plaintext credential with a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns `PasswordError::EmptyPlaintext` if `plaintext` is empty.
    pub fn hash(&self, plaintext: &str) -> Result<String, PasswordError> {
        if plaintext.is_empty() {
            return Err(PasswordError::EmptyPlaintext);
        }

        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let derived = derive(plaintext.as_bytes(), &salt, self.iterations);

        Ok(format!(
            "{}:{}:{}:{}",
            HASH_VERSION,
            self.iterations,
            STANDARD.encode(salt),
            STANDARD.encode(derived)
        ))
    }

    /// Verifies a plaintext credential against a stored hash.
    ///
    /// Returns `Ok(false)` for a mismatch and for any hash that cannot be
    /// parsed.
    ///
    /// # Errors
    ///
    /// Returns an error if either argument is empty.
    pub fn verify(&self, hash: &str, plaintext: &str) -> Result<bool, PasswordError> {
        if hash.is_empty() {
            return Err(PasswordError::EmptyHash);
        }
        if plaintext.is_empty() {
            return Err(PasswordError::EmptyPlaintext);
        }

        let Some(parsed) = ParsedHash::parse(hash) else {
            return Ok(false);
        };
        if parsed.version != HASH_VERSION {
            return Ok(false);
        }

        let derived = derive(plaintext.as_bytes(), &parsed.salt, parsed.iterations);
        Ok(constant_time_eq(&derived, &parsed.hash))
    }

    /// Returns `true` if `hash` was produced under a different policy.
    ///
    /// Unparseable hashes always need rehashing.
    #[must_use]
    pub fn needs_rehash(&self, hash: &str) -> bool {
        match ParsedHash::parse(hash) {
            Some(parsed) => parsed.version != HASH_VERSION || parsed.iterations != self.iterations,
            None => true,
        }
    }
}

struct ParsedHash {
    version: u32,
    iterations: u32,
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl ParsedHash {
    fn parse(encoded: &str) -> Option<Self> {
        let mut parts = encoded.split(':');
        let version = parts.next()?.parse().ok()?;
        let iterations: u32 = parts.next()?.parse().ok()?;
        let salt = STANDARD.decode(parts.next()?).ok()?;
        let hash = STANDARD.decode(parts.next()?).ok()?;
        if parts.next().is_some() || iterations == 0 || salt.is_empty() || hash.is_empty() {
            return None;
        }
        Some(Self {
            version,
            iterations,
            salt,
            hash,
        })
    }
}

fn derive(plaintext: &[u8], salt: &[u8], iterations: u32) -> [u8; KEY_LEN] {
    let mut out = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(plaintext, salt, iterations, &mut out);
    out
}

/// Compares two byte strings without branching on their contents.
///
/// The length check leaks only the length, which is fixed for derived keys.
#[must_use]
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
