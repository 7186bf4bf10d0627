//! Signing key management.
//!
//! The [`KeyStore`] owns the RSA key material used to sign tokens. Its state
//! is an immutable [`KeySet`] snapshot held in an `ArcSwapOption`:
//!
//! - readers load the current snapshot without locking and keep using the
//!   `Arc` they obtained even if a rotation completes mid-request
//! - rotation builds a new snapshot and swaps it in under an exclusive lock
//! - retired keys stay in the snapshot for verification until their overlap
//!   window elapses
//!
//! Key material is generated lazily on first use. Initialization and rotation
//! share one lock, so two concurrent first uses converge on a single key.

use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use parking_lot::Mutex;
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::config::{SigningConfig, to_time_duration};
use crate::token::jwt::JwtError;

// ============================================================================
// Signing Algorithm
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SigningAlgorithm {
    /// RSA PKCS#1 v1.5 with SHA-256.
    #[default]
    RS256,
}

impl SigningAlgorithm {
    /// Converts to the jsonwebtoken algorithm.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::RS256 => Algorithm::RS256,
        }
    }

    /// Returns the JOSE algorithm name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RS256 => "RS256",
        }
    }
}

impl fmt::Display for SigningAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// JWKS Types
// ============================================================================

/// JSON Web Key Set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    /// The keys in this set.
    pub keys: Vec<Jwk>,
}

/// RSA JSON Web Key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always "RSA".
    pub kty: String,

    /// Key ID.
    pub kid: String,

    /// Key use, always "sig".
    #[serde(rename = "use")]
    pub use_: String,

    /// Algorithm.
    pub alg: String,

    /// RSA modulus (base64url).
    pub n: String,

    /// RSA public exponent (base64url).
    pub e: String,
}

// ============================================================================
// Signing Key
// ============================================================================

/// An RSA signing key.
///
/// The private half is held only as a jsonwebtoken `EncodingKey` and is never
/// exported.
pub struct SigningKey {
    /// Key ID placed in the JWT `kid` header.
    pub kid: String,

    /// Signing algorithm.
    pub algorithm: SigningAlgorithm,

    /// When the key was created.
    pub created_at: OffsetDateTime,

    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    modulus: Vec<u8>,
    exponent: Vec<u8>,
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("created_at", &self.created_at)
            .finish_non_exhaustive()
    }
}

impl SigningKey {
    /// Generates a fresh RSA key of `bits` size with a random key ID.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation or PEM conversion fails.
    pub fn generate(bits: usize) -> Result<Self, JwtError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| JwtError::key_generation_error(e.to_string()))?;
        Self::from_private_key(uuid::Uuid::new_v4().to_string(), &private_key)
    }

    /// Builds a signing key from existing RSA key material.
    ///
    /// # Errors
    ///
    /// Returns an error if the key cannot be converted for jsonwebtoken.
    pub fn from_private_key(
        kid: impl Into<String>,
        private_key: &RsaPrivateKey,
    ) -> Result<Self, JwtError> {
        let public_key = private_key.to_public_key();

        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        let public_pem = public_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;
        let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .map_err(|e| JwtError::invalid_key(e.to_string()))?;

        Ok(Self {
            kid: kid.into(),
            algorithm: SigningAlgorithm::RS256,
            created_at: OffsetDateTime::now_utc(),
            encoding_key,
            decoding_key,
            modulus: public_key.n().to_bytes_be(),
            exponent: public_key.e().to_bytes_be(),
        })
    }

    /// Returns the private signing key.
    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Returns the public verification key.
    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Exports the public half as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        Jwk {
            kty: "RSA".to_string(),
            kid: self.kid.clone(),
            use_: "sig".to_string(),
            alg: self.algorithm.as_str().to_string(),
            n: URL_SAFE_NO_PAD.encode(&self.modulus),
            e: URL_SAFE_NO_PAD.encode(&self.exponent),
        }
    }
}

// ============================================================================
// Key Set Snapshot
// ============================================================================

/// A key that no longer signs but still verifies.
#[derive(Debug, Clone)]
pub struct RetiredKey {
    /// The key.
    pub key: Arc<SigningKey>,
    /// End of the overlap window.
    pub expires_at: OffsetDateTime,
}

/// Immutable snapshot of the key state.
#[derive(Debug, Clone)]
pub struct KeySet {
    /// Key used for new signatures.
    pub current: Arc<SigningKey>,
    /// Recently retired keys, newest first.
    pub retired: Vec<RetiredKey>,
}

impl KeySet {
    fn new(current: Arc<SigningKey>) -> Self {
        Self {
            current,
            retired: Vec::new(),
        }
    }

    /// Keys valid for verification at `now`: the current key first.
    #[must_use]
    pub fn verification_keys_at(&self, now: OffsetDateTime) -> Vec<Arc<SigningKey>> {
        std::iter::once(self.current.clone())
            .chain(
                self.retired
                    .iter()
                    .filter(|r| r.expires_at > now)
                    .map(|r| r.key.clone()),
            )
            .collect()
    }

    fn rotated(&self, next: Arc<SigningKey>, config: &KeyStoreConfig, now: OffsetDateTime) -> Self {
        let mut retired = Vec::with_capacity(self.retired.len() + 1);
        retired.push(RetiredKey {
            key: self.current.clone(),
            expires_at: now + config.rotation_overlap,
        });
        retired.extend(self.retired.iter().filter(|r| r.expires_at > now).cloned());
        retired.truncate(config.keys_to_keep.saturating_sub(1));

        Self {
            current: next,
            retired,
        }
    }
}

// ============================================================================
// Key Store
// ============================================================================

/// Key store settings.
#[derive(Debug, Clone)]
pub struct KeyStoreConfig {
    /// RSA modulus size.
    pub key_size_bits: usize,
    /// How long a retired key keeps verifying.
    pub rotation_overlap: Duration,
    /// Maximum keys (current plus retired).
    pub keys_to_keep: usize,
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            key_size_bits: 2048,
            rotation_overlap: Duration::hours(24),
            keys_to_keep: 3,
        }
    }
}

impl From<&SigningConfig> for KeyStoreConfig {
    fn from(config: &SigningConfig) -> Self {
        Self {
            key_size_bits: config.key_size_bits,
            rotation_overlap: to_time_duration(config.rotation_overlap),
            keys_to_keep: config.keys_to_keep.max(1),
        }
    }
}

/// Owner of the signing key state.
///
/// Construct one per process and share it behind an `Arc`.
pub struct KeyStore {
    config: KeyStoreConfig,
    state: ArcSwapOption<KeySet>,
    write_lock: Mutex<()>,
}

impl fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyStore")
            .field("config", &self.config)
            .field("initialized", &self.state.load().is_some())
            .finish()
    }
}

impl KeyStore {
    /// Creates an empty key store. The first key is generated on first use.
    #[must_use]
    pub fn new(config: KeyStoreConfig) -> Self {
        Self {
            config,
            state: ArcSwapOption::empty(),
            write_lock: Mutex::new(()),
        }
    }

    /// Creates a key store whose current key is `key`.
    #[must_use]
    pub fn with_key(config: KeyStoreConfig, key: SigningKey) -> Self {
        let store = Self::new(config);
        store
            .state
            .store(Some(Arc::new(KeySet::new(Arc::new(key)))));
        store
    }

    /// Returns the current snapshot, generating the first key if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the first key cannot be generated.
    pub fn snapshot(&self) -> Result<Arc<KeySet>, JwtError> {
        if let Some(set) = self.state.load_full() {
            return Ok(set);
        }

        let _guard = self.write_lock.lock();
        // Another caller may have initialized while we waited for the lock.
        if let Some(set) = self.state.load_full() {
            return Ok(set);
        }

        let key = SigningKey::generate(self.config.key_size_bits)?;
        tracing::info!(kid = %key.kid, "Generated initial signing key");
        let set = Arc::new(KeySet::new(Arc::new(key)));
        self.state.store(Some(set.clone()));
        Ok(set)
    }

    /// Forces key generation at startup instead of on the first request.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn ensure_initialized(&self) -> Result<(), JwtError> {
        self.snapshot().map(|_| ())
    }

    /// Returns the key used to sign new tokens.
    ///
    /// # Errors
    ///
    /// Returns an error if the first key cannot be generated.
    pub fn current_signing_key(&self) -> Result<Arc<SigningKey>, JwtError> {
        Ok(self.snapshot()?.current.clone())
    }

    /// Returns every key currently valid for verification.
    ///
    /// # Errors
    ///
    /// Returns an error if the first key cannot be generated.
    pub fn verification_keys(&self) -> Result<Vec<Arc<SigningKey>>, JwtError> {
        Ok(self
            .snapshot()?
            .verification_keys_at(OffsetDateTime::now_utc()))
    }

    /// Finds a verification key by `kid`.
    ///
    /// # Errors
    ///
    /// Returns an error if the first key cannot be generated.
    pub fn find_verification_key(&self, kid: &str) -> Result<Option<Arc<SigningKey>>, JwtError> {
        Ok(self
            .verification_keys()?
            .into_iter()
            .find(|key| key.kid == kid))
    }

    /// Generates a new key and makes it current.
    ///
    /// The previous key keeps verifying until its overlap window ends.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails. The existing key set is left
    /// untouched in that case.
    pub fn rotate(&self) -> Result<String, JwtError> {
        // Generate outside the lock so signers are never stalled on it.
        let key = SigningKey::generate(self.config.key_size_bits)?;
        Ok(self.install(key))
    }

    /// Makes `key` current, retiring the previous key.
    pub fn install(&self, key: SigningKey) -> String {
        let now = OffsetDateTime::now_utc();
        let kid = key.kid.clone();
        let next = Arc::new(key);

        let _guard = self.write_lock.lock();
        let set = match self.state.load_full() {
            Some(existing) => existing.rotated(next, &self.config, now),
            None => KeySet::new(next),
        };
        self.state.store(Some(Arc::new(set)));

        tracing::info!(kid = %kid, "Rotated signing key");
        kid
    }

    /// Drops retired keys whose overlap window has ended.
    ///
    /// Returns the number of keys removed.
    pub fn prune(&self, now: OffsetDateTime) -> usize {
        let _guard = self.write_lock.lock();
        let Some(set) = self.state.load_full() else {
            return 0;
        };

        let before = set.retired.len();
        let retired: Vec<RetiredKey> = set
            .retired
            .iter()
            .filter(|r| r.expires_at > now)
            .cloned()
            .collect();
        let removed = before - retired.len();

        if removed > 0 {
            self.state.store(Some(Arc::new(KeySet {
                current: set.current.clone(),
                retired,
            })));
            tracing::debug!(removed, "Pruned retired signing keys");
        }
        removed
    }

    /// Builds the JWKS document from the verification keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the first key cannot be generated.
    pub fn jwks(&self) -> Result<Jwks, JwtError> {
        Ok(Jwks {
            keys: self
                .verification_keys()?
                .iter()
                .map(|key| key.to_jwk())
                .collect(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
