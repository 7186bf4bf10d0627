//! JWT minting and validation.
//!
//! [`TokenIssuer`] signs access and ID tokens with the current key from the
//! [`KeyStore`] and validates them against every key still inside its
//! verification window. The `kid` header selects the key.
//!
//! ## Example
//!
//! ```ignore
//! use tollgate_auth::token::{KeyStore, KeyStoreConfig, TokenIssuer};
//!
//! let keys = Arc::new(KeyStore::new(KeyStoreConfig::default()));
//! let issuer = TokenIssuer::new(keys, "https://id.example.com", "https://api.example.com");
//!
//! let issued = issuer.issue_access_token("user-1", "my-app", "openid", Duration::hours(1))?;
//! let claims = issuer.validate(&issued.token)?;
//! assert_eq!(claims.sub, "user-1");
//! ```

use std::sync::Arc;

use jsonwebtoken::{Header, Validation, decode, decode_header, encode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::AuthError;
use crate::oauth::scope::has_scope;
use crate::storage::User;
use crate::token::keys::{KeyStore, SigningAlgorithm};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Failed to encode a token.
    #[error("Failed to encode token: {message}")]
    EncodingError {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode a token.
    #[error("Failed to decode token: {message}")]
    DecodingError {
        /// Description of the decoding error.
        message: String,
    },

    /// The token has expired.
    #[error("Token expired")]
    Expired,

    /// The token signature is invalid.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The token claims are invalid.
    #[error("Invalid claims: {message}")]
    InvalidClaims {
        /// Description of why claims are invalid.
        message: String,
    },

    /// The specified key was not found.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key ID that was not found.
        kid: String,
    },

    /// Failed to generate a cryptographic key.
    #[error("Key generation error: {message}")]
    KeyGenerationError {
        /// Description of the key generation error.
        message: String,
    },

    /// Invalid key format or data.
    #[error("Invalid key: {message}")]
    InvalidKey {
        /// Description of why the key is invalid.
        message: String,
    },
}

impl JwtError {
    /// Creates an encoding error.
    #[must_use]
    pub fn encoding_error(message: impl Into<String>) -> Self {
        Self::EncodingError {
            message: message.into(),
        }
    }

    /// Creates a decoding error.
    #[must_use]
    pub fn decoding_error(message: impl Into<String>) -> Self {
        Self::DecodingError {
            message: message.into(),
        }
    }

    /// Creates an invalid claims error.
    #[must_use]
    pub fn invalid_claims(message: impl Into<String>) -> Self {
        Self::InvalidClaims {
            message: message.into(),
        }
    }

    /// Creates a key not found error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a key generation error.
    #[must_use]
    pub fn key_generation_error(message: impl Into<String>) -> Self {
        Self::KeyGenerationError {
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    #[must_use]
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Returns `true` if the token itself was rejected (as opposed to a
    /// failure of our own key material).
    #[must_use]
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            Self::DecodingError { .. }
                | Self::Expired
                | Self::InvalidSignature
                | Self::InvalidClaims { .. }
                | Self::KeyNotFound { .. }
        )
    }
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::InvalidSignature,
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::InvalidSubject
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => Self::invalid_claims(err.to_string()),
            ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
                Self::invalid_key(err.to_string())
            }
            _ => Self::decoding_error(err.to_string()),
        }
    }
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        if err.is_validation_error() {
            AuthError::invalid_token(err.to_string())
        } else {
            AuthError::crypto(err.to_string())
        }
    }
}

// ============================================================================
// Claims
// ============================================================================

/// Claims shared by every token this server signs.
pub trait RegisteredClaims {
    /// Issued-at (Unix timestamp).
    fn issued_at(&self) -> i64;
}

/// Access token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject: the user, or the client itself for client_credentials.
    pub sub: String,

    /// Audience (the protected API).
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Token identifier, also the lookup key for revocation.
    pub jti: String,

    /// Granted scopes, space-separated.
    pub scope: String,

    /// Client the token was issued to.
    pub client_id: String,
}

impl RegisteredClaims for AccessTokenClaims {
    fn issued_at(&self) -> i64 {
        self.iat
    }
}

/// Profile and email claims released according to the granted scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserClaims {
    /// Full name (`profile`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Given name (`profile`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name (`profile`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Username (`profile`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Email address (`email`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the email address is verified (`email`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

impl UserClaims {
    /// Selects the claims of `user` that `scope` grants.
    #[must_use]
    pub fn for_scope(user: &User, scope: &str) -> Self {
        let mut claims = Self::default();
        if has_scope(scope, "profile") {
            claims.name = user.name.clone();
            claims.given_name = user.given_name.clone();
            claims.family_name = user.family_name.clone();
            claims.preferred_username = Some(user.username.clone());
        }
        if has_scope(scope, "email") && user.email.is_some() {
            claims.email = user.email.clone();
            claims.email_verified = Some(user.email_verified);
        }
        claims
    }
}

/// OpenID Connect ID token claims.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,

    /// Subject (user ID).
    pub sub: String,

    /// Audience: the client ID.
    pub aud: String,

    /// Expiration time (Unix timestamp).
    pub exp: i64,

    /// Issued at (Unix timestamp).
    pub iat: i64,

    /// Nonce from the authorization request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Scope-gated profile and email claims.
    #[serde(flatten)]
    pub user: UserClaims,
}

impl RegisteredClaims for IdTokenClaims {
    fn issued_at(&self) -> i64 {
        self.iat
    }
}

/// A freshly signed token and the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken<C> {
    /// Compact JWS serialization.
    pub token: String,
    /// The signed claims.
    pub claims: C,
}

// ============================================================================
// Token Issuer
// ============================================================================

/// Signs and validates JWTs.
///
/// Cheap to clone; the key store is shared.
#[derive(Debug, Clone)]
pub struct TokenIssuer {
    keys: Arc<KeyStore>,
    issuer: String,
    audience: String,
    clock_skew: Duration,
}

impl TokenIssuer {
    /// Creates an issuer with the default clock skew of five minutes.
    #[must_use]
    pub fn new(keys: Arc<KeyStore>, issuer: impl Into<String>, audience: impl Into<String>) -> Self {
        Self {
            keys,
            issuer: issuer.into(),
            audience: audience.into(),
            clock_skew: Duration::minutes(5),
        }
    }

    /// Overrides the tolerated clock skew.
    #[must_use]
    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Returns the issuer URL.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the access token audience.
    #[must_use]
    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Returns the key store.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Mints a signed access token.
    ///
    /// # Errors
    ///
    /// Returns an error if no signing key is available or signing fails.
    pub fn issue_access_token(
        &self,
        subject: &str,
        client_id: &str,
        scope: &str,
        ttl: Duration,
    ) -> Result<IssuedToken<AccessTokenClaims>, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = AccessTokenClaims {
            iss: self.issuer.clone(),
            sub: subject.to_string(),
            aud: self.audience.clone(),
            exp: (now + ttl).unix_timestamp(),
            iat: now.unix_timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
            scope: scope.to_string(),
            client_id: client_id.to_string(),
        };
        let token = self.sign(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Mints a signed ID token for `user`, addressed to `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if no signing key is available or signing fails.
    pub fn issue_id_token(
        &self,
        user: &User,
        client_id: &str,
        scope: &str,
        nonce: Option<&str>,
        ttl: Duration,
    ) -> Result<IssuedToken<IdTokenClaims>, JwtError> {
        let now = OffsetDateTime::now_utc();
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: user.id.clone(),
            aud: client_id.to_string(),
            exp: (now + ttl).unix_timestamp(),
            iat: now.unix_timestamp(),
            nonce: nonce.map(str::to_string),
            user: UserClaims::for_scope(user, scope),
        };
        let token = self.sign(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Validates an access token and returns its claims.
    ///
    /// # Errors
    ///
    /// Returns an error if the signature, issuer, audience, or timestamps do
    /// not check out.
    pub fn validate(&self, token: &str) -> Result<AccessTokenClaims, JwtError> {
        self.verify(token, &self.audience)
    }

    /// Validates an ID token issued to `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not valid for `client_id`.
    pub fn validate_id_token(&self, token: &str, client_id: &str) -> Result<IdTokenClaims, JwtError> {
        self.verify(token, client_id)
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, JwtError> {
        let key = self.keys.current_signing_key()?;
        let mut header = Header::new(key.algorithm.to_jwt_algorithm());
        header.kid = Some(key.kid.clone());

        encode(&header, claims, key.encoding_key())
            .map_err(|e| JwtError::encoding_error(e.to_string()))
    }

    fn verify<T>(&self, token: &str, audience: &str) -> Result<T, JwtError>
    where
        T: DeserializeOwned + RegisteredClaims,
    {
        let header = decode_header(token)?;
        let keys = self.keys.verification_keys()?;
        let candidates: Vec<_> = match header.kid.as_deref() {
            Some(kid) => keys.into_iter().filter(|key| key.kid == kid).collect(),
            None => keys,
        };
        if candidates.is_empty() {
            return Err(JwtError::key_not_found(header.kid.unwrap_or_default()));
        }

        let skew = self.clock_skew.whole_seconds().max(0);
        let mut validation = Validation::new(SigningAlgorithm::RS256.to_jwt_algorithm());
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);
        validation.validate_exp = true;
        validation.leeway = skew as u64;

        let mut last_error = JwtError::InvalidSignature;
        for key in candidates {
            match decode::<T>(token, key.decoding_key(), &validation) {
                Ok(data) => {
                    let now = OffsetDateTime::now_utc().unix_timestamp();
                    if data.claims.issued_at() > now + skew {
                        return Err(JwtError::invalid_claims("token issued in the future"));
                    }
                    return Ok(data.claims);
                }
                Err(err) => {
                    let err = JwtError::from(err);
                    if !matches!(err, JwtError::InvalidSignature) {
                        return Err(err);
                    }
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }
}

// ============================================================================
// Tests
// ============================================================================
