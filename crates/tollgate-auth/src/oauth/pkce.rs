//! PKCE (Proof Key for Code Exchange) implementation
//!
//! Implements RFC 7636 with both the `plain` and `S256` methods. When a
//! request carries a challenge without a method, `plain` is assumed.
//!
//! # Example
//!
//! ```
//! use tollgate_auth::oauth::{PkceChallenge, PkceChallengeMethod, PkceVerifier};
//!
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
//!
//! assert!(challenge.verify(verifier.as_str()).is_ok());
//! ```

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::password::constant_time_eq;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during PKCE operations.
#[derive(Debug, thiserror::Error)]
pub enum PkceError {
    /// Verifier length is outside the valid range (43-128 characters).
    #[error("Invalid verifier length: must be 43-128 characters, got {0}")]
    InvalidVerifierLength(usize),

    /// Verifier contains invalid characters.
    #[error("Invalid verifier characters: must be URL-safe ([A-Za-z0-9-._~])")]
    InvalidVerifierCharacters,

    /// A challenge was required but not supplied.
    #[error("code_challenge is required for this client")]
    MissingChallenge,

    /// Unsupported challenge method.
    #[error("Unsupported challenge method: {0}")]
    UnsupportedMethod(String),

    /// A verifier was required at redemption but not supplied.
    #[error("code_verifier is required")]
    MissingVerifier,

    /// PKCE verification failed (verifier doesn't match challenge).
    #[error("PKCE verification failed: verifier does not match challenge")]
    VerificationFailed,
}

impl PkceError {
    /// Get the OAuth 2.0 error code for this error.
    ///
    /// Problems with the authorization request are `invalid_request`;
    /// problems at redemption are `invalid_grant`.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::InvalidVerifierLength(_)
            | Self::InvalidVerifierCharacters
            | Self::MissingChallenge
            | Self::UnsupportedMethod(_) => "invalid_request",
            Self::MissingVerifier | Self::VerificationFailed => "invalid_grant",
        }
    }
}

impl From<PkceError> for crate::AuthError {
    fn from(err: PkceError) -> Self {
        match err.oauth_error_code() {
            "invalid_grant" => Self::invalid_grant(err.to_string()),
            _ => Self::invalid_request(err.to_string()),
        }
    }
}

// =============================================================================
// PKCE Challenge Method
// =============================================================================

/// PKCE challenge method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PkceChallengeMethod {
    /// The challenge is the verifier itself.
    #[default]
    Plain,
    /// SHA-256 hash, base64url encoded.
    S256,
}

impl PkceChallengeMethod {
    /// Parse challenge method from string.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for anything but `plain` or
    /// `S256`. Matching is case-sensitive.
    pub fn parse(method: &str) -> Result<Self, PkceError> {
        match method {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(PkceError::UnsupportedMethod(other.to_string())),
        }
    }

    /// Parse an optional method parameter, defaulting to `plain`.
    ///
    /// # Errors
    ///
    /// Returns `PkceError::UnsupportedMethod` for unknown methods.
    pub fn parse_or_default(method: Option<&str>) -> Result<Self, PkceError> {
        match method {
            None | Some("") => Ok(Self::default()),
            Some(method) => Self::parse(method),
        }
    }

    /// Get the method as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl std::fmt::Display for PkceChallengeMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// PKCE Verifier
// =============================================================================

/// PKCE code verifier.
///
/// A high-entropy random string of unreserved characters
/// `[A-Z] / [a-z] / [0-9] / "-" / "." / "_" / "~"`, 43 to 128 long.
#[derive(Debug, Clone)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Create a verifier from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the length is not between 43 and 128, or the
    /// string contains characters other than `[A-Za-z0-9-._~]`.
    pub fn new(verifier: String) -> Result<Self, PkceError> {
        let len = verifier.len();
        if !(43..=128).contains(&len) {
            return Err(PkceError::InvalidVerifierLength(len));
        }

        if !verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~'))
        {
            return Err(PkceError::InvalidVerifierCharacters);
        }

        Ok(Self(verifier))
    }

    /// Generate a cryptographically random verifier (32 bytes, 43 characters).
    #[must_use]
    pub fn generate() -> Self {
        use rand::Rng;
        let bytes: [u8; 32] = rand::thread_rng().r#gen();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Get the verifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// PKCE Challenge
// =============================================================================

/// A stored code challenge and the method it was made with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge {
    challenge: String,
    method: PkceChallengeMethod,
}

impl PkceChallenge {
    /// Wraps a challenge received from the client.
    #[must_use]
    pub fn new(challenge: impl Into<String>, method: PkceChallengeMethod) -> Self {
        Self {
            challenge: challenge.into(),
            method,
        }
    }

    /// Derives the challenge for `verifier`.
    #[must_use]
    pub fn from_verifier(verifier: &PkceVerifier, method: PkceChallengeMethod) -> Self {
        Self::new(transform(verifier.as_str(), method), method)
    }

    /// Checks a `code_verifier` from the token request.
    ///
    /// The verifier is not shape-checked: anything that does not reproduce
    /// the challenge fails with [`PkceError::VerificationFailed`].
    ///
    /// # Errors
    ///
    /// Returns `PkceError::VerificationFailed` if the verifier doesn't match.
    pub fn verify(&self, verifier: &str) -> Result<(), PkceError> {
        let expected = transform(verifier, self.method);
        if constant_time_eq(expected.as_bytes(), self.challenge.as_bytes()) {
            Ok(())
        } else {
            Err(PkceError::VerificationFailed)
        }
    }

    /// Get the challenge as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.challenge
    }

    /// The challenge method.
    #[must_use]
    pub fn method(&self) -> PkceChallengeMethod {
        self.method
    }
}

fn transform(verifier: &str, method: PkceChallengeMethod) -> String {
    match method {
        PkceChallengeMethod::Plain => verifier.to_string(),
        PkceChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
    }
}

// =============================================================================
// Tests
// =============================================================================
