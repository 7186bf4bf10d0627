//! Authorization server configuration.
//!
//! Token lifetimes, key rotation, password hashing policy and device flow
//! settings. All durations are written in humantime notation (`"10m"`,
//! `"30d"`) when loaded from TOML.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root authorization server configuration.
///
/// # Example (TOML)
///
/// ```toml
/// [auth]
/// issuer = "https://id.example.com"
/// audience = "https://api.example.com"
///
/// [auth.tokens]
/// access_token_lifetime = "1h"
/// refresh_token_lifetime = "30d"
///
/// [auth.signing]
/// rotation_overlap = "1d"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer URL placed in the `iss` claim and the discovery document.
    pub issuer: String,

    /// Audience placed in the `aud` claim of access tokens.
    pub audience: String,

    /// Token lifetimes and refresh behaviour.
    pub tokens: TokenLifetimes,

    /// Signing key management.
    pub signing: SigningConfig,

    /// Credential hashing policy.
    pub password: PasswordConfig,

    /// Device authorization grant settings.
    pub device: DeviceConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            audience: "http://localhost:8080".to_string(),
            tokens: TokenLifetimes::default(),
            signing: SigningConfig::default(),
            password: PasswordConfig::default(),
            device: DeviceConfig::default(),
        }
    }
}

/// Token lifetimes.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenLifetimes {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// ID token lifetime.
    #[serde(with = "humantime_serde")]
    pub id_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Authorization code lifetime.
    #[serde(with = "humantime_serde")]
    pub authorization_code_lifetime: Duration,

    /// Lifetime of the Authorization created for a client_credentials grant.
    #[serde(with = "humantime_serde")]
    pub client_credentials_lifetime: Duration,

    /// Redeem the presented refresh token when a new one is issued.
    pub rotate_refresh_tokens: bool,

    /// Tolerated clock difference when validating `exp`/`iat`.
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

impl Default for TokenLifetimes {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(3600),
            id_token_lifetime: Duration::from_secs(3600),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            authorization_code_lifetime: Duration::from_secs(600),
            client_credentials_lifetime: Duration::from_secs(3600),
            rotate_refresh_tokens: true,
            clock_skew: Duration::from_secs(300),
        }
    }
}

/// Signing key configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// RSA modulus size in bits.
    pub key_size_bits: usize,

    /// How long a retired key stays available for verification.
    #[serde(with = "humantime_serde")]
    pub rotation_overlap: Duration,

    /// Maximum number of keys (current plus retired) kept at once.
    pub keys_to_keep: usize,

    /// Rotate automatically on this period. Rotation is manual when unset.
    #[serde(with = "humantime_serde::option")]
    pub rotation_interval: Option<Duration>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_size_bits: 2048,
            rotation_overlap: Duration::from_secs(24 * 3600),
            keys_to_keep: 3,
            rotation_interval: None,
        }
    }
}

/// Password and client secret hashing policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    /// PBKDF2 iteration count for new hashes.
    pub iterations: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            iterations: 100_000,
        }
    }
}

/// Device authorization grant (RFC 8628) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Page where the user enters the user code.
    pub verification_uri: String,

    /// Lifetime of the device code and user code.
    #[serde(with = "humantime_serde")]
    pub code_lifetime: Duration,

    /// Minimum polling interval advertised to the device.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            verification_uri: "http://localhost:8080/device".to_string(),
            code_lifetime: Duration::from_secs(600),
            interval: Duration::from_secs(5),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),
}

impl AuthConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if the issuer or audience is empty and
    /// `ConfigError::InvalidValue` for lifetimes of zero, keys smaller than
    /// 2048 bits, or an iteration count below 10 000.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::Missing("issuer".to_string()));
        }
        if self.audience.is_empty() {
            return Err(ConfigError::Missing("audience".to_string()));
        }

        let lifetimes = [
            ("access_token_lifetime", self.tokens.access_token_lifetime),
            ("id_token_lifetime", self.tokens.id_token_lifetime),
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
            (
                "authorization_code_lifetime",
                self.tokens.authorization_code_lifetime,
            ),
            (
                "client_credentials_lifetime",
                self.tokens.client_credentials_lifetime,
            ),
            ("device.code_lifetime", self.device.code_lifetime),
            ("device.interval", self.device.interval),
        ];
        for (name, value) in lifetimes {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{name} must be > 0")));
            }
        }

        if self.signing.key_size_bits < 2048 {
            return Err(ConfigError::InvalidValue(format!(
                "signing.key_size_bits must be >= 2048, got {}",
                self.signing.key_size_bits
            )));
        }
        if self.signing.keys_to_keep == 0 {
            return Err(ConfigError::InvalidValue(
                "signing.keys_to_keep must be >= 1".to_string(),
            ));
        }
        if self.password.iterations < 10_000 {
            return Err(ConfigError::InvalidValue(format!(
                "password.iterations must be >= 10000, got {}",
                self.password.iterations
            )));
        }

        Ok(())
    }
}

/// Converts a configuration duration into a `time::Duration`.
///
/// Saturates at `time::Duration::MAX` for values that do not fit.
#[must_use]
pub fn to_time_duration(value: Duration) -> time::Duration {
    time::Duration::try_from(value).unwrap_or(time::Duration::MAX)
}
