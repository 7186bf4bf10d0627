//! Authorization and token records.
//!
//! An [`Authorization`] is a grant given by a subject to a client; every
//! [`Token`] derived from it links back through `authorization_id`. Status
//! changes on both go through compare-and-set in the grant store.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Authorization
// =============================================================================

/// How an authorization was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationType {
    /// Interactive authorization code flow.
    Code,
    /// Client acting on its own behalf.
    ClientCredentials,
    /// Resource owner password credentials.
    Password,
    /// Device authorization grant.
    DeviceCode,
    /// Implicit flow (`token` / `id_token` response types).
    Implicit,
}

impl AuthorizationType {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::DeviceCode => "device_code",
            Self::Implicit => "implicit",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "code" => Some(Self::Code),
            "client_credentials" => Some(Self::ClientCredentials),
            "password" => Some(Self::Password),
            "device_code" => Some(Self::DeviceCode),
            "implicit" => Some(Self::Implicit),
            _ => None,
        }
    }
}

/// Lifecycle state of an authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// Waiting for user action (device flow).
    Pending,
    /// Usable.
    Valid,
    /// Approved by the user on the device verification page.
    Authorized,
    /// Revoked by the user, the client, or refresh rotation.
    Revoked,
    /// Refused by the user.
    Denied,
}

impl AuthorizationStatus {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Authorized => "authorized",
            Self::Revoked => "revoked",
            Self::Denied => "denied",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "valid" => Some(Self::Valid),
            "authorized" => Some(Self::Authorized),
            "revoked" => Some(Self::Revoked),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// Request details captured when the authorization was created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationProperties {
    /// Redirect URI the code was issued to; must match at redemption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,

    /// PKCE code challenge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,

    /// PKCE method, `plain` or `S256`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,

    /// OIDC nonce, echoed in the ID token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,

    /// Device flow user code shown to the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_code: Option<String>,
}

/// A grant given by a subject to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    /// Unique identifier.
    pub id: Uuid,

    /// The user, or the client itself for client_credentials. Empty while a
    /// device authorization is pending.
    pub subject_id: String,

    /// The client the grant was given to.
    pub client_id: String,

    /// How the grant was obtained.
    pub authorization_type: AuthorizationType,

    /// Current state.
    pub status: AuthorizationStatus,

    /// Granted scopes, space-separated.
    pub scopes: String,

    /// Request details.
    #[serde(default)]
    pub properties: AuthorizationProperties,

    /// When the grant was created.
    #[serde(with = "time::serde::rfc3339")]
    pub creation_date: OffsetDateTime,

    /// When the grant stops being usable.
    #[serde(with = "time::serde::rfc3339")]
    pub expiration_date: OffsetDateTime,
}

impl Authorization {
    /// Creates an authorization with a fresh ID, created now.
    #[must_use]
    pub fn new(
        subject_id: impl Into<String>,
        client_id: impl Into<String>,
        authorization_type: AuthorizationType,
        status: AuthorizationStatus,
        scopes: impl Into<String>,
        lifetime: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            subject_id: subject_id.into(),
            client_id: client_id.into(),
            authorization_type,
            status,
            scopes: scopes.into(),
            properties: AuthorizationProperties::default(),
            creation_date: now,
            expiration_date: now + lifetime,
        }
    }

    /// Attaches request properties.
    #[must_use]
    pub fn with_properties(mut self, properties: AuthorizationProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Returns `true` if the authorization has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiration_date <= now
    }

    /// Returns `true` if the authorization has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

// =============================================================================
// Token
// =============================================================================

/// Kind of a stored token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// JWT access token, referenced by its `jti`.
    AccessToken,
    /// Opaque refresh token.
    RefreshToken,
    /// JWT ID token.
    IdToken,
    /// Opaque single-use authorization code.
    AuthorizationCode,
    /// Device flow device code.
    DeviceCode,
    /// Device flow user code.
    UserCode,
}

impl TokenType {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
            Self::IdToken => "id_token",
            Self::AuthorizationCode => "authorization_code",
            Self::DeviceCode => "device_code",
            Self::UserCode => "user_code",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "access_token" => Some(Self::AccessToken),
            "refresh_token" => Some(Self::RefreshToken),
            "id_token" => Some(Self::IdToken),
            "authorization_code" => Some(Self::AuthorizationCode),
            "device_code" => Some(Self::DeviceCode),
            "user_code" => Some(Self::UserCode),
            _ => None,
        }
    }
}

/// Lifecycle state of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    /// Waiting for user action (device flow).
    Pending,
    /// Usable.
    Valid,
    /// Consumed; single-use tokens end here.
    Redeemed,
    /// Revoked.
    Revoked,
    /// Refused by the user.
    Denied,
}

impl TokenStatus {
    /// Stable storage representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Valid => "valid",
            Self::Redeemed => "redeemed",
            Self::Revoked => "revoked",
            Self::Denied => "denied",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "valid" => Some(Self::Valid),
            "redeemed" => Some(Self::Redeemed),
            "revoked" => Some(Self::Revoked),
            "denied" => Some(Self::Denied),
            _ => None,
        }
    }
}

/// A stored token record.
///
/// Secrets never land here in the clear: opaque values are kept as their
/// SHA-256 hex digest in `reference_id`, and JWTs are referenced by `jti`
/// with the digest of the compact form in `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Unique identifier.
    pub id: Uuid,

    /// Parent authorization.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorization_id: Option<Uuid>,

    /// Lookup key, unique per token type.
    pub reference_id: String,

    /// Kind of token.
    pub token_type: TokenType,

    /// Current state.
    pub status: TokenStatus,

    /// Subject the token was issued for. Empty while a device flow is pending.
    pub subject_id: String,

    /// SHA-256 hex digest of the issued JWT, when the token is one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,

    /// When the token was created.
    #[serde(with = "time::serde::rfc3339")]
    pub creation_date: OffsetDateTime,

    /// When the token stops being usable.
    #[serde(with = "time::serde::rfc3339")]
    pub expiration_date: OffsetDateTime,

    /// When the token was redeemed.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub redemption_date: Option<OffsetDateTime>,
}

impl Token {
    /// Creates a token with a fresh ID, created now.
    #[must_use]
    pub fn new(
        authorization_id: Option<Uuid>,
        reference_id: impl Into<String>,
        token_type: TokenType,
        status: TokenStatus,
        subject_id: impl Into<String>,
        lifetime: time::Duration,
    ) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            authorization_id,
            reference_id: reference_id.into(),
            token_type,
            status,
            subject_id: subject_id.into(),
            payload: None,
            creation_date: now,
            expiration_date: now + lifetime,
            redemption_date: None,
        }
    }

    /// Sets the payload digest.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    /// Returns `true` if the token has expired at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expiration_date <= now
    }

    /// Returns `true` if the token has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(OffsetDateTime::now_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings_parse_back() {
        for status in [
            TokenStatus::Pending,
            TokenStatus::Valid,
            TokenStatus::Redeemed,
            TokenStatus::Revoked,
            TokenStatus::Denied,
        ] {
            assert_eq!(TokenStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(AuthorizationStatus::parse("authorized"), Some(AuthorizationStatus::Authorized));
        assert_eq!(TokenType::parse("bogus"), None);
    }

    #[test]
    fn test_expiry() {
        let token = Token::new(
            None,
            "ref",
            TokenType::AuthorizationCode,
            TokenStatus::Valid,
            "user-1",
            time::Duration::minutes(10),
        );
        assert!(!token.is_expired());
        assert!(token.is_expired_at(token.expiration_date));
        assert!(token.redemption_date.is_none());
    }

    #[test]
    fn test_properties_serialize_sparse() {
        let properties = AuthorizationProperties {
            redirect_uri: Some("https://app.test/cb".to_string()),
            ..Default::default()
        };
        let json = serde_json::to_value(&properties).unwrap();
        assert_eq!(json, serde_json::json!({ "redirect_uri": "https://app.test/cb" }));
    }
}
