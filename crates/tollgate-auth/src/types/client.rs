//! OAuth 2.0 client registration types.
//!
//! Clients are owned by the administrative side of the system; the protocol
//! engine only reads them.

use serde::{Deserialize, Serialize};

/// Scopes every client may request without an explicit assignment.
pub const IMPLICIT_SCOPES: &[&str] = &["openid", "profile"];

// =============================================================================
// Grant Type
// =============================================================================

/// OAuth 2.0 grant types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    /// Authorization Code flow.
    AuthorizationCode,
    /// Refresh Token flow.
    RefreshToken,
    /// Client Credentials flow (confidential clients only).
    ClientCredentials,
    /// Resource Owner Password Credentials flow.
    /// Legacy; intended only for trusted first-party clients.
    Password,
    /// Device Authorization Grant (RFC 8628).
    #[serde(alias = "urn:ietf:params:oauth:grant-type:device_code")]
    DeviceCode,
}

impl GrantType {
    /// The RFC 8628 grant type URN.
    pub const DEVICE_CODE_URN: &'static str = "urn:ietf:params:oauth:grant-type:device_code";

    /// Returns the `grant_type` parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthorizationCode => "authorization_code",
            Self::RefreshToken => "refresh_token",
            Self::ClientCredentials => "client_credentials",
            Self::Password => "password",
            Self::DeviceCode => Self::DEVICE_CODE_URN,
        }
    }

    /// Parses a `grant_type` parameter.
    ///
    /// The device grant is accepted both as its URN and as `device_code`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "authorization_code" => Some(Self::AuthorizationCode),
            "refresh_token" => Some(Self::RefreshToken),
            "client_credentials" => Some(Self::ClientCredentials),
            "password" => Some(Self::Password),
            "device_code" | Self::DEVICE_CODE_URN => Some(Self::DeviceCode),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrantType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Client
// =============================================================================

/// Whether a client can keep a secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientType {
    /// Server-side application holding a secret.
    #[default]
    Confidential,
    /// Browser or native application without a secret.
    Public,
}

/// OIDC application type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    /// Web application.
    #[default]
    Web,
    /// Native (desktop, mobile, device) application.
    Native,
}

/// Registered relying party.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    /// Opaque client identifier. Immutable once created.
    pub client_id: String,

    /// PBKDF2 hash of the client secret. `None` for public clients.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Human-readable name shown on consent and device pages.
    pub display_name: String,

    /// Confidential or public.
    #[serde(default, rename = "type")]
    pub client_type: ClientType,

    /// Whether authorization requests must carry a PKCE challenge.
    #[serde(default)]
    pub require_pkce: bool,

    /// OIDC application type.
    #[serde(default)]
    pub application_type: ApplicationType,

    /// Exact-match redirect URIs.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Allowed post-logout redirect URIs.
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,

    /// Scopes assigned to this client in addition to `openid` and `profile`.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Grant types this client may use. Empty means all.
    #[serde(default)]
    pub grant_types: Vec<GrantType>,
}

impl Client {
    /// Validates the client registration.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration is inconsistent.
    pub fn validate(&self) -> Result<(), ClientValidationError> {
        if self.client_id.is_empty() {
            return Err(ClientValidationError::EmptyClientId);
        }

        if self.display_name.is_empty() {
            return Err(ClientValidationError::EmptyName);
        }

        if self.is_public() && self.is_grant_type_explicitly_listed(GrantType::ClientCredentials) {
            return Err(ClientValidationError::PublicClientCredentials);
        }

        if self.client_type == ClientType::Confidential && self.client_secret.is_none() {
            return Err(ClientValidationError::MissingSecret);
        }

        Ok(())
    }

    /// Returns `true` for public clients.
    #[must_use]
    pub fn is_public(&self) -> bool {
        self.client_type == ClientType::Public
    }

    /// Returns `true` if a secret must be presented to authenticate.
    #[must_use]
    pub fn has_secret(&self) -> bool {
        self.client_secret.is_some()
    }

    /// Byte-exact redirect URI check.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &str) -> bool {
        self.redirect_uris.iter().any(|allowed| allowed == uri)
    }

    /// Checks a single scope name.
    ///
    /// `openid` and `profile` are always allowed; anything else must be
    /// assigned to the client.
    #[must_use]
    pub fn is_scope_allowed(&self, scope: &str) -> bool {
        IMPLICIT_SCOPES.contains(&scope) || self.scopes.iter().any(|s| s == scope)
    }

    /// Returns the first scope in a space-delimited list that is not allowed.
    #[must_use]
    pub fn first_disallowed_scope<'a>(&self, scope: &'a str) -> Option<&'a str> {
        scope
            .split_whitespace()
            .find(|requested| !self.is_scope_allowed(requested))
    }

    /// Checks whether the client may use `grant_type`.
    #[must_use]
    pub fn is_grant_type_allowed(&self, grant_type: GrantType) -> bool {
        if grant_type == GrantType::ClientCredentials && self.is_public() {
            return false;
        }
        self.grant_types.is_empty() || self.grant_types.contains(&grant_type)
    }

    fn is_grant_type_explicitly_listed(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Errors that can occur during client validation.
#[derive(Debug, thiserror::Error)]
pub enum ClientValidationError {
    /// Client ID cannot be empty.
    #[error("Client ID cannot be empty")]
    EmptyClientId,

    /// Display name cannot be empty.
    #[error("Client display name cannot be empty")]
    EmptyName,

    /// Public clients cannot use client_credentials grant.
    #[error("Public clients cannot use client_credentials grant")]
    PublicClientCredentials,

    /// Confidential clients require a client secret.
    #[error("Confidential clients require a client secret")]
    MissingSecret,
}

// =============================================================================
// Tests
// =============================================================================
