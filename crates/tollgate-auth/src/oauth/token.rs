//! Token endpoint wire types.
//!
//! # Supported Grant Types
//!
//! - `authorization_code` - Exchange an authorization code for tokens
//! - `refresh_token` - Refresh an access token
//! - `client_credentials` - Machine-to-machine authentication
//! - `password` - Resource owner password credentials
//! - `urn:ietf:params:oauth:grant-type:device_code` - Device flow polling

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AuthError;

/// Token request parameters.
///
/// One structure for all grant types; which fields are required depends on
/// `grant_type`:
///
/// - `authorization_code`: code, redirect_uri, code_verifier
/// - `refresh_token`: refresh_token, (optional) scope
/// - `client_credentials`: (optional) scope
/// - `password`: username, password, (optional) scope
/// - device code: device_code
///
/// Client credentials come from HTTP Basic (not in this struct) or from
/// `client_id` / `client_secret` in the body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenRequest {
    /// OAuth 2.0 grant type.
    #[serde(default)]
    pub grant_type: String,

    /// Authorization code.
    #[serde(default)]
    pub code: Option<String>,

    /// Redirect URI (must match the authorization request).
    #[serde(default)]
    pub redirect_uri: Option<String>,

    /// PKCE code verifier.
    #[serde(default)]
    pub code_verifier: Option<String>,

    /// Client ID (public clients or client_secret_post).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default)]
    pub client_secret: Option<String>,

    /// Refresh token.
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Requested scope.
    #[serde(default)]
    pub scope: Option<String>,

    /// Username (password grant).
    #[serde(default)]
    pub username: Option<String>,

    /// Password (password grant).
    #[serde(default)]
    pub password: Option<String>,

    /// Device code (device grant).
    #[serde(default)]
    pub device_code: Option<String>,
}

/// Successful token response.
///
/// ```json
/// {
///   "access_token": "eyJhbG...",
///   "token_type": "Bearer",
///   "expires_in": 3600,
///   "scope": "openid profile",
///   "refresh_token": "abc123...",
///   "id_token": "eyJhbG..."
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    /// The access token (JWT).
    pub access_token: String,

    /// Token type, always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: i64,

    /// Granted scopes (space-separated).
    pub scope: String,

    /// Refresh token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// ID token (if `openid` was granted).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl TokenResponse {
    /// Creates a bearer token response.
    #[must_use]
    pub fn new(access_token: String, expires_in: i64, scope: String) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in,
            scope,
            refresh_token: None,
            id_token: None,
        }
    }

    /// Sets the refresh token.
    #[must_use]
    pub fn with_refresh_token(mut self, token: String) -> Self {
        self.refresh_token = Some(token);
        self
    }

    /// Sets the ID token.
    #[must_use]
    pub fn with_id_token(mut self, token: String) -> Self {
        self.id_token = Some(token);
        self
    }
}

/// Token error response.
///
/// ```json
/// {
///   "error": "invalid_grant",
///   "error_description": "Authorization code expired"
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenError {
    /// OAuth 2.0 error code.
    pub error: TokenErrorCode,

    /// Human-readable error description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

impl TokenError {
    /// Creates a new token error with description.
    #[must_use]
    pub fn with_description(error: TokenErrorCode, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.error.http_status()
    }
}

impl From<&AuthError> for TokenError {
    fn from(err: &AuthError) -> Self {
        Self::with_description(TokenErrorCode::from_auth_error(err), err.public_description())
    }
}

impl From<AuthError> for TokenError {
    fn from(err: AuthError) -> Self {
        Self::from(&err)
    }
}

/// OAuth 2.0 token error codes (RFC 6749 §5.2, RFC 8628 §3.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenErrorCode {
    /// Missing or malformed parameter.
    InvalidRequest,

    /// Client authentication failed.
    InvalidClient,

    /// The grant or refresh token is invalid, expired, revoked, or was
    /// issued to another client.
    InvalidGrant,

    /// The client may not use this grant type.
    UnauthorizedClient,

    /// The grant type is not supported.
    UnsupportedGrantType,

    /// The requested scope is invalid or exceeds the original grant.
    InvalidScope,

    /// The user has not yet acted on the device request.
    AuthorizationPending,

    /// Poll less often.
    SlowDown,

    /// The user denied the device request.
    AccessDenied,

    /// The device code has expired.
    ExpiredToken,

    /// Unexpected failure inside the server.
    ServerError,
}

impl TokenErrorCode {
    /// Returns the string representation of the error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::InvalidGrant => "invalid_grant",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::UnsupportedGrantType => "unsupported_grant_type",
            Self::InvalidScope => "invalid_scope",
            Self::AuthorizationPending => "authorization_pending",
            Self::SlowDown => "slow_down",
            Self::AccessDenied => "access_denied",
            Self::ExpiredToken => "expired_token",
            Self::ServerError => "server_error",
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidClient => 401,
            Self::ServerError => 500,
            _ => 400,
        }
    }

    /// Maps an engine error onto the codes this endpoint may return.
    #[must_use]
    pub fn from_auth_error(err: &AuthError) -> Self {
        match err {
            AuthError::InvalidRequest { .. } => Self::InvalidRequest,
            AuthError::InvalidClient { .. } => Self::InvalidClient,
            AuthError::UnauthorizedClient { .. } => Self::UnauthorizedClient,
            AuthError::InvalidGrant { .. } | AuthError::InvalidToken { .. } => Self::InvalidGrant,
            AuthError::InvalidScope { .. } => Self::InvalidScope,
            AuthError::UnsupportedGrantType { .. } => Self::UnsupportedGrantType,
            AuthError::AuthorizationPending => Self::AuthorizationPending,
            AuthError::SlowDown => Self::SlowDown,
            AuthError::AccessDenied { .. } => Self::AccessDenied,
            AuthError::ExpiredToken => Self::ExpiredToken,
            AuthError::UnsupportedResponseType { .. } | AuthError::LoginRequired => {
                Self::InvalidRequest
            }
            AuthError::Storage { .. }
            | AuthError::Crypto { .. }
            | AuthError::Configuration { .. }
            | AuthError::Internal { .. } => Self::ServerError,
        }
    }
}

impl fmt::Display for TokenErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
