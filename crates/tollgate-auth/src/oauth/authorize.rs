//! Authorization endpoint types.
//!
//! Request parsing, the redirect responses for success and failure, and the
//! error codes that can be returned to the client through its redirect URI.
//!
//! # Flow
//!
//! 1. Client redirects the user agent to `/connect/authorize`
//! 2. The upstream authenticator establishes who the user is
//! 3. Server redirects back with `code` (or tokens in the fragment for the
//!    implicit response types)
//! 4. Client exchanges the code at the token endpoint

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::AuthError;

/// Authorization request parameters.
///
/// # Example
///
/// ```ignore
/// GET /connect/authorize?
///   response_type=code
///   &client_id=acme
///   &redirect_uri=https://acme.test/cb
///   &scope=openid
///   &state=abc123xyz
///   &code_challenge=E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM
///   &code_challenge_method=S256
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthorizationRequest {
    /// `code`, `token`, or `id_token`. Only the first space-delimited value
    /// is considered.
    #[serde(default)]
    pub response_type: String,

    /// Client identifier.
    #[serde(default)]
    pub client_id: String,

    /// Redirect URI; must exactly match a registered URI.
    #[serde(default)]
    pub redirect_uri: String,

    /// Requested scopes (space-separated).
    #[serde(default)]
    pub scope: String,

    /// Opaque value echoed back to the client.
    #[serde(default)]
    pub state: Option<String>,

    /// PKCE code challenge.
    #[serde(default)]
    pub code_challenge: Option<String>,

    /// PKCE method; `plain` when absent.
    #[serde(default)]
    pub code_challenge_method: Option<String>,

    /// OpenID Connect nonce.
    #[serde(default)]
    pub nonce: Option<String>,

    /// OpenID Connect prompt (`none`, `login`, `consent`).
    #[serde(default)]
    pub prompt: Option<String>,
}

impl AuthorizationRequest {
    /// Returns `true` if the client asked for no user interaction.
    #[must_use]
    pub fn is_prompt_none(&self) -> bool {
        self.prompt
            .as_deref()
            .is_some_and(|p| p.split_whitespace().any(|v| v == "none"))
    }
}

/// Response types accepted at the authorization endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseType {
    /// Authorization code flow.
    Code,
    /// Implicit flow returning an access token.
    Token,
    /// Implicit flow returning an ID token.
    IdToken,
}

impl ResponseType {
    /// Parses the first space-delimited value of a `response_type`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.split_whitespace().next()? {
            "code" => Some(Self::Code),
            "token" => Some(Self::Token),
            "id_token" => Some(Self::IdToken),
            _ => None,
        }
    }

    /// Returns the parameter value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Token => "token",
            Self::IdToken => "id_token",
        }
    }

    /// Implicit responses travel in the URI fragment.
    #[must_use]
    pub fn uses_fragment(&self) -> bool {
        !matches!(self, Self::Code)
    }
}

/// Successful code response.
///
/// ```ignore
/// HTTP/1.1 302 Found
/// Location: https://acme.test/cb?code=SplxlOBeZQQYbYS6WxSbIA&state=abc123xyz
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationResponse {
    /// Single-use authorization code.
    pub code: String,

    /// Echoed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationResponse {
    /// Creates a new authorization response.
    #[must_use]
    pub fn new(code: String, state: Option<String>) -> Self {
        Self { code, state }
    }

    /// Builds the redirect URL with response parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI does not parse.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("code", &self.code);
            if let Some(state) = &self.state {
                pairs.append_pair("state", state);
            }
        }
        Ok(url.to_string())
    }
}

/// Tokens returned directly from the authorization endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImplicitResponse {
    /// Access token (`token` response type).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,

    /// Always `Bearer` when an access token is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    /// Access token lifetime in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// ID token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Granted scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Echoed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl ImplicitResponse {
    /// Builds the redirect URL with the response in the fragment.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI does not parse.
    pub fn to_redirect_url(&self, redirect_uri: &str) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        let mut fragment = url::form_urlencoded::Serializer::new(String::new());
        let expires_in = self.expires_in.map(|e| e.to_string());
        let fields = [
            ("access_token", self.access_token.as_deref()),
            ("token_type", self.token_type.as_deref()),
            ("expires_in", expires_in.as_deref()),
            ("id_token", self.id_token.as_deref()),
            ("scope", self.scope.as_deref()),
            ("state", self.state.as_deref()),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                fragment.append_pair(name, value);
            }
        }
        url.set_fragment(Some(&fragment.finish()));
        Ok(url.to_string())
    }
}

/// Authorization error response.
///
/// Delivered through the client's redirect URI once that URI is known to be
/// registered; otherwise rendered to the user agent.
///
/// ```ignore
/// HTTP/1.1 302 Found
/// Location: https://acme.test/cb?error=invalid_scope&error_description=...&state=abc123xyz
/// ```
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationError {
    /// OAuth 2.0 error code.
    pub error: AuthorizationErrorCode,

    /// Human-readable error description (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,

    /// Echoed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl AuthorizationError {
    /// Creates a new authorization error with description.
    #[must_use]
    pub fn with_description(
        error: AuthorizationErrorCode,
        description: impl Into<String>,
        state: Option<String>,
    ) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
            state,
        }
    }

    /// Converts an engine error, hiding internal details.
    #[must_use]
    pub fn from_auth_error(err: &AuthError, state: Option<String>) -> Self {
        Self::with_description(
            AuthorizationErrorCode::from_auth_error(err),
            err.public_description(),
            state,
        )
    }

    /// Builds the redirect URL with error parameters, in the query or the
    /// fragment depending on the response type.
    ///
    /// # Errors
    ///
    /// Returns an error if the redirect URI does not parse.
    pub fn to_redirect_url(
        &self,
        redirect_uri: &str,
        use_fragment: bool,
    ) -> Result<String, url::ParseError> {
        let mut url = url::Url::parse(redirect_uri)?;
        let mut params = url::form_urlencoded::Serializer::new(String::new());
        params.append_pair("error", self.error.as_str());
        if let Some(desc) = &self.error_description {
            params.append_pair("error_description", desc);
        }
        if let Some(state) = &self.state {
            params.append_pair("state", state);
        }
        let encoded = params.finish();

        if use_fragment {
            url.set_fragment(Some(&encoded));
        } else {
            let query = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{encoded}"),
                _ => encoded,
            };
            url.set_query(Some(&query));
        }
        Ok(url.to_string())
    }
}

/// Error codes defined for the authorization endpoint (RFC 6749 §4.1.2.1,
/// OIDC Core §3.1.2.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationErrorCode {
    /// Missing or malformed parameter.
    InvalidRequest,

    /// Unknown client.
    InvalidClient,

    /// The client may not use this response type.
    UnauthorizedClient,

    /// The resource owner or authorization server denied the request.
    AccessDenied,

    /// The response type is not supported.
    UnsupportedResponseType,

    /// The requested scope is invalid, unknown, or not allowed.
    InvalidScope,

    /// `prompt=none` but the user is not authenticated.
    LoginRequired,

    /// Unexpected failure inside the server.
    ServerError,
}

impl AuthorizationErrorCode {
    /// Returns the string representation of the error code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::InvalidClient => "invalid_client",
            Self::UnauthorizedClient => "unauthorized_client",
            Self::AccessDenied => "access_denied",
            Self::UnsupportedResponseType => "unsupported_response_type",
            Self::InvalidScope => "invalid_scope",
            Self::LoginRequired => "login_required",
            Self::ServerError => "server_error",
        }
    }

    /// Maps an engine error onto the codes this endpoint may return.
    #[must_use]
    pub fn from_auth_error(err: &AuthError) -> Self {
        match err {
            AuthError::InvalidClient { .. } => Self::InvalidClient,
            AuthError::UnauthorizedClient { .. } => Self::UnauthorizedClient,
            AuthError::AccessDenied { .. } => Self::AccessDenied,
            AuthError::UnsupportedResponseType { .. } => Self::UnsupportedResponseType,
            AuthError::InvalidScope { .. } => Self::InvalidScope,
            AuthError::LoginRequired => Self::LoginRequired,
            e if e.is_server_error() => Self::ServerError,
            _ => Self::InvalidRequest,
        }
    }
}

impl fmt::Display for AuthorizationErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialize_minimal() {
        let request: AuthorizationRequest = serde_json::from_str(
            r#"{"response_type":"code","client_id":"acme","redirect_uri":"https://acme.test/cb"}"#,
        )
        .unwrap();
        assert_eq!(request.scope, "");
        assert!(request.state.is_none());
        assert!(!request.is_prompt_none());
    }

    #[test]
    fn test_response_type_uses_first_value() {
        assert_eq!(ResponseType::parse("code"), Some(ResponseType::Code));
        assert_eq!(ResponseType::parse("id_token token"), Some(ResponseType::IdToken));
        assert_eq!(ResponseType::parse("code_x"), None);
        assert_eq!(ResponseType::parse(""), None);
        assert!(ResponseType::Token.uses_fragment());
    }

    #[test]
    fn test_code_redirect_url() {
        let response = AuthorizationResponse::new("abc".to_string(), Some("xyz".to_string()));
        let url = response.to_redirect_url("https://acme.test/cb").unwrap();
        assert_eq!(url, "https://acme.test/cb?code=abc&state=xyz");
    }

    #[test]
    fn test_error_redirect_keeps_existing_query() {
        let error = AuthorizationError::with_description(
            AuthorizationErrorCode::InvalidScope,
            "Scope 'admin' is not allowed",
            Some("xyz".to_string()),
        );
        let url = error
            .to_redirect_url("https://acme.test/cb?tenant=1", false)
            .unwrap();
        assert!(url.starts_with("https://acme.test/cb?tenant=1&error=invalid_scope"));
        assert!(url.ends_with("&state=xyz"));
    }

    #[test]
    fn test_implicit_response_in_fragment() {
        let response = ImplicitResponse {
            access_token: Some("at".to_string()),
            token_type: Some("Bearer".to_string()),
            expires_in: Some(3600),
            state: Some("s".to_string()),
            ..Default::default()
        };
        let url = response.to_redirect_url("https://acme.test/cb").unwrap();
        assert_eq!(
            url,
            "https://acme.test/cb#access_token=at&token_type=Bearer&expires_in=3600&state=s"
        );
    }

    #[test]
    fn test_server_errors_map_to_server_error() {
        let code = AuthorizationErrorCode::from_auth_error(&AuthError::storage("db down"));
        assert_eq!(code, AuthorizationErrorCode::ServerError);
        let err = AuthorizationError::from_auth_error(&AuthError::storage("db down"), None);
        assert!(!err.error_description.unwrap().contains("db down"));
    }
}
