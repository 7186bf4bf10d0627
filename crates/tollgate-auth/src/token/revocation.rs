//! Token revocation (RFC 7009).
//!
//! The endpoint answers 200 for unknown tokens and for tokens owned by
//! another client, so its responses never reveal whether a token exists.
//! Revoking a refresh token also revokes every other token of the same
//! authorization.

use serde::{Deserialize, Serialize};

/// Token revocation request.
#[derive(Debug, Clone, Deserialize)]
pub struct RevocationRequest {
    /// The token to revoke.
    pub token: String,

    /// Which kind of token the client believes it is holding.
    #[serde(default)]
    pub token_type_hint: Option<TokenTypeHint>,

    /// Client ID (client_secret_post or public clients).
    #[serde(default)]
    pub client_id: Option<String>,

    /// Client secret (client_secret_post).
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// Token type hint for revocation and introspection requests.
///
/// Only a hint: lookup falls back to the other kind when the hinted one
/// does not match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenTypeHint {
    /// The token is an access token.
    AccessToken,
    /// The token is a refresh token.
    RefreshToken,
}

impl TokenTypeHint {
    /// Returns the token type hint as a string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::RefreshToken => "refresh_token",
        }
    }
}

impl std::fmt::Display for TokenTypeHint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_deserialization() {
        let request: RevocationRequest = serde_json::from_value(serde_json::json!({
            "token": "abc",
            "token_type_hint": "refresh_token",
            "client_id": "acme"
        }))
        .unwrap();
        assert_eq!(request.token, "abc");
        assert_eq!(request.token_type_hint, Some(TokenTypeHint::RefreshToken));
        assert_eq!(request.client_id.as_deref(), Some("acme"));
        assert!(request.client_secret.is_none());
    }

    #[test]
    fn test_hint_is_optional() {
        let request: RevocationRequest = serde_json::from_str(r#"{"token":"abc"}"#).unwrap();
        assert!(request.token_type_hint.is_none());
    }

    #[test]
    fn test_hint_display() {
        assert_eq!(TokenTypeHint::AccessToken.to_string(), "access_token");
        assert_eq!(TokenTypeHint::RefreshToken.as_str(), "refresh_token");
    }
}
