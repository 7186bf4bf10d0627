//! OpenID Connect discovery.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;
use serde_json::Value;

use super::OAuthState;
use crate::token::SigningAlgorithm;
use crate::types::{GrantType, IMPLICIT_SCOPES};

/// Handler for `GET /.well-known/openid-configuration`.
///
/// Endpoint URLs are derived from the configured issuer, not the bind
/// address.
pub async fn openid_configuration_handler(State(state): State<OAuthState>) -> impl IntoResponse {
    let doc = discovery_document(state.tokens.issuer().issuer());
    ([(header::CACHE_CONTROL, "public, max-age=300")], Json(doc))
}

/// Builds the discovery document for `issuer`.
#[must_use]
pub fn discovery_document(issuer: &str) -> Value {
    let base = issuer.trim_end_matches('/');
    let grant_types = [
        GrantType::AuthorizationCode,
        GrantType::RefreshToken,
        GrantType::ClientCredentials,
        GrantType::Password,
        GrantType::DeviceCode,
    ]
    .map(|g| g.as_str());

    serde_json::json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{base}/connect/authorize"),
        "token_endpoint": format!("{base}/connect/token"),
        "device_authorization_endpoint": format!("{base}/connect/device"),
        "userinfo_endpoint": format!("{base}/connect/userinfo"),
        "introspection_endpoint": format!("{base}/connect/introspect"),
        "revocation_endpoint": format!("{base}/connect/revoke"),
        "jwks_uri": format!("{base}/.well-known/jwks"),
        "scopes_supported": IMPLICIT_SCOPES,
        "response_types_supported": ["code", "token", "id_token"],
        "response_modes_supported": ["query", "fragment"],
        "grant_types_supported": grant_types,
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": [SigningAlgorithm::RS256.as_str()],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post", "none"],
        "code_challenge_methods_supported": ["plain", "S256"],
        "claims_supported": [
            "sub", "iss", "aud", "exp", "iat", "nonce",
            "name", "given_name", "family_name", "preferred_username",
            "email", "email_verified"
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_follow_issuer() {
        let doc = discovery_document("https://auth.example.test/");
        assert_eq!(doc["issuer"], "https://auth.example.test/");
        assert_eq!(doc["token_endpoint"], "https://auth.example.test/connect/token");
        assert_eq!(doc["jwks_uri"], "https://auth.example.test/.well-known/jwks");
        assert!(
            doc["grant_types_supported"]
                .as_array()
                .unwrap()
                .iter()
                .any(|g| g == "urn:ietf:params:oauth:grant-type:device_code")
        );
    }
}
