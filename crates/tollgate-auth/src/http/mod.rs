//! Axum handlers for the OAuth 2.0 / OpenID Connect endpoints.
//!
//! | Route | Handler |
//! |---|---|
//! | `GET/POST /connect/authorize` | [`authorize::authorize_handler`] |
//! | `POST /connect/token` | [`token::token_handler`] |
//! | `POST /connect/device` | [`device::device_authorization_handler`] |
//! | `GET/POST /connect/device/verify` | [`device`] verification handlers |
//! | `POST /connect/introspect` | [`introspect::introspect_handler`] |
//! | `POST /connect/revoke` | [`revoke::revoke_handler`] |
//! | `GET/POST /connect/userinfo` | [`userinfo::userinfo_handler`] |
//! | `GET /.well-known/jwks` | [`jwks::jwks_handler`] |
//! | `GET /.well-known/openid-configuration` | [`discovery::openid_configuration_handler`] |
//!
//! The server has no login UI. End-user identity arrives from an upstream
//! authenticator in the [`AUTHENTICATED_SUBJECT_HEADER`] header.

pub mod authorize;
pub mod device;
pub mod discovery;
pub mod introspect;
pub mod jwks;
pub mod revoke;
pub mod token;
pub mod userinfo;

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde::Serialize;

use crate::AuthError;
use crate::oauth::client_auth::{ClientCredentials, parse_basic_auth};
use crate::oauth::device::DeviceFlowEngine;
use crate::oauth::service::AuthorizationEngine;
use crate::storage::UserStorage;
use crate::token::service::TokenEndpoint;

/// Header carrying the authenticated end-user ID, set by a trusted proxy.
pub const AUTHENTICATED_SUBJECT_HEADER: &str = "x-authenticated-subject";

/// Shared state of every OAuth handler.
#[derive(Clone)]
pub struct OAuthState {
    /// Authorization request validation and code issuance.
    pub authorizations: Arc<AuthorizationEngine>,
    /// Device authorization grant.
    pub devices: Arc<DeviceFlowEngine>,
    /// Token endpoint, introspection, revocation and userinfo.
    pub tokens: Arc<TokenEndpoint>,
    /// End users, for implicit issuance.
    pub users: Arc<dyn UserStorage>,
}

impl OAuthState {
    /// Creates the handler state.
    pub fn new(
        authorizations: Arc<AuthorizationEngine>,
        devices: Arc<DeviceFlowEngine>,
        tokens: Arc<TokenEndpoint>,
        users: Arc<dyn UserStorage>,
    ) -> Self {
        Self {
            authorizations,
            devices,
            tokens,
            users,
        }
    }
}

/// Builds the router for all OAuth and discovery endpoints.
pub fn oauth_router(state: OAuthState) -> Router {
    Router::new()
        .route(
            "/connect/authorize",
            get(authorize::authorize_handler).post(authorize::authorize_form_handler),
        )
        .route("/connect/token", post(token::token_handler))
        .route("/connect/device", post(device::device_authorization_handler))
        .route(
            "/connect/device/verify",
            get(device::device_lookup_handler).post(device::device_decision_handler),
        )
        .route("/connect/introspect", post(introspect::introspect_handler))
        .route("/connect/revoke", post(revoke::revoke_handler))
        .route(
            "/connect/userinfo",
            get(userinfo::userinfo_handler).post(userinfo::userinfo_handler),
        )
        .route("/.well-known/jwks", get(jwks::jwks_handler))
        .route(
            "/.well-known/openid-configuration",
            get(discovery::openid_configuration_handler),
        )
        .with_state(state)
}

// =============================================================================
// Shared helpers
// =============================================================================

/// Reads the authenticated subject set by the upstream authenticator.
pub(crate) fn authenticated_subject(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHENTICATED_SUBJECT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Collects client credentials from the Basic header or the form body.
pub(crate) fn client_credentials(
    headers: &HeaderMap,
    client_id: Option<&str>,
    client_secret: Option<&str>,
) -> Option<ClientCredentials> {
    let basic = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic_auth);
    ClientCredentials::extract(basic, client_id, client_secret)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    error_description: String,
}

/// Renders an engine error as `{error, error_description}` JSON.
///
/// Internal errors are logged here and answered with a generic message.
pub(crate) fn error_response(err: &AuthError) -> Response {
    let status = match err {
        AuthError::InvalidClient { .. } | AuthError::InvalidToken { .. } | AuthError::LoginRequired => {
            StatusCode::UNAUTHORIZED
        }
        e if e.is_server_error() => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    };
    log_server_error(err);
    let body = ErrorBody {
        error: err.oauth_error_code(),
        error_description: err.public_description(),
    };
    (status, [(header::CACHE_CONTROL, "no-store")], Json(body)).into_response()
}

pub(crate) fn log_server_error(err: &AuthError) {
    if err.is_server_error() {
        tracing::error!(error = %err, category = %err.category(), "Request failed");
    }
}

/// JSON with the no-store headers required on token responses.
pub(crate) fn no_store_json<T: Serialize>(status: StatusCode, body: T) -> Response {
    (
        status,
        [
            (header::CACHE_CONTROL, "no-store"),
            (header::PRAGMA, "no-cache"),
        ],
        Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_authenticated_subject() {
        let mut headers = HeaderMap::new();
        assert!(authenticated_subject(&headers).is_none());

        headers.insert(AUTHENTICATED_SUBJECT_HEADER, HeaderValue::from_static("  "));
        assert!(authenticated_subject(&headers).is_none());

        headers.insert(AUTHENTICATED_SUBJECT_HEADER, HeaderValue::from_static("user-1"));
        assert_eq!(authenticated_subject(&headers).as_deref(), Some("user-1"));
    }

    #[test]
    fn test_basic_header_wins() {
        let mut headers = HeaderMap::new();
        // acme:s3cret
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Basic YWNtZTpzM2NyZXQ="),
        );
        let credentials = client_credentials(&headers, Some("other"), None).unwrap();
        assert_eq!(credentials.client_id, "acme");
        assert_eq!(credentials.client_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn test_error_response_status() {
        let response = error_response(&AuthError::invalid_client("x"));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let response = error_response(&AuthError::storage("db"));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = error_response(&AuthError::invalid_grant("x"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
