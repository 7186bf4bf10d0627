//! JSON Web Key Set endpoint.

use axum::Json;
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};

use super::{OAuthState, error_response};
use crate::AuthError;

/// `GET /.well-known/jwks`.
///
/// Publishes the public half of every key that may still verify a token.
pub async fn jwks_handler(State(state): State<OAuthState>) -> Response {
    match state.tokens.issuer().keys().jwks() {
        Ok(jwks) => (
            [(header::CACHE_CONTROL, "public, max-age=300")],
            Json(jwks),
        )
            .into_response(),
        Err(err) => error_response(&AuthError::from(err)),
    }
}
