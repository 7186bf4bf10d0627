//! Token introspection endpoint (RFC 7662).

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use super::token::token_error_response;
use super::{OAuthState, client_credentials, no_store_json};
use crate::token::introspection::IntrospectionRequest;

/// `POST /connect/introspect`.
///
/// Only confidential clients may introspect.
pub async fn introspect_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(request): Form<IntrospectionRequest>,
) -> Response {
    let credentials = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    );
    if let Err(err) = state
        .tokens
        .authenticator()
        .validate_confidential_client(credentials.as_ref())
        .await
    {
        return token_error_response(&err);
    }

    match state
        .tokens
        .introspect(&request.token, request.token_type_hint)
        .await
    {
        Ok(response) => no_store_json(StatusCode::OK, response),
        Err(err) => token_error_response(&err),
    }
}
