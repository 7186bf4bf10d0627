//! Token revocation endpoint (RFC 7009).

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use super::token::token_error_response;
use super::{OAuthState, client_credentials};
use crate::token::revocation::RevocationRequest;

/// `POST /connect/revoke`.
///
/// Requires client authentication. Answers 200 with an empty body whether
/// or not the token was known.
pub async fn revoke_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(request): Form<RevocationRequest>,
) -> Response {
    let credentials = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    );
    let client = match state
        .tokens
        .authenticator()
        .validate_client(credentials.as_ref())
        .await
    {
        Ok(authenticated) => authenticated.client,
        Err(err) => return token_error_response(&err),
    };

    match state
        .tokens
        .revoke(&request.token, request.token_type_hint, &client)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => token_error_response(&err),
    }
}
