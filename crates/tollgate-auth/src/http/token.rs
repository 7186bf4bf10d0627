//! Token endpoint handler.
//!
//! ```text
//! POST /connect/token
//! Content-Type: application/x-www-form-urlencoded
//! Authorization: Basic <base64(client_id:client_secret)>
//!
//! grant_type=authorization_code
//! &code=SplxlOBeZQQYbYS6WxSbIA
//! &redirect_uri=https://acme.test/cb
//! &code_verifier=dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk
//! ```

use axum::Form;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;

use super::{OAuthState, client_credentials, log_server_error, no_store_json};
use crate::AuthError;
use crate::oauth::token::{TokenError, TokenRequest};

/// `POST /connect/token`.
///
/// Successful responses carry `Cache-Control: no-store`. Errors follow
/// RFC 6749 §5.2: 401 with `WWW-Authenticate` for `invalid_client`, 500 for
/// `server_error`, 400 otherwise.
pub async fn token_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(request): Form<TokenRequest>,
) -> Response {
    tracing::debug!(
        grant_type = %request.grant_type,
        client_id = ?request.client_id,
        "Processing token request"
    );

    let credentials = client_credentials(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    );
    match state.tokens.process(&request, credentials.as_ref()).await {
        Ok(response) => no_store_json(StatusCode::OK, response),
        Err(err) => token_error_response(&err),
    }
}

/// Renders an error in the token endpoint format.
pub(crate) fn token_error_response(err: &AuthError) -> Response {
    log_server_error(err);
    let error = TokenError::from(err);
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_REQUEST);
    let mut response = no_store_json(status, error);
    if status == StatusCode::UNAUTHORIZED {
        response.headers_mut().insert(
            header::WWW_AUTHENTICATE,
            HeaderValue::from_static("Basic realm=\"tollgate\""),
        );
    }
    response
}
