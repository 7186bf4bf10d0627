//! OpenID Connect UserInfo endpoint.
//!
//! Returns the claims granted by the bearer access token's scopes:
//! `profile` adds the name claims and `email` the email claims.

use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use super::{OAuthState, error_response, no_store_json};
use crate::AuthError;

/// `GET/POST /connect/userinfo`.
///
/// # Errors
///
/// Answers 401 with a `WWW-Authenticate: Bearer` challenge when the token
/// is missing, invalid, revoked, or not a user token.
pub async fn userinfo_handler(State(state): State<OAuthState>, headers: HeaderMap) -> Response {
    let Some(bearer) = bearer_token(&headers) else {
        return challenge(StatusCode::UNAUTHORIZED.into_response(), false);
    };

    match state.tokens.userinfo(bearer).await {
        Ok(info) => no_store_json(StatusCode::OK, info),
        Err(err @ AuthError::InvalidToken { .. }) => {
            tracing::debug!(error = %err, "Rejected userinfo request");
            challenge(error_response(&err), true)
        }
        Err(err) => error_response(&err),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn challenge(mut response: Response, invalid_token: bool) -> Response {
    let value = if invalid_token {
        HeaderValue::from_static("Bearer error=\"invalid_token\"")
    } else {
        HeaderValue::from_static("Bearer")
    };
    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer_token(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer eyJ.a.b"));
        assert_eq!(bearer_token(&headers), Some("eyJ.a.b"));
    }
}
