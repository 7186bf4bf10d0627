//! Authorization endpoint handlers.
//!
//! Errors detected before the client and redirect URI are trusted are
//! answered directly with a 400 JSON body. Everything after that is
//! delivered to the client through a redirect.

use axum::Form;
use axum::Json;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};

use super::{OAuthState, authenticated_subject, log_server_error};
use crate::AuthError;
use crate::oauth::authorize::{
    AuthorizationError, AuthorizationRequest, AuthorizationResponse, ImplicitResponse,
    ResponseType,
};
use crate::oauth::service::ValidatedRequest;

/// `GET /connect/authorize`.
pub async fn authorize_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Query(request): Query<AuthorizationRequest>,
) -> Response {
    authorize(&state, &headers, &request).await
}

/// `POST /connect/authorize` with a form-encoded body.
pub async fn authorize_form_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(request): Form<AuthorizationRequest>,
) -> Response {
    authorize(&state, &headers, &request).await
}

async fn authorize(
    state: &OAuthState,
    headers: &HeaderMap,
    request: &AuthorizationRequest,
) -> Response {
    let use_fragment =
        ResponseType::parse(&request.response_type).is_some_and(|t| t.uses_fragment());

    let validated = match state.authorizations.validate_request(request).await {
        Ok(validated) => validated,
        Err(failure) => {
            let error = AuthorizationError::from_auth_error(&failure.error, request.state.clone());
            return match failure.redirect_uri {
                Some(uri) => redirect_error(&error, &uri, use_fragment),
                None => {
                    log_server_error(&failure.error);
                    (StatusCode::BAD_REQUEST, Json(error)).into_response()
                }
            };
        }
    };

    let Some(subject) = authenticated_subject(headers) else {
        let err = if request.is_prompt_none() {
            AuthError::LoginRequired
        } else {
            AuthError::access_denied("The end user is not authenticated")
        };
        let error = AuthorizationError::from_auth_error(&err, validated.state.clone());
        return redirect_error(&error, &validated.redirect_uri, use_fragment);
    };

    let result = match validated.response_type {
        ResponseType::Code => issue_code(state, &validated, &subject).await,
        ResponseType::Token | ResponseType::IdToken => {
            issue_implicit(state, &validated, &subject).await
        }
    };

    match result {
        Ok(location) => Redirect::to(&location).into_response(),
        Err(err) => {
            log_server_error(&err);
            let error = AuthorizationError::from_auth_error(&err, validated.state.clone());
            redirect_error(&error, &validated.redirect_uri, validated.response_type.uses_fragment())
        }
    }
}

async fn issue_code(
    state: &OAuthState,
    validated: &ValidatedRequest,
    subject: &str,
) -> Result<String, AuthError> {
    let code = state
        .authorizations
        .create_authorization_code(&validated.code_request(subject))
        .await?;
    tracing::info!(
        client_id = %validated.client.client_id,
        subject = %subject,
        "Issued authorization code"
    );
    AuthorizationResponse::new(code, validated.state.clone())
        .to_redirect_url(&validated.redirect_uri)
        .map_err(|e| AuthError::internal(format!("Unusable redirect URI: {e}")))
}

async fn issue_implicit(
    state: &OAuthState,
    validated: &ValidatedRequest,
    subject: &str,
) -> Result<String, AuthError> {
    let user = state
        .users
        .find_by_id(subject)
        .await?
        .filter(|user| user.active)
        .ok_or_else(|| AuthError::access_denied("The end user is unknown or inactive"))?;

    let tokens = state
        .tokens
        .issue_implicit(
            &user,
            &validated.client,
            &validated.scope,
            validated.nonce.as_deref(),
        )
        .await?;

    let response = match validated.response_type {
        ResponseType::IdToken => ImplicitResponse {
            id_token: tokens.id_token,
            state: validated.state.clone(),
            ..Default::default()
        },
        _ => ImplicitResponse {
            access_token: Some(tokens.access_token),
            token_type: Some(tokens.token_type),
            expires_in: Some(tokens.expires_in),
            id_token: tokens.id_token,
            scope: Some(tokens.scope),
            state: validated.state.clone(),
        },
    };
    response
        .to_redirect_url(&validated.redirect_uri)
        .map_err(|e| AuthError::internal(format!("Unusable redirect URI: {e}")))
}

fn redirect_error(error: &AuthorizationError, redirect_uri: &str, use_fragment: bool) -> Response {
    match error.to_redirect_url(redirect_uri, use_fragment) {
        Ok(location) => Redirect::to(&location).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, Json(error)).into_response(),
    }
}
