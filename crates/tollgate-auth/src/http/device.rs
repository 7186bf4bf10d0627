//! Device authorization grant handlers (RFC 8628).
//!
//! The verification pair is the programmatic half of a verification page:
//! a UI looks up the request behind a user code, shows it to the signed-in
//! user, and posts the decision back.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Serialize};

use super::token::token_error_response;
use super::{OAuthState, authenticated_subject, client_credentials, error_response, no_store_json};
use crate::AuthError;

/// Device authorization request body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceAuthorizationForm {
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// `POST /connect/device`.
pub async fn device_authorization_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(form): Form<DeviceAuthorizationForm>,
) -> Response {
    let credentials = client_credentials(
        &headers,
        form.client_id.as_deref(),
        form.client_secret.as_deref(),
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
        .devices
        .initiate(&client.client_id, form.scope.as_deref().unwrap_or_default())
        .await
    {
        Ok(response) => no_store_json(StatusCode::OK, response),
        Err(err) => token_error_response(&err),
    }
}

/// Query of the verification lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct UserCodeQuery {
    pub user_code: String,
}

/// What the user is asked to approve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceRequestSummary {
    pub client_id: String,
    pub display_name: String,
    pub scope: String,
}

/// `GET /connect/device/verify?user_code=...`.
pub async fn device_lookup_handler(
    State(state): State<OAuthState>,
    Query(query): Query<UserCodeQuery>,
) -> Response {
    match state.devices.lookup_by_user_code(&query.user_code).await {
        Ok(pending) => Json(DeviceRequestSummary {
            client_id: pending.client.client_id,
            display_name: pending.client.display_name,
            scope: pending.authorization.scopes,
        })
        .into_response(),
        Err(err) => error_response(&err),
    }
}

/// The user's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceDecision {
    Approve,
    Deny,
}

/// Verification decision body.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceDecisionForm {
    pub user_code: String,
    pub action: DeviceDecision,
}

/// `POST /connect/device/verify`.
///
/// Requires the authenticated subject header; approval binds the request
/// to that user.
pub async fn device_decision_handler(
    State(state): State<OAuthState>,
    headers: HeaderMap,
    Form(form): Form<DeviceDecisionForm>,
) -> Response {
    let Some(subject) = authenticated_subject(&headers) else {
        return error_response(&AuthError::LoginRequired);
    };

    let result = match form.action {
        DeviceDecision::Approve => state.devices.approve(&form.user_code, &subject).await,
        DeviceDecision::Deny => state.devices.deny(&form.user_code).await,
    };
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_form() {
        let form: DeviceDecisionForm =
            serde_json::from_str(r#"{"user_code":"WDJB-MJHT","action":"approve"}"#).unwrap();
        assert_eq!(form.action, DeviceDecision::Approve);

        assert!(
            serde_json::from_str::<DeviceDecisionForm>(r#"{"user_code":"x","action":"maybe"}"#)
                .is_err()
        );
    }
}
