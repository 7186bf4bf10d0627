//! Device Authorization Grant (RFC 8628).
//!
//! The device asks for a device code and a short user code, shows the user
//! code, and polls the token endpoint. The user enters the code on another
//! screen and approves or denies. One authorization and two tokens (device
//! code, user code) are created up front, all `pending`; approval flips them
//! to `authorized`/`valid` and the first successful poll redeems the device
//! code.

use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::oauth::scope;
use crate::storage::{ClientStorage, GrantStore};
use crate::token::opaque::{generate_token, hash_token};
use crate::types::{
    Authorization, AuthorizationProperties, AuthorizationStatus, AuthorizationType, Client,
    GrantType, Token, TokenStatus, TokenType,
};
use crate::{AuthError, AuthResult};

/// Uppercase letters and digits without I, O, 0 and 1.
const USER_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const USER_CODE_LEN: usize = 8;

/// Response of the device authorization endpoint (RFC 8628 §3.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceAuthorizationResponse {
    /// Code the device polls with.
    pub device_code: String,
    /// Code the user types, formatted `XXXX-XXXX`.
    pub user_code: String,
    /// Where the user goes.
    pub verification_uri: String,
    /// `verification_uri` with the user code pre-filled.
    pub verification_uri_complete: String,
    /// Seconds until both codes expire.
    pub expires_in: i64,
    /// Minimum seconds between polls.
    pub interval: i64,
}

/// A pending device request, as shown on the verification page.
#[derive(Debug, Clone)]
pub struct PendingDeviceRequest {
    /// The pending authorization.
    pub authorization: Authorization,
    /// The requesting client.
    pub client: Client,
}

/// Device flow settings.
#[derive(Debug, Clone)]
pub struct DeviceFlowSettings {
    /// Verification page URL.
    pub verification_uri: String,
    /// Lifetime of the codes.
    pub code_lifetime: Duration,
    /// Minimum polling interval.
    pub interval: Duration,
}

impl Default for DeviceFlowSettings {
    fn default() -> Self {
        Self {
            verification_uri: "http://localhost:8080/device".to_string(),
            code_lifetime: Duration::minutes(10),
            interval: Duration::seconds(5),
        }
    }
}

impl From<&crate::config::DeviceConfig> for DeviceFlowSettings {
    fn from(config: &crate::config::DeviceConfig) -> Self {
        Self {
            verification_uri: config.verification_uri.clone(),
            code_lifetime: crate::config::to_time_duration(config.code_lifetime),
            interval: crate::config::to_time_duration(config.interval),
        }
    }
}

/// Device flow engine.
pub struct DeviceFlowEngine {
    clients: Arc<dyn ClientStorage>,
    grants: Arc<dyn GrantStore>,
    settings: DeviceFlowSettings,
    /// device code token id -> last poll
    last_poll: DashMap<Uuid, OffsetDateTime>,
}

impl DeviceFlowEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStorage>,
        grants: Arc<dyn GrantStore>,
        settings: DeviceFlowSettings,
    ) -> Self {
        Self {
            clients,
            grants,
            settings,
            last_poll: DashMap::new(),
        }
    }

    /// Starts a device authorization for an authenticated client.
    ///
    /// # Errors
    ///
    /// - `invalid_client` if the client is unknown
    /// - `unauthorized_client` if the client may not use the device grant
    /// - `invalid_scope` if a scope is not allowed for the client
    /// - storage errors
    pub async fn initiate(
        &self,
        client_id: &str,
        requested_scope: &str,
    ) -> AuthResult<DeviceAuthorizationResponse> {
        let client = self
            .clients
            .find_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client("Client authentication failed"))?;

        if !client.is_grant_type_allowed(GrantType::DeviceCode) {
            return Err(AuthError::unauthorized_client(
                "Client is not authorized for the device_code grant",
            ));
        }
        if let Some(denied) = client.first_disallowed_scope(requested_scope) {
            return Err(AuthError::invalid_scope(format!(
                "Scope '{denied}' is not allowed for this client"
            )));
        }

        let lifetime = self.settings.code_lifetime;
        let user_code = generate_user_code();
        let device_code = generate_token();

        let authorization = Authorization::new(
            "",
            client_id,
            AuthorizationType::DeviceCode,
            AuthorizationStatus::Pending,
            scope::normalize(requested_scope),
            lifetime,
        )
        .with_properties(AuthorizationProperties {
            user_code: Some(user_code.clone()),
            ..Default::default()
        });
        self.grants.create_authorization(&authorization).await?;

        for (reference, token_type) in [
            (hash_token(&device_code), TokenType::DeviceCode),
            (user_code_reference(&user_code), TokenType::UserCode),
        ] {
            let token = Token::new(
                Some(authorization.id),
                reference,
                token_type,
                TokenStatus::Pending,
                "",
                lifetime,
            );
            self.grants.create_token(&token).await?;
        }

        tracing::info!(
            client_id = %client_id,
            authorization_id = %authorization.id,
            "Started device authorization"
        );

        Ok(DeviceAuthorizationResponse {
            device_code,
            verification_uri_complete: self.verification_uri_complete(&user_code),
            user_code,
            verification_uri: self.settings.verification_uri.clone(),
            expires_in: lifetime.whole_seconds(),
            interval: self.settings.interval.whole_seconds(),
        })
    }

    fn verification_uri_complete(&self, user_code: &str) -> String {
        match url::Url::parse(&self.settings.verification_uri) {
            Ok(mut url) => {
                url.query_pairs_mut().append_pair("user_code", user_code);
                url.to_string()
            }
            Err(_) => format!("{}?user_code={user_code}", self.settings.verification_uri),
        }
    }

    /// Finds the pending request behind a user code.
    ///
    /// # Errors
    ///
    /// Returns `invalid_grant` if the code is unknown, expired, or has
    /// already been acted on.
    pub async fn lookup_by_user_code(&self, user_code: &str) -> AuthResult<PendingDeviceRequest> {
        let (_, authorization) = self.pending_user_code(user_code).await?;
        let client = self
            .clients
            .find_by_client_id(&authorization.client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid or expired user code"))?;
        Ok(PendingDeviceRequest {
            authorization,
            client,
        })
    }

    /// Approves a pending request on behalf of `user_id`.
    ///
    /// # Errors
    ///
    /// Returns `invalid_grant` if the code is unknown, expired, or was
    /// approved or denied concurrently.
    pub async fn approve(&self, user_code: &str, user_id: &str) -> AuthResult<()> {
        let (_, authorization) = self.pending_user_code(user_code).await?;

        let won = self
            .grants
            .transition_authorization(
                authorization.id,
                AuthorizationStatus::Pending,
                AuthorizationStatus::Authorized,
                Some(user_id),
            )
            .await?;
        if !won {
            return Err(AuthError::invalid_grant("Device request was already processed"));
        }

        self.transition_codes(authorization.id, TokenStatus::Valid, Some(user_id))
            .await?;

        tracing::info!(
            client_id = %authorization.client_id,
            authorization_id = %authorization.id,
            "Device authorization approved"
        );
        Ok(())
    }

    /// Denies a pending request.
    ///
    /// # Errors
    ///
    /// Returns `invalid_grant` if the code is unknown, expired, or was
    /// approved or denied concurrently.
    pub async fn deny(&self, user_code: &str) -> AuthResult<()> {
        let (_, authorization) = self.pending_user_code(user_code).await?;

        let won = self
            .grants
            .transition_authorization(
                authorization.id,
                AuthorizationStatus::Pending,
                AuthorizationStatus::Denied,
                None,
            )
            .await?;
        if !won {
            return Err(AuthError::invalid_grant("Device request was already processed"));
        }

        self.transition_codes(authorization.id, TokenStatus::Denied, None)
            .await?;

        tracing::info!(
            client_id = %authorization.client_id,
            authorization_id = %authorization.id,
            "Device authorization denied"
        );
        Ok(())
    }

    async fn transition_codes(
        &self,
        authorization_id: Uuid,
        to: TokenStatus,
        subject_id: Option<&str>,
    ) -> AuthResult<()> {
        let now = OffsetDateTime::now_utc();
        for token in self.grants.find_tokens_by_authorization(authorization_id).await? {
            if matches!(token.token_type, TokenType::DeviceCode | TokenType::UserCode) {
                self.grants
                    .transition_token(token.id, TokenStatus::Pending, to, subject_id, now)
                    .await?;
            }
        }
        Ok(())
    }

    async fn pending_user_code(&self, user_code: &str) -> AuthResult<(Token, Authorization)> {
        let invalid = || AuthError::invalid_grant("Invalid or expired user code");

        let token = self
            .grants
            .find_token_by_reference(&user_code_reference(user_code), TokenType::UserCode)
            .await?
            .ok_or_else(invalid)?;
        if token.status != TokenStatus::Pending || token.is_expired() {
            return Err(invalid());
        }

        let authorization_id = token.authorization_id.ok_or_else(invalid)?;
        let authorization = self
            .grants
            .find_authorization(authorization_id)
            .await?
            .ok_or_else(invalid)?;
        if authorization.status != AuthorizationStatus::Pending {
            return Err(invalid());
        }
        Ok((token, authorization))
    }

    /// Handles one poll of the device grant.
    ///
    /// Returns the approved authorization exactly once; the device code is
    /// `redeemed` afterwards.
    ///
    /// # Errors
    ///
    /// - `invalid_grant`: unknown code, another client's code, or already
    ///   redeemed
    /// - `access_denied`: the user denied the request
    /// - `expired_token`: the codes expired before approval
    /// - `slow_down`: polled sooner than the advertised interval
    /// - `authorization_pending`: the user has not acted yet
    pub async fn poll(&self, device_code: &str, client_id: &str) -> AuthResult<Authorization> {
        let now = OffsetDateTime::now_utc();
        let token = self
            .grants
            .find_token_by_reference(&hash_token(device_code), TokenType::DeviceCode)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid device code"))?;

        let authorization_id = token
            .authorization_id
            .ok_or_else(|| AuthError::invalid_grant("Invalid device code"))?;
        let authorization = self
            .grants
            .find_authorization(authorization_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid device code"))?;
        if authorization.client_id != client_id {
            return Err(AuthError::invalid_grant("Device code was issued to another client"));
        }

        match token.status {
            TokenStatus::Denied => {
                self.last_poll.remove(&token.id);
                return Err(AuthError::access_denied("The user denied the request"));
            }
            // The sweep may already have revoked an expired code that was never redeemed.
            _ if token.redemption_date.is_none() && token.is_expired_at(now) => {
                self.last_poll.remove(&token.id);
                return Err(AuthError::ExpiredToken);
            }
            TokenStatus::Redeemed | TokenStatus::Revoked => {
                self.last_poll.remove(&token.id);
                return Err(AuthError::invalid_grant("Device code already used"));
            }
            TokenStatus::Pending | TokenStatus::Valid => {}
        }

        if self.polled_too_soon(token.id, now) {
            return Err(AuthError::SlowDown);
        }

        if token.status == TokenStatus::Pending {
            return Err(AuthError::AuthorizationPending);
        }

        let won = self
            .grants
            .transition_token(token.id, TokenStatus::Valid, TokenStatus::Redeemed, None, now)
            .await?;
        self.last_poll.remove(&token.id);
        if !won {
            return Err(AuthError::invalid_grant("Device code already used"));
        }

        tracing::info!(
            client_id = %client_id,
            authorization_id = %authorization.id,
            "Device code redeemed"
        );
        Ok(authorization)
    }

    /// Records this poll and reports whether it came inside the interval.
    fn polled_too_soon(&self, token_id: Uuid, now: OffsetDateTime) -> bool {
        let previous = self.last_poll.insert(token_id, now);
        previous.is_some_and(|last| now - last < self.settings.interval)
    }

    /// Drops poll bookkeeping for devices that stopped polling.
    pub fn forget_stale_polls(&self, now: OffsetDateTime) -> usize {
        let before = self.last_poll.len();
        let horizon = self.settings.code_lifetime;
        self.last_poll.retain(|_, last| now - *last < horizon);
        before - self.last_poll.len()
    }
}

/// Generates a user code formatted `XXXX-XXXX`.
#[must_use]
pub fn generate_user_code() -> String {
    let mut rng = rand::thread_rng();
    let mut code = String::with_capacity(USER_CODE_LEN + 1);
    for i in 0..USER_CODE_LEN {
        if i == USER_CODE_LEN / 2 {
            code.push('-');
        }
        let idx = rng.gen_range(0..USER_CODE_ALPHABET.len());
        code.push(char::from(USER_CODE_ALPHABET[idx]));
    }
    code
}

/// Canonical form of user input: uppercase, without separators.
#[must_use]
pub fn normalize_user_code(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

fn user_code_reference(user_code: &str) -> String {
    hash_token(&normalize_user_code(user_code))
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;

    use super::*;
    use crate::storage::memory::{MemoryClientStorage, MemoryGrantStore};
    use crate::testing::fixture_public_client;

    async fn engine_with(settings: DeviceFlowSettings) -> Arc<DeviceFlowEngine> {
        let clients = Arc::new(MemoryClientStorage::new());
        clients.create(&fixture_public_client("tv")).await.unwrap();
        clients.create(&fixture_public_client("other")).await.unwrap();
        let grants = Arc::new(MemoryGrantStore::new());
        Arc::new(DeviceFlowEngine::new(clients, grants, settings))
    }

    async fn engine() -> Arc<DeviceFlowEngine> {
        engine_with(DeviceFlowSettings {
            interval: Duration::ZERO,
            ..Default::default()
        })
        .await
    }

    #[test]
    fn test_user_code_format() {
        for _ in 0..64 {
            let code = generate_user_code();
            assert_eq!(code.len(), 9);
            assert_eq!(&code[4..5], "-");
            assert!(
                code.chars()
                    .filter(|c| *c != '-')
                    .all(|c| USER_CODE_ALPHABET.contains(&(c as u8)))
            );
        }
        assert_eq!(normalize_user_code("wdjb-mjht"), "WDJBMJHT");
        assert_eq!(normalize_user_code(" WDJB MJHT "), "WDJBMJHT");
    }

    #[tokio::test]
    async fn test_initiate_response() {
        let engine = engine_with(DeviceFlowSettings::default()).await;
        let response = engine.initiate("tv", "openid profile").await.unwrap();
        assert_eq!(response.expires_in, 600);
        assert_eq!(response.interval, 5);
        assert_eq!(response.verification_uri, "http://localhost:8080/device");
        assert_eq!(
            response.verification_uri_complete,
            format!("http://localhost:8080/device?user_code={}", response.user_code)
        );

        let pending = engine.lookup_by_user_code(&response.user_code).await.unwrap();
        assert_eq!(pending.client.client_id, "tv");
        assert_eq!(pending.authorization.status, AuthorizationStatus::Pending);
        assert_eq!(pending.authorization.subject_id, "");
        assert_eq!(pending.authorization.scopes, "openid profile");

        // Users may type the code in lowercase without the dash.
        let typed = normalize_user_code(&response.user_code).to_lowercase();
        assert!(engine.lookup_by_user_code(&typed).await.is_ok());
    }

    #[tokio::test]
    async fn test_initiate_rejects_disallowed_scope() {
        let engine = engine().await;
        let err = engine.initiate("tv", "openid admin").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_scope");
        let err = engine.initiate("ghost", "openid").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");
    }

    #[tokio::test]
    async fn test_pending_then_approved() {
        let engine = engine().await;
        let response = engine.initiate("tv", "openid").await.unwrap();

        let err = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "authorization_pending");

        engine.approve(&response.user_code, "user-1").await.unwrap();
        assert!(engine.lookup_by_user_code(&response.user_code).await.is_err());

        let authorization = engine.poll(&response.device_code, "tv").await.unwrap();
        assert_eq!(authorization.subject_id, "user-1");
        assert_eq!(authorization.status, AuthorizationStatus::Authorized);

        let err = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_denied() {
        let engine = engine().await;
        let response = engine.initiate("tv", "openid").await.unwrap();
        engine.deny(&response.user_code).await.unwrap();

        let err = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "access_denied");
        assert!(engine.approve(&response.user_code, "user-1").await.is_err());
    }

    #[tokio::test]
    async fn test_expired() {
        let engine = engine_with(DeviceFlowSettings {
            code_lifetime: Duration::ZERO,
            interval: Duration::ZERO,
            ..Default::default()
        })
        .await;
        let response = engine.initiate("tv", "openid").await.unwrap();

        let err = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "expired_token");
        assert!(engine.lookup_by_user_code(&response.user_code).await.is_err());
    }

    #[tokio::test]
    async fn test_expired_after_sweep() {
        let engine = engine_with(DeviceFlowSettings {
            code_lifetime: Duration::ZERO,
            interval: Duration::ZERO,
            ..Default::default()
        })
        .await;
        let response = engine.initiate("tv", "openid").await.unwrap();

        let swept = engine
            .grants
            .expire_stale(OffsetDateTime::now_utc() + Duration::seconds(1))
            .await
            .unwrap();
        assert!(swept > 0);

        let err = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert!(matches!(err, AuthError::ExpiredToken));
        assert_eq!(err.oauth_error_code(), "expired_token");
    }

    #[tokio::test]
    async fn test_slow_down() {
        let engine = engine_with(DeviceFlowSettings::default()).await;
        let response = engine.initiate("tv", "openid").await.unwrap();

        let first = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert_eq!(first.oauth_error_code(), "authorization_pending");
        let second = engine.poll(&response.device_code, "tv").await.unwrap_err();
        assert_eq!(second.oauth_error_code(), "slow_down");
    }

    #[tokio::test]
    async fn test_other_client_cannot_poll() {
        let engine = engine().await;
        let response = engine.initiate("tv", "openid").await.unwrap();
        engine.approve(&response.user_code, "user-1").await.unwrap();

        let err = engine.poll(&response.device_code, "other").await.unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
        assert!(engine.poll(&response.device_code, "tv").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_polls_redeem_once() {
        let engine = engine().await;
        let response = engine.initiate("tv", "openid").await.unwrap();
        engine.approve(&response.user_code, "user-1").await.unwrap();

        let polls = (0..16).map(|_| {
            let engine = engine.clone();
            let device_code = response.device_code.clone();
            tokio::spawn(async move { engine.poll(&device_code, "tv").await.is_ok() })
        });
        let successes = join_all(polls)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_forget_stale_polls() {
        let engine = engine().await;
        let response = engine.initiate("tv", "openid").await.unwrap();
        let _ = engine.poll(&response.device_code, "tv").await;

        let later = OffsetDateTime::now_utc() + Duration::hours(1);
        assert_eq!(engine.forget_stale_polls(later), 1);
    }
}
