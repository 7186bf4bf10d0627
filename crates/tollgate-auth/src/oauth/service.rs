//! Authorization engine.
//!
//! Validates `/connect/authorize` requests, issues authorization codes, and
//! redeems them at the token endpoint.
//!
//! Validation runs in a fixed order: client, redirect URI, response type,
//! PKCE, scope. Errors found before the redirect URI has been matched
//! against the client registration must not be sent to that URI.
//!
//! # Usage
//!
//! ```ignore
//! use tollgate_auth::oauth::{AuthorizationEngine, AuthorizationRequest};
//!
//! let engine = AuthorizationEngine::new(clients, grants, Duration::minutes(10));
//!
//! let validated = engine.validate_request(&request).await?;
//! let code = engine
//!     .create_authorization_code(&validated.code_request("user-1"))
//!     .await?;
//! ```

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::oauth::authorize::{AuthorizationRequest, ResponseType};
use crate::oauth::pkce::{PkceChallenge, PkceChallengeMethod, PkceError};
use crate::oauth::scope;
use crate::storage::{ClientStorage, GrantStore};
use crate::token::opaque::{generate_token, hash_token};
use crate::types::{
    Authorization, AuthorizationProperties, AuthorizationStatus, AuthorizationType, Client,
    GrantType, Token, TokenStatus, TokenType,
};
use crate::{AuthError, AuthResult};

/// An authorization request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedRequest {
    /// The registered client.
    pub client: Client,
    /// Parsed response type.
    pub response_type: ResponseType,
    /// The matched redirect URI.
    pub redirect_uri: String,
    /// Normalized requested scope.
    pub scope: String,
    /// Echoed state.
    pub state: Option<String>,
    /// PKCE challenge, if any.
    pub code_challenge: Option<PkceChallenge>,
    /// OIDC nonce.
    pub nonce: Option<String>,
}

impl ValidatedRequest {
    /// Builds the code issuance parameters for `subject_id`.
    #[must_use]
    pub fn code_request(&self, subject_id: &str) -> CodeRequest {
        CodeRequest {
            subject_id: subject_id.to_string(),
            client_id: self.client.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            code_challenge: self.code_challenge.as_ref().map(|c| c.as_str().to_string()),
            code_challenge_method: self
                .code_challenge
                .as_ref()
                .map(|c| c.method().as_str().to_string()),
            nonce: self.nonce.clone(),
        }
    }
}

/// Why an authorization request was rejected.
#[derive(Debug)]
pub struct AuthorizationFailure {
    /// The error to report.
    pub error: AuthError,
    /// Set once the redirect URI has been matched; the error may then be
    /// delivered there. `None` means answer the user agent directly.
    pub redirect_uri: Option<String>,
}

impl AuthorizationFailure {
    fn direct(error: AuthError) -> Self {
        Self {
            error,
            redirect_uri: None,
        }
    }

    fn redirect(error: AuthError, redirect_uri: &str) -> Self {
        Self {
            error,
            redirect_uri: Some(redirect_uri.to_string()),
        }
    }
}

impl From<AuthorizationFailure> for AuthError {
    fn from(failure: AuthorizationFailure) -> Self {
        failure.error
    }
}

/// Parameters of `create_authorization_code`.
#[derive(Debug, Clone, Default)]
pub struct CodeRequest {
    /// Authenticated user.
    pub subject_id: String,
    /// Client the code is issued to.
    pub client_id: String,
    /// Redirect URI the code is bound to.
    pub redirect_uri: String,
    /// Granted scope.
    pub scope: String,
    /// PKCE challenge.
    pub code_challenge: Option<String>,
    /// PKCE method (`plain` or `S256`).
    pub code_challenge_method: Option<String>,
    /// OIDC nonce.
    pub nonce: Option<String>,
}

/// Authorization endpoint engine.
pub struct AuthorizationEngine {
    clients: Arc<dyn ClientStorage>,
    grants: Arc<dyn GrantStore>,
    code_lifetime: Duration,
}

impl AuthorizationEngine {
    /// Creates an engine issuing codes valid for `code_lifetime`.
    #[must_use]
    pub fn new(
        clients: Arc<dyn ClientStorage>,
        grants: Arc<dyn GrantStore>,
        code_lifetime: Duration,
    ) -> Self {
        Self {
            clients,
            grants,
            code_lifetime,
        }
    }

    /// Validates an authorization request.
    ///
    /// # Errors
    ///
    /// - unknown client: `invalid_client`
    /// - unregistered redirect URI: `invalid_request`
    /// - response type other than `code`, `token`, `id_token`:
    ///   `unsupported_response_type`
    /// - missing challenge for a PKCE client, or unknown method:
    ///   `invalid_request`
    /// - scope neither implicit nor assigned, or `id_token` without
    ///   `openid`: `invalid_scope`
    pub async fn validate_request(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<ValidatedRequest, AuthorizationFailure> {
        // 1. Client
        if request.client_id.is_empty() {
            return Err(AuthorizationFailure::direct(AuthError::invalid_request(
                "Missing required parameter: client_id",
            )));
        }
        let client = self
            .clients
            .find_by_client_id(&request.client_id)
            .await
            .map_err(AuthorizationFailure::direct)?
            .ok_or_else(|| {
                AuthorizationFailure::direct(AuthError::invalid_client("Unknown client"))
            })?;

        // 2. Redirect URI, byte-exact
        if !client.is_redirect_uri_allowed(&request.redirect_uri) {
            return Err(AuthorizationFailure::direct(AuthError::invalid_request(
                "Invalid redirect_uri",
            )));
        }
        let redirect_uri = request.redirect_uri.as_str();

        // 3. Response type
        let response_type = ResponseType::parse(&request.response_type).ok_or_else(|| {
            AuthorizationFailure::redirect(
                AuthError::unsupported_response_type(&request.response_type),
                redirect_uri,
            )
        })?;
        if response_type == ResponseType::Code
            && !client.is_grant_type_allowed(GrantType::AuthorizationCode)
        {
            return Err(AuthorizationFailure::redirect(
                AuthError::unauthorized_client(
                    "Client is not authorized for the authorization_code grant",
                ),
                redirect_uri,
            ));
        }

        // 4. PKCE
        let code_challenge = self
            .validate_pkce(&client, request)
            .map_err(|e| AuthorizationFailure::redirect(e.into(), redirect_uri))?;

        // 5. Scope
        if let Some(denied) = client.first_disallowed_scope(&request.scope) {
            return Err(AuthorizationFailure::redirect(
                AuthError::invalid_scope(format!("Scope '{denied}' is not allowed for this client")),
                redirect_uri,
            ));
        }
        if response_type == ResponseType::IdToken && !scope::has_scope(&request.scope, "openid") {
            return Err(AuthorizationFailure::redirect(
                AuthError::invalid_scope("response_type id_token requires the openid scope"),
                redirect_uri,
            ));
        }

        Ok(ValidatedRequest {
            client,
            response_type,
            redirect_uri: request.redirect_uri.clone(),
            scope: scope::normalize(&request.scope),
            state: request.state.clone(),
            code_challenge,
            nonce: request.nonce.clone(),
        })
    }

    fn validate_pkce(
        &self,
        client: &Client,
        request: &AuthorizationRequest,
    ) -> Result<Option<PkceChallenge>, PkceError> {
        let challenge = request.code_challenge.as_deref().filter(|c| !c.is_empty());
        let Some(challenge) = challenge else {
            if client.require_pkce {
                return Err(PkceError::MissingChallenge);
            }
            return Ok(None);
        };

        let method = PkceChallengeMethod::parse_or_default(request.code_challenge_method.as_deref())?;
        Ok(Some(PkceChallenge::new(challenge, method)))
    }

    /// Issues a single-use authorization code.
    ///
    /// Persists a `valid` code authorization and its linked code token, both
    /// expiring after the code lifetime. Only the digest of the returned code
    /// is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    pub async fn create_authorization_code(&self, request: &CodeRequest) -> AuthResult<String> {
        let authorization = Authorization::new(
            request.subject_id.as_str(),
            request.client_id.as_str(),
            AuthorizationType::Code,
            AuthorizationStatus::Valid,
            request.scope.as_str(),
            self.code_lifetime,
        )
        .with_properties(AuthorizationProperties {
            redirect_uri: Some(request.redirect_uri.clone()),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request
                .code_challenge
                .as_ref()
                .map(|_| request.code_challenge_method.clone().unwrap_or_else(|| "plain".into())),
            nonce: request.nonce.clone(),
            user_code: None,
        });
        self.grants.create_authorization(&authorization).await?;

        let code = generate_token();
        let token = Token::new(
            Some(authorization.id),
            hash_token(&code),
            TokenType::AuthorizationCode,
            TokenStatus::Valid,
            request.subject_id.as_str(),
            self.code_lifetime,
        );
        self.grants.create_token(&token).await?;

        tracing::debug!(
            client_id = %request.client_id,
            authorization_id = %authorization.id,
            "Issued authorization code"
        );
        Ok(code)
    }

    /// Redeems an authorization code exactly once.
    ///
    /// On success the code token has moved from `valid` to `redeemed` and
    /// the parent authorization is returned. Presenting an already redeemed
    /// code revokes every token issued from it (RFC 6749 §4.1.2).
    ///
    /// # Errors
    ///
    /// Returns `invalid_grant` if the code is unknown, expired, already used,
    /// bound to another client or redirect URI, or fails PKCE.
    pub async fn redeem_authorization_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> AuthResult<Authorization> {
        let now = OffsetDateTime::now_utc();
        let token = self
            .grants
            .find_token_by_reference(&hash_token(code), TokenType::AuthorizationCode)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid authorization code"))?;

        if token.status == TokenStatus::Redeemed {
            self.revoke_replayed(&token).await?;
            return Err(AuthError::invalid_grant("Authorization code already used"));
        }
        if token.status != TokenStatus::Valid {
            return Err(AuthError::invalid_grant("Invalid authorization code"));
        }
        if token.is_expired_at(now) {
            return Err(AuthError::invalid_grant("Authorization code expired"));
        }

        let authorization_id = token
            .authorization_id
            .ok_or_else(|| AuthError::invalid_grant("Invalid authorization code"))?;
        let authorization = self
            .grants
            .find_authorization(authorization_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid authorization code"))?;

        if authorization.client_id != client_id {
            return Err(AuthError::invalid_grant(
                "Authorization code was issued to another client",
            ));
        }
        if authorization.status != AuthorizationStatus::Valid {
            return Err(AuthError::invalid_grant("Authorization is no longer valid"));
        }
        if authorization.properties.redirect_uri.as_deref() != redirect_uri {
            return Err(AuthError::invalid_grant("redirect_uri mismatch"));
        }

        if let Some(challenge) = &authorization.properties.code_challenge {
            let verifier = code_verifier.ok_or(PkceError::MissingVerifier)?;
            let method = PkceChallengeMethod::parse_or_default(
                authorization.properties.code_challenge_method.as_deref(),
            )
            .map_err(|_| PkceError::VerificationFailed)?;
            PkceChallenge::new(challenge.as_str(), method).verify(verifier)?;
        }

        let won = self
            .grants
            .transition_token(token.id, TokenStatus::Valid, TokenStatus::Redeemed, None, now)
            .await?;
        if !won {
            return Err(AuthError::invalid_grant("Authorization code already used"));
        }

        tracing::debug!(
            client_id = %client_id,
            authorization_id = %authorization.id,
            "Redeemed authorization code"
        );
        Ok(authorization)
    }

    async fn revoke_replayed(&self, code: &Token) -> AuthResult<()> {
        let Some(authorization_id) = code.authorization_id else {
            return Ok(());
        };
        tracing::warn!(
            authorization_id = %authorization_id,
            "Authorization code replayed; revoking derived tokens"
        );
        self.grants
            .transition_authorization(
                authorization_id,
                AuthorizationStatus::Valid,
                AuthorizationStatus::Revoked,
                None,
            )
            .await?;
        self.grants
            .revoke_tokens_by_authorization(authorization_id)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;

    use super::*;
    use crate::oauth::pkce::PkceVerifier;
    use crate::storage::memory::{MemoryClientStorage, MemoryGrantStore};
    use crate::testing::fixture_client;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    async fn engine() -> (Arc<AuthorizationEngine>, Arc<MemoryGrantStore>) {
        let clients = Arc::new(MemoryClientStorage::new());
        clients.create(&fixture_client("acme", true)).await.unwrap();
        clients.create(&fixture_client("legacy", false)).await.unwrap();
        let grants = Arc::new(MemoryGrantStore::new());
        let engine = AuthorizationEngine::new(clients, grants.clone(), Duration::minutes(10));
        (Arc::new(engine), grants)
    }

    fn request(client_id: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: "code".to_string(),
            client_id: client_id.to_string(),
            redirect_uri: "https://acme.test/cb".to_string(),
            scope: "openid".to_string(),
            state: Some("xyz".to_string()),
            code_challenge: Some(CHALLENGE.to_string()),
            code_challenge_method: Some("S256".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_validation_order() {
        let (engine, _) = engine().await;

        let mut req = request("nobody");
        req.redirect_uri = "https://evil.test/cb".to_string();
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "invalid_client");
        assert!(failure.redirect_uri.is_none());

        let mut req = request("acme");
        req.redirect_uri = "https://acme.test/cb/".to_string();
        req.response_type = "bogus".to_string();
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "invalid_request");
        assert!(failure.redirect_uri.is_none());

        let mut req = request("acme");
        req.response_type = "bogus".to_string();
        req.code_challenge = None;
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "unsupported_response_type");
        assert_eq!(failure.redirect_uri.as_deref(), Some("https://acme.test/cb"));

        let mut req = request("acme");
        req.code_challenge = None;
        req.scope = "admin".to_string();
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "invalid_request");

        let mut req = request("acme");
        req.scope = "openid admin".to_string();
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_id_token_requires_openid() {
        let (engine, _) = engine().await;
        let mut req = request("acme");
        req.response_type = "id_token".to_string();
        req.scope = "profile".to_string();
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "invalid_scope");
        assert_eq!(failure.redirect_uri.as_deref(), Some("https://acme.test/cb"));

        req.scope = "openid profile".to_string();
        let validated = engine.validate_request(&req).await.unwrap();
        assert_eq!(validated.response_type, ResponseType::IdToken);
    }

    #[tokio::test]
    async fn test_pkce_method_defaults_to_plain() {
        let (engine, _) = engine().await;
        let mut req = request("acme");
        req.code_challenge_method = None;
        let validated = engine.validate_request(&req).await.unwrap();
        let challenge = validated.code_challenge.unwrap();
        assert_eq!(challenge.method(), PkceChallengeMethod::Plain);

        req.code_challenge_method = Some("S512".to_string());
        let failure = engine.validate_request(&req).await.unwrap_err();
        assert_eq!(failure.error.oauth_error_code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_assigned_scope_allowed() {
        let (engine, _) = engine().await;
        let mut req = request("acme");
        req.scope = "openid profile email openid".to_string();
        let validated = engine.validate_request(&req).await.unwrap();
        assert_eq!(validated.scope, "openid profile email");
    }

    #[tokio::test]
    async fn test_code_roundtrip_with_s256() {
        let (engine, grants) = engine().await;
        let validated = engine.validate_request(&request("acme")).await.unwrap();
        let code = engine
            .create_authorization_code(&validated.code_request("user-1"))
            .await
            .unwrap();
        assert!(code.len() >= 43);

        let authorization = engine
            .redeem_authorization_code(&code, "acme", Some("https://acme.test/cb"), Some(VERIFIER))
            .await
            .unwrap();
        assert_eq!(authorization.subject_id, "user-1");
        assert_eq!(authorization.scopes, "openid");

        let stored = grants
            .find_token_by_reference(&hash_token(&code), TokenType::AuthorizationCode)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TokenStatus::Redeemed);
        assert!(stored.redemption_date.is_some());

        let err = engine
            .redeem_authorization_code(&code, "acme", Some("https://acme.test/cb"), Some(VERIFIER))
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_redeem_rejections() {
        let (engine, _) = engine().await;
        let validated = engine.validate_request(&request("acme")).await.unwrap();
        let code = engine
            .create_authorization_code(&validated.code_request("user-1"))
            .await
            .unwrap();

        let cases = [
            ("wrong", "acme", Some("https://acme.test/cb"), Some(VERIFIER)),
            (code.as_str(), "legacy", Some("https://acme.test/cb"), Some(VERIFIER)),
            (code.as_str(), "acme", Some("https://acme.test/other"), Some(VERIFIER)),
            (code.as_str(), "acme", None, Some(VERIFIER)),
            (code.as_str(), "acme", Some("https://acme.test/cb"), None),
            (code.as_str(), "acme", Some("https://acme.test/cb"), Some(CHALLENGE)),
        ];
        for (code, client_id, redirect_uri, verifier) in cases {
            let err = engine
                .redeem_authorization_code(code, client_id, redirect_uri, verifier)
                .await
                .unwrap_err();
            assert_eq!(err.oauth_error_code(), "invalid_grant");
        }

        // None of the failures consumed the code.
        assert!(
            engine
                .redeem_authorization_code(&code, "acme", Some("https://acme.test/cb"), Some(VERIFIER))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_generated_pkce_pairs_redeem() {
        let (engine, _) = engine().await;
        for _ in 0..4 {
            let verifier = PkceVerifier::generate();
            let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
            let mut req = request("acme");
            req.code_challenge = Some(challenge.as_str().to_string());
            let validated = engine.validate_request(&req).await.unwrap();
            let code = engine
                .create_authorization_code(&validated.code_request("user-1"))
                .await
                .unwrap();
            assert!(
                engine
                    .redeem_authorization_code(
                        &code,
                        "acme",
                        Some("https://acme.test/cb"),
                        Some(verifier.as_str()),
                    )
                    .await
                    .is_ok()
            );
        }
    }

    #[tokio::test]
    async fn test_concurrent_redemption_succeeds_once() {
        let (engine, _) = engine().await;
        let validated = engine.validate_request(&request("acme")).await.unwrap();
        let code = engine
            .create_authorization_code(&validated.code_request("user-1"))
            .await
            .unwrap();

        let attempts = (0..16).map(|_| {
            let engine = engine.clone();
            let code = code.clone();
            tokio::spawn(async move {
                engine
                    .redeem_authorization_code(
                        &code,
                        "acme",
                        Some("https://acme.test/cb"),
                        Some(VERIFIER),
                    )
                    .await
                    .is_ok()
            })
        });

        let successes = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn test_confidential_client_without_pkce() {
        let (engine, _) = engine().await;
        let mut req = request("legacy");
        req.code_challenge = None;
        req.code_challenge_method = None;
        let validated = engine.validate_request(&req).await.unwrap();
        let code = engine
            .create_authorization_code(&validated.code_request("user-1"))
            .await
            .unwrap();
        assert!(
            engine
                .redeem_authorization_code(&code, "legacy", Some("https://acme.test/cb"), None)
                .await
                .is_ok()
        );
    }
}
