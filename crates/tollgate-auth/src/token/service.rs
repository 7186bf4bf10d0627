//! Token endpoint service.
//!
//! Dispatches `/connect/token` requests by grant type and owns the token
//! bookkeeping behind introspection, revocation and userinfo:
//!
//! - every access token carries a `jti`; a `Token` row with that `jti` as
//!   reference and the SHA-256 of the JWT as payload tracks its status
//! - refresh tokens are opaque; their row is keyed by the SHA-256 of the
//!   value
//! - ID tokens are not tracked
//!
//! # Usage
//!
//! ```ignore
//! let endpoint = TokenEndpoint::new(authenticator, authorizations, devices,
//!     grants, users, issuer, TokenSettings::from(&config.tokens));
//!
//! let credentials = ClientCredentials::extract(basic, request.client_id.as_deref(),
//!     request.client_secret.as_deref());
//! let response = endpoint.process(&request, credentials.as_ref()).await?;
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::config::{TokenLifetimes, to_time_duration};
use crate::oauth::client_auth::{ClientAuthenticator, ClientCredentials};
use crate::oauth::device::DeviceFlowEngine;
use crate::oauth::scope;
use crate::oauth::service::AuthorizationEngine;
use crate::oauth::token::{TokenRequest, TokenResponse};
use crate::storage::{GrantStore, User, UserStorage};
use crate::token::introspection::IntrospectionResponse;
use crate::token::jwt::{AccessTokenClaims, TokenIssuer, UserClaims};
use crate::token::opaque::{generate_token, hash_token};
use crate::token::revocation::TokenTypeHint;
use crate::types::{
    Authorization, AuthorizationStatus, AuthorizationType, Client, GrantType, Token, TokenStatus,
    TokenType,
};
use crate::{AuthError, AuthResult};

const INVALID_CREDENTIALS: &str = "Invalid username or password";

// =============================================================================
// Settings
// =============================================================================

/// Lifetimes and rotation policy for issued tokens.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    /// Access token lifetime.
    pub access_token_lifetime: Duration,
    /// ID token lifetime.
    pub id_token_lifetime: Duration,
    /// Refresh token lifetime.
    pub refresh_token_lifetime: Duration,
    /// Lifetime of client_credentials authorizations.
    pub client_credentials_lifetime: Duration,
    /// Redeem a refresh token when it is used.
    pub rotate_refresh_tokens: bool,
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self::from(&TokenLifetimes::default())
    }
}

impl From<&TokenLifetimes> for TokenSettings {
    fn from(config: &TokenLifetimes) -> Self {
        Self {
            access_token_lifetime: to_time_duration(config.access_token_lifetime),
            id_token_lifetime: to_time_duration(config.id_token_lifetime),
            refresh_token_lifetime: to_time_duration(config.refresh_token_lifetime),
            client_credentials_lifetime: to_time_duration(config.client_credentials_lifetime),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        }
    }
}

/// Claims returned by the userinfo endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserInfo {
    /// Subject identifier.
    pub sub: String,

    /// Scope-gated profile and email claims.
    #[serde(flatten)]
    pub claims: UserClaims,
}

/// Everything needed to mint one token set.
struct Issuance<'a> {
    subject_id: &'a str,
    user: Option<&'a User>,
    client: &'a Client,
    scope: &'a str,
    authorization: &'a Authorization,
    nonce: Option<&'a str>,
    with_refresh_token: bool,
}

/// A presented token resolved to its bookkeeping row.
enum ResolvedToken {
    Access { row: Token, claims: AccessTokenClaims },
    Refresh { row: Token, authorization: Authorization },
}

// =============================================================================
// Token Endpoint
// =============================================================================

/// Grant dispatcher behind `/connect/token`, `/connect/introspect`,
/// `/connect/revoke` and `/connect/userinfo`.
pub struct TokenEndpoint {
    authenticator: ClientAuthenticator,
    authorizations: Arc<AuthorizationEngine>,
    devices: Arc<DeviceFlowEngine>,
    grants: Arc<dyn GrantStore>,
    users: Arc<dyn UserStorage>,
    issuer: TokenIssuer,
    settings: TokenSettings,
}

impl TokenEndpoint {
    /// Creates a token endpoint.
    #[must_use]
    pub fn new(
        authenticator: ClientAuthenticator,
        authorizations: Arc<AuthorizationEngine>,
        devices: Arc<DeviceFlowEngine>,
        grants: Arc<dyn GrantStore>,
        users: Arc<dyn UserStorage>,
        issuer: TokenIssuer,
        settings: TokenSettings,
    ) -> Self {
        Self {
            authenticator,
            authorizations,
            devices,
            grants,
            users,
            issuer,
            settings,
        }
    }

    /// Returns the client authenticator.
    #[must_use]
    pub fn authenticator(&self) -> &ClientAuthenticator {
        &self.authenticator
    }

    /// Returns the token issuer.
    #[must_use]
    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    /// Returns the token settings.
    #[must_use]
    pub fn settings(&self) -> &TokenSettings {
        &self.settings
    }

    /// Processes a token request.
    ///
    /// # Errors
    ///
    /// - `invalid_request` if `grant_type` or a grant-specific parameter is
    ///   missing
    /// - `unsupported_grant_type` for unknown grant types
    /// - `invalid_client` if client authentication fails
    /// - `unauthorized_client` if the client may not use the grant
    /// - grant-specific errors, see the individual grants
    pub async fn process(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        if request.grant_type.is_empty() {
            return Err(AuthError::invalid_request("grant_type is required"));
        }
        let grant_type = GrantType::parse(&request.grant_type)
            .ok_or_else(|| AuthError::unsupported_grant_type(&request.grant_type))?;

        let result = match grant_type {
            GrantType::AuthorizationCode => self.authorization_code(request, credentials).await,
            GrantType::RefreshToken => self.refresh_token(request, credentials).await,
            GrantType::ClientCredentials => self.client_credentials(request, credentials).await,
            GrantType::Password => self.password(request, credentials).await,
            GrantType::DeviceCode => self.device_code(request, credentials).await,
        };

        match &result {
            Ok(_) => tracing::info!(grant_type = %grant_type, "Token issued"),
            Err(err) if err.is_device_polling_error() => {}
            Err(err) => tracing::debug!(
                grant_type = %grant_type,
                error = %err.oauth_error_code(),
                "Token request rejected"
            ),
        }
        result
    }

    // -------------------------------------------------------------------------
    // Grants
    // -------------------------------------------------------------------------

    async fn authorization_code(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let client = self
            .authenticate(credentials, GrantType::AuthorizationCode)
            .await?;
        let code = required(request.code.as_deref(), "code")?;

        let authorization = self
            .authorizations
            .redeem_authorization_code(
                code,
                &client.client_id,
                request.redirect_uri.as_deref(),
                request.code_verifier.as_deref(),
            )
            .await?;
        let user = self.load_user(&authorization.subject_id).await?;

        self.issue_tokens(Issuance {
            subject_id: &user.id,
            user: Some(&user),
            client: &client,
            scope: &authorization.scopes,
            authorization: &authorization,
            nonce: authorization.properties.nonce.as_deref(),
            with_refresh_token: true,
        })
        .await
    }

    async fn refresh_token(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let presented = required(request.refresh_token.as_deref(), "refresh_token")?;
        let now = OffsetDateTime::now_utc();

        let token = self
            .grants
            .find_token_by_reference(&hash_token(presented), TokenType::RefreshToken)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Invalid refresh token"))?;

        if token.status == TokenStatus::Redeemed {
            self.revoke_family(&token).await?;
            return Err(AuthError::invalid_grant("Refresh token already used"));
        }
        if token.status != TokenStatus::Valid || token.is_expired_at(now) {
            return Err(AuthError::invalid_grant("Invalid refresh token"));
        }

        let authorization = self.parent_authorization(&token).await?;
        if !is_live(authorization.status) {
            return Err(AuthError::invalid_grant("Authorization is no longer valid"));
        }

        let client = match credentials {
            Some(_) => {
                let client = self.authenticate(credentials, GrantType::RefreshToken).await?;
                if client.client_id != authorization.client_id {
                    return Err(AuthError::invalid_grant(
                        "Refresh token was issued to another client",
                    ));
                }
                client
            }
            None => {
                let client = self.authenticator.find_client(&authorization.client_id).await?;
                if client.has_secret() {
                    return Err(AuthError::invalid_client("Client authentication failed"));
                }
                if !client.is_grant_type_allowed(GrantType::RefreshToken) {
                    return Err(unauthorized(GrantType::RefreshToken));
                }
                client
            }
        };

        let scope = match request.scope.as_deref().map(str::trim) {
            Some(requested) if !requested.is_empty() => {
                if !scope::is_subset(requested, &authorization.scopes) {
                    return Err(AuthError::invalid_scope(
                        "Requested scope exceeds the original grant",
                    ));
                }
                scope::normalize(requested)
            }
            _ => authorization.scopes.clone(),
        };

        if self.settings.rotate_refresh_tokens {
            let won = self
                .grants
                .transition_token(token.id, TokenStatus::Valid, TokenStatus::Redeemed, None, now)
                .await?;
            if !won {
                return Err(AuthError::invalid_grant("Refresh token already used"));
            }
        }

        let user = self.load_user(&authorization.subject_id).await?;
        self.issue_tokens(Issuance {
            subject_id: &user.id,
            user: Some(&user),
            client: &client,
            scope: &scope,
            authorization: &authorization,
            nonce: None,
            with_refresh_token: true,
        })
        .await
    }

    async fn client_credentials(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let client = self
            .authenticate(credentials, GrantType::ClientCredentials)
            .await?;
        if !client.has_secret() {
            return Err(AuthError::unauthorized_client(
                "client_credentials requires a confidential client",
            ));
        }

        let scope = self.allowed_scope(&client, request.scope.as_deref())?;
        let authorization = Authorization::new(
            client.client_id.as_str(),
            client.client_id.as_str(),
            AuthorizationType::ClientCredentials,
            AuthorizationStatus::Valid,
            scope.as_str(),
            self.settings.client_credentials_lifetime,
        );
        self.grants.create_authorization(&authorization).await?;

        self.issue_tokens(Issuance {
            subject_id: &client.client_id,
            user: None,
            client: &client,
            scope: &scope,
            authorization: &authorization,
            nonce: None,
            with_refresh_token: false,
        })
        .await
    }

    async fn password(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let client = self.authenticate(credentials, GrantType::Password).await?;
        let username = required(request.username.as_deref(), "username")?;
        let password = required(request.password.as_deref(), "password")?;

        let user = self.verify_password(username, password).await?;
        let scope = self.allowed_scope(&client, request.scope.as_deref())?;

        let authorization = Authorization::new(
            user.id.as_str(),
            client.client_id.as_str(),
            AuthorizationType::Password,
            AuthorizationStatus::Valid,
            scope.as_str(),
            self.settings.refresh_token_lifetime,
        );
        self.grants.create_authorization(&authorization).await?;

        self.issue_tokens(Issuance {
            subject_id: &user.id,
            user: Some(&user),
            client: &client,
            scope: &scope,
            authorization: &authorization,
            nonce: None,
            with_refresh_token: true,
        })
        .await
    }

    async fn device_code(
        &self,
        request: &TokenRequest,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<TokenResponse> {
        let client = self.authenticate(credentials, GrantType::DeviceCode).await?;
        let device_code = required(request.device_code.as_deref(), "device_code")?;

        let authorization = self.devices.poll(device_code, &client.client_id).await?;
        let user = self.load_user(&authorization.subject_id).await?;

        self.issue_tokens(Issuance {
            subject_id: &user.id,
            user: Some(&user),
            client: &client,
            scope: &authorization.scopes,
            authorization: &authorization,
            nonce: None,
            with_refresh_token: true,
        })
        .await
    }

    /// Issues tokens for the implicit `token` / `id_token` response types.
    ///
    /// No refresh token is issued.
    ///
    /// # Errors
    ///
    /// Returns an error if signing or storage fails.
    pub async fn issue_implicit(
        &self,
        user: &User,
        client: &Client,
        scope: &str,
        nonce: Option<&str>,
    ) -> AuthResult<TokenResponse> {
        let authorization = Authorization::new(
            user.id.as_str(),
            client.client_id.as_str(),
            AuthorizationType::Implicit,
            AuthorizationStatus::Valid,
            scope,
            self.settings.access_token_lifetime,
        );
        self.grants.create_authorization(&authorization).await?;

        self.issue_tokens(Issuance {
            subject_id: &user.id,
            user: Some(user),
            client,
            scope,
            authorization: &authorization,
            nonce,
            with_refresh_token: false,
        })
        .await
    }

    // -------------------------------------------------------------------------
    // Issuance
    // -------------------------------------------------------------------------

    async fn issue_tokens(&self, issuance: Issuance<'_>) -> AuthResult<TokenResponse> {
        let client_id = issuance.client.client_id.as_str();
        let access_ttl = self.settings.access_token_lifetime;

        let access = self.issuer.issue_access_token(
            issuance.subject_id,
            client_id,
            issuance.scope,
            access_ttl,
        )?;
        let access_row = Token::new(
            Some(issuance.authorization.id),
            access.claims.jti.as_str(),
            TokenType::AccessToken,
            TokenStatus::Valid,
            issuance.subject_id,
            access_ttl,
        )
        .with_payload(hash_token(&access.token));
        self.grants.create_token(&access_row).await?;

        let mut response = TokenResponse::new(
            access.token,
            access_ttl.whole_seconds(),
            issuance.scope.to_string(),
        );

        if let Some(user) = issuance.user
            && scope::has_scope(issuance.scope, "openid")
        {
            let id_token = self.issuer.issue_id_token(
                user,
                client_id,
                issuance.scope,
                issuance.nonce,
                self.settings.id_token_lifetime,
            )?;
            response = response.with_id_token(id_token.token);
        }

        if issuance.with_refresh_token
            && issuance.client.is_grant_type_allowed(GrantType::RefreshToken)
        {
            let refresh = generate_token();
            let refresh_row = Token::new(
                Some(issuance.authorization.id),
                hash_token(&refresh),
                TokenType::RefreshToken,
                TokenStatus::Valid,
                issuance.subject_id,
                self.settings.refresh_token_lifetime,
            );
            self.grants.create_token(&refresh_row).await?;
            response = response.with_refresh_token(refresh);
        }

        tracing::debug!(
            client_id = %client_id,
            authorization_id = %issuance.authorization.id,
            jti = %access.claims.jti,
            "Issued token set"
        );
        Ok(response)
    }

    // -------------------------------------------------------------------------
    // Introspection, revocation, userinfo
    // -------------------------------------------------------------------------

    /// Introspects a token (RFC 7662).
    ///
    /// # Errors
    ///
    /// Returns an error only if storage fails; unknown and invalid tokens
    /// are reported as inactive.
    pub async fn introspect(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
    ) -> AuthResult<IntrospectionResponse> {
        let now = OffsetDateTime::now_utc();
        let Some(resolved) = self.resolve(token, hint).await? else {
            return Ok(IntrospectionResponse::inactive());
        };

        let response = match resolved {
            ResolvedToken::Access { row, claims } => {
                if row.status != TokenStatus::Valid || row.is_expired_at(now) {
                    return Ok(IntrospectionResponse::inactive());
                }
                let mut response = IntrospectionResponse::active()
                    .with_scope(claims.scope)
                    .with_client_id(claims.client_id)
                    .with_token_type("Bearer")
                    .with_exp(claims.exp)
                    .with_iat(claims.iat)
                    .with_aud(claims.aud)
                    .with_iss(claims.iss)
                    .with_jti(claims.jti);
                if let Some(user) = self.users.find_by_id(&claims.sub).await? {
                    response = response.with_username(user.username);
                }
                response.with_sub(claims.sub)
            }
            ResolvedToken::Refresh { row, authorization } => {
                if row.status != TokenStatus::Valid
                    || row.is_expired_at(now)
                    || !is_live(authorization.status)
                {
                    return Ok(IntrospectionResponse::inactive());
                }
                IntrospectionResponse::active()
                    .with_scope(authorization.scopes)
                    .with_client_id(authorization.client_id)
                    .with_token_type(TokenTypeHint::RefreshToken.as_str())
                    .with_exp(row.expiration_date.unix_timestamp())
                    .with_iat(row.creation_date.unix_timestamp())
                    .with_iss(self.issuer.issuer())
                    .with_sub(row.subject_id)
            }
        };
        Ok(response)
    }

    /// Revokes a token (RFC 7009) on behalf of `client`.
    ///
    /// Unknown tokens and tokens of other clients are ignored so the caller
    /// learns nothing about them. Revoking a refresh token revokes its whole
    /// authorization.
    ///
    /// # Errors
    ///
    /// Returns an error only if storage fails.
    pub async fn revoke(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
        client: &Client,
    ) -> AuthResult<()> {
        let Some(resolved) = self.resolve(token, hint).await? else {
            tracing::debug!(client_id = %client.client_id, "Revocation of unknown token ignored");
            return Ok(());
        };

        match resolved {
            ResolvedToken::Access { row, claims } => {
                if claims.client_id != client.client_id {
                    tracing::debug!(client_id = %client.client_id, "Revocation of foreign token ignored");
                    return Ok(());
                }
                self.grants.revoke_token(row.id).await?;
                tracing::info!(client_id = %client.client_id, jti = %claims.jti, "Access token revoked");
            }
            ResolvedToken::Refresh { row, authorization } => {
                if authorization.client_id != client.client_id {
                    tracing::debug!(client_id = %client.client_id, "Revocation of foreign token ignored");
                    return Ok(());
                }
                self.revoke_family(&row).await?;
                tracing::info!(
                    client_id = %client.client_id,
                    authorization_id = %authorization.id,
                    "Refresh token revoked"
                );
            }
        }
        Ok(())
    }

    /// Returns the userinfo claims for a bearer access token.
    ///
    /// # Errors
    ///
    /// Returns `invalid_token` if the token does not validate, was revoked,
    /// or does not belong to a user.
    pub async fn userinfo(&self, bearer: &str) -> AuthResult<UserInfo> {
        let claims = self.issuer.validate(bearer)?;
        let row = self
            .grants
            .find_token_by_reference(&claims.jti, TokenType::AccessToken)
            .await?
            .ok_or_else(|| AuthError::invalid_token("Unknown access token"))?;
        if row.status != TokenStatus::Valid {
            return Err(AuthError::invalid_token("Access token was revoked"));
        }

        let user = self
            .users
            .find_by_id(&claims.sub)
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| AuthError::invalid_token("Token does not belong to a user"))?;

        Ok(UserInfo {
            claims: UserClaims::for_scope(&user, &claims.scope),
            sub: user.id,
        })
    }

    // -------------------------------------------------------------------------
    // Helpers
    // -------------------------------------------------------------------------

    async fn authenticate(
        &self,
        credentials: Option<&ClientCredentials>,
        grant_type: GrantType,
    ) -> AuthResult<Client> {
        let authenticated = self.authenticator.validate_client(credentials).await?;
        if !authenticated.client.is_grant_type_allowed(grant_type) {
            return Err(unauthorized(grant_type));
        }
        Ok(authenticated.client)
    }

    fn allowed_scope(&self, client: &Client, requested: Option<&str>) -> AuthResult<String> {
        let requested = requested.unwrap_or_default();
        if let Some(denied) = client.first_disallowed_scope(requested) {
            return Err(AuthError::invalid_scope(format!(
                "Scope '{denied}' is not allowed for this client"
            )));
        }
        Ok(scope::normalize(requested))
    }

    async fn load_user(&self, user_id: &str) -> AuthResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .filter(|user| user.active)
            .ok_or_else(|| AuthError::invalid_grant("The resource owner is unknown or inactive"))
    }

    async fn verify_password(&self, username: &str, password: &str) -> AuthResult<User> {
        let invalid = || AuthError::invalid_grant(INVALID_CREDENTIALS);
        let hasher = self.authenticator.hasher();

        let user = self
            .users
            .find_by_username(username)
            .await?
            .filter(|user| user.active)
            .ok_or_else(invalid)?;
        let hash = user.password_hash.as_deref().ok_or_else(invalid)?;
        if !hasher.verify(hash, password).unwrap_or(false) {
            tracing::debug!(user_id = %user.id, "Password verification failed");
            return Err(invalid());
        }

        if hasher.needs_rehash(hash) {
            let rehashed = hasher.hash(password)?;
            match self.users.update_password_hash(&user.id, &rehashed).await {
                Ok(()) => tracing::info!(user_id = %user.id, "Password hash upgraded"),
                Err(err) => {
                    tracing::warn!(user_id = %user.id, error = %err, "Password rehash failed");
                }
            }
        }
        Ok(user)
    }

    async fn parent_authorization(&self, token: &Token) -> AuthResult<Authorization> {
        let authorization_id = token
            .authorization_id
            .ok_or_else(|| AuthError::invalid_grant("Token has no authorization"))?;
        self.grants
            .find_authorization(authorization_id)
            .await?
            .ok_or_else(|| AuthError::invalid_grant("Token has no authorization"))
    }

    /// Revokes the authorization of `token` and every token derived from it.
    async fn revoke_family(&self, token: &Token) -> AuthResult<()> {
        let Some(authorization_id) = token.authorization_id else {
            self.grants.revoke_token(token.id).await?;
            return Ok(());
        };
        for from in [AuthorizationStatus::Valid, AuthorizationStatus::Authorized] {
            if self
                .grants
                .transition_authorization(authorization_id, from, AuthorizationStatus::Revoked, None)
                .await?
            {
                break;
            }
        }
        let revoked = self
            .grants
            .revoke_tokens_by_authorization(authorization_id)
            .await?;
        tracing::warn!(
            authorization_id = %authorization_id,
            revoked,
            "Revoked authorization and derived tokens"
        );
        Ok(())
    }

    async fn resolve(
        &self,
        token: &str,
        hint: Option<TokenTypeHint>,
    ) -> AuthResult<Option<ResolvedToken>> {
        let order = match hint {
            Some(TokenTypeHint::RefreshToken) => {
                [TokenTypeHint::RefreshToken, TokenTypeHint::AccessToken]
            }
            _ => [TokenTypeHint::AccessToken, TokenTypeHint::RefreshToken],
        };
        for kind in order {
            let resolved = match kind {
                TokenTypeHint::AccessToken => self.resolve_access(token).await?,
                TokenTypeHint::RefreshToken => self.resolve_refresh(token).await?,
            };
            if resolved.is_some() {
                return Ok(resolved);
            }
        }
        Ok(None)
    }

    async fn resolve_access(&self, token: &str) -> AuthResult<Option<ResolvedToken>> {
        if token.split('.').count() != 3 {
            return Ok(None);
        }
        let claims = match self.issuer.validate(token) {
            Ok(claims) => claims,
            Err(err) if err.is_validation_error() => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let row = self
            .grants
            .find_token_by_reference(&claims.jti, TokenType::AccessToken)
            .await?
            .filter(|row| row.payload.as_deref() == Some(hash_token(token).as_str()));
        Ok(row.map(|row| ResolvedToken::Access { row, claims }))
    }

    async fn resolve_refresh(&self, token: &str) -> AuthResult<Option<ResolvedToken>> {
        let Some(row) = self
            .grants
            .find_token_by_reference(&hash_token(token), TokenType::RefreshToken)
            .await?
        else {
            return Ok(None);
        };
        let Some(authorization_id) = row.authorization_id else {
            return Ok(None);
        };
        let authorization = self.grants.find_authorization(authorization_id).await?;
        Ok(authorization.map(|authorization| ResolvedToken::Refresh { row, authorization }))
    }
}

fn required<'a>(value: Option<&'a str>, name: &str) -> AuthResult<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::invalid_request(format!("{name} is required")))
}

fn unauthorized(grant_type: GrantType) -> AuthError {
    AuthError::unauthorized_client(format!(
        "Client is not authorized for the {grant_type} grant"
    ))
}

fn is_live(status: AuthorizationStatus) -> bool {
    matches!(
        status,
        AuthorizationStatus::Valid | AuthorizationStatus::Authorized
    )
}

// =============================================================================
// Tests
// =============================================================================
