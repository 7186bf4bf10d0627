//! Grant storage trait.
//!
//! Persists authorizations and the tokens derived from them. Every status
//! change is a compare-and-set: the caller names the status it expects, and
//! exactly one of any number of concurrent callers wins. Single-use codes,
//! refresh rotation, and device approval all rely on this.

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::types::{Authorization, AuthorizationStatus, Token, TokenStatus, TokenType};

/// Storage operations for authorizations and tokens.
#[async_trait]
pub trait GrantStore: Send + Sync {
    // -------------------------------------------------------------------------
    // Authorizations
    // -------------------------------------------------------------------------

    /// Persist a new authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()>;

    /// Find an authorization by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_authorization(&self, id: Uuid) -> AuthResult<Option<Authorization>>;

    /// Atomically move an authorization from `from` to `to`.
    ///
    /// When `subject_id` is given it is written in the same step, which is
    /// how a device authorization learns its user on approval.
    ///
    /// Returns `false` if the authorization does not exist or is not in
    /// `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn transition_authorization(
        &self,
        id: Uuid,
        from: AuthorizationStatus,
        to: AuthorizationStatus,
        subject_id: Option<&str>,
    ) -> AuthResult<bool>;

    // -------------------------------------------------------------------------
    // Tokens
    // -------------------------------------------------------------------------

    /// Persist a new token.
    ///
    /// # Errors
    ///
    /// Returns an error if a token with the same type and reference ID
    /// already exists, or the storage operation fails.
    async fn create_token(&self, token: &Token) -> AuthResult<()>;

    /// Find a token by its lookup key.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_token_by_reference(
        &self,
        reference_id: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<Token>>;

    /// List every token derived from an authorization.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_tokens_by_authorization(&self, authorization_id: Uuid)
    -> AuthResult<Vec<Token>>;

    /// Atomically move a token from `from` to `to`.
    ///
    /// Moving to [`TokenStatus::Redeemed`] stamps `redemption_date` with
    /// `now`. When `subject_id` is given it is written in the same step.
    ///
    /// Returns `false` if the token does not exist or is not in `from`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn transition_token(
        &self,
        id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
        subject_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<bool>;

    /// Revoke a token regardless of its current status.
    ///
    /// Returns `false` if the token does not exist or was already revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_token(&self, id: Uuid) -> AuthResult<bool>;

    /// Revoke every token of an authorization that is not already revoked.
    ///
    /// Returns the number of tokens changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn revoke_tokens_by_authorization(&self, authorization_id: Uuid) -> AuthResult<u64>;

    // -------------------------------------------------------------------------
    // Housekeeping
    // -------------------------------------------------------------------------

    /// Flip `pending` and `valid` tokens and authorizations whose expiration
    /// date has passed to `revoked`. Rows are kept for audit.
    ///
    /// An authorization is left alone while any of its tokens is still live,
    /// so a short-lived code grant keeps serving its 30-day refresh token.
    ///
    /// Returns the number of records changed.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn expire_stale(&self, now: OffsetDateTime) -> AuthResult<u64>;
}
