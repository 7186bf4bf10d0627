//! In-memory storage backends.
//!
//! Backed by `DashMap`. Status transitions hold the shard lock of the row
//! between the status check and the write, which gives the same
//! exactly-once guarantee as a conditional `UPDATE` in a database.
//!
//! Used by tests and by the server's `memory` backend. State does not
//! survive a restart.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::storage::{ClientStorage, GrantStore, User, UserStorage};
use crate::types::{
    Authorization, AuthorizationStatus, Client, Token, TokenStatus, TokenType,
};
use crate::{AuthError, AuthResult};

// =============================================================================
// Grants
// =============================================================================

/// In-memory [`GrantStore`].
#[derive(Debug, Default)]
pub struct MemoryGrantStore {
    authorizations: DashMap<Uuid, Authorization>,
    tokens: DashMap<Uuid, Token>,
    /// (type, reference_id) -> token id
    by_reference: DashMap<(TokenType, String), Uuid>,
}

impl MemoryGrantStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens.
    #[must_use]
    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }
}

#[async_trait]
impl GrantStore for MemoryGrantStore {
    async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        match self.authorizations.entry(authorization.id) {
            Entry::Occupied(_) => Err(AuthError::storage(format!(
                "authorization {} already exists",
                authorization.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(authorization.clone());
                Ok(())
            }
        }
    }

    async fn find_authorization(&self, id: Uuid) -> AuthResult<Option<Authorization>> {
        Ok(self.authorizations.get(&id).map(|a| a.value().clone()))
    }

    async fn transition_authorization(
        &self,
        id: Uuid,
        from: AuthorizationStatus,
        to: AuthorizationStatus,
        subject_id: Option<&str>,
    ) -> AuthResult<bool> {
        let Some(mut authorization) = self.authorizations.get_mut(&id) else {
            return Ok(false);
        };
        if authorization.status != from {
            return Ok(false);
        }
        authorization.status = to;
        if let Some(subject_id) = subject_id {
            authorization.subject_id = subject_id.to_string();
        }
        Ok(true)
    }

    async fn create_token(&self, token: &Token) -> AuthResult<()> {
        let key = (token.token_type, token.reference_id.clone());
        match self.by_reference.entry(key) {
            Entry::Occupied(_) => Err(AuthError::storage(format!(
                "duplicate {} reference",
                token.token_type.as_str()
            ))),
            Entry::Vacant(slot) => {
                self.tokens.insert(token.id, token.clone());
                slot.insert(token.id);
                Ok(())
            }
        }
    }

    async fn find_token_by_reference(
        &self,
        reference_id: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<Token>> {
        let id = self
            .by_reference
            .get(&(token_type, reference_id.to_string()))
            .map(|id| *id.value());
        Ok(id.and_then(|id| self.tokens.get(&id).map(|t| t.value().clone())))
    }

    async fn find_tokens_by_authorization(
        &self,
        authorization_id: Uuid,
    ) -> AuthResult<Vec<Token>> {
        let mut tokens: Vec<Token> = self
            .tokens
            .iter()
            .filter(|t| t.authorization_id == Some(authorization_id))
            .map(|t| t.value().clone())
            .collect();
        tokens.sort_by_key(|t| t.creation_date);
        Ok(tokens)
    }

    async fn transition_token(
        &self,
        id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
        subject_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        let Some(mut token) = self.tokens.get_mut(&id) else {
            return Ok(false);
        };
        if token.status != from {
            return Ok(false);
        }
        token.status = to;
        if to == TokenStatus::Redeemed {
            token.redemption_date = Some(now);
        }
        if let Some(subject_id) = subject_id {
            token.subject_id = subject_id.to_string();
        }
        Ok(true)
    }

    async fn revoke_token(&self, id: Uuid) -> AuthResult<bool> {
        let Some(mut token) = self.tokens.get_mut(&id) else {
            return Ok(false);
        };
        if token.status == TokenStatus::Revoked {
            return Ok(false);
        }
        token.status = TokenStatus::Revoked;
        Ok(true)
    }

    async fn revoke_tokens_by_authorization(&self, authorization_id: Uuid) -> AuthResult<u64> {
        let mut changed = 0;
        for mut token in self.tokens.iter_mut() {
            if token.authorization_id == Some(authorization_id)
                && token.status != TokenStatus::Revoked
            {
                token.status = TokenStatus::Revoked;
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn expire_stale(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let mut changed = 0;
        let mut live = HashSet::new();

        for mut token in self.tokens.iter_mut() {
            let open = matches!(token.status, TokenStatus::Pending | TokenStatus::Valid);
            if !open {
                continue;
            }
            if token.is_expired_at(now) {
                token.status = TokenStatus::Revoked;
                changed += 1;
            } else if let Some(authorization_id) = token.authorization_id {
                live.insert(authorization_id);
            }
        }

        for mut authorization in self.authorizations.iter_mut() {
            let open = matches!(
                authorization.status,
                AuthorizationStatus::Pending | AuthorizationStatus::Valid
            );
            if open && authorization.is_expired_at(now) && !live.contains(&authorization.id) {
                authorization.status = AuthorizationStatus::Revoked;
                changed += 1;
            }
        }

        Ok(changed)
    }
}

// =============================================================================
// Clients
// =============================================================================

/// In-memory [`ClientStorage`].
#[derive(Debug, Default)]
pub struct MemoryClientStorage {
    clients: DashMap<String, Client>,
}

impl MemoryClientStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClientStorage for MemoryClientStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }

    async fn create(&self, client: &Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        match self.clients.entry(client.client_id.clone()) {
            Entry::Occupied(_) => Err(AuthError::invalid_request(format!(
                "client {} already exists",
                client.client_id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(client.clone());
                Ok(())
            }
        }
    }

    async fn list(&self) -> AuthResult<Vec<Client>> {
        let mut clients: Vec<Client> = self.clients.iter().map(|c| c.value().clone()).collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        Ok(clients)
    }
}

// =============================================================================
// Users
// =============================================================================

/// In-memory [`UserStorage`], keyed by user ID with a username index.
#[derive(Debug, Default)]
pub struct MemoryUserStorage {
    users: DashMap<String, User>,
    by_username: DashMap<String, String>,
}

impl MemoryUserStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStorage for MemoryUserStorage {
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<User>> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }

    async fn find_by_username(&self, username: &str) -> AuthResult<Option<User>> {
        let id = self.by_username.get(username).map(|id| id.value().clone());
        Ok(id.and_then(|id| self.users.get(&id).map(|u| u.value().clone())))
    }

    async fn create(&self, user: &User) -> AuthResult<()> {
        match self.by_username.entry(user.username.clone()) {
            Entry::Occupied(_) => Err(AuthError::invalid_request(format!(
                "username {} already exists",
                user.username
            ))),
            Entry::Vacant(slot) => {
                self.users.insert(user.id.clone(), user.clone());
                slot.insert(user.id.clone());
                Ok(())
            }
        }
    }

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> AuthResult<()> {
        let Some(mut user) = self.users.get_mut(user_id) else {
            return Err(AuthError::storage(format!("user {user_id} not found")));
        };
        user.password_hash = Some(password_hash.to_string());
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::future::join_all;
    use time::Duration;

    use super::*;
    use crate::types::AuthorizationType;

    fn code_token(reference: &str, lifetime: Duration) -> Token {
        Token::new(
            Some(Uuid::new_v4()),
            reference,
            TokenType::AuthorizationCode,
            TokenStatus::Valid,
            "user-1",
            lifetime,
        )
    }

    #[tokio::test]
    async fn test_duplicate_reference_rejected() {
        let store = MemoryGrantStore::new();
        store.create_token(&code_token("abc", Duration::minutes(10))).await.unwrap();
        let err = store
            .create_token(&code_token("abc", Duration::minutes(10)))
            .await
            .unwrap_err();
        assert!(err.is_server_error());
        assert_eq!(store.token_count(), 1);
    }

    #[tokio::test]
    async fn test_reference_lookup_is_scoped_by_type() {
        let store = MemoryGrantStore::new();
        let code = code_token("abc", Duration::minutes(10));
        store.create_token(&code).await.unwrap();

        let found = store
            .find_token_by_reference("abc", TokenType::AuthorizationCode)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, code.id);
        assert!(
            store
                .find_token_by_reference("abc", TokenType::RefreshToken)
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_transition_is_compare_and_set() {
        let store = MemoryGrantStore::new();
        let token = code_token("abc", Duration::minutes(10));
        store.create_token(&token).await.unwrap();

        let now = OffsetDateTime::now_utc();
        assert!(
            store
                .transition_token(token.id, TokenStatus::Valid, TokenStatus::Redeemed, None, now)
                .await
                .unwrap()
        );
        assert!(
            !store
                .transition_token(token.id, TokenStatus::Valid, TokenStatus::Redeemed, None, now)
                .await
                .unwrap()
        );

        let stored = store
            .find_token_by_reference("abc", TokenType::AuthorizationCode)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, TokenStatus::Redeemed);
        assert_eq!(stored.redemption_date, Some(now));
    }

    #[tokio::test]
    async fn test_concurrent_transitions_have_one_winner() {
        let store = Arc::new(MemoryGrantStore::new());
        let token = code_token("race", Duration::minutes(10));
        store.create_token(&token).await.unwrap();
        let id = token.id;

        let attempts = (0..32).map(|_| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .transition_token(
                        id,
                        TokenStatus::Valid,
                        TokenStatus::Redeemed,
                        None,
                        OffsetDateTime::now_utc(),
                    )
                    .await
                    .unwrap()
            })
        });

        let wins = join_all(attempts)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn test_expire_stale_keeps_authorization_with_live_tokens() {
        let store = MemoryGrantStore::new();
        let authorization = Authorization::new(
            "user-1",
            "acme",
            AuthorizationType::Code,
            AuthorizationStatus::Valid,
            "openid",
            Duration::minutes(10),
        );
        store.create_authorization(&authorization).await.unwrap();

        let expired_code = Token::new(
            Some(authorization.id),
            "code",
            TokenType::AuthorizationCode,
            TokenStatus::Valid,
            "user-1",
            Duration::minutes(10),
        );
        let refresh = Token::new(
            Some(authorization.id),
            "refresh",
            TokenType::RefreshToken,
            TokenStatus::Valid,
            "user-1",
            Duration::days(30),
        );
        store.create_token(&expired_code).await.unwrap();
        store.create_token(&refresh).await.unwrap();

        let later = OffsetDateTime::now_utc() + Duration::hours(1);
        assert_eq!(store.expire_stale(later).await.unwrap(), 1);

        let stored = store.find_authorization(authorization.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuthorizationStatus::Valid);

        let much_later = OffsetDateTime::now_utc() + Duration::days(31);
        assert_eq!(store.expire_stale(much_later).await.unwrap(), 2);
        let stored = store.find_authorization(authorization.id).await.unwrap().unwrap();
        assert_eq!(stored.status, AuthorizationStatus::Revoked);
    }

    #[tokio::test]
    async fn test_revoke_tokens_by_authorization() {
        let store = MemoryGrantStore::new();
        let authorization_id = Uuid::new_v4();
        for reference in ["a", "b"] {
            let token = Token::new(
                Some(authorization_id),
                reference,
                TokenType::RefreshToken,
                TokenStatus::Valid,
                "user-1",
                Duration::days(1),
            );
            store.create_token(&token).await.unwrap();
        }

        assert_eq!(store.revoke_tokens_by_authorization(authorization_id).await.unwrap(), 2);
        assert_eq!(store.revoke_tokens_by_authorization(authorization_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_user_lookup_by_username() {
        let users = MemoryUserStorage::new();
        let user = User::new("alice");
        users.create(&user).await.unwrap();
        assert!(users.create(&User::new("alice")).await.is_err());

        let found = users.find_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);

        users.update_password_hash(&user.id, "1:1:AA==:AA==").await.unwrap();
        let found = users.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(found.password_hash.as_deref(), Some("1:1:AA==:AA=="));
    }

    #[test]
    fn test_clients_listed_in_id_order() {
        use crate::testing::{fixture_client, fixture_public_client};
        use tokio_test::block_on;

        let clients = MemoryClientStorage::new();
        block_on(clients.create(&fixture_public_client("zeta"))).unwrap();
        block_on(clients.create(&fixture_client("alpha", false))).unwrap();
        assert!(block_on(clients.create(&fixture_client("alpha", true))).is_err());

        let ids: Vec<String> = block_on(clients.list())
            .unwrap()
            .into_iter()
            .map(|c| c.client_id)
            .collect();
        assert_eq!(ids, ["alpha", "zeta"]);
    }
}
