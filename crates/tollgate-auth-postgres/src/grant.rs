//! Authorization and token storage.
//!
//! Opaque values arrive here already hashed; the table only ever sees the
//! digest in `reference_id`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;
use time::OffsetDateTime;
use uuid::Uuid;

use tollgate_auth::AuthResult;
use tollgate_auth::storage::GrantStore;
use tollgate_auth::types::{
    Authorization, AuthorizationProperties, AuthorizationStatus, AuthorizationType, Token,
    TokenStatus, TokenType,
};

use crate::{PgPool, StorageError, StorageResult};

// =============================================================================
// Row Types
// =============================================================================

type AuthorizationTuple = (
    Uuid,
    String,
    String,
    String,
    String,
    String,
    serde_json::Value,
    OffsetDateTime,
    OffsetDateTime,
);

type TokenTuple = (
    Uuid,
    Option<Uuid>,
    String,
    String,
    String,
    String,
    Option<String>,
    OffsetDateTime,
    OffsetDateTime,
    Option<OffsetDateTime>,
);

const AUTHORIZATION_COLUMNS: &str = "id, subject_id, client_id, authorization_type, status, \
     scopes, properties, creation_date, expiration_date";

const TOKEN_COLUMNS: &str = "id, authorization_id, reference_id, token_type, status, \
     subject_id, payload, creation_date, expiration_date, redemption_date";

/// Authorization record from database.
#[derive(Debug, Clone)]
pub struct AuthorizationRow {
    pub id: Uuid,
    pub subject_id: String,
    pub client_id: String,
    pub authorization_type: String,
    pub status: String,
    pub scopes: String,
    pub properties: serde_json::Value,
    pub creation_date: OffsetDateTime,
    pub expiration_date: OffsetDateTime,
}

impl AuthorizationRow {
    fn from_tuple(row: AuthorizationTuple) -> Self {
        Self {
            id: row.0,
            subject_id: row.1,
            client_id: row.2,
            authorization_type: row.3,
            status: row.4,
            scopes: row.5,
            properties: row.6,
            creation_date: row.7,
            expiration_date: row.8,
        }
    }

    /// Converts to the domain type.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRow` for an unknown type or status and
    /// `Serialization` for unreadable properties.
    pub fn into_authorization(self) -> StorageResult<Authorization> {
        let authorization_type = AuthorizationType::parse(&self.authorization_type)
            .ok_or_else(|| {
                StorageError::corrupt_row(format!(
                    "authorization type '{}'",
                    self.authorization_type
                ))
            })?;
        let status = AuthorizationStatus::parse(&self.status).ok_or_else(|| {
            StorageError::corrupt_row(format!("authorization status '{}'", self.status))
        })?;
        let properties: AuthorizationProperties = serde_json::from_value(self.properties)?;

        Ok(Authorization {
            id: self.id,
            subject_id: self.subject_id,
            client_id: self.client_id,
            authorization_type,
            status,
            scopes: self.scopes,
            properties,
            creation_date: self.creation_date,
            expiration_date: self.expiration_date,
        })
    }
}

/// Token record from database.
#[derive(Debug, Clone)]
pub struct TokenRow {
    pub id: Uuid,
    pub authorization_id: Option<Uuid>,
    pub reference_id: String,
    pub token_type: String,
    pub status: String,
    pub subject_id: String,
    pub payload: Option<String>,
    pub creation_date: OffsetDateTime,
    pub expiration_date: OffsetDateTime,
    pub redemption_date: Option<OffsetDateTime>,
}

impl TokenRow {
    fn from_tuple(row: TokenTuple) -> Self {
        Self {
            id: row.0,
            authorization_id: row.1,
            reference_id: row.2,
            token_type: row.3,
            status: row.4,
            subject_id: row.5,
            payload: row.6,
            creation_date: row.7,
            expiration_date: row.8,
            redemption_date: row.9,
        }
    }

    /// Converts to the domain type.
    ///
    /// # Errors
    ///
    /// Returns `CorruptRow` for an unknown type or status.
    pub fn into_token(self) -> StorageResult<Token> {
        let token_type = TokenType::parse(&self.token_type)
            .ok_or_else(|| StorageError::corrupt_row(format!("token type '{}'", self.token_type)))?;
        let status = TokenStatus::parse(&self.status)
            .ok_or_else(|| StorageError::corrupt_row(format!("token status '{}'", self.status)))?;

        Ok(Token {
            id: self.id,
            authorization_id: self.authorization_id,
            reference_id: self.reference_id,
            token_type,
            status,
            subject_id: self.subject_id,
            payload: self.payload,
            creation_date: self.creation_date,
            expiration_date: self.expiration_date,
            redemption_date: self.redemption_date,
        })
    }
}

// =============================================================================
// Grant Store
// =============================================================================

/// PostgreSQL implementation of [`GrantStore`].
#[derive(Debug, Clone)]
pub struct PostgresGrantStore {
    pool: Arc<PgPool>,
}

impl PostgresGrantStore {
    /// Create a grant store over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn insert_authorization(&self, authorization: &Authorization) -> StorageResult<()> {
        let properties = serde_json::to_value(&authorization.properties)?;
        query(
            r#"
            INSERT INTO oauth_authorization
                (id, subject_id, client_id, authorization_type, status, scopes,
                 properties, creation_date, expiration_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(authorization.id)
        .bind(&authorization.subject_id)
        .bind(&authorization.client_id)
        .bind(authorization.authorization_type.as_str())
        .bind(authorization.status.as_str())
        .bind(&authorization.scopes)
        .bind(&properties)
        .bind(authorization.creation_date)
        .bind(authorization.expiration_date)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            StorageError::from_insert(e, || {
                format!("authorization {} already exists", authorization.id)
            })
        })?;
        Ok(())
    }

    async fn select_authorization(&self, id: Uuid) -> StorageResult<Option<Authorization>> {
        let sql = format!("SELECT {AUTHORIZATION_COLUMNS} FROM oauth_authorization WHERE id = $1");
        let row: Option<AuthorizationTuple> = query_as(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|r| AuthorizationRow::from_tuple(r).into_authorization())
            .transpose()
    }

    async fn update_authorization_status(
        &self,
        id: Uuid,
        from: AuthorizationStatus,
        to: AuthorizationStatus,
        subject_id: Option<&str>,
    ) -> StorageResult<bool> {
        let row: Option<(Uuid,)> = query_as(
            r#"
            UPDATE oauth_authorization
            SET status = $3,
                subject_id = COALESCE($4, subject_id)
            WHERE id = $1
              AND status = $2
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(subject_id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn insert_token(&self, token: &Token) -> StorageResult<()> {
        query(
            r#"
            INSERT INTO oauth_token
                (id, authorization_id, reference_id, token_type, status, subject_id,
                 payload, creation_date, expiration_date, redemption_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(token.id)
        .bind(token.authorization_id)
        .bind(&token.reference_id)
        .bind(token.token_type.as_str())
        .bind(token.status.as_str())
        .bind(&token.subject_id)
        .bind(token.payload.as_deref())
        .bind(token.creation_date)
        .bind(token.expiration_date)
        .bind(token.redemption_date)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            StorageError::from_insert(e, || {
                format!("duplicate {} reference", token.token_type.as_str())
            })
        })?;
        Ok(())
    }

    async fn select_tokens(&self, filter: &str, bind: TokenFilter<'_>) -> StorageResult<Vec<Token>> {
        let sql = format!("SELECT {TOKEN_COLUMNS} FROM oauth_token WHERE {filter}");
        let q = query_as::<_, TokenTuple>(&sql);
        let rows = match bind {
            TokenFilter::Reference(reference, token_type) => {
                q.bind(reference)
                    .bind(token_type.as_str())
                    .fetch_all(&*self.pool)
                    .await?
            }
            TokenFilter::Authorization(id) => q.bind(id).fetch_all(&*self.pool).await?,
        };
        rows.into_iter()
            .map(|r| TokenRow::from_tuple(r).into_token())
            .collect()
    }

    async fn update_token_status(
        &self,
        id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
        subject_id: Option<&str>,
        now: OffsetDateTime,
    ) -> StorageResult<bool> {
        let redemption_date = (to == TokenStatus::Redeemed).then_some(now);
        let row: Option<(Uuid,)> = query_as(
            r#"
            UPDATE oauth_token
            SET status = $3,
                subject_id = COALESCE($4, subject_id),
                redemption_date = COALESCE($5, redemption_date)
            WHERE id = $1
              AND status = $2
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(subject_id)
        .bind(redemption_date)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn sweep(&self, now: OffsetDateTime) -> StorageResult<u64> {
        let mut tx = self.pool.begin().await?;

        let tokens = query(
            r#"
            UPDATE oauth_token
            SET status = 'revoked'
            WHERE status IN ('pending', 'valid')
              AND expiration_date <= $1
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let authorizations = query(
            r#"
            UPDATE oauth_authorization a
            SET status = 'revoked'
            WHERE a.status IN ('pending', 'valid')
              AND a.expiration_date <= $1
              AND NOT EXISTS (
                  SELECT 1 FROM oauth_token t
                  WHERE t.authorization_id = a.id
                    AND t.status IN ('pending', 'valid')
              )
            "#,
        )
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(tokens + authorizations)
    }
}

enum TokenFilter<'a> {
    Reference(&'a str, TokenType),
    Authorization(Uuid),
}

#[async_trait]
impl GrantStore for PostgresGrantStore {
    async fn create_authorization(&self, authorization: &Authorization) -> AuthResult<()> {
        Ok(self.insert_authorization(authorization).await?)
    }

    async fn find_authorization(&self, id: Uuid) -> AuthResult<Option<Authorization>> {
        Ok(self.select_authorization(id).await?)
    }

    async fn transition_authorization(
        &self,
        id: Uuid,
        from: AuthorizationStatus,
        to: AuthorizationStatus,
        subject_id: Option<&str>,
    ) -> AuthResult<bool> {
        Ok(self
            .update_authorization_status(id, from, to, subject_id)
            .await?)
    }

    async fn create_token(&self, token: &Token) -> AuthResult<()> {
        Ok(self.insert_token(token).await?)
    }

    async fn find_token_by_reference(
        &self,
        reference_id: &str,
        token_type: TokenType,
    ) -> AuthResult<Option<Token>> {
        let mut tokens = self
            .select_tokens(
                "reference_id = $1 AND token_type = $2",
                TokenFilter::Reference(reference_id, token_type),
            )
            .await?;
        Ok(tokens.pop())
    }

    async fn find_tokens_by_authorization(
        &self,
        authorization_id: Uuid,
    ) -> AuthResult<Vec<Token>> {
        Ok(self
            .select_tokens(
                "authorization_id = $1 ORDER BY creation_date",
                TokenFilter::Authorization(authorization_id),
            )
            .await?)
    }

    async fn transition_token(
        &self,
        id: Uuid,
        from: TokenStatus,
        to: TokenStatus,
        subject_id: Option<&str>,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        Ok(self
            .update_token_status(id, from, to, subject_id, now)
            .await?)
    }

    async fn revoke_token(&self, id: Uuid) -> AuthResult<bool> {
        let result = query("UPDATE oauth_token SET status = 'revoked' WHERE id = $1 AND status <> 'revoked'")
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_tokens_by_authorization(&self, authorization_id: Uuid) -> AuthResult<u64> {
        let result = query(
            "UPDATE oauth_token SET status = 'revoked' \
             WHERE authorization_id = $1 AND status <> 'revoked'",
        )
        .bind(authorization_id)
        .execute(&*self.pool)
        .await
        .map_err(StorageError::from)?;
        Ok(result.rows_affected())
    }

    async fn expire_stale(&self, now: OffsetDateTime) -> AuthResult<u64> {
        let changed = self.sweep(now).await?;
        if changed > 0 {
            tracing::debug!(changed, "Expired stale grants");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn token_row(status: &str) -> TokenRow {
        TokenRow::from_tuple((
            Uuid::nil(),
            Some(Uuid::nil()),
            "5e88...".to_string(),
            "refresh_token".to_string(),
            status.to_string(),
            "user-1".to_string(),
            None,
            datetime!(2026-01-01 0:00 UTC),
            datetime!(2026-01-31 0:00 UTC),
            None,
        ))
    }

    #[test]
    fn test_token_row_into_token() {
        let token = token_row("redeemed").into_token().unwrap();
        assert_eq!(token.token_type, TokenType::RefreshToken);
        assert_eq!(token.status, TokenStatus::Redeemed);
        assert_eq!(token.subject_id, "user-1");
    }

    #[test]
    fn test_unknown_status_is_corrupt() {
        let err = token_row("half-valid").into_token().unwrap_err();
        assert!(matches!(err, StorageError::CorruptRow(_)));
    }

    #[test]
    fn test_authorization_row_reads_properties() {
        let row = AuthorizationRow::from_tuple((
            Uuid::nil(),
            String::new(),
            "tv".to_string(),
            "device_code".to_string(),
            "pending".to_string(),
            "openid".to_string(),
            serde_json::json!({ "user_code": "WDJBMJHT" }),
            datetime!(2026-01-01 0:00 UTC),
            datetime!(2026-01-01 0:10 UTC),
        ));
        let authorization = row.into_authorization().unwrap();
        assert_eq!(authorization.authorization_type, AuthorizationType::DeviceCode);
        assert_eq!(authorization.status, AuthorizationStatus::Pending);
        assert_eq!(
            authorization.properties.user_code.as_deref(),
            Some("WDJBMJHT")
        );
    }

    #[test]
    fn test_authorization_row_rejects_bad_properties() {
        let row = AuthorizationRow::from_tuple((
            Uuid::nil(),
            String::new(),
            "tv".to_string(),
            "code".to_string(),
            "valid".to_string(),
            String::new(),
            serde_json::json!({ "nonce": 42 }),
            datetime!(2026-01-01 0:00 UTC),
            datetime!(2026-01-01 0:10 UTC),
        ));
        assert!(matches!(
            row.into_authorization(),
            Err(StorageError::Serialization(_))
        ));
    }
}
