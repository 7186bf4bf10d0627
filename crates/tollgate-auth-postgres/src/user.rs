//! User registry storage.
//!
//! The password hash lives in its own column so that a rehash is a
//! single-column update; the remaining profile is a JSONB document.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;

use tollgate_auth::AuthResult;
use tollgate_auth::storage::{User, UserStorage};

use crate::{PgPool, StorageError, StorageResult};

type UserTuple = (String, String, Option<String>, serde_json::Value);

/// User record from database.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password_hash: Option<String>,
    pub resource: serde_json::Value,
}

impl UserRow {
    fn from_tuple(row: UserTuple) -> Self {
        Self {
            id: row.0,
            username: row.1,
            password_hash: row.2,
            resource: row.3,
        }
    }

    /// Converts to the domain type. The key columns win over any copy of
    /// them inside the document.
    ///
    /// # Errors
    ///
    /// Returns `Serialization` if the profile document is unreadable.
    pub fn into_user(self) -> StorageResult<User> {
        let mut resource = self.resource;
        if let Some(doc) = resource.as_object_mut() {
            doc.insert("id".into(), self.id.into());
            doc.insert("username".into(), self.username.into());
            doc.insert(
                "password_hash".into(),
                self.password_hash.map_or(serde_json::Value::Null, Into::into),
            );
        }
        Ok(serde_json::from_value(resource)?)
    }
}

/// PostgreSQL implementation of [`UserStorage`].
#[derive(Debug, Clone)]
pub struct PostgresUserStorage {
    pool: Arc<PgPool>,
}

impl PostgresUserStorage {
    /// Create a user store over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn find_where(&self, column: &str, value: &str) -> StorageResult<Option<User>> {
        let sql = format!(
            "SELECT id, username, password_hash, resource FROM oauth_user WHERE {column} = $1"
        );
        let row: Option<UserTuple> = query_as(&sql)
            .bind(value)
            .fetch_optional(&*self.pool)
            .await?;
        row.map(|r| UserRow::from_tuple(r).into_user()).transpose()
    }

    async fn insert(&self, user: &User) -> StorageResult<()> {
        let resource = serde_json::to_value(user)?;
        query(
            r#"
            INSERT INTO oauth_user (id, username, password_hash, resource)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(user.password_hash.as_deref())
        .bind(&resource)
        .execute(&*self.pool)
        .await
        .map_err(|e| {
            StorageError::from_insert(e, || format!("user {} already exists", user.username))
        })?;
        Ok(())
    }
}

#[async_trait]
impl UserStorage for PostgresUserStorage {
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<User>> {
        Ok(self.find_where("id", user_id).await?)
    }

    async fn find_by_username(&self, username: &str) -> AuthResult<Option<User>> {
        Ok(self.find_where("username", username).await?)
    }

    async fn create(&self, user: &User) -> AuthResult<()> {
        Ok(self.insert(user).await?)
    }

    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> AuthResult<()> {
        query("UPDATE oauth_user SET password_hash = $2 WHERE id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(&*self.pool)
            .await
            .map_err(StorageError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_override_document() {
        let row = UserRow::from_tuple((
            "u-1".to_string(),
            "alice".to_string(),
            Some("pbkdf2-sha256$1000$c2FsdA$aGFzaA".to_string()),
            serde_json::json!({
                "id": "stale",
                "username": "stale",
                "email": "alice@example.test",
                "email_verified": true,
                "active": true
            }),
        ));
        let user = row.into_user().unwrap();
        assert_eq!(user.id, "u-1");
        assert_eq!(user.username, "alice");
        assert!(user.password_hash.is_some());
        assert!(user.email_verified);
    }

    #[test]
    fn test_missing_hash_reads_as_none() {
        let row = UserRow::from_tuple((
            "u-2".to_string(),
            "bob".to_string(),
            None,
            serde_json::json!({ "active": false }),
        ));
        let user = row.into_user().unwrap();
        assert!(user.password_hash.is_none());
        assert!(!user.active);
    }
}
