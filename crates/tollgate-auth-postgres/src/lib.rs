//! PostgreSQL storage backend for tollgate-auth.
//!
//! Provides persistent storage for:
//!
//! - OAuth clients (`oauth_client`)
//! - End users (`oauth_user`)
//! - Authorizations (`oauth_authorization`)
//! - Tokens derived from authorizations (`oauth_token`)
//!
//! Status changes are single `UPDATE ... WHERE status = $expected`
//! statements, so the row lock serializes concurrent transitions and the
//! affected-row count tells the caller whether it won.
//!
//! # Example
//!
//! ```ignore
//! use tollgate_auth_postgres::PostgresAuthStorage;
//!
//! let storage = PostgresAuthStorage::connect("postgres://localhost/tollgate", 10).await?;
//! storage.apply_schema().await?;
//!
//! let clients = storage.clients();
//! let client = clients.find_by_client_id("my-app").await?;
//! ```

pub mod client;
pub mod grant;
pub mod schema;
pub mod user;

use std::sync::Arc;

use sqlx_core::pool::Pool;
use sqlx_postgres::Postgres;
use tollgate_auth::AuthError;

/// PostgreSQL connection pool type alias.
pub type PgPool = Pool<Postgres>;

pub use client::PostgresClientStorage;
pub use grant::PostgresGrantStore;
pub use user::PostgresUserStorage;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur during auth storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx_core::Error),

    /// Resource already exists (conflict).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value does not map onto the domain model.
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl StorageError {
    /// Create a `Conflict` error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    /// Create a `CorruptRow` error.
    #[must_use]
    pub fn corrupt_row(message: impl Into<String>) -> Self {
        Self::CorruptRow(message.into())
    }

    /// Returns `true` if this is a `Conflict` error.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Maps a unique violation onto `Conflict`, anything else onto `Database`.
    pub(crate) fn from_insert(err: sqlx_core::Error, what: impl FnOnce() -> String) -> Self {
        if let sqlx_core::Error::Database(ref db_err) = err
            && db_err.is_unique_violation()
        {
            return Self::conflict(what());
        }
        Self::Database(err)
    }
}

impl From<StorageError> for AuthError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict(message) => AuthError::invalid_request(message),
            other => AuthError::storage(other.to_string()),
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

// =============================================================================
// PostgreSQL Auth Storage
// =============================================================================

/// PostgreSQL storage backend for authentication data.
///
/// Holds the connection pool and hands out the trait implementations the
/// protocol engine consumes.
#[derive(Debug, Clone)]
pub struct PostgresAuthStorage {
    pool: Arc<PgPool>,
}

impl PostgresAuthStorage {
    /// Create new storage with an existing connection pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Create new storage by connecting to the database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> StorageResult<Self> {
        use sqlx_core::pool::PoolOptions;
        let pool = PoolOptions::<Postgres>::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Creates the tables and indexes if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if a DDL statement fails.
    pub async fn apply_schema(&self) -> StorageResult<()> {
        schema::apply(&self.pool).await
    }

    /// Get a reference to the connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    // -------------------------------------------------------------------------
    // Storage Accessors
    // -------------------------------------------------------------------------

    /// Client registry.
    #[must_use]
    pub fn clients(&self) -> PostgresClientStorage {
        PostgresClientStorage::new(Arc::clone(&self.pool))
    }

    /// User registry.
    #[must_use]
    pub fn users(&self) -> PostgresUserStorage {
        PostgresUserStorage::new(Arc::clone(&self.pool))
    }

    /// Authorizations and tokens.
    #[must_use]
    pub fn grants(&self) -> PostgresGrantStore {
        PostgresGrantStore::new(Arc::clone(&self.pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_maps_to_client_error() {
        let err: AuthError = StorageError::conflict("client acme already exists").into();
        assert_eq!(err.oauth_error_code(), "invalid_request");

        let err: AuthError = StorageError::corrupt_row("status 'bogus'").into();
        assert!(err.is_server_error());
    }
}
