//! Client registry storage.
//!
//! Clients are stored as JSONB documents keyed by `client_id`.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx_core::query::query;
use sqlx_core::query_as::query_as;

use tollgate_auth::storage::ClientStorage;
use tollgate_auth::types::Client;
use tollgate_auth::{AuthError, AuthResult};

use crate::{PgPool, StorageError, StorageResult};

/// Decodes a stored client document.
///
/// # Errors
///
/// Returns `Serialization` if the document does not match [`Client`].
pub fn client_from_resource(resource: serde_json::Value) -> StorageResult<Client> {
    Ok(serde_json::from_value(resource)?)
}

/// PostgreSQL implementation of [`ClientStorage`].
#[derive(Debug, Clone)]
pub struct PostgresClientStorage {
    pool: Arc<PgPool>,
}

impl PostgresClientStorage {
    /// Create a client store over a shared pool.
    #[must_use]
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn insert(&self, client: &Client) -> StorageResult<()> {
        let resource = serde_json::to_value(client)?;
        query("INSERT INTO oauth_client (client_id, resource) VALUES ($1, $2)")
            .bind(&client.client_id)
            .bind(&resource)
            .execute(&*self.pool)
            .await
            .map_err(|e| {
                StorageError::from_insert(e, || {
                    format!("client {} already exists", client.client_id)
                })
            })?;
        Ok(())
    }
}

#[async_trait]
impl ClientStorage for PostgresClientStorage {
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>> {
        let row: Option<(serde_json::Value,)> =
            query_as("SELECT resource FROM oauth_client WHERE client_id = $1")
                .bind(client_id)
                .fetch_optional(&*self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(row.map(|(resource,)| client_from_resource(resource)).transpose()?)
    }

    async fn create(&self, client: &Client) -> AuthResult<()> {
        client
            .validate()
            .map_err(|e| AuthError::invalid_request(e.to_string()))?;
        self.insert(client).await?;
        tracing::info!(client_id = %client.client_id, "Registered client");
        Ok(())
    }

    async fn list(&self) -> AuthResult<Vec<Client>> {
        let rows: Vec<(serde_json::Value,)> =
            query_as("SELECT resource FROM oauth_client ORDER BY client_id")
                .fetch_all(&*self.pool)
                .await
                .map_err(StorageError::from)?;
        Ok(rows
            .into_iter()
            .map(|(resource,)| client_from_resource(resource))
            .collect::<StorageResult<Vec<_>>>()?)
    }
}
