//! Client storage trait.
//!
//! Client registrations are owned by the administrative subsystem. The
//! protocol engine only needs lookups; `create` exists for bootstrap seeding.

use async_trait::async_trait;

use crate::AuthResult;
use crate::types::Client;

/// Storage operations for OAuth 2.0 clients.
///
/// # Example
///
/// ```ignore
/// use tollgate_auth::storage::ClientStorage;
///
/// async fn example(storage: &impl ClientStorage) {
///     if let Some(client) = storage.find_by_client_id("my-app").await? {
///         println!("Found client: {}", client.display_name);
///     }
/// }
/// ```
#[async_trait]
pub trait ClientStorage: Send + Sync {
    /// Find a client by its OAuth client_id.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_client_id(&self, client_id: &str) -> AuthResult<Option<Client>>;

    /// Register a client.
    ///
    /// # Errors
    ///
    /// Returns an error if the client is invalid, the client_id is taken, or
    /// the storage operation fails.
    async fn create(&self, client: &Client) -> AuthResult<()>;

    /// List registered clients.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn list(&self) -> AuthResult<Vec<Client>>;
}
