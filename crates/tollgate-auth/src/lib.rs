//! # tollgate-auth
//!
//! OAuth 2.0 and OpenID Connect authorization server core.
//!
//! This crate provides:
//! - Client and user registries behind storage traits
//! - The authorization, token, device, introspection and revocation flows
//! - JWT access and ID tokens signed with rotating RSA keys
//! - Axum handlers exposing the protocol endpoints
//!
//! ## Modules
//!
//! - [`config`] - Lifetimes, signing and hashing configuration
//! - [`oauth`] - Authorization requests, PKCE, device flow, client authentication
//! - [`token`] - Token issuance, validation, introspection and revocation
//! - [`storage`] - Storage traits and in-memory implementations
//! - [`types`] - Clients, authorizations and token rows
//! - [`password`] - Password and client secret hashing
//! - [`http`] - Axum HTTP handlers for the OAuth endpoints

pub mod config;
pub mod error;
pub mod http;
pub mod oauth;
pub mod password;
pub mod storage;
pub mod token;
pub mod types;

pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use http::{OAuthState, oauth_router};
pub use oauth::{AuthorizationEngine, ClientAuthenticator, DeviceFlowEngine};
pub use password::PasswordHasher;
pub use storage::{ClientStorage, GrantStore, User, UserStorage};
pub use token::{KeyStore, TokenEndpoint, TokenIssuer};
pub use types::{Client, GrantType};

/// Type alias for authentication/authorization results.
pub type AuthResult<T> = Result<T, AuthError>;

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for unit tests.

    use std::sync::OnceLock;

    use rsa::RsaPrivateKey;
    use time::Duration;

    use crate::password::PasswordHasher;
    use crate::storage::User;
    use crate::token::{KeyStore, KeyStoreConfig, SigningKey};
    use crate::types::{Client, ClientType};

    pub const FIXTURE_CLIENT_SECRET: &str = "fixture-client-secret";
    pub const FIXTURE_USER_PASSWORD: &str = "correct horse battery staple";

    fn rsa_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::rngs::OsRng, 2048).unwrap())
    }

    /// A signing key over a shared RSA key; generating one per test is slow.
    pub fn fixture_signing_key(kid: &str) -> SigningKey {
        SigningKey::from_private_key(kid, rsa_key()).unwrap()
    }

    pub fn fixture_key_store(overlap: Duration) -> KeyStore {
        KeyStore::with_key(
            KeyStoreConfig {
                key_size_bits: 2048,
                rotation_overlap: overlap,
                keys_to_keep: 3,
            },
            fixture_signing_key("k1"),
        )
    }

    /// An active user `username` with email `<username>@example.test`.
    pub fn fixture_user(username: &str) -> User {
        let mut given = username.to_string();
        if let Some(first) = given.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        let hash = PasswordHasher::new(1_000)
            .hash(FIXTURE_USER_PASSWORD)
            .unwrap();
        User::new(username)
            .with_name(given, "Example")
            .with_email(format!("{username}@example.test"), true)
            .with_password_hash(hash)
    }

    /// A confidential client with secret [`FIXTURE_CLIENT_SECRET`].
    pub fn fixture_client(client_id: &str, require_pkce: bool) -> Client {
        let secret = PasswordHasher::new(1_000)
            .hash(FIXTURE_CLIENT_SECRET)
            .unwrap();
        Client {
            client_id: client_id.to_string(),
            client_secret: Some(secret),
            display_name: format!("{client_id} app"),
            client_type: ClientType::Confidential,
            require_pkce,
            application_type: Default::default(),
            redirect_uris: vec!["https://acme.test/cb".to_string()],
            post_logout_redirect_uris: Vec::new(),
            scopes: vec!["email".to_string()],
            grant_types: Vec::new(),
        }
    }

    /// A public PKCE client without a secret.
    pub fn fixture_public_client(client_id: &str) -> Client {
        Client {
            client_secret: None,
            client_type: ClientType::Public,
            require_pkce: true,
            ..fixture_client(client_id, true)
        }
    }
}
