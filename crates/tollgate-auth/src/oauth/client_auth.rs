//! Client authentication for the token, device, introspection and
//! revocation endpoints.
//!
//! # Authentication Methods
//!
//! - `client_secret_basic` - HTTP Basic Auth with client_id:client_secret
//! - `client_secret_post` - client_id and client_secret in request body
//! - `none` - bare client_id for clients without a secret
//!
//! Basic Auth wins when both are present. Unknown clients and wrong secrets
//! fail with the same `invalid_client` description so that registered
//! client IDs cannot be enumerated.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::password::PasswordHasher;
use crate::storage::ClientStorage;
use crate::types::Client;
use crate::{AuthError, AuthResult};

const AUTHENTICATION_FAILED: &str = "Client authentication failed";

/// Token endpoint authentication methods (OIDC Core §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenEndpointAuthMethod {
    /// No client authentication.
    None,

    /// Client secret via HTTP Basic Auth.
    ClientSecretBasic,

    /// Client secret in request body.
    ClientSecretPost,
}

impl TokenEndpointAuthMethod {
    /// Returns the string representation of the auth method.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::ClientSecretBasic => "client_secret_basic",
            Self::ClientSecretPost => "client_secret_post",
        }
    }
}

impl fmt::Display for TokenEndpointAuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Credentials presented by a client.
#[derive(Clone)]
pub struct ClientCredentials {
    /// Claimed client ID.
    pub client_id: String,
    /// Presented secret, if any.
    pub client_secret: Option<String>,
    /// Where the credentials came from.
    pub method: TokenEndpointAuthMethod,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "***"))
            .field("method", &self.method)
            .finish()
    }
}

impl ClientCredentials {
    /// Picks credentials from a Basic header or the request body.
    ///
    /// Returns `None` when no client ID was supplied at all.
    #[must_use]
    pub fn extract(
        basic: Option<(String, String)>,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Option<Self> {
        if let Some((client_id, client_secret)) = basic {
            return Some(Self {
                client_id,
                client_secret: Some(client_secret),
                method: TokenEndpointAuthMethod::ClientSecretBasic,
            });
        }

        let client_id = client_id.filter(|id| !id.is_empty())?;
        match client_secret.filter(|s| !s.is_empty()) {
            Some(secret) => Some(Self {
                client_id: client_id.to_string(),
                client_secret: Some(secret.to_string()),
                method: TokenEndpointAuthMethod::ClientSecretPost,
            }),
            None => Some(Self {
                client_id: client_id.to_string(),
                client_secret: None,
                method: TokenEndpointAuthMethod::None,
            }),
        }
    }
}

/// Result of successful client authentication.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    /// The authenticated client.
    pub client: Client,

    /// The authentication method used.
    pub auth_method: TokenEndpointAuthMethod,
}

/// Validates client credentials against the client registry.
#[derive(Clone)]
pub struct ClientAuthenticator {
    clients: Arc<dyn ClientStorage>,
    hasher: PasswordHasher,
}

impl ClientAuthenticator {
    /// Creates an authenticator. `hasher` verifies stored secret hashes.
    #[must_use]
    pub fn new(clients: Arc<dyn ClientStorage>, hasher: PasswordHasher) -> Self {
        Self { clients, hasher }
    }

    /// Returns the hasher used for stored secrets.
    #[must_use]
    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Looks up a client without authenticating it.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` if the client is unknown.
    pub async fn find_client(&self, client_id: &str) -> AuthResult<Client> {
        self.clients
            .find_by_client_id(client_id)
            .await?
            .ok_or_else(|| AuthError::invalid_client(AUTHENTICATION_FAILED))
    }

    /// Authenticates a client.
    ///
    /// A client with a stored secret must present it; a client without one
    /// authenticates with its ID alone and may not present a secret.
    ///
    /// # Errors
    ///
    /// Returns `invalid_client` if no credentials were presented, the client
    /// is unknown, or the secret does not verify.
    pub async fn validate_client(
        &self,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<AuthenticatedClient> {
        let Some(credentials) = credentials else {
            return Err(AuthError::invalid_client("No client credentials provided"));
        };

        let Some(client) = self.clients.find_by_client_id(&credentials.client_id).await? else {
            tracing::debug!(client_id = %credentials.client_id, "Unknown client");
            return Err(AuthError::invalid_client(AUTHENTICATION_FAILED));
        };

        match (&client.client_secret, &credentials.client_secret) {
            (Some(stored), Some(presented)) => {
                let verified = self.hasher.verify(stored, presented).unwrap_or(false);
                if !verified {
                    tracing::debug!(client_id = %client.client_id, "Client secret mismatch");
                    return Err(AuthError::invalid_client(AUTHENTICATION_FAILED));
                }
            }
            (Some(_), None) => {
                return Err(AuthError::invalid_client(AUTHENTICATION_FAILED));
            }
            (None, Some(_)) => {
                return Err(AuthError::invalid_client(
                    "Client has no secret; authenticate with client_id only",
                ));
            }
            (None, None) => {}
        }

        Ok(AuthenticatedClient {
            client,
            auth_method: credentials.method,
        })
    }

    /// Authenticates a client that holds a secret.
    ///
    /// # Errors
    ///
    /// Same as [`Self::validate_client`], plus `invalid_client` for public
    /// clients.
    pub async fn validate_confidential_client(
        &self,
        credentials: Option<&ClientCredentials>,
    ) -> AuthResult<AuthenticatedClient> {
        let authenticated = self.validate_client(credentials).await?;
        if !authenticated.client.has_secret() {
            tracing::debug!(
                client_id = %authenticated.client.client_id,
                "Public client refused"
            );
            return Err(AuthError::invalid_client(
                "Client authentication with a secret is required",
            ));
        }
        Ok(authenticated)
    }
}

/// Parses an HTTP Basic `Authorization` header value.
///
/// Returns `Some((client_id, client_secret))` if valid, `None` otherwise.
/// The secret may contain colons.
#[must_use]
pub fn parse_basic_auth(header_value: &str) -> Option<(String, String)> {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;

    let encoded = header_value.trim().strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let credentials = String::from_utf8(decoded).ok()?;
    let (client_id, client_secret) = credentials.split_once(':')?;

    Some((client_id.to_string(), client_secret.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryClientStorage;
    use crate::testing::{FIXTURE_CLIENT_SECRET, fixture_client, fixture_public_client};

    async fn authenticator() -> ClientAuthenticator {
        let clients = Arc::new(MemoryClientStorage::new());
        clients.create(&fixture_client("acme", true)).await.unwrap();
        clients.create(&fixture_public_client("spa")).await.unwrap();
        ClientAuthenticator::new(clients, PasswordHasher::new(1_000))
    }

    #[tokio::test]
    async fn test_basic_and_post() {
        let auth = authenticator().await;

        let basic = ClientCredentials::extract(
            Some(("acme".to_string(), FIXTURE_CLIENT_SECRET.to_string())),
            Some("ignored"),
            None,
        );
        let result = auth.validate_client(basic.as_ref()).await.unwrap();
        assert_eq!(result.client.client_id, "acme");
        assert_eq!(result.auth_method, TokenEndpointAuthMethod::ClientSecretBasic);

        let post = ClientCredentials::extract(None, Some("acme"), Some(FIXTURE_CLIENT_SECRET));
        let result = auth.validate_client(post.as_ref()).await.unwrap();
        assert_eq!(result.auth_method, TokenEndpointAuthMethod::ClientSecretPost);
    }

    #[tokio::test]
    async fn test_unknown_and_wrong_secret_look_the_same() {
        let auth = authenticator().await;

        let unknown = ClientCredentials::extract(None, Some("nobody"), Some("x"));
        let wrong = ClientCredentials::extract(None, Some("acme"), Some("wrong"));

        let unknown = auth.validate_client(unknown.as_ref()).await.unwrap_err();
        let wrong = auth.validate_client(wrong.as_ref()).await.unwrap_err();
        assert_eq!(unknown.oauth_error_code(), "invalid_client");
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn test_secret_required_only_when_registered() {
        let auth = authenticator().await;

        let bare = ClientCredentials::extract(None, Some("acme"), None);
        assert!(auth.validate_client(bare.as_ref()).await.is_err());

        let public = ClientCredentials::extract(None, Some("spa"), None);
        let result = auth.validate_client(public.as_ref()).await.unwrap();
        assert_eq!(result.auth_method, TokenEndpointAuthMethod::None);

        assert!(auth.validate_client(None).await.is_err());
    }

    #[tokio::test]
    async fn test_confidential_only_refuses_public_client() {
        let auth = authenticator().await;

        let public = ClientCredentials::extract(None, Some("spa"), None);
        let err = auth
            .validate_confidential_client(public.as_ref())
            .await
            .unwrap_err();
        assert_eq!(err.oauth_error_code(), "invalid_client");

        let confidential =
            ClientCredentials::extract(None, Some("acme"), Some(FIXTURE_CLIENT_SECRET));
        let result = auth
            .validate_confidential_client(confidential.as_ref())
            .await
            .unwrap();
        assert_eq!(result.client.client_id, "acme");
    }

    #[test]
    fn test_parse_basic_auth() {
        // client_id:client_secret
        assert_eq!(
            parse_basic_auth("Basic Y2xpZW50X2lkOmNsaWVudF9zZWNyZXQ="),
            Some(("client_id".to_string(), "client_secret".to_string()))
        );
        // client:pass:word
        assert_eq!(
            parse_basic_auth("Basic Y2xpZW50OnBhc3M6d29yZA=="),
            Some(("client".to_string(), "pass:word".to_string()))
        );
        assert!(parse_basic_auth("Bearer abc").is_none());
        assert!(parse_basic_auth("Basic not-valid-base64!!!").is_none());
        // clientonly
        assert!(parse_basic_auth("Basic Y2xpZW50b25seQ==").is_none());
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let creds = ClientCredentials::extract(None, Some("acme"), Some("s3cr3t")).unwrap();
        assert!(!format!("{creds:?}").contains("s3cr3t"));
    }
}
