//! User storage trait.
//!
//! Users are administered elsewhere; the protocol engine reads them to check
//! ROPC passwords and to fill scope-gated ID token and userinfo claims.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::AuthResult;

// =============================================================================
// User Type
// =============================================================================

/// A resource owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Opaque user identifier, used as the token `sub`.
    pub id: String,

    /// Login name.
    pub username: String,

    /// PBKDF2 password hash. `None` for users who cannot use the password grant.
    #[serde(default, skip_serializing)]
    pub password_hash: Option<String>,

    /// Full display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Given name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub given_name: Option<String>,

    /// Family name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_name: Option<String>,

    /// Email address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Whether the email address has been verified.
    #[serde(default)]
    pub email_verified: bool,

    /// Inactive users cannot obtain tokens.
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl User {
    /// Creates an active user with a random ID and no password.
    #[must_use]
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            password_hash: None,
            name: None,
            given_name: None,
            family_name: None,
            email: None,
            email_verified: false,
            active: true,
        }
    }

    /// Sets the password hash.
    #[must_use]
    pub fn with_password_hash(mut self, hash: impl Into<String>) -> Self {
        self.password_hash = Some(hash.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>, verified: bool) -> Self {
        self.email = Some(email.into());
        self.email_verified = verified;
        self
    }

    /// Sets the display name parts.
    #[must_use]
    pub fn with_name(
        mut self,
        given_name: impl Into<String>,
        family_name: impl Into<String>,
    ) -> Self {
        let given_name = given_name.into();
        let family_name = family_name.into();
        self.name = Some(format!("{given_name} {family_name}"));
        self.given_name = Some(given_name);
        self.family_name = Some(family_name);
        self
    }
}

// =============================================================================
// User Storage Trait
// =============================================================================

/// Read access to users, plus the one write the engine needs.
#[async_trait]
pub trait UserStorage: Send + Sync {
    /// Find a user by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, user_id: &str) -> AuthResult<Option<User>>;

    /// Find a user by username.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_username(&self, username: &str) -> AuthResult<Option<User>>;

    /// Create a user. Used for bootstrap seeding.
    ///
    /// # Errors
    ///
    /// Returns an error if the username is taken or the storage operation fails.
    async fn create(&self, user: &User) -> AuthResult<()>;

    /// Replace a user's password hash after a policy change.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn update_password_hash(&self, user_id: &str, password_hash: &str) -> AuthResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_builder_helpers() {
        let user = User::new("alice")
            .with_name("Alice", "Example")
            .with_email("alice@example.test", true)
            .with_password_hash("1:1000:AAAA:AAAA");

        assert!(user.active);
        assert_eq!(user.name.as_deref(), Some("Alice Example"));
        assert_eq!(user.given_name.as_deref(), Some("Alice"));
        assert!(user.email_verified);
        assert!(!user.id.is_empty());
    }

    #[test]
    fn test_password_hash_is_never_serialized() {
        let user = User::new("alice").with_password_hash("1:1000:AAAA:AAAA");
        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password_hash").is_none());
    }
}
