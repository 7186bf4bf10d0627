//! Startup seeding of clients and users.
//!
//! Seeding is idempotent: a client whose ID is already registered, or a
//! user whose username is taken, is left untouched.

use tollgate_auth::password::PasswordHasher;
use tollgate_auth::storage::{ClientStorage, User, UserStorage};
use tollgate_auth::types::{ApplicationType, Client, ClientType};
use tracing::{info, warn};

use crate::config::{BootstrapConfig, ClientSeed, UserSeed};

/// Counts of what a bootstrap run changed.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BootstrapStats {
    pub clients_created: usize,
    pub clients_skipped: usize,
    pub users_created: usize,
    pub users_skipped: usize,
}

/// Builds the client registration for a seed, hashing its secret.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn client_from_seed(seed: &ClientSeed, hasher: &PasswordHasher) -> anyhow::Result<Client> {
    let client_secret = seed
        .client_secret
        .as_deref()
        .map(|secret| hasher.hash(secret))
        .transpose()?;
    let client_type = if client_secret.is_some() {
        ClientType::Confidential
    } else {
        ClientType::Public
    };

    Ok(Client {
        client_id: seed.client_id.clone(),
        client_secret,
        display_name: seed
            .display_name
            .clone()
            .unwrap_or_else(|| seed.client_id.clone()),
        client_type,
        require_pkce: seed.require_pkce,
        application_type: if client_type == ClientType::Public {
            ApplicationType::Native
        } else {
            ApplicationType::Web
        },
        redirect_uris: seed.redirect_uris.clone(),
        post_logout_redirect_uris: seed.post_logout_redirect_uris.clone(),
        scopes: seed.scopes.clone(),
        grant_types: seed.grant_types.clone(),
    })
}

/// Builds the user record for a seed, hashing its password.
///
/// # Errors
///
/// Returns an error if hashing fails.
pub fn user_from_seed(seed: &UserSeed, hasher: &PasswordHasher) -> anyhow::Result<User> {
    let mut user = User::new(seed.username.as_str());
    if let Some(id) = &seed.id {
        user.id = id.clone();
    }
    if let Some(password) = &seed.password {
        user = user.with_password_hash(hasher.hash(password)?);
    }
    if let (Some(given), Some(family)) = (&seed.given_name, &seed.family_name) {
        user = user.with_name(given.as_str(), family.as_str());
    } else {
        user.given_name = seed.given_name.clone();
        user.family_name = seed.family_name.clone();
    }
    if let Some(email) = &seed.email {
        user = user.with_email(email.as_str(), seed.email_verified);
    }
    Ok(user)
}

/// Registers configured clients and users that do not exist yet.
///
/// # Errors
///
/// Returns an error if a registration is invalid or storage fails.
pub async fn seed(
    config: &BootstrapConfig,
    clients: &dyn ClientStorage,
    users: &dyn UserStorage,
    hasher: &PasswordHasher,
) -> anyhow::Result<BootstrapStats> {
    let mut stats = BootstrapStats::default();

    for seed in &config.clients {
        if clients.find_by_client_id(&seed.client_id).await?.is_some() {
            stats.clients_skipped += 1;
            continue;
        }
        let client = client_from_seed(seed, hasher)?;
        clients.create(&client).await?;
        info!(client_id = %client.client_id, client_type = ?client.client_type, "Seeded client");
        stats.clients_created += 1;
    }

    for seed in &config.users {
        if users.find_by_username(&seed.username).await?.is_some() {
            stats.users_skipped += 1;
            continue;
        }
        if seed.password.is_none() {
            warn!(username = %seed.username, "Seeded user has no password and cannot use the password grant");
        }
        let user = user_from_seed(seed, hasher)?;
        users.create(&user).await?;
        info!(username = %user.username, user_id = %user.id, "Seeded user");
        stats.users_created += 1;
    }

    Ok(stats)
}
