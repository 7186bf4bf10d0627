//! Table definitions.
//!
//! Lookup of opaque values goes through `(token_type, reference_id)`, which
//! is unique; expiry sweeps go through the partial indexes on open rows.

use sqlx_core::raw_sql::raw_sql;

use crate::{PgPool, StorageResult};

/// DDL applied by [`apply`]. Every statement is idempotent.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS oauth_client (
    client_id   TEXT PRIMARY KEY,
    resource    JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS oauth_user (
    id             TEXT PRIMARY KEY,
    username       TEXT NOT NULL UNIQUE,
    password_hash  TEXT,
    resource       JSONB NOT NULL,
    created_at     TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS oauth_authorization (
    id                  UUID PRIMARY KEY,
    subject_id          TEXT NOT NULL,
    client_id           TEXT NOT NULL,
    authorization_type  TEXT NOT NULL,
    status              TEXT NOT NULL,
    scopes              TEXT NOT NULL,
    properties          JSONB NOT NULL DEFAULT '{}'::jsonb,
    creation_date       TIMESTAMPTZ NOT NULL,
    expiration_date     TIMESTAMPTZ NOT NULL
);

CREATE INDEX IF NOT EXISTS oauth_authorization_open_expiry
    ON oauth_authorization (expiration_date)
    WHERE status IN ('pending', 'valid');

CREATE TABLE IF NOT EXISTS oauth_token (
    id                UUID PRIMARY KEY,
    authorization_id  UUID REFERENCES oauth_authorization (id),
    reference_id      TEXT NOT NULL,
    token_type        TEXT NOT NULL,
    status            TEXT NOT NULL,
    subject_id        TEXT NOT NULL,
    payload           TEXT,
    creation_date     TIMESTAMPTZ NOT NULL,
    expiration_date   TIMESTAMPTZ NOT NULL,
    redemption_date   TIMESTAMPTZ,
    UNIQUE (token_type, reference_id)
);

CREATE INDEX IF NOT EXISTS oauth_token_authorization
    ON oauth_token (authorization_id);

CREATE INDEX IF NOT EXISTS oauth_token_open_expiry
    ON oauth_token (expiration_date)
    WHERE status IN ('pending', 'valid');
"#;

/// Creates every table and index.
///
/// # Errors
///
/// Returns an error if a statement fails.
pub async fn apply(pool: &PgPool) -> StorageResult<()> {
    raw_sql(SCHEMA).execute(pool).await?;
    tracing::debug!("Auth schema applied");
    Ok(())
}
