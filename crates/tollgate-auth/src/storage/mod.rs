//! Storage traits for clients, users, authorizations and tokens.
//!
//! [`memory`] holds in-process implementations used by tests and the
//! `memory` server backend. The PostgreSQL backend lives in
//! `tollgate-auth-postgres`.

pub mod client;
pub mod grant;
pub mod memory;
pub mod user;

pub use client::ClientStorage;
pub use grant::GrantStore;
pub use user::{User, UserStorage};
