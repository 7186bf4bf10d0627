//! Token generation, validation, and management.
//!
//! - Signing keys and their rotation ([`keys`])
//! - JWT encoding and decoding ([`jwt`])
//! - Opaque reference values ([`opaque`])
//! - The token endpoint, introspection (RFC 7662) and revocation (RFC 7009)

pub mod introspection;
pub mod jwt;
pub mod keys;
pub mod opaque;
pub mod revocation;
pub mod service;

pub use introspection::{IntrospectionRequest, IntrospectionResponse};
pub use jwt::{
    AccessTokenClaims, IdTokenClaims, IssuedToken, JwtError, TokenIssuer, UserClaims,
};
pub use keys::{Jwk, Jwks, KeyStore, KeyStoreConfig, SigningAlgorithm, SigningKey};
pub use revocation::{RevocationRequest, TokenTypeHint};
pub use service::{TokenEndpoint, TokenSettings, UserInfo};
