//! Core domain types for the authorization server.

pub mod client;
pub mod grant;

pub use client::{
    ApplicationType, Client, ClientType, ClientValidationError, GrantType, IMPLICIT_SCOPES,
};
pub use grant::{
    Authorization, AuthorizationProperties, AuthorizationStatus, AuthorizationType, Token,
    TokenStatus, TokenType,
};
