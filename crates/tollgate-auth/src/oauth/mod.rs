//! OAuth 2.0 / OpenID Connect protocol engine.
//!
//! - [`authorize`] - Request/response types for the authorization endpoint
//! - [`service`] - Authorization request validation and code redemption
//! - [`pkce`] - PKCE challenge/verifier implementation
//! - [`device`] - Device authorization grant (RFC 8628)
//! - [`token`] - Token endpoint wire types
//! - [`client_auth`] - Client authentication at the token endpoint
//!
//! # Example
//!
//! ```ignore
//! use tollgate_auth::oauth::{AuthorizationEngine, PkceChallenge, PkceVerifier};
//!
//! // Client generates PKCE verifier and challenge
//! let verifier = PkceVerifier::generate();
//! let challenge = PkceChallenge::from_verifier(&verifier, PkceChallengeMethod::S256);
//!
//! // Server validates the request and issues a code once the user consents
//! let validated = engine.validate_request(&request).await?;
//! let code = engine.create_authorization_code(&validated.code_request(&user_id)).await?;
//! ```

pub mod authorize;
pub mod client_auth;
pub mod device;
pub mod pkce;
pub mod scope;
pub mod service;
pub mod token;

pub use authorize::{
    AuthorizationError, AuthorizationErrorCode, AuthorizationRequest, AuthorizationResponse,
    ImplicitResponse, ResponseType,
};
pub use client_auth::{
    AuthenticatedClient, ClientAuthenticator, ClientCredentials, TokenEndpointAuthMethod,
    parse_basic_auth,
};
pub use device::{
    DeviceAuthorizationResponse, DeviceFlowEngine, DeviceFlowSettings, PendingDeviceRequest,
};
pub use pkce::{PkceChallenge, PkceChallengeMethod, PkceError, PkceVerifier};
pub use service::{AuthorizationEngine, AuthorizationFailure, CodeRequest, ValidatedRequest};
pub use token::{TokenError, TokenErrorCode, TokenRequest, TokenResponse};
