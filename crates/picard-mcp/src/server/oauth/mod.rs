//! Embedded OAuth 2.0 authorization server.
//!
//! Issues authorization codes to logged-in users and access/refresh token
//! pairs to registered clients, and validates bearer tokens for the memory
//! endpoints.
//!
//! ## Supported Standards
//! - RFC 6749: Authorization Code Grant and Refresh Token Grant
//! - RFC 7636: PKCE (S256 only)
//! - RFC 7591: Dynamic Client Registration
//! - RFC 7009: Token Revocation
//! - RFC 7662: Token Introspection
//! - RFC 8414: Authorization Server Metadata
//! - RFC 9728: Protected Resource Metadata

pub mod handlers;
pub mod login;
pub mod pkce;
pub mod provider;
pub mod scope;
pub mod store;
mod types;

pub use provider::{
    AuthorizationRequest, AuthorizeError, ClientCredentials, ClientRegistration, ClientUpdate,
    Introspection, OAuthProvider, RegisteredClient, ValidatedAuthorization,
};
pub use scope::{Scope, ScopeSet};
pub use store::{InMemoryOAuthStore, OAuthRepository};
pub use types::{
    AccessToken, AuthCode, ClientInfo, ConsumeOutcome, Identity, OAuthClient, PurgeCounts,
    RefreshState, RefreshToken, RotateOutcome, TokenPair,
};
