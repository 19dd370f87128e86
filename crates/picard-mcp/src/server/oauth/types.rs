//! OAuth 2.0 records held by the credential store.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::scope::{Scope, ScopeSet};
use crate::error::AuthError;

/// A registered OAuth client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: Uuid,
    pub client_name: String,
    /// SHA-256 of the client secret. Present only for confidential clients.
    pub secret_hash: Option<String>,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: ScopeSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OAuthClient {
    #[must_use]
    pub const fn is_confidential(&self) -> bool {
        self.secret_hash.is_some()
    }

    /// Redirect URIs are compared by exact string match.
    #[must_use]
    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|u| u == redirect_uri)
    }
}

/// Public view of a client; never includes secret material.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub client_id: Uuid,
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: ScopeSet,
    pub is_confidential: bool,
    pub token_endpoint_auth_method: &'static str,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&OAuthClient> for ClientInfo {
    fn from(client: &OAuthClient) -> Self {
        Self {
            client_id: client.client_id,
            client_name: client.client_name.clone(),
            redirect_uris: client.redirect_uris.clone(),
            scopes: client.allowed_scopes.clone(),
            is_confidential: client.is_confidential(),
            token_endpoint_auth_method: if client.is_confidential() {
                "client_secret_post"
            } else {
                "none"
            },
            created_at: client.created_at,
            updated_at: client.updated_at,
        }
    }
}

/// An authorization code issued after the resource owner approved a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthCode {
    /// SHA-256 of the code handed to the client.
    pub code_hash: String,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scopes: ScopeSet,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

impl AuthCode {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// An access token record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token_hash: String,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub scopes: ScopeSet,
    /// Grant lineage shared by every token descending from one code exchange.
    pub family_id: Uuid,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
}

impl AccessToken {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && !self.is_expired(now)
    }
}

/// Refresh token lifecycle: `active -> rotated` or `active -> revoked`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Active,
    Rotated,
    Revoked,
}

impl RefreshState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Rotated => "rotated",
            Self::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for RefreshState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "rotated" => Ok(Self::Rotated),
            "revoked" => Ok(Self::Revoked),
            _ => Err(format!("unknown refresh token state: {s}")),
        }
    }
}

/// A refresh token record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshToken {
    pub token_hash: String,
    pub client_id: Uuid,
    pub user_id: Uuid,
    pub scopes: ScopeSet,
    pub family_id: Uuid,
    /// Rotation count within the family, starting at 0.
    pub generation: u32,
    pub expires_at: DateTime<Utc>,
    pub state: RefreshState,
}

impl RefreshToken {
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The authenticated caller of a protected operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub client_id: Uuid,
    pub scopes: ScopeSet,
}

impl Identity {
    /// Fail with `insufficient_scope` unless the token carries `scope`.
    pub fn require(&self, scope: Scope) -> Result<(), AuthError> {
        if self.scopes.contains(scope) {
            Ok(())
        } else {
            Err(AuthError::InsufficientScope { required: scope })
        }
    }
}

/// A freshly issued token pair. The only place plaintext tokens exist.
#[derive(Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    pub scope: ScopeSet,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Result of an atomic consume-if-unconsumed on an authorization code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This call consumed the code.
    Consumed(AuthCode),
    /// Somebody consumed it before.
    AlreadyConsumed(AuthCode),
    Expired,
    NotFound,
}

/// Result of an atomic rotate-if-active on a refresh token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotateOutcome {
    /// This call rotated the token; the record is the pre-rotation state.
    Rotated(RefreshToken),
    /// The token was already rotated away: a replay.
    Reused(RefreshToken),
    Revoked,
    Expired,
    /// The token belongs to a different client. Nothing changed.
    ClientMismatch,
    NotFound,
}

/// Counts of records removed by a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeCounts {
    pub auth_codes: usize,
    pub access_tokens: usize,
    pub refresh_tokens: usize,
}
