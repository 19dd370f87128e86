//! Client integration layer.
//!
//! What a consuming application needs to use the memory API on behalf of its
//! users: start an authorization with PKCE and `state`, finish it from the
//! redirect callback, keep the token pair in a [`TokenStorage`], refresh it
//! shortly before expiry, and call the memory tools with a bearer token.

mod api;
mod flow;
mod storage;

use std::time::Duration;

pub use api::MemoryApiClient;
pub use flow::{CallbackParams, OAuthClientFlow, PendingAuthorization};
pub use storage::{InMemoryTokenStorage, StoredTokens, TokenStorage};

/// Refresh this long before the access token expires.
pub const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Per-request timeout towards the memory server.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How a consuming application is registered with the memory server.
#[derive(Clone)]
pub struct IntegrationConfig {
    /// Base URL of the memory server (browser-facing).
    pub server_url: String,
    pub client_id: String,
    /// Present for confidential clients.
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    /// Space-delimited scopes to request.
    pub scopes: String,
}

impl IntegrationConfig {
    #[must_use]
    pub fn new(
        server_url: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_uri: redirect_uri.into(),
            scopes: "memories:read memories:write".to_string(),
        }
    }

    #[must_use]
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = scopes.into();
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.server_url)
    }
}

impl std::fmt::Debug for IntegrationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegrationConfig")
            .field("server_url", &self.server_url)
            .field("client_id", &self.client_id)
            .field("redirect_uri", &self.redirect_uri)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

/// OAuth / API error body shared by the server's endpoints.
#[derive(Debug, serde::Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    retryable: bool,
}

impl ErrorBody {
    /// Decode an error response, tolerating non-JSON bodies.
    async fn read(response: reqwest::Response) -> Self {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        serde_json::from_str(&text).unwrap_or_else(|_| Self {
            error: status.canonical_reason().unwrap_or("unknown_error").to_string(),
            error_description: (!text.is_empty()).then_some(text),
            retryable: status.is_server_error(),
        })
    }
}
