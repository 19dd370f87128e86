//! Authorization code flow with PKCE, as driven by a consuming application.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use tokio::sync::Mutex;
use url::Url;

use super::storage::{StoredTokens, TokenStorage};
use super::{ErrorBody, IntegrationConfig, REQUEST_TIMEOUT};
use crate::crypto::{constant_time_eq, random_token};
use crate::error::IntegrationError;
use crate::server::oauth::pkce::{METHOD_S256, challenge_s256, generate_verifier};

/// State kept between redirecting the user and handling the callback.
/// Typically stored in the user's session.
#[derive(Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub code_verifier: String,
    /// Where to send the user's browser.
    pub authorize_url: String,
}

impl std::fmt::Debug for PendingAuthorization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingAuthorization")
            .field("authorize_url", &self.authorize_url)
            .finish_non_exhaustive()
    }
}

/// Query parameters of the redirect back to the application.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
    #[serde(default)]
    scope: Option<String>,
}

const fn default_expires_in() -> i64 {
    3600
}

/// OAuth 2.0 client side of the memory server's authorization server.
pub struct OAuthClientFlow {
    config: IntegrationConfig,
    http: reqwest::Client,
    storage: Arc<dyn TokenStorage>,
    /// One lock per account; a refresh token may only be presented once.
    refresh_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OAuthClientFlow {
    /// Create a flow over the given token storage.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built.
    pub fn new(
        config: IntegrationConfig,
        storage: Arc<dyn TokenStorage>,
    ) -> Result<Self, IntegrationError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("picard-mcp-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http, storage, refresh_locks: Mutex::default() })
    }

    #[must_use]
    pub const fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    pub(crate) const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Start an authorization: fresh `state`, fresh PKCE verifier, and the
    /// URL to redirect the user to.
    pub fn begin(&self) -> Result<PendingAuthorization, IntegrationError> {
        let state = random_token();
        let code_verifier = generate_verifier();

        let mut url = Url::parse(&self.config.endpoint("/authorize"))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes)
            .append_pair("state", &state)
            .append_pair("code_challenge", &challenge_s256(&code_verifier))
            .append_pair("code_challenge_method", METHOD_S256);

        tracing::debug!(client_id = %self.config.client_id, "Starting authorization");
        Ok(PendingAuthorization { state, code_verifier, authorize_url: url.into() })
    }

    /// Finish an authorization from the redirect callback and store the
    /// resulting token pair under `account`.
    ///
    /// The `state` is checked before anything else, so a forged callback
    /// never reaches the token endpoint.
    pub async fn complete(
        &self,
        account: &str,
        pending: &PendingAuthorization,
        callback: CallbackParams,
    ) -> Result<StoredTokens, IntegrationError> {
        let state = callback.state.as_deref().unwrap_or_default();
        if !constant_time_eq(state.as_bytes(), pending.state.as_bytes()) {
            tracing::warn!(target: "security", account, "OAuth callback state mismatch");
            return Err(IntegrationError::StateMismatch);
        }
        if let Some(error) = callback.error {
            return Err(IntegrationError::AuthorizationDenied {
                error,
                description: callback.error_description,
            });
        }
        let code = callback.code.ok_or(IntegrationError::MissingCode)?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", pending.code_verifier.as_str()),
        ];
        self.push_credentials(&mut form);

        let tokens = self.request_tokens(&form, None).await?;
        self.storage.save(account, tokens.clone()).await?;
        tracing::info!(account, scope = %tokens.scope, "Stored new token pair");
        Ok(tokens)
    }

    /// Rotate the stored refresh token. A rejected grant clears the stored
    /// pair, since it can never be used again.
    pub async fn refresh(&self, account: &str) -> Result<StoredTokens, IntegrationError> {
        let lock = self.refresh_lock(account).await;
        let _guard = lock.lock().await;
        let current = self.storage.load(account).await?.ok_or(IntegrationError::NotAuthorized)?;
        self.rotate(account, &current).await
    }

    /// A usable access token, refreshing first when it is about to expire.
    pub async fn access_token(&self, account: &str) -> Result<String, IntegrationError> {
        let tokens = self.storage.load(account).await?.ok_or(IntegrationError::NotAuthorized)?;
        if !tokens.is_expiring(Utc::now()) {
            return Ok(tokens.access_token);
        }

        let lock = self.refresh_lock(account).await;
        let _guard = lock.lock().await;
        // Another caller may have rotated while we waited.
        let current = self.storage.load(account).await?.ok_or(IntegrationError::NotAuthorized)?;
        if !current.is_expiring(Utc::now()) {
            return Ok(current.access_token);
        }
        Ok(self.rotate(account, &current).await?.access_token)
    }

    /// Refresh after the server rejected `rejected_access_token`, unless the
    /// stored pair has already moved past it.
    pub async fn refresh_rejected(
        &self,
        account: &str,
        rejected_access_token: &str,
    ) -> Result<StoredTokens, IntegrationError> {
        let lock = self.refresh_lock(account).await;
        let _guard = lock.lock().await;
        let current = self.storage.load(account).await?.ok_or(IntegrationError::NotAuthorized)?;
        if current.access_token != rejected_access_token {
            return Ok(current);
        }
        self.rotate(account, &current).await
    }

    async fn refresh_lock(&self, account: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().await;
        Arc::clone(locks.entry(account.to_string()).or_default())
    }

    /// Present `current.refresh_token`. Callers hold the account's refresh lock.
    async fn rotate(
        &self,
        account: &str,
        current: &StoredTokens,
    ) -> Result<StoredTokens, IntegrationError> {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", current.refresh_token.as_str()),
        ];
        self.push_credentials(&mut form);

        match self.request_tokens(&form, Some(current)).await {
            Ok(tokens) => {
                self.storage.save(account, tokens.clone()).await?;
                tracing::debug!(account, "Refreshed token pair");
                Ok(tokens)
            }
            Err(e) => {
                if e.requires_reauthorization() {
                    tracing::warn!(account, error = %e, "Refresh rejected; clearing stored tokens");
                    self.storage.clear(account).await?;
                }
                Err(e)
            }
        }
    }

    /// Revoke the stored grant at the server and forget it locally.
    pub async fn revoke(&self, account: &str) -> Result<(), IntegrationError> {
        let Some(tokens) = self.storage.load(account).await? else {
            return Ok(());
        };

        let mut form = vec![("token", tokens.refresh_token.as_str())];
        self.push_credentials(&mut form);

        let response = self.http.post(self.config.endpoint("/revoke")).form(&form).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = ErrorBody::read(response).await;
            tracing::warn!(account, status, error = %body.error, "Revocation failed");
        }
        self.storage.clear(account).await
    }

    fn push_credentials<'a>(&'a self, form: &mut Vec<(&'static str, &'a str)>) {
        form.push(("client_id", self.config.client_id.as_str()));
        if let Some(secret) = self.config.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
    }

    async fn request_tokens(
        &self,
        form: &[(&str, &str)],
        previous: Option<&StoredTokens>,
    ) -> Result<StoredTokens, IntegrationError> {
        let response = self.http.post(self.config.endpoint("/token")).form(form).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = ErrorBody::read(response).await;
            return Err(IntegrationError::TokenEndpoint {
                status,
                error: body.error,
                description: body.error_description,
            });
        }

        let body: TokenResponse = response.json().await?;
        let refresh_token = body
            .refresh_token
            .or_else(|| previous.map(|p| p.refresh_token.clone()))
            .unwrap_or_default();
        let scope = body
            .scope
            .or_else(|| previous.map(|p| p.scope.clone()))
            .unwrap_or_else(|| self.config.scopes.clone());

        Ok(StoredTokens {
            access_token: body.access_token,
            refresh_token,
            expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
            scope,
        })
    }
}

impl std::fmt::Debug for OAuthClientFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientFlow").field("config", &self.config).finish_non_exhaustive()
    }
}
