//! Picard HTTP server.
//!
//! The embedded OAuth 2.0 authorization server issues codes and tokens; the
//! same process serves the bearer-protected memory tools over REST and MCP
//! JSON-RPC.

pub mod api;
pub mod auth;
pub mod oauth;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;

use crate::client::{CompletionProvider, EmbeddingProvider, LlmClient};
use crate::config::Config;
use crate::db::SqliteStore;
use crate::memory::{InMemoryMemoryStore, MemoryRepository};
use crate::users::{InMemoryUserStore, UserRepository};
use oauth::{InMemoryOAuthStore, OAuthRepository};
use transport::HttpState;

/// The three persistence seams, backed by one storage choice.
#[derive(Clone)]
pub struct Repositories {
    pub oauth: Arc<dyn OAuthRepository>,
    pub users: Arc<dyn UserRepository>,
    pub memories: Arc<dyn MemoryRepository>,
}

impl Repositories {
    /// Process-local stores; everything is lost on exit.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            oauth: Arc::new(InMemoryOAuthStore::new()),
            users: Arc::new(InMemoryUserStore::new()),
            memories: Arc::new(InMemoryMemoryStore::new()),
        }
    }

    /// All three seams over one SQLite pool.
    #[must_use]
    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self { oauth: store.clone(), users: store.clone(), memories: store }
    }

    /// SQLite when `DATABASE_URL` is set, in-memory otherwise.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        match config.database_url.as_deref() {
            Some(url) => {
                let store = SqliteStore::connect(url)
                    .await
                    .map_err(|e| anyhow::anyhow!("Failed to open database: {e}"))?;
                Ok(Self::sqlite(store))
            }
            None => {
                tracing::warn!("DATABASE_URL is not set; using in-memory storage");
                Ok(Self::in_memory())
            }
        }
    }
}

impl std::fmt::Debug for Repositories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}

/// Picard memory server.
pub struct PicardServer {
    port: u16,
    state: Arc<HttpState>,
}

impl PicardServer {
    /// Create a server over explicit repositories and LLM providers.
    #[must_use]
    pub fn new(
        config: &Config,
        repos: Repositories,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            port: config.port,
            state: Arc::new(HttpState::new(config, repos, embedder, completer)),
        }
    }

    /// Create a server from configuration, using the OpenAI-compatible client
    /// for both embeddings and completions.
    ///
    /// # Errors
    ///
    /// Returns error if storage or the HTTP client cannot be initialised.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        if !config.has_llm_api_key() {
            tracing::warn!("OPENAI_API_KEY is not set; upstream calls will be unauthenticated");
        }
        let repos = Repositories::from_config(config).await?;
        let llm = Arc::new(LlmClient::new(config)?);
        Ok(Self::new(config, repos, llm.clone(), llm))
    }

    /// Shared handler state.
    #[must_use]
    pub fn state(&self) -> Arc<HttpState> {
        Arc::clone(&self.state)
    }

    /// The full HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        transport::create_router(self.state())
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on server failure.
    pub async fn run_http(self) -> anyhow::Result<()> {
        tracing::info!("Starting Picard server on port {}", self.port);
        tracing::info!("Registered {} tools", self.state.tools.len());

        Arc::clone(&self.state.oauth).start_cleanup_task();

        let router = self.router();
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));

        tracing::info!(issuer = %self.state.base_url, "HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }
}

impl std::fmt::Debug for PicardServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PicardServer").field("port", &self.port).finish_non_exhaustive()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Received shutdown signal");
}
