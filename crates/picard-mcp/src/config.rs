//! Configuration for the Picard memory server.

use std::time::Duration;

/// Authorization server constants.
pub mod oauth {
    use std::time::Duration;

    /// Authorization code lifetime.
    pub const AUTH_CODE_LIFETIME: Duration = Duration::from_secs(300);

    /// Upper bound for any configured code lifetime.
    pub const MAX_AUTH_CODE_LIFETIME: Duration = Duration::from_secs(300);

    /// Access token lifetime: 1 hour.
    pub const ACCESS_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

    /// Refresh token lifetime: 30 days.
    pub const REFRESH_TOKEN_LIFETIME: Duration = Duration::from_secs(30 * 24 * 3600);

    /// Expired code and token cleanup interval: 5 minutes.
    pub const CLEANUP_INTERVAL: Duration = Duration::from_secs(300);

    /// Login form submissions allowed per minute, server-wide.
    pub const LOGIN_ATTEMPTS_PER_MINUTE: u32 = 30;
}

/// LLM provider constants (OpenAI-compatible API).
pub mod llm {
    use std::time::Duration;

    pub const BASE_URL: &str = "https://api.openai.com/v1";

    pub const EMBEDDING_MODEL: &str = "text-embedding-3-small";

    pub const COMPLETION_MODEL: &str = "gpt-4o-mini";

    /// Vector size produced by `text-embedding-3-small`.
    pub const EMBEDDING_DIMENSIONS: usize = 1536;

    /// Per-request timeout.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Connection timeout.
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

    /// Outer bound for one embedding or completion, retries included.
    pub const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

    /// Transient failure retries.
    pub const MAX_RETRIES: u32 = 3;

    /// Embedding cache TTL (10 minutes).
    pub const CACHE_TTL: Duration = Duration::from_secs(600);

    /// Maximum cached embeddings.
    pub const CACHE_MAX_SIZE: u64 = 1000;

    /// Maximum keepalive connections.
    pub const MAX_KEEPALIVE: usize = 10;

    /// Keepalive expiry.
    pub const KEEPALIVE_EXPIRY: Duration = Duration::from_secs(30);
}

/// Memory and query limits.
pub mod query {
    /// Results returned when the caller gives no limit.
    pub const DEFAULT_LIMIT: usize = 10;

    /// Hard cap on ranked results.
    pub const MAX_LIMIT: usize = 50;

    /// Maximum memory text length in characters.
    pub const MAX_TEXT_LENGTH: usize = 10_000;
}

/// Server configuration.
#[derive(Clone)]
pub struct Config {
    /// Public base URL, used as issuer and in metadata documents.
    pub base_url: String,

    /// HTTP listen port.
    pub port: u16,

    /// SQLite URL. `None` keeps everything in process memory.
    pub database_url: Option<String>,

    /// Secret the at-rest memory cipher key is derived from.
    pub encryption_key: String,

    /// Static bearer token for the client administration API.
    pub admin_token: Option<String>,

    /// API key for the LLM provider (optional for local gateways).
    pub llm_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible API.
    pub llm_base_url: String,

    pub embedding_model: String,

    pub completion_model: String,

    /// Expected embedding vector size.
    pub embedding_dimensions: usize,

    /// Request timeout.
    pub request_timeout: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Outer timeout for a whole upstream call.
    pub upstream_timeout: Duration,

    /// Retries for transient upstream failures.
    pub max_retries: u32,

    pub auth_code_lifetime: Duration,

    pub access_token_lifetime: Duration,

    pub refresh_token_lifetime: Duration,

    /// Embedding cache TTL.
    pub cache_ttl: Duration,

    /// Maximum cache size.
    pub cache_max_size: u64,

    pub default_query_limit: usize,

    pub max_query_limit: usize,

    pub login_attempts_per_minute: u32,
}

impl Config {
    /// Create a configuration with production defaults.
    #[must_use]
    pub fn new(base_url: impl Into<String>, encryption_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            port: 8000,
            database_url: None,
            encryption_key: encryption_key.into(),
            admin_token: None,
            llm_api_key: None,
            llm_base_url: llm::BASE_URL.to_string(),
            embedding_model: llm::EMBEDDING_MODEL.to_string(),
            completion_model: llm::COMPLETION_MODEL.to_string(),
            embedding_dimensions: llm::EMBEDDING_DIMENSIONS,
            request_timeout: llm::REQUEST_TIMEOUT,
            connect_timeout: llm::CONNECT_TIMEOUT,
            upstream_timeout: llm::UPSTREAM_TIMEOUT,
            max_retries: llm::MAX_RETRIES,
            auth_code_lifetime: oauth::AUTH_CODE_LIFETIME,
            access_token_lifetime: oauth::ACCESS_TOKEN_LIFETIME,
            refresh_token_lifetime: oauth::REFRESH_TOKEN_LIFETIME,
            cache_ttl: llm::CACHE_TTL,
            cache_max_size: llm::CACHE_MAX_SIZE,
            default_query_limit: query::DEFAULT_LIMIT,
            max_query_limit: query::MAX_LIMIT,
            login_attempts_per_minute: oauth::LOGIN_ATTEMPTS_PER_MINUTE,
        }
    }

    /// Create a test configuration pointing the LLM client at a mock server.
    #[must_use]
    pub fn for_testing(llm_base_url: &str) -> Self {
        Self {
            llm_base_url: llm_base_url.trim_end_matches('/').to_string(),
            llm_api_key: Some("test-key".to_string()),
            admin_token: Some("test-admin-token".to_string()),
            embedding_dimensions: 8,
            request_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            upstream_timeout: Duration::from_secs(2),
            max_retries: 0,
            cache_ttl: Duration::from_secs(0), // No caching in tests
            cache_max_size: 0,
            login_attempts_per_minute: 1000,
            ..Self::new("https://picard.test", "test-encryption-key")
        }
    }

    /// Create configuration from environment variables.
    ///
    /// A missing `ENCRYPTION_KEY` falls back to an ephemeral random key, which
    /// makes stored memories unreadable after a restart.
    ///
    /// # Errors
    ///
    /// Returns error if environment variables are invalid.
    pub fn from_env() -> anyhow::Result<Self> {
        let base_url =
            env_var("PICARD_BASE_URL").unwrap_or_else(|| "http://localhost:8000".to_string());

        let encryption_key = env_var("ENCRYPTION_KEY").unwrap_or_else(|| {
            tracing::warn!(
                "ENCRYPTION_KEY is not set; using an ephemeral key, memories will not survive a restart"
            );
            crate::crypto::random_token()
        });

        let mut config = Self::new(base_url, encryption_key);

        if let Some(port) = env_var("PORT") {
            config.port = port.parse().map_err(|e| anyhow::anyhow!("Invalid PORT: {e}"))?;
        }
        config.database_url = env_var("DATABASE_URL");
        config.admin_token = env_var("ADMIN_TOKEN");
        config.llm_api_key = env_var("OPENAI_API_KEY");
        if let Some(url) = env_var("OPENAI_BASE_URL") {
            config.llm_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(model) = env_var("EMBEDDING_MODEL") {
            config.embedding_model = model;
        }
        if let Some(model) = env_var("COMPLETION_MODEL") {
            config.completion_model = model;
        }
        if let Some(dims) = env_var("EMBEDDING_DIMENSIONS") {
            config.embedding_dimensions =
                dims.parse().map_err(|e| anyhow::anyhow!("Invalid EMBEDDING_DIMENSIONS: {e}"))?;
        }
        if let Some(secs) = env_var("AUTH_CODE_LIFETIME_SECS") {
            let secs: u64 =
                secs.parse().map_err(|e| anyhow::anyhow!("Invalid AUTH_CODE_LIFETIME_SECS: {e}"))?;
            config = config.with_auth_code_lifetime(Duration::from_secs(secs));
        }
        if let Some(secs) = env_var("ACCESS_TOKEN_LIFETIME_SECS") {
            let secs: u64 = secs
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid ACCESS_TOKEN_LIFETIME_SECS: {e}"))?;
            config.access_token_lifetime = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Set the authorization code lifetime, clamped to five minutes.
    #[must_use]
    pub fn with_auth_code_lifetime(mut self, lifetime: Duration) -> Self {
        self.auth_code_lifetime = lifetime.min(oauth::MAX_AUTH_CODE_LIFETIME);
        self
    }

    /// Check if an LLM API key is configured.
    #[must_use]
    pub const fn has_llm_api_key(&self) -> bool {
        self.llm_api_key.is_some()
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("base_url", &self.base_url)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("llm_base_url", &self.llm_base_url)
            .field("embedding_model", &self.embedding_model)
            .field("completion_model", &self.completion_model)
            .field("embedding_dimensions", &self.embedding_dimensions)
            .field("has_llm_api_key", &self.has_llm_api_key())
            .field("has_admin_token", &self.admin_token.is_some())
            .finish()
    }
}
