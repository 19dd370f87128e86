//! LLM provider client (OpenAI-compatible API).
//!
//! Provides async HTTP client with:
//! - Connection pooling via reqwest
//! - Retry middleware with exponential backoff
//! - Embedding cache keyed by model and text
//!
//! The memory layer only sees the [`EmbeddingProvider`] and
//! [`CompletionProvider`] traits.

mod provider;

use std::time::Duration;

use moka::future::Cache;
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde::Deserialize;

pub use provider::{CompletionProvider, EmbeddingProvider};

use crate::config::{Config, llm};
use crate::error::{ClientError, ClientResult};

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible embeddings and chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    /// HTTP client with middleware.
    client: ClientWithMiddleware,

    /// Embedding cache.
    cache: Cache<String, Vec<f32>>,

    /// API base URL, without trailing slash.
    base_url: String,

    embedding_model: String,

    completion_model: String,

    /// Expected embedding vector size.
    dimensions: usize,

    has_api_key: bool,
}

impl LlmClient {
    /// Create a new client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns error if HTTP client initialization fails.
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if let Some(ref key) = config.llm_api_key {
            let mut value = HeaderValue::from_str(&format!("Bearer {key}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(llm::MAX_KEEPALIVE)
            .pool_idle_timeout(llm::KEEPALIVE_EXPIRY)
            .gzip(true)
            .build()?;

        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_secs(1), Duration::from_secs(30))
            .build_with_max_retries(config.max_retries);

        let client = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        let cache = Cache::builder()
            .max_capacity(config.cache_max_size)
            .time_to_live(config.cache_ttl)
            .build();

        Ok(Self {
            client,
            cache,
            base_url: config.llm_base_url.clone(),
            embedding_model: config.embedding_model.clone(),
            completion_model: config.completion_model.clone(),
            dimensions: config.embedding_dimensions,
            has_api_key: config.has_llm_api_key(),
        })
    }

    /// Check if an API key is configured.
    #[must_use]
    pub const fn has_api_key(&self) -> bool {
        self.has_api_key
    }

    /// Embed one text.
    ///
    /// # Errors
    ///
    /// Returns error on API failure or a vector of the wrong size.
    pub async fn create_embedding(&self, text: &str) -> ClientResult<Vec<f32>> {
        let cache_key = self.cache_key(&self.embedding_model, text);
        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let url = format!("{}/embeddings", self.base_url);
        let body = serde_json::json!({
            "model": self.embedding_model,
            "input": text,
            "dimensions": self.dimensions
        });

        let response: EmbeddingResponse = self.post(&url, &body).await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| ClientError::invalid_response("no embedding in response"))?;

        if embedding.len() != self.dimensions {
            return Err(ClientError::invalid_response(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        self.cache.insert(cache_key, embedding.clone()).await;
        Ok(embedding)
    }

    /// Run one chat completion with a single user message.
    ///
    /// # Errors
    ///
    /// Returns error on API failure or an empty completion.
    pub async fn create_completion(&self, prompt: &str) -> ClientResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.completion_model,
            "messages": [{"role": "user", "content": prompt}],
            "temperature": 0.7
        });

        let response: ChatResponse = self.post(&url, &body).await?;
        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| ClientError::invalid_response("empty completion"))
    }

    /// Make a POST request.
    async fn post<T>(&self, url: &str, body: &serde_json::Value) -> ClientResult<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let body_str = serde_json::to_string(body)?;

        let response = self.client.post(url).body(body_str).send().await?;

        let response = self.handle_response(response).await?;
        let value: serde_json::Value = response.json().await?;

        serde_json::from_value(value).map_err(ClientError::from)
    }

    /// Handle API response status codes.
    async fn handle_response(
        &self,
        response: reqwest::Response,
    ) -> ClientResult<reqwest::Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        match status.as_u16() {
            429 => {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60);

                Err(ClientError::rate_limited(retry_after))
            }
            404 => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::not_found(text))
            }
            400 => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::bad_request(text))
            }
            500..=599 => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::server(status.as_u16(), text))
            }
            _ => {
                let text = response.text().await.unwrap_or_default();
                Err(ClientError::UnexpectedStatus { status: status.as_u16(), message: text })
            }
        }
    }

    /// Generate cache key.
    fn cache_key(&self, model: &str, text: &str) -> String {
        use md5::{Digest, Md5};

        let mut hasher = Md5::new();
        hasher.update(model.as_bytes());
        hasher.update(b"|");
        hasher.update(self.dimensions.to_le_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());

        format!("{:x}", hasher.finalize())
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for LlmClient {
    async fn embed(&self, text: &str) -> ClientResult<Vec<f32>> {
        self.create_embedding(text).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

#[async_trait::async_trait]
impl CompletionProvider for LlmClient {
    async fn complete(&self, prompt: &str) -> ClientResult<String> {
        self.create_completion(prompt).await
    }
}

impl std::fmt::Debug for LlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmClient")
            .field("base_url", &self.base_url)
            .field("embedding_model", &self.embedding_model)
            .field("has_api_key", &self.has_api_key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_depends_on_model_and_text() {
        let client = LlmClient::new(&Config::for_testing("http://localhost:1")).unwrap();
        let a = client.cache_key("m1", "hello");
        assert_eq!(a, client.cache_key("m1", "hello"));
        assert_ne!(a, client.cache_key("m2", "hello"));
        assert_ne!(a, client.cache_key("m1", "hello!"));
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_debug_hides_key() {
        let client = LlmClient::new(&Config::for_testing("http://localhost:1")).unwrap();
        let debug = format!("{client:?}");
        assert!(!debug.contains("test-key"));
        assert!(client.has_api_key());
    }
}
