//! Provider seams for embeddings and completions.

use async_trait::async_trait;

use crate::error::ClientResult;

/// Turns text into a fixed-size vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> ClientResult<Vec<f32>>;

    /// Size of every vector this provider returns.
    fn dimensions(&self) -> usize;
}

/// Produces a text completion for a prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> ClientResult<String>;
}
