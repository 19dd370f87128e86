//! Query Engine: similarity ranking and persona completions.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::service::MemoryService;
use crate::client::CompletionProvider;
use crate::config::Config;
use crate::error::{ClientError, ToolError, ToolResult};
use crate::models::{
    MemoryRecord, QueryMemoryInput, QueryMemoryResult, QueryScope, QueryUserInput,
    QueryUserResult, ScoredMemory,
};
use crate::users::UserService;

/// Cosine similarity of two vectors. Mismatched or zero vectors score 0.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Order records by similarity to `query`, best first, ties newest first.
#[must_use]
pub fn rank(records: Vec<MemoryRecord>, query: &[f32], limit: usize) -> Vec<(MemoryRecord, f32)> {
    let mut scored: Vec<(MemoryRecord, f32)> = records
        .into_iter()
        .map(|record| {
            let score = cosine_similarity(&record.embedding, query);
            (record, score)
        })
        .collect();
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.total_cmp(sa).then_with(|| b.created_at.cmp(&a.created_at))
    });
    scored.truncate(limit);
    scored
}

/// Semantic search over memories and persona answers built from them.
#[derive(Clone)]
pub struct QueryEngine {
    memories: MemoryService,
    users: UserService,
    completer: Arc<dyn CompletionProvider>,
    upstream_timeout: Duration,
    default_limit: usize,
    max_limit: usize,
}

impl QueryEngine {
    #[must_use]
    pub fn new(
        memories: MemoryService,
        users: UserService,
        completer: Arc<dyn CompletionProvider>,
        config: &Config,
    ) -> Self {
        Self {
            memories,
            users,
            completer,
            upstream_timeout: config.upstream_timeout,
            default_limit: config.default_query_limit,
            max_limit: config.max_query_limit,
        }
    }

    /// Rank the requester's own unexpired memories against a query.
    pub async fn query_memory(
        &self,
        requester: Uuid,
        input: QueryMemoryInput,
    ) -> ToolResult<QueryMemoryResult> {
        let limit = self.effective_limit(input.limit)?;
        let now = Utc::now();
        let records = self.memories.own_records(requester, false, now).await?;

        let query = input.query.map(|q| q.trim().to_string()).filter(|q| !q.is_empty());
        let memories = match query.as_deref() {
            Some(text) if !records.is_empty() => {
                let embedding = self.memories.embed(text).await?;
                self.decrypt_scored(rank(records, &embedding, limit))?
            }
            Some(_) => Vec::new(),
            None => records
                .iter()
                .take(limit)
                .map(|r| {
                    Ok(ScoredMemory { memory: self.memories.decrypt(r, now)?, similarity: None })
                })
                .collect::<ToolResult<Vec<_>>>()?,
        };

        tracing::debug!(requester = %requester, results = memories.len(), "Ran memory query");
        Ok(QueryMemoryResult { query, memories })
    }

    /// Answer `prompt` in a persona grounded in another user's (or one's own)
    /// memories.
    pub async fn query_user(
        &self,
        requester: Uuid,
        input: QueryUserInput,
    ) -> ToolResult<QueryUserResult> {
        let prompt = input.prompt.trim();
        if prompt.is_empty() {
            return Err(ToolError::validation("prompt", "cannot be empty"));
        }
        let limit = self.effective_limit(input.limit)?;

        if self.users.get(input.user_id).await?.is_none() {
            return Err(ToolError::not_found(format!("User {} not found", input.user_id)));
        }

        let now = Utc::now();
        let (scope, records) = if requester == input.user_id {
            (QueryScope::Own, self.memories.own_records(requester, false, now).await?)
        } else {
            (QueryScope::Public, self.memories.public_records(input.user_id, now).await?)
        };

        let mut result = QueryUserResult {
            user_id: input.user_id,
            persona: input.persona,
            scope,
            memories: Vec::new(),
            response: None,
        };
        if records.is_empty() {
            tracing::debug!(
                target_user = %input.user_id,
                ?scope,
                "No memories qualify for persona query"
            );
            return Ok(result);
        }

        let embedding = self.memories.embed(prompt).await?;
        result.memories = self.decrypt_scored(rank(records, &embedding, limit))?;

        let texts: Vec<&str> = result.memories.iter().map(|m| m.memory.text.as_str()).collect();
        let completion_prompt = input.persona.render_prompt(texts.as_slice(), prompt);
        result.response = Some(self.complete(&completion_prompt).await?);

        tracing::info!(
            requester = %requester,
            target_user = %input.user_id,
            persona = %input.persona,
            memories = result.memories.len(),
            "Answered persona query"
        );
        Ok(result)
    }

    async fn complete(&self, prompt: &str) -> ToolResult<String> {
        match tokio::time::timeout(self.upstream_timeout, self.completer.complete(prompt)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Completion request failed");
                Err(ToolError::Upstream(e))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.upstream_timeout, "Completion request timed out");
                Err(ToolError::Upstream(ClientError::Timeout(self.upstream_timeout)))
            }
        }
    }

    fn decrypt_scored(&self, ranked: Vec<(MemoryRecord, f32)>) -> ToolResult<Vec<ScoredMemory>> {
        let now = Utc::now();
        ranked
            .into_iter()
            .map(|(record, score)| {
                Ok(ScoredMemory {
                    memory: self.memories.decrypt(&record, now)?,
                    similarity: Some(score),
                })
            })
            .collect()
    }

    fn effective_limit(&self, limit: Option<usize>) -> ToolResult<usize> {
        match limit {
            Some(0) => Err(ToolError::validation("limit", "must be at least 1")),
            Some(n) => Ok(n.min(self.max_limit)),
            None => Ok(self.default_limit),
        }
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("default_limit", &self.default_limit)
            .field("max_limit", &self.max_limit)
            .finish_non_exhaustive()
    }
}
