//! Memory Store operations: validation, permission checks, encryption and
//! embedding around a [`MemoryRepository`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::store::{MemoryRepository, RecordQuery};
use crate::client::EmbeddingProvider;
use crate::config::Config;
use crate::crypto::TextCipher;
use crate::error::{ClientError, ToolError, ToolResult};
use crate::models::{
    Memory, MemoryFilters, MemoryRecord, Permission, SubmitMemoryInput, UpdateMemoryInput,
};

/// Owner-scoped CRUD over encrypted memories.
#[derive(Clone)]
pub struct MemoryService {
    repo: Arc<dyn MemoryRepository>,
    cipher: Arc<TextCipher>,
    embedder: Arc<dyn EmbeddingProvider>,
    upstream_timeout: Duration,
    max_text_length: usize,
}

impl MemoryService {
    #[must_use]
    pub fn new(
        repo: Arc<dyn MemoryRepository>,
        cipher: TextCipher,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        Self {
            repo,
            cipher: Arc::new(cipher),
            embedder,
            upstream_timeout: config.upstream_timeout,
            max_text_length: crate::config::query::MAX_TEXT_LENGTH,
        }
    }

    /// Store a new memory owned by `owner`.
    ///
    /// The embedding is computed first; if it fails nothing is written.
    pub async fn create(&self, owner: Uuid, input: SubmitMemoryInput) -> ToolResult<Memory> {
        self.validate_text(&input.text)?;

        let embedding = self.embed(&input.text).await?;
        let now = Utc::now();
        let record = MemoryRecord {
            id: Uuid::new_v4(),
            owner_id: owner,
            ciphertext: self.cipher.encrypt(&input.text)?,
            permission: input.permission,
            embedding,
            expires_at: input.expiration_date,
            created_at: now,
            updated_at: now,
        };

        self.repo.insert(record.clone()).await?;

        tracing::info!(
            memory_id = %record.id,
            owner_id = %owner,
            permission = %record.permission,
            "Stored memory"
        );
        Ok(Memory::from_record(&record, input.text, now))
    }

    /// Read one memory.
    ///
    /// Owners always see their records; anyone else only public, unexpired ones.
    pub async fn read(&self, id: Uuid, requester: Uuid) -> ToolResult<Memory> {
        let record = self.fetch(id).await?;
        let now = Utc::now();

        if record.owner_id != requester {
            if !record.permission.is_public() {
                return Err(ToolError::permission_denied("This memory is private"));
            }
            if record.is_expired(now) {
                return Err(ToolError::not_found(format!("Memory {id} not found")));
            }
        }

        self.decrypt(&record, now)
    }

    /// Change text, permission or expiration of an owned memory.
    pub async fn update(&self, requester: Uuid, input: UpdateMemoryInput) -> ToolResult<Memory> {
        let mut record = self.fetch_owned(input.memory_id, requester).await?;

        let new_text = match input.text {
            Some(text) => {
                self.validate_text(&text)?;
                let embedding = self.embed(&text).await?;
                record.ciphertext = self.cipher.encrypt(&text)?;
                record.embedding = embedding;
                Some(text)
            }
            None => None,
        };
        if let Some(permission) = input.permission {
            record.permission = permission;
        }
        if input.clear_expiration {
            record.expires_at = None;
        } else if let Some(expiration) = input.expiration_date {
            record.expires_at = Some(expiration);
        }

        let now = Utc::now();
        record.updated_at = now;

        if !self.repo.update(record.clone()).await? {
            return Err(ToolError::not_found(format!("Memory {} not found", record.id)));
        }

        tracing::info!(memory_id = %record.id, text_changed = new_text.is_some(), "Updated memory");

        match new_text {
            Some(text) => Ok(Memory::from_record(&record, text, now)),
            None => self.decrypt(&record, now),
        }
    }

    pub async fn delete(&self, id: Uuid, requester: Uuid) -> ToolResult<()> {
        self.fetch_owned(id, requester).await?;

        if !self.repo.delete(id).await? {
            return Err(ToolError::not_found(format!("Memory {id} not found")));
        }

        tracing::info!(memory_id = %id, "Deleted memory");
        Ok(())
    }

    pub async fn set_permission(
        &self,
        id: Uuid,
        requester: Uuid,
        permission: Permission,
    ) -> ToolResult<Memory> {
        self.update(
            requester,
            UpdateMemoryInput {
                memory_id: id,
                text: None,
                permission: Some(permission),
                expiration_date: None,
                clear_expiration: false,
            },
        )
        .await
    }

    /// List memories visible to `requester`, newest first.
    pub async fn list(&self, requester: Uuid, filters: &MemoryFilters) -> ToolResult<Vec<Memory>> {
        let now = Utc::now();
        let mut records = Vec::new();

        match filters.owner_id {
            Some(owner) if owner != requester => {
                records.extend(self.public_records(owner, now).await?);
            }
            Some(_) => {
                records.extend(self.own_records(requester, filters.include_expired, now).await?);
            }
            None => {
                records.extend(self.own_records(requester, filters.include_expired, now).await?);
                if filters.include_public {
                    let others = self
                        .repo
                        .find(RecordQuery::default().with_permission(Some(Permission::Public)))
                        .await?;
                    records.extend(
                        others
                            .into_iter()
                            .filter(|r| r.owner_id != requester && !r.is_expired(now)),
                    );
                }
            }
        }

        if let Some(permission) = filters.permission {
            records.retain(|r| r.permission == permission);
        }
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        records.iter().map(|r| self.decrypt(r, now)).collect()
    }

    /// The requester's records, expired ones only on request.
    pub(crate) async fn own_records(
        &self,
        owner: Uuid,
        include_expired: bool,
        now: DateTime<Utc>,
    ) -> ToolResult<Vec<MemoryRecord>> {
        let records = self.repo.find(RecordQuery::owned_by(owner)).await?;
        Ok(records.into_iter().filter(|r| include_expired || !r.is_expired(now)).collect())
    }

    /// Another user's public, unexpired records.
    pub(crate) async fn public_records(
        &self,
        owner: Uuid,
        now: DateTime<Utc>,
    ) -> ToolResult<Vec<MemoryRecord>> {
        let records = self
            .repo
            .find(RecordQuery::owned_by(owner).with_permission(Some(Permission::Public)))
            .await?;
        Ok(records.into_iter().filter(|r| !r.is_expired(now)).collect())
    }

    /// Embed text under the upstream timeout.
    pub(crate) async fn embed(&self, text: &str) -> ToolResult<Vec<f32>> {
        match tokio::time::timeout(self.upstream_timeout, self.embedder.embed(text)).await {
            Ok(Ok(embedding)) => Ok(embedding),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, retryable = e.is_retryable(), "Embedding request failed");
                Err(ToolError::Upstream(e))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.upstream_timeout, "Embedding request timed out");
                Err(ToolError::Upstream(ClientError::Timeout(self.upstream_timeout)))
            }
        }
    }

    pub(crate) fn decrypt(&self, record: &MemoryRecord, now: DateTime<Utc>) -> ToolResult<Memory> {
        let text = self.cipher.decrypt(&record.ciphertext)?;
        Ok(Memory::from_record(record, text, now))
    }

    async fn fetch(&self, id: Uuid) -> ToolResult<MemoryRecord> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| ToolError::not_found(format!("Memory {id} not found")))
    }

    async fn fetch_owned(&self, id: Uuid, requester: Uuid) -> ToolResult<MemoryRecord> {
        let record = self.fetch(id).await?;
        if record.owner_id != requester {
            return Err(ToolError::permission_denied("Only the owner can modify this memory"));
        }
        Ok(record)
    }

    fn validate_text(&self, text: &str) -> ToolResult<()> {
        if text.trim().is_empty() {
            return Err(ToolError::validation("text", "cannot be empty"));
        }
        let length = text.chars().count();
        if length > self.max_text_length {
            return Err(ToolError::validation(
                "text",
                format!("must be at most {} characters, got {length}", self.max_text_length),
            ));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryService")
            .field("upstream_timeout", &self.upstream_timeout)
            .field("max_text_length", &self.max_text_length)
            .finish_non_exhaustive()
    }
}
