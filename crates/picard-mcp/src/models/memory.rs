//! Memory records and their API views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Permission, Persona};

/// A memory as persisted. The text is only ever held encrypted.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    /// Base64 nonce||ciphertext, see [`crate::crypto::TextCipher`].
    pub ciphertext: String,
    pub permission: Permission,
    /// Embedding of the plaintext, computed before encryption.
    pub embedding: Vec<f32>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryRecord {
    /// Expired strictly after `expires_at`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now > expires_at)
    }
}

/// A decrypted memory returned to its reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub text: String,
    pub permission: Permission,
    pub expiration_date: Option<DateTime<Utc>>,
    pub is_expired: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Memory {
    /// Combine a stored record with its decrypted text.
    #[must_use]
    pub fn from_record(record: &MemoryRecord, text: String, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            owner_id: record.owner_id,
            text,
            permission: record.permission,
            expiration_date: record.expires_at,
            is_expired: record.is_expired(now),
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A memory with its similarity to a query, when there was one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredMemory {
    #[serde(flatten)]
    pub memory: Memory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f32>,
}

/// Result of `query_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryMemoryResult {
    pub query: Option<String>,
    pub memories: Vec<ScoredMemory>,
}

/// Whose memories a persona query drew on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryScope {
    /// The requester's own memories, private included.
    #[serde(rename = "self")]
    Own,
    /// Another user's public memories.
    Public,
}

/// Result of `query_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryUserResult {
    pub user_id: Uuid,
    pub persona: Persona,
    pub scope: QueryScope,
    pub memories: Vec<ScoredMemory>,
    /// `None` when no memory qualified and the model was not asked.
    pub response: Option<String>,
}
