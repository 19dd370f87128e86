//! Input models for memory tool parameters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Permission, Persona};

/// Input for `submit_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitMemoryInput {
    /// Memory text (1-10 000 characters).
    pub text: String,

    #[serde(default)]
    pub permission: Permission,

    /// Optional RFC 3339 expiration timestamp.
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

/// Filters for `get_memories`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilters {
    /// Only return records with this permission.
    #[serde(default)]
    pub permission: Option<Permission>,

    /// Also return other users' public records.
    #[serde(default)]
    pub include_public: bool,

    /// Include the requester's own expired records.
    #[serde(default)]
    pub include_expired: bool,

    /// Restrict to one owner. Other owners' records are public-only.
    #[serde(default)]
    pub owner_id: Option<Uuid>,
}

/// Input for `get_memories`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetMemoriesInput {
    #[serde(default)]
    pub filters: MemoryFilters,
}

/// Input for `get_memory` and `delete_memory`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryIdInput {
    pub memory_id: Uuid,
}

/// Input for `update_memory`. Absent fields are left unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateMemoryInput {
    pub memory_id: Uuid,

    #[serde(default)]
    pub text: Option<String>,

    #[serde(default)]
    pub permission: Option<Permission>,

    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,

    /// Remove the expiration date.
    #[serde(default)]
    pub clear_expiration: bool,
}

/// Input for `modify_permissions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModifyPermissionsInput {
    pub memory_id: Uuid,
    pub permission: Permission,
}

/// Input for `query_memory`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryMemoryInput {
    /// Natural-language query. Without it, records come back newest first.
    #[serde(default)]
    pub query: Option<String>,

    /// Result count (default 10, capped at 50).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Input for `query_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryUserInput {
    pub user_id: Uuid,

    pub prompt: String,

    #[serde(default)]
    pub persona: Persona,

    #[serde(default)]
    pub limit: Option<usize>,
}
