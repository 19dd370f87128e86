//! Memory persistence seam and the in-memory backend.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::models::{MemoryRecord, Permission};

/// Selection criteria for [`MemoryRepository::find`]. `None` matches anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub owner_id: Option<Uuid>,
    pub permission: Option<Permission>,
}

impl RecordQuery {
    #[must_use]
    pub const fn owned_by(owner_id: Uuid) -> Self {
        Self { owner_id: Some(owner_id), permission: None }
    }

    #[must_use]
    pub const fn with_permission(mut self, permission: Option<Permission>) -> Self {
        self.permission = permission;
        self
    }

    #[must_use]
    pub fn matches(&self, record: &MemoryRecord) -> bool {
        self.owner_id.is_none_or(|owner| record.owner_id == owner)
            && self.permission.is_none_or(|permission| record.permission == permission)
    }
}

/// Storage for encrypted memory records.
#[async_trait]
pub trait MemoryRepository: Send + Sync {
    async fn insert(&self, record: MemoryRecord) -> StoreResult<()>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>>;

    /// Replace a record wholesale. `false` if it no longer exists.
    async fn update(&self, record: MemoryRecord) -> StoreResult<bool>;

    async fn delete(&self, id: Uuid) -> StoreResult<bool>;

    /// Matching records, newest first.
    async fn find(&self, query: RecordQuery) -> StoreResult<Vec<MemoryRecord>>;
}

/// In-memory memory store.
#[derive(Default)]
pub struct InMemoryMemoryStore {
    records: RwLock<HashMap<Uuid, MemoryRecord>>,
}

impl InMemoryMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMemoryStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl MemoryRepository for InMemoryMemoryStore {
    async fn insert(&self, record: MemoryRecord) -> StoreResult<()> {
        self.records.write().await.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn update(&self, record: MemoryRecord) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(existing) => {
                *existing = record;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        Ok(self.records.write().await.remove(&id).is_some())
    }

    async fn find(&self, query: RecordQuery) -> StoreResult<Vec<MemoryRecord>> {
        let mut found: Vec<MemoryRecord> =
            self.records.read().await.values().filter(|r| query.matches(r)).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }
}
