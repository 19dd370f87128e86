//! [`MemoryRepository`] on SQLite.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{SqliteStore, conflict_on_unique, decode_time, decode_uuid, encode_time};
use crate::error::{StoreError, StoreResult};
use crate::memory::{MemoryRepository, RecordQuery};
use crate::models::MemoryRecord;

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> StoreResult<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::corrupt(format!("embedding blob of {} bytes", bytes.len())));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

fn record_from_row(row: &SqliteRow) -> StoreResult<MemoryRecord> {
    let permission: &str = row.try_get("permission")?;
    let expires_at: Option<i64> = row.try_get("expires_at")?;
    Ok(MemoryRecord {
        id: decode_uuid(row.try_get("id")?)?,
        owner_id: decode_uuid(row.try_get("owner_id")?)?,
        ciphertext: row.try_get("ciphertext")?,
        permission: permission.parse().map_err(StoreError::corrupt)?,
        embedding: decode_embedding(row.try_get("embedding")?)?,
        expires_at: expires_at.map(decode_time).transpose()?,
        created_at: decode_time(row.try_get("created_at")?)?,
        updated_at: decode_time(row.try_get("updated_at")?)?,
    })
}

#[async_trait]
impl MemoryRepository for SqliteStore {
    async fn insert(&self, record: MemoryRecord) -> StoreResult<()> {
        sqlx::query(
            r"INSERT INTO memories
                (id, owner_id, ciphertext, permission, embedding, expires_at, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.owner_id.to_string())
        .bind(&record.ciphertext)
        .bind(record.permission.as_str())
        .bind(encode_embedding(&record.embedding))
        .bind(record.expires_at.map(encode_time))
        .bind(encode_time(record.created_at))
        .bind(encode_time(record.updated_at))
        .execute(self.pool())
        .await
        .map_err(|e| conflict_on_unique(e, "memory already exists"))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<MemoryRecord>> {
        sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(record_from_row)
            .transpose()
    }

    async fn update(&self, record: MemoryRecord) -> StoreResult<bool> {
        let result = sqlx::query(
            r"UPDATE memories
              SET ciphertext = ?, permission = ?, embedding = ?, expires_at = ?, updated_at = ?
              WHERE id = ?",
        )
        .bind(&record.ciphertext)
        .bind(record.permission.as_str())
        .bind(encode_embedding(&record.embedding))
        .bind(record.expires_at.map(encode_time))
        .bind(encode_time(record.updated_at))
        .bind(record.id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, query: RecordQuery) -> StoreResult<Vec<MemoryRecord>> {
        let owner = query.owner_id.map(|id| id.to_string());
        let permission = query.permission.map(|p| p.as_str());
        sqlx::query(
            r"SELECT * FROM memories
              WHERE (? IS NULL OR owner_id = ?) AND (? IS NULL OR permission = ?)
              ORDER BY created_at DESC",
        )
        .bind(owner.clone())
        .bind(owner)
        .bind(permission)
        .bind(permission)
        .fetch_all(self.pool())
        .await?
        .iter()
        .map(record_from_row)
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::models::Permission;

    fn record(owner_id: Uuid, permission: Permission, age_secs: i64) -> MemoryRecord {
        let created = Utc::now() - Duration::seconds(age_secs);
        MemoryRecord {
            id: Uuid::new_v4(),
            owner_id,
            ciphertext: "sealed".into(),
            permission,
            embedding: vec![0.25, -1.5, 3.0],
            expires_at: Some(created + Duration::days(1)),
            created_at: created,
            updated_at: created,
        }
    }

    #[test]
    fn test_embedding_blob_layout() {
        let blob = encode_embedding(&[1.0, -2.5]);
        assert_eq!(blob.len(), 8);
        assert_eq!(decode_embedding(&blob).unwrap(), vec![1.0, -2.5]);
        assert!(decode_embedding(&blob[..7]).is_err());
    }

    #[tokio::test]
    async fn test_record_roundtrip() {
        let store = SqliteStore::in_memory().await.unwrap();
        let r = record(Uuid::new_v4(), Permission::Public, 0);
        store.insert(r.clone()).await.unwrap();

        let loaded = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(loaded.embedding, r.embedding);
        assert_eq!(loaded.permission, Permission::Public);
        assert_eq!(
            loaded.expires_at.map(|t| t.timestamp_millis()),
            r.expires_at.map(|t| t.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_find_filters_and_orders() {
        let store = SqliteStore::in_memory().await.unwrap();
        let alice = Uuid::new_v4();
        let old = record(alice, Permission::Private, 100);
        let new = record(alice, Permission::Public, 10);
        store.insert(old.clone()).await.unwrap();
        store.insert(new.clone()).await.unwrap();
        store.insert(record(Uuid::new_v4(), Permission::Public, 50)).await.unwrap();

        let mine = store.find(RecordQuery::owned_by(alice)).await.unwrap();
        assert_eq!(mine.iter().map(|r| r.id).collect::<Vec<_>>(), vec![new.id, old.id]);

        let public = store
            .find(RecordQuery::default().with_permission(Some(Permission::Public)))
            .await
            .unwrap();
        assert_eq!(public.len(), 2);

        let mine_private = store
            .find(RecordQuery::owned_by(alice).with_permission(Some(Permission::Private)))
            .await
            .unwrap();
        assert_eq!(mine_private.len(), 1);
        assert_eq!(store.find(RecordQuery::default()).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut r = record(Uuid::new_v4(), Permission::Private, 0);
        assert!(!store.update(r.clone()).await.unwrap());
        store.insert(r.clone()).await.unwrap();

        r.permission = Permission::Public;
        r.expires_at = None;
        assert!(store.update(r.clone()).await.unwrap());
        let loaded = store.get(r.id).await.unwrap().unwrap();
        assert_eq!(loaded.permission, Permission::Public);
        assert!(loaded.expires_at.is_none());

        assert!(store.delete(r.id).await.unwrap());
        assert!(!store.delete(r.id).await.unwrap());
    }
}
