//! [`UserRepository`] on SQLite.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{SqliteStore, conflict_on_unique, decode_time, decode_uuid, encode_time};
use crate::error::StoreResult;
use crate::users::{User, UserRepository};

fn user_from_row(row: &SqliteRow) -> StoreResult<User> {
    Ok(User {
        id: decode_uuid(row.try_get("id")?)?,
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        is_admin: row.try_get("is_admin")?,
        created_at: decode_time(row.try_get("created_at")?)?,
    })
}

#[async_trait]
impl UserRepository for SqliteStore {
    async fn insert_user(&self, user: User) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO users (id, username, password_hash, is_admin, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.id.to_string())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(user.is_admin)
        .bind(encode_time(user.created_at))
        .execute(self.pool())
        .await
        .map_err(|e| conflict_on_unique(e, &format!("username '{}' is taken", user.username)))?;
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(user_from_row)
            .transpose()
    }

    async fn update_user(&self, user: User) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE users SET username = ?, password_hash = ? WHERE id = ?")
            .bind(&user.username)
            .bind(&user.password_hash)
            .bind(user.id.to_string())
            .execute(self.pool())
            .await
            .map_err(|e| {
                conflict_on_unique(e, &format!("username '{}' is taken", user.username))
            })?;
        Ok(result.rows_affected() == 1)
    }
}
