//! [`OAuthRepository`] on SQLite.
//!
//! Single-use and rotation rules are enforced with conditional `UPDATE`s, so
//! concurrent exchanges of one code (or one refresh token) have exactly one
//! winner even across pool connections.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use super::{SqliteStore, conflict_on_unique, decode_time, decode_uuid, encode_time};
use crate::error::{StoreError, StoreResult};
use crate::server::oauth::{
    AccessToken, AuthCode, ConsumeOutcome, OAuthClient, OAuthRepository, PurgeCounts,
    RefreshState, RefreshToken, RotateOutcome, ScopeSet,
};

fn decode_scopes(text: &str) -> StoreResult<ScopeSet> {
    ScopeSet::parse(text).map_err(StoreError::corrupt)
}

fn client_from_row(row: &SqliteRow) -> StoreResult<OAuthClient> {
    let redirect_uris: String = row.try_get("redirect_uris")?;
    Ok(OAuthClient {
        client_id: decode_uuid(row.try_get("client_id")?)?,
        client_name: row.try_get("client_name")?,
        secret_hash: row.try_get("secret_hash")?,
        redirect_uris: serde_json::from_str(&redirect_uris)
            .map_err(|e| StoreError::corrupt(format!("redirect_uris: {e}")))?,
        allowed_scopes: decode_scopes(row.try_get("allowed_scopes")?)?,
        created_at: decode_time(row.try_get("created_at")?)?,
        updated_at: decode_time(row.try_get("updated_at")?)?,
    })
}

fn code_from_row(row: &SqliteRow) -> StoreResult<AuthCode> {
    Ok(AuthCode {
        code_hash: row.try_get("code_hash")?,
        client_id: decode_uuid(row.try_get("client_id")?)?,
        user_id: decode_uuid(row.try_get("user_id")?)?,
        redirect_uri: row.try_get("redirect_uri")?,
        scopes: decode_scopes(row.try_get("scopes")?)?,
        code_challenge: row.try_get("code_challenge")?,
        code_challenge_method: row.try_get("code_challenge_method")?,
        expires_at: decode_time(row.try_get("expires_at")?)?,
        consumed: row.try_get("consumed")?,
    })
}

fn access_from_row(row: &SqliteRow) -> StoreResult<AccessToken> {
    Ok(AccessToken {
        token_hash: row.try_get("token_hash")?,
        client_id: decode_uuid(row.try_get("client_id")?)?,
        user_id: decode_uuid(row.try_get("user_id")?)?,
        scopes: decode_scopes(row.try_get("scopes")?)?,
        family_id: decode_uuid(row.try_get("family_id")?)?,
        expires_at: decode_time(row.try_get("expires_at")?)?,
        revoked: row.try_get("revoked")?,
    })
}

fn refresh_from_row(row: &SqliteRow) -> StoreResult<RefreshToken> {
    let generation: i64 = row.try_get("generation")?;
    let state: &str = row.try_get("state")?;
    Ok(RefreshToken {
        token_hash: row.try_get("token_hash")?,
        client_id: decode_uuid(row.try_get("client_id")?)?,
        user_id: decode_uuid(row.try_get("user_id")?)?,
        scopes: decode_scopes(row.try_get("scopes")?)?,
        family_id: decode_uuid(row.try_get("family_id")?)?,
        generation: u32::try_from(generation)
            .map_err(|_| StoreError::corrupt(format!("generation out of range: {generation}")))?,
        expires_at: decode_time(row.try_get("expires_at")?)?,
        state: state.parse().map_err(StoreError::corrupt)?,
    })
}

impl SqliteStore {
    async fn fetch_code(&self, code_hash: &str) -> StoreResult<Option<AuthCode>> {
        sqlx::query("SELECT * FROM auth_codes WHERE code_hash = ?")
            .bind(code_hash)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(code_from_row)
            .transpose()
    }

    async fn fetch_refresh(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        sqlx::query("SELECT * FROM refresh_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(refresh_from_row)
            .transpose()
    }
}

#[async_trait]
impl OAuthRepository for SqliteStore {
    async fn insert_client(&self, client: OAuthClient) -> StoreResult<()> {
        let redirect_uris = serde_json::to_string(&client.redirect_uris)
            .map_err(|e| StoreError::corrupt(format!("redirect_uris: {e}")))?;
        sqlx::query(
            r"INSERT INTO oauth_clients
                (client_id, client_name, secret_hash, redirect_uris, allowed_scopes, created_at, updated_at)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(client.client_id.to_string())
        .bind(&client.client_name)
        .bind(&client.secret_hash)
        .bind(redirect_uris)
        .bind(client.allowed_scopes.to_string())
        .bind(encode_time(client.created_at))
        .bind(encode_time(client.updated_at))
        .execute(self.pool())
        .await
        .map_err(|e| conflict_on_unique(e, "client already exists"))?;
        Ok(())
    }

    async fn get_client(&self, client_id: Uuid) -> StoreResult<Option<OAuthClient>> {
        sqlx::query("SELECT * FROM oauth_clients WHERE client_id = ?")
            .bind(client_id.to_string())
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(client_from_row)
            .transpose()
    }

    async fn update_client(&self, client: OAuthClient) -> StoreResult<bool> {
        let redirect_uris = serde_json::to_string(&client.redirect_uris)
            .map_err(|e| StoreError::corrupt(format!("redirect_uris: {e}")))?;
        let result = sqlx::query(
            r"UPDATE oauth_clients
              SET client_name = ?, secret_hash = ?, redirect_uris = ?, allowed_scopes = ?, updated_at = ?
              WHERE client_id = ?",
        )
        .bind(&client.client_name)
        .bind(&client.secret_hash)
        .bind(redirect_uris)
        .bind(client.allowed_scopes.to_string())
        .bind(encode_time(client.updated_at))
        .bind(client.client_id.to_string())
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_client(&self, client_id: Uuid) -> StoreResult<bool> {
        let id = client_id.to_string();
        let mut tx = self.pool().begin().await?;
        let removed = sqlx::query("DELETE FROM oauth_clients WHERE client_id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await?
            .rows_affected()
            == 1;
        if removed {
            for table in ["auth_codes", "access_tokens", "refresh_tokens"] {
                sqlx::query(&format!("DELETE FROM {table} WHERE client_id = ?"))
                    .bind(&id)
                    .execute(&mut *tx)
                    .await?;
            }
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn list_clients(&self) -> StoreResult<Vec<OAuthClient>> {
        sqlx::query("SELECT * FROM oauth_clients ORDER BY created_at ASC")
            .fetch_all(self.pool())
            .await?
            .iter()
            .map(client_from_row)
            .collect()
    }

    async fn insert_auth_code(&self, code: AuthCode) -> StoreResult<()> {
        sqlx::query(
            r"INSERT INTO auth_codes
                (code_hash, client_id, user_id, redirect_uri, scopes, code_challenge,
                 code_challenge_method, expires_at, consumed)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&code.code_hash)
        .bind(code.client_id.to_string())
        .bind(code.user_id.to_string())
        .bind(&code.redirect_uri)
        .bind(code.scopes.to_string())
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(encode_time(code.expires_at))
        .bind(code.consumed)
        .execute(self.pool())
        .await
        .map_err(|e| conflict_on_unique(e, "authorization code collision"))?;
        Ok(())
    }

    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        let flipped = sqlx::query(
            "UPDATE auth_codes SET consumed = 1 WHERE code_hash = ? AND consumed = 0 AND expires_at > ?",
        )
        .bind(code_hash)
        .bind(encode_time(now))
        .execute(self.pool())
        .await?
        .rows_affected()
            == 1;

        let Some(code) = self.fetch_code(code_hash).await? else {
            return Ok(ConsumeOutcome::NotFound);
        };
        Ok(if flipped {
            ConsumeOutcome::Consumed(code)
        } else if code.consumed {
            ConsumeOutcome::AlreadyConsumed(code)
        } else {
            ConsumeOutcome::Expired
        })
    }

    async fn insert_token_pair(
        &self,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            r"INSERT INTO access_tokens
                (token_hash, client_id, user_id, scopes, family_id, expires_at, revoked)
              VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&access.token_hash)
        .bind(access.client_id.to_string())
        .bind(access.user_id.to_string())
        .bind(access.scopes.to_string())
        .bind(access.family_id.to_string())
        .bind(encode_time(access.expires_at))
        .bind(access.revoked)
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "access token collision"))?;

        sqlx::query(
            r"INSERT INTO refresh_tokens
                (token_hash, client_id, user_id, scopes, family_id, generation, expires_at, state)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&refresh.token_hash)
        .bind(refresh.client_id.to_string())
        .bind(refresh.user_id.to_string())
        .bind(refresh.scopes.to_string())
        .bind(refresh.family_id.to_string())
        .bind(i64::from(refresh.generation))
        .bind(encode_time(refresh.expires_at))
        .bind(refresh.state.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| conflict_on_unique(e, "refresh token collision"))?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_access_token(&self, token_hash: &str) -> StoreResult<Option<AccessToken>> {
        sqlx::query("SELECT * FROM access_tokens WHERE token_hash = ?")
            .bind(token_hash)
            .fetch_optional(self.pool())
            .await?
            .as_ref()
            .map(access_from_row)
            .transpose()
    }

    async fn get_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        self.fetch_refresh(token_hash).await
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome> {
        let Some(token) = self.fetch_refresh(token_hash).await? else {
            return Ok(RotateOutcome::NotFound);
        };
        if token.client_id != client_id {
            return Ok(RotateOutcome::ClientMismatch);
        }

        let rotated = sqlx::query(
            r"UPDATE refresh_tokens SET state = 'rotated'
              WHERE token_hash = ? AND client_id = ? AND state = 'active' AND expires_at > ?",
        )
        .bind(token_hash)
        .bind(client_id.to_string())
        .bind(encode_time(now))
        .execute(self.pool())
        .await?
        .rows_affected()
            == 1;
        if rotated {
            return Ok(RotateOutcome::Rotated(RefreshToken {
                state: RefreshState::Active,
                ..token
            }));
        }

        // Lost the race or the token was never rotatable; report what it is now.
        let Some(current) = self.fetch_refresh(token_hash).await? else {
            return Ok(RotateOutcome::NotFound);
        };
        Ok(match current.state {
            RefreshState::Rotated => RotateOutcome::Reused(current),
            RefreshState::Revoked => RotateOutcome::Revoked,
            RefreshState::Active => RotateOutcome::Expired,
        })
    }

    async fn revoke_access_token(&self, token_hash: &str) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE access_tokens SET revoked = 1 WHERE token_hash = ? AND revoked = 0")
                .bind(token_hash)
                .execute(self.pool())
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn revoke_family(&self, family_id: Uuid) -> StoreResult<usize> {
        let id = family_id.to_string();
        let mut tx = self.pool().begin().await?;
        let access = sqlx::query(
            "UPDATE access_tokens SET revoked = 1 WHERE family_id = ? AND revoked = 0",
        )
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let refresh = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked' WHERE family_id = ? AND state != 'revoked'",
        )
        .bind(&id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok((access + refresh) as usize)
    }

    async fn revoke_grants(&self, user_id: Uuid, client_id: Uuid) -> StoreResult<usize> {
        let user = user_id.to_string();
        let client = client_id.to_string();
        let mut tx = self.pool().begin().await?;
        let access = sqlx::query(
            r"UPDATE access_tokens SET revoked = 1
              WHERE user_id = ? AND client_id = ? AND revoked = 0",
        )
        .bind(&user)
        .bind(&client)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let refresh = sqlx::query(
            r"UPDATE refresh_tokens SET state = 'revoked'
              WHERE user_id = ? AND client_id = ? AND state != 'revoked'",
        )
        .bind(&user)
        .bind(&client)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok((access + refresh) as usize)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeCounts> {
        let cutoff = encode_time(now);
        let mut counts = PurgeCounts::default();
        let mut tx = self.pool().begin().await?;
        for (table, slot) in [
            ("auth_codes", &mut counts.auth_codes),
            ("access_tokens", &mut counts.access_tokens),
            ("refresh_tokens", &mut counts.refresh_tokens),
        ] {
            *slot = sqlx::query(&format!("DELETE FROM {table} WHERE expires_at <= ?"))
                .bind(cutoff)
                .execute(&mut *tx)
                .await?
                .rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(counts)
    }
}
