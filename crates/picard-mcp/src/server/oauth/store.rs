//! Credential store: clients, authorization codes and tokens.
//!
//! [`OAuthRepository`] is the persistence seam. [`InMemoryOAuthStore`] keeps
//! everything behind `RwLock`ed maps; the SQLite backend lives in `crate::db`.
//! Both make code consumption and refresh rotation a single conditional update.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{
    AccessToken, AuthCode, ConsumeOutcome, OAuthClient, PurgeCounts, RefreshState, RefreshToken,
    RotateOutcome,
};
use crate::error::StoreResult;

/// Persistence for the authorization server.
#[async_trait::async_trait]
pub trait OAuthRepository: Send + Sync {
    async fn insert_client(&self, client: OAuthClient) -> StoreResult<()>;

    async fn get_client(&self, client_id: Uuid) -> StoreResult<Option<OAuthClient>>;

    /// Replace a client. Returns false if it does not exist.
    async fn update_client(&self, client: OAuthClient) -> StoreResult<bool>;

    /// Delete a client together with its codes and tokens.
    async fn delete_client(&self, client_id: Uuid) -> StoreResult<bool>;

    async fn list_clients(&self) -> StoreResult<Vec<OAuthClient>>;

    async fn insert_auth_code(&self, code: AuthCode) -> StoreResult<()>;

    /// Mark a code consumed if, and only if, it is unconsumed and unexpired.
    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome>;

    async fn insert_token_pair(&self, access: AccessToken, refresh: RefreshToken)
    -> StoreResult<()>;

    async fn get_access_token(&self, token_hash: &str) -> StoreResult<Option<AccessToken>>;

    async fn get_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>>;

    /// Move a refresh token from `active` to `rotated` if it belongs to
    /// `client_id` and is unexpired.
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome>;

    async fn revoke_access_token(&self, token_hash: &str) -> StoreResult<bool>;

    /// Revoke every access and refresh token of one grant lineage.
    async fn revoke_family(&self, family_id: Uuid) -> StoreResult<usize>;

    /// Revoke every access and refresh token a user granted to a client.
    async fn revoke_grants(&self, user_id: Uuid, client_id: Uuid) -> StoreResult<usize>;

    /// Remove expired codes and tokens.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeCounts>;
}

/// In-memory credential store.
#[derive(Default)]
pub struct InMemoryOAuthStore {
    clients: RwLock<HashMap<Uuid, OAuthClient>>,
    auth_codes: RwLock<HashMap<String, AuthCode>>,
    access_tokens: RwLock<HashMap<String, AccessToken>>,
    refresh_tokens: RwLock<HashMap<String, RefreshToken>>,
}

impl InMemoryOAuthStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryOAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryOAuthStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl OAuthRepository for InMemoryOAuthStore {
    async fn insert_client(&self, client: OAuthClient) -> StoreResult<()> {
        self.clients.write().await.insert(client.client_id, client);
        Ok(())
    }

    async fn get_client(&self, client_id: Uuid) -> StoreResult<Option<OAuthClient>> {
        Ok(self.clients.read().await.get(&client_id).cloned())
    }

    async fn update_client(&self, client: OAuthClient) -> StoreResult<bool> {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&client.client_id) {
            Some(existing) => {
                *existing = client;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_client(&self, client_id: Uuid) -> StoreResult<bool> {
        let removed = self.clients.write().await.remove(&client_id).is_some();
        if removed {
            self.auth_codes.write().await.retain(|_, c| c.client_id != client_id);
            self.access_tokens.write().await.retain(|_, t| t.client_id != client_id);
            self.refresh_tokens.write().await.retain(|_, t| t.client_id != client_id);
        }
        Ok(removed)
    }

    async fn list_clients(&self) -> StoreResult<Vec<OAuthClient>> {
        let mut clients: Vec<_> = self.clients.read().await.values().cloned().collect();
        clients.sort_by_key(|c| c.created_at);
        Ok(clients)
    }

    async fn insert_auth_code(&self, code: AuthCode) -> StoreResult<()> {
        self.auth_codes.write().await.insert(code.code_hash.clone(), code);
        Ok(())
    }

    async fn consume_auth_code(
        &self,
        code_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<ConsumeOutcome> {
        // Check and flip under one write lock.
        let mut codes = self.auth_codes.write().await;
        let Some(code) = codes.get_mut(code_hash) else {
            return Ok(ConsumeOutcome::NotFound);
        };

        if code.consumed {
            return Ok(ConsumeOutcome::AlreadyConsumed(code.clone()));
        }
        if code.is_expired(now) {
            return Ok(ConsumeOutcome::Expired);
        }

        code.consumed = true;
        Ok(ConsumeOutcome::Consumed(code.clone()))
    }

    async fn insert_token_pair(
        &self,
        access: AccessToken,
        refresh: RefreshToken,
    ) -> StoreResult<()> {
        self.access_tokens.write().await.insert(access.token_hash.clone(), access);
        self.refresh_tokens.write().await.insert(refresh.token_hash.clone(), refresh);
        Ok(())
    }

    async fn get_access_token(&self, token_hash: &str) -> StoreResult<Option<AccessToken>> {
        Ok(self.access_tokens.read().await.get(token_hash).cloned())
    }

    async fn get_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self.refresh_tokens.read().await.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        client_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<RotateOutcome> {
        let mut tokens = self.refresh_tokens.write().await;
        let Some(token) = tokens.get_mut(token_hash) else {
            return Ok(RotateOutcome::NotFound);
        };

        if token.client_id != client_id {
            return Ok(RotateOutcome::ClientMismatch);
        }

        match token.state {
            RefreshState::Rotated => Ok(RotateOutcome::Reused(token.clone())),
            RefreshState::Revoked => Ok(RotateOutcome::Revoked),
            RefreshState::Active if token.is_expired(now) => Ok(RotateOutcome::Expired),
            RefreshState::Active => {
                let previous = token.clone();
                token.state = RefreshState::Rotated;
                Ok(RotateOutcome::Rotated(previous))
            }
        }
    }

    async fn revoke_access_token(&self, token_hash: &str) -> StoreResult<bool> {
        let mut tokens = self.access_tokens.write().await;
        Ok(tokens.get_mut(token_hash).is_some_and(|t| {
            let changed = !t.revoked;
            t.revoked = true;
            changed
        }))
    }

    async fn revoke_family(&self, family_id: Uuid) -> StoreResult<usize> {
        let mut count = 0;
        for token in self.access_tokens.write().await.values_mut() {
            if token.family_id == family_id && !token.revoked {
                token.revoked = true;
                count += 1;
            }
        }
        for token in self.refresh_tokens.write().await.values_mut() {
            if token.family_id == family_id && token.state != RefreshState::Revoked {
                token.state = RefreshState::Revoked;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn revoke_grants(&self, user_id: Uuid, client_id: Uuid) -> StoreResult<usize> {
        let mut count = 0;
        for token in self.access_tokens.write().await.values_mut() {
            if token.user_id == user_id && token.client_id == client_id && !token.revoked {
                token.revoked = true;
                count += 1;
            }
        }
        for token in self.refresh_tokens.write().await.values_mut() {
            if token.user_id == user_id
                && token.client_id == client_id
                && token.state != RefreshState::Revoked
            {
                token.state = RefreshState::Revoked;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StoreResult<PurgeCounts> {
        let mut counts = PurgeCounts::default();

        {
            let mut codes = self.auth_codes.write().await;
            let before = codes.len();
            codes.retain(|_, c| !c.is_expired(now));
            counts.auth_codes = before - codes.len();
        }
        {
            let mut tokens = self.access_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| !t.is_expired(now));
            counts.access_tokens = before - tokens.len();
        }
        {
            let mut tokens = self.refresh_tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, t| !t.is_expired(now));
            counts.refresh_tokens = before - tokens.len();
        }

        Ok(counts)
    }
}
