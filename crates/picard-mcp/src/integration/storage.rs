//! Token persistence for the consuming application.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::REFRESH_MARGIN;
use crate::error::IntegrationError;

/// A token pair held for one local account.
#[derive(Clone, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}

impl StoredTokens {
    /// Expired, or within [`REFRESH_MARGIN`] of expiring.
    #[must_use]
    pub fn is_expiring(&self, now: DateTime<Utc>) -> bool {
        let margin = chrono::Duration::from_std(REFRESH_MARGIN).unwrap_or_default();
        now + margin >= self.expires_at
    }
}

impl std::fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredTokens")
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

/// Where the consuming application keeps token pairs, keyed by its own
/// account identifier.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    async fn load(&self, account: &str) -> Result<Option<StoredTokens>, IntegrationError>;

    async fn save(&self, account: &str, tokens: StoredTokens) -> Result<(), IntegrationError>;

    async fn clear(&self, account: &str) -> Result<(), IntegrationError>;
}

/// In-memory token storage.
#[derive(Default)]
pub struct InMemoryTokenStorage {
    tokens: RwLock<HashMap<String, StoredTokens>>,
}

impl InMemoryTokenStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryTokenStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTokenStorage").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenStorage for InMemoryTokenStorage {
    async fn load(&self, account: &str) -> Result<Option<StoredTokens>, IntegrationError> {
        Ok(self.tokens.read().await.get(account).cloned())
    }

    async fn save(&self, account: &str, tokens: StoredTokens) -> Result<(), IntegrationError> {
        self.tokens.write().await.insert(account.to_string(), tokens);
        Ok(())
    }

    async fn clear(&self, account: &str) -> Result<(), IntegrationError> {
        self.tokens.write().await.remove(account);
        Ok(())
    }
}
