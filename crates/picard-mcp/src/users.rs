//! Resource-owner accounts.
//!
//! Users authenticate at the authorization endpoint; every issued code and
//! token is bound to one of them.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::crypto::{hash_password, verify_password};
use crate::error::{StoreError, StoreResult, ToolError, ToolResult};

/// Minimum password length.
pub const MIN_PASSWORD_LENGTH: usize = 8;

static USERNAME_SYNTAX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.\-]{3,64}$").ok());

/// A stored user account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// scrypt hash, see [`crate::crypto::hash_password`].
    pub password_hash: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Public view of a user.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            is_admin: user.is_admin,
            created_at: user.created_at,
        }
    }
}

/// Persistence for user accounts.
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user. Fails with [`StoreError::Conflict`] on a duplicate username.
    async fn insert_user(&self, user: User) -> StoreResult<()>;

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    /// Replace a user's username and password hash. Returns false if the user
    /// does not exist; a username held by someone else is a conflict.
    async fn update_user(&self, user: User) -> StoreResult<bool>;
}

/// In-memory user store.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Debug for InMemoryUserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryUserStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserStore {
    async fn insert_user(&self, user: User) -> StoreResult<()> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!("username '{}' is taken", user.username)));
        }
        users.insert(user.id, user);
        Ok(())
    }

    async fn get_user(&self, id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        Ok(self.users.read().await.values().find(|u| u.username == username).cloned())
    }

    async fn update_user(&self, user: User) -> StoreResult<bool> {
        let mut users = self.users.write().await;
        if users.values().any(|u| u.username == user.username && u.id != user.id) {
            return Err(StoreError::Conflict(format!("username '{}' is taken", user.username)));
        }
        match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = user;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// Changes to the caller's own account. `current_password` must match.
#[derive(Deserialize)]
pub struct UserUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub current_password: String,
}

impl std::fmt::Debug for UserUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserUpdate").field("username", &self.username).finish_non_exhaustive()
    }
}

/// Account creation and password verification.
#[derive(Clone)]
pub struct UserService {
    repo: Arc<dyn UserRepository>,
}

impl UserService {
    #[must_use]
    pub fn new(repo: Arc<dyn UserRepository>) -> Self {
        Self { repo }
    }

    /// Create an account.
    ///
    /// # Errors
    ///
    /// `validation` for a malformed username or short password, `conflict`
    /// when the username is taken.
    pub async fn create_user(
        &self,
        username: &str,
        password: &str,
        is_admin: bool,
    ) -> ToolResult<User> {
        let username = validate_username(username)?;
        validate_password(password)?;
        let password_hash = hash_blocking(password).await?;

        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            password_hash,
            is_admin,
            created_at: Utc::now(),
        };

        match self.repo.insert_user(user.clone()).await {
            Ok(()) => {}
            Err(StoreError::Conflict(message)) => return Err(ToolError::Conflict(message)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, username = %user.username, "Created user");
        Ok(user)
    }

    /// Verify a username/password pair. `Ok(None)` means bad credentials.
    pub async fn authenticate(&self, username: &str, password: &str) -> ToolResult<Option<User>> {
        let Some(user) = self.repo.find_by_username(username.trim()).await? else {
            return Ok(None);
        };

        let hash = user.password_hash.clone();
        let password = password.to_string();
        let valid = tokio::task::spawn_blocking(move || verify_password(&hash, &password))
            .await
            .map_err(|e| ToolError::internal(format!("password verification task failed: {e}")))??;

        Ok(valid.then_some(user))
    }

    pub async fn get(&self, id: Uuid) -> ToolResult<Option<User>> {
        Ok(self.repo.get_user(id).await?)
    }

    /// Change the caller's username and/or password.
    ///
    /// # Errors
    ///
    /// `permission_denied` when `current_password` is wrong, `validation`
    /// for a malformed new value, `conflict` when the username is taken.
    pub async fn update_user(&self, id: Uuid, update: UserUpdate) -> ToolResult<User> {
        let mut user = self
            .repo
            .get_user(id)
            .await?
            .ok_or_else(|| ToolError::not_found("User no longer exists"))?;

        let hash = user.password_hash.clone();
        let current = update.current_password;
        let valid = tokio::task::spawn_blocking(move || verify_password(&hash, &current))
            .await
            .map_err(|e| ToolError::internal(format!("password verification task failed: {e}")))??;
        if !valid {
            tracing::warn!(target: "security", user_id = %id, "Account update with wrong password");
            return Err(ToolError::permission_denied("Current password is incorrect"));
        }

        if let Some(username) = update.username.as_deref() {
            user.username = validate_username(username)?.to_string();
        }
        if let Some(password) = update.password.as_deref() {
            validate_password(password)?;
            user.password_hash = hash_blocking(password).await?;
        }

        match self.repo.update_user(user.clone()).await {
            Ok(true) => {}
            Ok(false) => return Err(ToolError::not_found("User no longer exists")),
            Err(StoreError::Conflict(message)) => return Err(ToolError::Conflict(message)),
            Err(e) => return Err(e.into()),
        }

        tracing::info!(user_id = %user.id, username = %user.username, "Updated user");
        Ok(user)
    }
}

fn validate_username(username: &str) -> ToolResult<&str> {
    let username = username.trim();
    if USERNAME_SYNTAX.as_ref().is_some_and(|re| re.is_match(username)) {
        Ok(username)
    } else {
        Err(ToolError::validation(
            "username",
            "must be 3-64 characters of letters, digits, '_', '.' or '-'",
        ))
    }
}

fn validate_password(password: &str) -> ToolResult<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ToolError::validation(
            "password",
            format!("must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }
    Ok(())
}

/// Runs scrypt on the blocking pool.
async fn hash_blocking(password: &str) -> ToolResult<String> {
    let password = password.to_string();
    Ok(tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| ToolError::internal(format!("password hashing task failed: {e}")))??)
}

impl std::fmt::Debug for UserService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> UserService {
        UserService::new(Arc::new(InMemoryUserStore::new()))
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let users = service();
        let alice = users.create_user("alice", "correct horse", false).await.unwrap();
        assert_ne!(alice.password_hash, "correct horse");

        let found = users.authenticate("alice", "correct horse").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(alice.id));

        assert!(users.authenticate("alice", "wrong password").await.unwrap().is_none());
        assert!(users.authenticate("nobody", "correct horse").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_username_conflicts() {
        let users = service();
        users.create_user("alice", "password-one", false).await.unwrap();
        let err = users.create_user("alice", "password-two", false).await.unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn test_update_requires_current_password() {
        let users = service();
        let alice = users.create_user("alice", "correct horse", false).await.unwrap();
        users.create_user("bob", "battery staple", false).await.unwrap();

        let wrong = UserUpdate {
            username: None,
            password: Some("a brand new one".into()),
            current_password: "not it".into(),
        };
        let err = users.update_user(alice.id, wrong).await.unwrap_err();
        assert_eq!(err.code(), "permission_denied");

        let taken = UserUpdate {
            username: Some("bob".into()),
            password: None,
            current_password: "correct horse".into(),
        };
        assert_eq!(users.update_user(alice.id, taken).await.unwrap_err().code(), "conflict");

        let change = UserUpdate {
            username: Some("alicia".into()),
            password: Some("a brand new one".into()),
            current_password: "correct horse".into(),
        };
        let updated = users.update_user(alice.id, change).await.unwrap();
        assert_eq!(updated.username, "alicia");
        assert!(users.authenticate("alicia", "correct horse").await.unwrap().is_none());
        assert!(users.authenticate("alicia", "a brand new one").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_validation() {
        let users = service();
        let err = users.create_user("a", "long enough", false).await.unwrap_err();
        assert_eq!(err.code(), "validation");
        let err = users.create_user("has space", "long enough", false).await.unwrap_err();
        assert_eq!(err.code(), "validation");
        let err = users.create_user("bob", "short", false).await.unwrap_err();
        assert_eq!(err.code(), "validation");
    }
}
