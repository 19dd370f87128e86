//! Bearer-authenticated calls to the memory tools.

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use uuid::Uuid;

use super::ErrorBody;
use super::flow::OAuthClientFlow;
use crate::error::IntegrationError;
use crate::models::{Permission, Persona};

/// Memory API client acting for one local account at a time.
///
/// A `401` triggers one refresh and one retry; anything else is returned as
/// [`IntegrationError::Api`].
#[derive(Clone)]
pub struct MemoryApiClient {
    flow: Arc<OAuthClientFlow>,
}

impl MemoryApiClient {
    #[must_use]
    pub fn new(flow: Arc<OAuthClientFlow>) -> Self {
        Self { flow }
    }

    /// Call a tool by name with JSON arguments.
    pub async fn call_tool(
        &self,
        account: &str,
        name: &str,
        arguments: Value,
    ) -> Result<Value, IntegrationError> {
        let url = self.flow.config().endpoint(&format!("/tools/{name}"));
        self.send(account, |http, token| http.post(&url).bearer_auth(token).json(&arguments)).await
    }

    pub async fn submit_memory(
        &self,
        account: &str,
        text: &str,
        permission: Permission,
    ) -> Result<Value, IntegrationError> {
        self.call_tool(account, "submit_memory", json!({"text": text, "permission": permission}))
            .await
    }

    pub async fn get_memories(&self, account: &str) -> Result<Value, IntegrationError> {
        self.call_tool(account, "get_memories", json!({})).await
    }

    pub async fn query_memory(
        &self,
        account: &str,
        query: &str,
        limit: Option<usize>,
    ) -> Result<Value, IntegrationError> {
        self.call_tool(account, "query_memory", json!({"query": query, "limit": limit})).await
    }

    pub async fn query_user(
        &self,
        account: &str,
        user_id: Uuid,
        prompt: &str,
        persona: Persona,
    ) -> Result<Value, IntegrationError> {
        self.call_tool(
            account,
            "query_user",
            json!({"user_id": user_id, "prompt": prompt, "persona": persona}),
        )
        .await
    }

    /// The authenticated user's profile (`profile:read`).
    pub async fn profile(&self, account: &str) -> Result<Value, IntegrationError> {
        let url = self.flow.config().endpoint("/users/me");
        self.send(account, |http, token| http.get(&url).bearer_auth(token)).await
    }

    async fn send<F>(&self, account: &str, build: F) -> Result<Value, IntegrationError>
    where
        F: Fn(&reqwest::Client, &str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.flow.access_token(account).await?;
        let mut response = build(self.flow.http(), &token).send().await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!(account, "Access token rejected; refreshing once");
            let refreshed = self.flow.refresh_rejected(account, &token).await?;
            response = build(self.flow.http(), &refreshed.access_token).send().await?;
        }

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = ErrorBody::read(response).await;
        Err(IntegrationError::Api {
            status: status.as_u16(),
            error: body.error,
            description: body.error_description,
            retryable: body.retryable,
        })
    }
}

impl std::fmt::Debug for MemoryApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryApiClient").field("flow", &self.flow).finish()
    }
}
