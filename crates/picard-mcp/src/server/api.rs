//! REST endpoints for accounts and memory tools.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::Value;

use super::auth::Authenticated;
use super::oauth::Scope;
use super::transport::{HttpState, McpToolInfo};
use crate::error::{ToolError, ToolResult};
use crate::tools;
use crate::users::{UserProfile, UserUpdate};

/// Body of `POST /users`.
#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CreateUserRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreateUserRequest").field("username", &self.username).finish()
    }
}

/// `POST /users`: open sign-up for resource owners.
pub async fn handle_create_user(
    State(state): State<Arc<HttpState>>,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    match state.users.create_user(&body.username, &body.password, false).await {
        Ok(user) => (
            StatusCode::CREATED,
            Json(serde_json::json!({"id": user.id, "username": user.username})),
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /users/me`
pub async fn handle_current_user(
    State(state): State<Arc<HttpState>>,
    Authenticated(identity): Authenticated,
) -> ToolResult<Json<UserProfile>> {
    identity.require(Scope::ProfileRead)?;
    let user = state
        .users
        .get(identity.user_id)
        .await?
        .ok_or_else(|| ToolError::not_found("User no longer exists"))?;
    Ok(Json(UserProfile::from(&user)))
}

/// `PUT /users/me`: change the caller's username or password.
pub async fn handle_update_user(
    State(state): State<Arc<HttpState>>,
    Authenticated(identity): Authenticated,
    Json(body): Json<UserUpdate>,
) -> ToolResult<Json<UserProfile>> {
    identity.require(Scope::ProfileRead)?;
    let user = state.users.update_user(identity.user_id, body).await?;
    Ok(Json(UserProfile::from(&user)))
}

/// `GET /tools`
pub async fn handle_list_tools(State(state): State<Arc<HttpState>>) -> Json<Vec<McpToolInfo>> {
    Json(state.tools.iter().map(|t| McpToolInfo::from(t.as_ref())).collect())
}

/// `POST /tools/{name}`. An empty body means no arguments.
pub async fn handle_call_tool(
    State(state): State<Arc<HttpState>>,
    Authenticated(identity): Authenticated,
    Path(name): Path<String>,
    body: Bytes,
) -> ToolResult<Json<Value>> {
    let input = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Null
    } else {
        serde_json::from_slice(&body)?
    };
    let result = tools::dispatch(&state.tools, &state.ctx, &identity, &name, input).await?;
    Ok(Json(result))
}
