//! HTTP transport.
//!
//! One axum router serves the OAuth authorization server, the user and tool
//! REST endpoints, and the MCP JSON-RPC endpoint. Every protected route
//! resolves the caller through [`Authenticated`].

use std::borrow::Cow;
use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    Json, Router,
    http::StatusCode,
    extract::State,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::Repositories;
use super::api;
use super::auth::Authenticated;
use super::oauth::{Identity, OAuthProvider, handlers};
use crate::client::{CompletionProvider, EmbeddingProvider};
use crate::config::Config;
use crate::crypto::TextCipher;
use crate::memory::{MemoryService, QueryEngine};
use crate::tools::{self, McpTool, ToolContext};
use crate::users::UserService;

/// In-flight request cap for the whole router.
const MAX_CONCURRENT_REQUESTS: usize = 256;

/// JSON-RPC 2.0 request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
}

/// JSON-RPC 2.0 error.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    /// JSON-RPC version constant.
    const VERSION: &'static str = "2.0";

    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: Cow::Borrowed(Self::VERSION), result: Some(result), error: None, id }
    }

    #[must_use]
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: Cow::Borrowed(Self::VERSION),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
            id,
        }
    }

    /// Attach structured detail to an error response.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        if let Some(error) = self.error.as_mut() {
            error.data = Some(data);
        }
        self
    }
}

/// MCP tool info for tools/list response.
#[derive(Debug, Serialize)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

impl From<&dyn McpTool> for McpToolInfo {
    fn from(tool: &dyn McpTool) -> Self {
        Self {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            input_schema: tool.input_schema(),
        }
    }
}

/// Shared state for HTTP handlers.
pub struct HttpState {
    pub tools: Vec<Box<dyn McpTool>>,
    pub ctx: ToolContext,
    /// Issuer and base for metadata documents.
    pub base_url: String,
    pub oauth: Arc<OAuthProvider>,
    pub users: UserService,
    /// Bearer token for `/admin`; the API is disabled without one.
    pub admin_token: Option<String>,
    /// Server-wide limiter for login form submissions.
    pub login_limiter: DefaultDirectRateLimiter,
}

impl HttpState {
    /// Wire services over the given repositories and LLM providers.
    #[must_use]
    pub fn new(
        config: &Config,
        repos: Repositories,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
    ) -> Self {
        let users = UserService::new(repos.users);
        let memories = MemoryService::new(
            repos.memories,
            TextCipher::new(&config.encryption_key),
            embedder,
            config,
        );
        let queries = QueryEngine::new(memories.clone(), users.clone(), completer, config);
        let per_minute =
            NonZeroU32::new(config.login_attempts_per_minute).unwrap_or(NonZeroU32::MIN);

        Self {
            tools: tools::register_all_tools(),
            ctx: ToolContext::new(memories, queries),
            base_url: config.base_url.clone(),
            oauth: Arc::new(OAuthProvider::new(repos.oauth, config)),
            users,
            admin_token: config.admin_token.clone(),
            login_limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }
}

impl std::fmt::Debug for HttpState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpState")
            .field("base_url", &self.base_url)
            .field("tools", &self.tools.len())
            .field("admin_api", &self.admin_token.is_some())
            .finish_non_exhaustive()
    }
}

/// Create the HTTP router.
pub fn create_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Discovery
        .route(
            "/.well-known/oauth-protected-resource",
            get(handlers::handle_protected_resource),
        )
        .route(
            "/.well-known/oauth-authorization-server",
            get(handlers::handle_auth_server_metadata),
        )
        // Authorization server
        .route("/register", post(handlers::handle_register))
        .route(
            "/authorize",
            get(handlers::handle_authorize_get).post(handlers::handle_authorize_post),
        )
        .route("/token", post(handlers::handle_token))
        .route("/revoke", post(handlers::handle_revoke))
        .route("/introspect", post(handlers::handle_introspect))
        // Client administration
        .route("/admin/clients", get(handlers::handle_admin_list_clients))
        .route(
            "/admin/clients/{client_id}",
            get(handlers::handle_admin_get_client)
                .put(handlers::handle_admin_update_client)
                .delete(handlers::handle_admin_delete_client),
        )
        // Accounts and memory tools
        .route("/users", post(api::handle_create_user))
        .route("/users/me", get(api::handle_current_user).put(api::handle_update_user))
        .route("/tools", get(api::handle_list_tools))
        .route("/tools/{name}", post(api::handle_call_tool))
        // MCP JSON-RPC
        .route("/mcp", post(handle_mcp_post))
        .layer(ConcurrencyLimitLayer::new(MAX_CONCURRENT_REQUESTS))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "picard-mcp",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ready",
        "service": "picard-mcp",
        "version": env!("CARGO_PKG_VERSION"),
        "tools": state.tools.len()
    }))
}

/// Handle POST requests to /mcp.
async fn handle_mcp_post(
    State(state): State<Arc<HttpState>>,
    Authenticated(identity): Authenticated,
    Json(req): Json<JsonRpcRequest>,
) -> Response {
    tracing::debug!(method = %req.method, user_id = %identity.user_id, "Handling MCP request");

    // Notifications carry no id and get no body.
    let is_notification = req.id.is_none();

    let response = match req.method.as_str() {
        "initialize" => JsonRpcResponse::success(req.id, handle_initialize(&req.params)),
        "notifications/initialized" | "initialized" | "notifications/cancelled" => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::success(req.id, serde_json::json!({}))
        }
        "tools/list" => handle_tools_list(req.id, &state.tools),
        "tools/call" => handle_tools_call(req.id, &req.params, &state, &identity).await,
        "ping" => JsonRpcResponse::success(req.id, serde_json::json!({})),
        _ => {
            if is_notification {
                return StatusCode::ACCEPTED.into_response();
            }
            JsonRpcResponse::error(req.id, -32601, format!("Method not found: {}", req.method))
        }
    };

    Json(response).into_response()
}

fn handle_initialize(params: &Value) -> Value {
    let protocol_version =
        params.get("protocolVersion").and_then(|v| v.as_str()).unwrap_or("2025-03-26");

    tracing::info!("MCP initialize: protocol version {}", protocol_version);

    serde_json::json!({
        "protocolVersion": protocol_version,
        "capabilities": {
            "tools": {
                "listChanged": false
            }
        },
        "serverInfo": {
            "name": "picard-mcp",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

fn handle_tools_list(id: Option<Value>, tools: &[Box<dyn McpTool>]) -> JsonRpcResponse {
    let tool_list: Vec<McpToolInfo> = tools.iter().map(|t| McpToolInfo::from(t.as_ref())).collect();
    JsonRpcResponse::success(id, serde_json::json!({ "tools": tool_list }))
}

async fn handle_tools_call(
    id: Option<Value>,
    params: &Value,
    state: &HttpState,
    identity: &Identity,
) -> JsonRpcResponse {
    let Some(tool_name) = params.get("name").and_then(|v| v.as_str()) else {
        return JsonRpcResponse::error(id, -32602, "Missing 'name' parameter");
    };
    if tools::find_tool(&state.tools, tool_name).is_none() {
        return JsonRpcResponse::error(id, -32602, format!("Tool not found: {tool_name}"));
    }

    let arguments = params.get("arguments").cloned().unwrap_or_else(|| serde_json::json!({}));

    tracing::info!(tool = %tool_name, "Executing tool");

    match tools::dispatch(&state.tools, &state.ctx, identity, tool_name, arguments).await {
        Ok(result) => JsonRpcResponse::success(
            id,
            serde_json::json!({
                "content": [{
                    "type": "text",
                    "text": result.to_string()
                }],
                "structuredContent": result
            }),
        ),
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!(tool = %tool_name, error = %e, "Tool execution failed");
            } else {
                tracing::debug!(tool = %tool_name, error = %e, "Tool call rejected");
            }
            JsonRpcResponse::error(id, -32000, format!("Tool error: {}", e.to_user_message()))
                .with_data(serde_json::json!({
                    "code": e.code(),
                    "retryable": e.is_retryable()
                }))
        }
    }
}
