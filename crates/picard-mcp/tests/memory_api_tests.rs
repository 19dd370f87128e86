//! Memory tools over REST and MCP JSON-RPC: ownership, privacy, expiry,
//! scope enforcement and persona queries.

mod common;

use axum::http::{StatusCode, header};
use chrono::{Duration, Utc};
use serde_json::{Value, json};

use common::TestApp;

async fn submit(app: &TestApp, token: &str, text: &str, permission: &str) -> Value {
    let (status, body) = app
        .call_tool(token, "submit_memory", &json!({"text": text, "permission": permission}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_tools_require_bearer_token() {
    let app = TestApp::new();
    let (status, headers, body) =
        app.post_json("/tools/get_memories", None, &json!({})).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "invalid_token");
    let challenge = headers[header::WWW_AUTHENTICATE].to_str().unwrap();
    assert!(challenge.starts_with("Bearer"));

    let (status, _) = app.call_tool("not-a-token", "get_memories", &json!({})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_tool_listing_is_public() {
    let app = TestApp::new();
    let (status, _, body) = app.get("/tools", None).await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> =
        body.as_array().unwrap().iter().filter_map(|t| t["name"].as_str()).collect();
    assert_eq!(names.len(), 8);
    assert!(names.contains(&"submit_memory"));
    assert!(names.contains(&"query_user"));
}

#[tokio::test]
async fn test_read_only_token_cannot_write() {
    let app = TestApp::new();
    app.create_user("alice").await;
    let client = app.register_client(false, None).await;
    let tokens = app.obtain_tokens(&client, "alice", Some("memories:read")).await;
    let token = tokens["access_token"].as_str().unwrap();

    let (status, _, body) = app
        .post_json("/tools/submit_memory", Some(token), &json!({"text": "I like coffee"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "insufficient_scope");

    let (status, body) = app.call_tool(token, "get_memories", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);

    let (status, _, _) = app.get("/users/me", Some(token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

// =============================================================================
// Memory store
// =============================================================================

#[tokio::test]
async fn test_submit_and_get_own_memory() {
    let app = TestApp::new();
    let (alice_id, token) = app.user_with_token("alice").await;

    let created = submit(&app, &token, "I like coffee", "private").await;
    assert_eq!(created["owner_id"], alice_id.to_string());
    assert_eq!(created["permission"], "private");
    assert_eq!(created["is_expired"], false);

    let (status, body) =
        app.call_tool(&token, "get_memory", &json!({"memory_id": created["id"]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "I like coffee");
}

#[tokio::test]
async fn test_empty_body_means_no_arguments() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;

    let request = axum::http::Request::post("/tools/get_memories")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, _, body) = app.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_validation_errors() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;

    let (status, body) = app.call_tool(&token, "submit_memory", &json!({"text": "   "})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation");

    let long = "a".repeat(10_001);
    let (status, _) = app.call_tool(&token, "submit_memory", &json!({"text": long})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, _) = app
        .call_tool(&token, "submit_memory", &json!({"text": "hi", "permission": "friends"}))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app.call_tool(&token, "no_such_tool", &json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_private_memory_hidden_from_other_users() {
    let app = TestApp::new();
    let (_, alice) = app.user_with_token("alice").await;
    let (_, bob) = app.user_with_token("bob").await;

    let secret = submit(&app, &alice, "my secret coffee habit", "private").await;
    let id = json!({"memory_id": secret["id"]});

    let (status, body) = app.call_tool(&bob, "get_memory", &id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, _) = app
        .call_tool(&bob, "update_memory", &json!({"memory_id": secret["id"], "text": "mine now"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.call_tool(&bob, "delete_memory", &id).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) =
        app.call_tool(&bob, "get_memories", &json!({"filters": {"include_public": true}})).await;
    assert_eq!(body["count"], 0);
}

#[tokio::test]
async fn test_public_memory_visible_after_permission_change() {
    let app = TestApp::new();
    let (alice_id, alice) = app.user_with_token("alice").await;
    let (_, bob) = app.user_with_token("bob").await;

    let memory = submit(&app, &alice, "hiking in the alps", "private").await;
    let (status, body) = app
        .call_tool(
            &alice,
            "modify_permissions",
            &json!({"memory_id": memory["id"], "permission": "public"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["permission"], "public");

    let (status, body) =
        app.call_tool(&bob, "get_memory", &json!({"memory_id": memory["id"]})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "hiking in the alps");

    let (_, body) = app
        .call_tool(&bob, "get_memories", &json!({"filters": {"owner_id": alice_id}}))
        .await;
    assert_eq!(body["count"], 1);
}

#[tokio::test]
async fn test_update_and_delete_own_memory() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;
    let memory = submit(&app, &token, "old text", "private").await;

    let update = json!({"memory_id": memory["id"], "text": "new music"});
    let (status, body) = app.call_tool(&token, "update_memory", &update).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "new music");
    assert_eq!(body["created_at"], memory["created_at"]);

    let id = json!({"memory_id": memory["id"]});
    let (status, body) = app.call_tool(&token, "delete_memory", &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);

    let (status, _) = app.call_tool(&token, "get_memory", &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_expired_memories() {
    let app = TestApp::new();
    let (_, alice) = app.user_with_token("alice").await;
    let (_, bob) = app.user_with_token("bob").await;

    let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
    let (status, expired) = app
        .call_tool(
            &alice,
            "submit_memory",
            &json!({"text": "old coffee", "permission": "public", "expiration_date": past}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(expired["is_expired"], true);

    let (_, body) = app.call_tool(&alice, "get_memories", &json!({})).await;
    assert_eq!(body["count"], 0);

    let (_, body) =
        app.call_tool(&alice, "get_memories", &json!({"filters": {"include_expired": true}})).await;
    assert_eq!(body["count"], 1);

    // The owner can still read it directly; others cannot.
    let id = json!({"memory_id": expired["id"]});
    let (status, _) = app.call_tool(&alice, "get_memory", &id).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.call_tool(&bob, "get_memory", &id).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Expired memories never feed queries.
    let (_, body) =
        app.call_tool(&alice, "query_memory", &json!({"query": "coffee"})).await;
    assert_eq!(body["memories"].as_array().unwrap().len(), 0);
}

// =============================================================================
// Queries
// =============================================================================

#[tokio::test]
async fn test_query_memory_ranks_by_similarity() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;
    submit(&app, &token, "hiking every weekend", "private").await;
    submit(&app, &token, "coffee with oat milk", "private").await;
    submit(&app, &token, "learning rust", "private").await;

    let (status, body) =
        app.call_tool(&token, "query_memory", &json!({"query": "best coffee", "limit": 2})).await;
    assert_eq!(status, StatusCode::OK);

    let memories = body["memories"].as_array().unwrap();
    assert_eq!(memories.len(), 2);
    assert_eq!(memories[0]["text"], "coffee with oat milk");
    assert!((memories[0]["similarity"].as_f64().unwrap() - 1.0).abs() < 1e-6);

    let (status, _) =
        app.call_tool(&token, "query_memory", &json!({"query": "x", "limit": 0})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_query_user_uses_only_public_memories() {
    let app = TestApp::new();
    let (alice_id, alice) = app.user_with_token("alice").await;
    let (_, bob) = app.user_with_token("bob").await;
    submit(&app, &alice, "public coffee ritual", "public").await;
    submit(&app, &alice, "private coffee confession", "private").await;

    let (status, body) = app
        .call_tool(
            &bob,
            "query_user",
            &json!({"user_id": alice_id, "prompt": "What coffee do they like?", "persona": "concise"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["scope"], "public");
    assert_eq!(body["persona"], "concise");
    assert_eq!(body["memories"].as_array().unwrap().len(), 1);

    let response = body["response"].as_str().unwrap();
    assert!(response.contains("public coffee ritual"));
    assert!(!response.contains("confession"));
    assert!(response.contains("Be concise."));
}

#[tokio::test]
async fn test_query_user_sees_memory_once_made_public() {
    let app = TestApp::new();
    let (alice_id, alice) = app.user_with_token("alice").await;
    let (_, bob) = app.user_with_token("bob").await;
    let memory = submit(&app, &alice, "weekend hiking plans", "private").await;
    let query = json!({"user_id": alice_id, "prompt": "Where do they go hiking?"});

    let (_, body) = app.call_tool(&bob, "query_user", &query).await;
    assert_eq!(body["memories"].as_array().unwrap().len(), 0);

    let publish = json!({"memory_id": memory["id"], "permission": "public"});
    app.call_tool(&alice, "modify_permissions", &publish).await;

    let (_, body) = app.call_tool(&bob, "query_user", &query).await;
    assert_eq!(body["memories"][0]["id"], memory["id"]);
    assert!(body["response"].as_str().unwrap().contains("weekend hiking plans"));
}

#[tokio::test]
async fn test_query_user_self_includes_private() {
    let app = TestApp::new();
    let (alice_id, alice) = app.user_with_token("alice").await;
    submit(&app, &alice, "private coffee confession", "private").await;

    let (_, body) = app
        .call_tool(&alice, "query_user", &json!({"user_id": alice_id, "prompt": "coffee?"}))
        .await;
    assert_eq!(body["scope"], "self");
    assert!(body["response"].as_str().unwrap().contains("confession"));
}

#[tokio::test]
async fn test_query_user_without_public_memories_skips_model() {
    let app = TestApp::new();
    let (alice_id, _) = app.user_with_token("alice").await;
    let (_, bob) = app.user_with_token("bob").await;

    let (status, body) = app
        .call_tool(&bob, "query_user", &json!({"user_id": alice_id, "prompt": "anything?"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["response"].is_null());

    let (status, _) = app
        .call_tool(
            &bob,
            "query_user",
            &json!({"user_id": uuid::Uuid::new_v4(), "prompt": "anything?"}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// =============================================================================
// MCP JSON-RPC
// =============================================================================

async fn rpc(app: &TestApp, token: &str, body: Value) -> (StatusCode, Value) {
    let (status, _, body) = app.post_json("/mcp", Some(token), &body).await;
    (status, body)
}

#[tokio::test]
async fn test_mcp_requires_authentication() {
    let app = TestApp::new();
    let (status, _, _) = app
        .post_json("/mcp", None, &json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_mcp_initialize_and_list() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;

    let (status, body) = rpc(
        &app,
        &token,
        json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2025-03-26"}}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["serverInfo"]["name"], "picard-mcp");
    assert_eq!(body["result"]["protocolVersion"], "2025-03-26");

    let (status, _) =
        rpc(&app, &token, json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) =
        rpc(&app, &token, json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"})).await;
    let tools = body["result"]["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 8);
    assert!(tools.iter().all(|t| t["inputSchema"]["type"] == "object"));
}

#[tokio::test]
async fn test_mcp_tools_call() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;

    let (_, body) = rpc(
        &app,
        &token,
        json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {"name": "submit_memory", "arguments": {"text": "music festival"}}
        }),
    )
    .await;
    assert_eq!(body["id"], 3);
    assert_eq!(body["result"]["structuredContent"]["text"], "music festival");
    assert_eq!(body["result"]["content"][0]["type"], "text");

    let (_, body) = rpc(
        &app,
        &token,
        json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": {"name": "submit_memory", "arguments": {"text": ""}}
        }),
    )
    .await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["data"]["code"], "validation");
    assert_eq!(body["error"]["data"]["retryable"], false);
}

#[tokio::test]
async fn test_mcp_errors() {
    let app = TestApp::new();
    let (_, token) = app.user_with_token("alice").await;

    let (_, body) =
        rpc(&app, &token, json!({"jsonrpc": "2.0", "id": 5, "method": "resources/list"})).await;
    assert_eq!(body["error"]["code"], -32601);

    let (_, body) = rpc(
        &app,
        &token,
        json!({"jsonrpc": "2.0", "id": 6, "method": "tools/call", "params": {"name": "nope"}}),
    )
    .await;
    assert_eq!(body["error"]["code"], -32602);

    let (_, body) = rpc(
        &app,
        &token,
        json!({"jsonrpc": "2.0", "id": 7, "method": "tools/call", "params": {}}),
    )
    .await;
    assert_eq!(body["error"]["code"], -32602);
}

#[tokio::test]
async fn test_mcp_scope_enforced() {
    let app = TestApp::new();
    app.create_user("alice").await;
    let client = app.register_client(false, None).await;
    let tokens = app.obtain_tokens(&client, "alice", Some("memories:read")).await;
    let token = tokens["access_token"].as_str().unwrap();

    let (_, body) = rpc(
        &app,
        token,
        json!({
            "jsonrpc": "2.0",
            "id": 8,
            "method": "tools/call",
            "params": {"name": "submit_memory", "arguments": {"text": "coffee"}}
        }),
    )
    .await;
    assert_eq!(body["error"]["code"], -32000);
    assert_eq!(body["error"]["data"]["code"], "insufficient_scope");
}

// =============================================================================
// Accounts
// =============================================================================

#[tokio::test]
async fn test_signup_conflict_and_validation() {
    let app = TestApp::new();
    app.create_user("alice").await;

    let (status, _, body) = app
        .post_json("/users", None, &json!({"username": "alice", "password": "another password"}))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _, _) =
        app.post_json("/users", None, &json!({"username": "bob", "password": "short"})).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_update_own_account() {
    let app = TestApp::new();
    let (user_id, token) = app.user_with_token("alice").await;
    app.create_user("bob").await;

    let (status, _, body) = app
        .put_json(
            "/users/me",
            Some(&token),
            &json!({"password": "a brand new password", "current_password": "wrong"}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, _, body) = app
        .put_json(
            "/users/me",
            Some(&token),
            &json!({"username": "bob", "current_password": common::PASSWORD}),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _, body) = app
        .put_json(
            "/users/me",
            Some(&token),
            &json!({
                "username": "alicia",
                "password": "a brand new password",
                "current_password": common::PASSWORD
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["username"], "alicia");
    assert_eq!(body["id"], user_id.to_string());

    let user = app.state.users.authenticate("alicia", "a brand new password").await.unwrap();
    assert_eq!(user.map(|u| u.id), Some(user_id));

    let (status, _, _) = app
        .put_json("/users/me", None, &json!({"current_password": common::PASSWORD}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
