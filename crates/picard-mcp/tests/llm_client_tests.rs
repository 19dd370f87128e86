//! Mock-based tests for the OpenAI-compatible client and for upstream
//! failures surfacing through the memory tools.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::TestApp;
use picard_mcp::client::{CompletionProvider, EmbeddingProvider, LlmClient};
use picard_mcp::config::Config;
use picard_mcp::error::ClientError;
use picard_mcp::server::Repositories;
use picard_mcp::server::transport::{HttpState, create_router};

fn embedding_body(values: &[f32]) -> serde_json::Value {
    json!({"object": "list", "data": [{"object": "embedding", "index": 0, "embedding": values}]})
}

fn client_for(server: &MockServer) -> LlmClient {
    LlmClient::new(&Config::for_testing(&server.uri())).unwrap()
}

// =============================================================================
// Embeddings
// =============================================================================

#[tokio::test]
async fn test_embedding_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .and(header("authorization", "Bearer test-key"))
        .and(body_partial_json(json!({
            "model": "text-embedding-3-small",
            "input": "I like coffee",
            "dimensions": 8
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.5; 8])))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let embedding = client.embed("I like coffee").await.unwrap();
    assert_eq!(embedding.len(), 8);
    assert_eq!(client.dimensions(), 8);
}

#[tokio::test]
async fn test_embedding_dimension_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.5; 3])))
        .mount(&server)
        .await;

    let err = client_for(&server).embed("text").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_embedding_empty_data() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
        .mount(&server)
        .await;

    let err = client_for(&server).embed("text").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_embedding_cache_hits_skip_upstream() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.25; 8])))
        .expect(1)
        .mount(&server)
        .await;

    let mut config = Config::for_testing(&server.uri());
    config.cache_ttl = std::time::Duration::from_secs(60);
    config.cache_max_size = 100;
    let client = LlmClient::new(&config).unwrap();

    let first = client.embed("same text").await.unwrap();
    let second = client.embed("same text").await.unwrap();
    assert_eq!(first, second);
}

// =============================================================================
// Completions
// =============================================================================

#[tokio::test]
async fn test_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({
            "model": "gpt-4o-mini",
            "messages": [{"role": "user", "content": "Who am I?"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "A coffee lover."}}]
        })))
        .mount(&server)
        .await;

    let answer = client_for(&server).complete("Who am I?").await.unwrap();
    assert_eq!(answer, "A coffee lover.");
}

#[tokio::test]
async fn test_completion_empty_content() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "  "}}]
        })))
        .mount(&server)
        .await;

    let err = client_for(&server).complete("hi").await.unwrap_err();
    assert!(matches!(err, ClientError::InvalidResponse(_)));
}

// =============================================================================
// Status mapping
// =============================================================================

#[tokio::test]
async fn test_rate_limit_maps_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let err = client_for(&server).embed("text").await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.retry_after(), Some(std::time::Duration::from_secs(7)));
}

#[tokio::test]
async fn test_server_and_client_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad prompt"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.embed("text").await.unwrap_err();
    assert!(matches!(err, ClientError::Server { status: 503, .. }));

    let err = client.complete("text").await.unwrap_err();
    assert!(matches!(err, ClientError::BadRequest { .. }));
    assert!(!err.is_retryable());
}

// =============================================================================
// Through the tools
// =============================================================================

#[tokio::test]
async fn test_embedding_outage_writes_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/embeddings"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let config = Config::for_testing(&server.uri());
    let llm = Arc::new(LlmClient::new(&config).unwrap());
    let state = Arc::new(HttpState::new(&config, Repositories::in_memory(), llm.clone(), llm));
    let app = TestApp { router: create_router(Arc::clone(&state)), state };
    let (_, token) = app.user_with_token("alice").await;

    let (status, body) = app.call_tool(&token, "submit_memory", &json!({"text": "coffee"})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "upstream_unavailable");
    assert_eq!(body["retryable"], true);

    let (status, body) = app.call_tool(&token, "get_memories", &json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], 0);
}
