//! Shared fixtures: an in-memory server with deterministic LLM providers and
//! helpers that walk the OAuth flow over the router.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use tower::ServiceExt;
use url::Url;
use uuid::Uuid;

use picard_mcp::client::{CompletionProvider, EmbeddingProvider};
use picard_mcp::config::Config;
use picard_mcp::error::ClientResult;
use picard_mcp::server::Repositories;
use picard_mcp::server::oauth::pkce::{challenge_s256, generate_verifier};
use picard_mcp::server::transport::{HttpState, create_router};

pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const PASSWORD: &str = "correct horse battery";
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// One axis per keyword, so texts sharing a keyword score 1.0.
pub struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn embed(&self, text: &str) -> ClientResult<Vec<f32>> {
        Ok(["coffee", "hiking", "music", "rust"]
            .iter()
            .map(|word| if text.to_lowercase().contains(word) { 1.0 } else { 0.0 })
            .collect())
    }

    fn dimensions(&self) -> usize {
        4
    }
}

/// Echoes the prompt back so tests can see what the model was given.
pub struct EchoCompleter;

#[async_trait]
impl CompletionProvider for EchoCompleter {
    async fn complete(&self, prompt: &str) -> ClientResult<String> {
        Ok(format!("ECHO: {prompt}"))
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<HttpState>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(&Config::for_testing("http://127.0.0.1:9"))
    }

    pub fn with_config(config: &Config) -> Self {
        Self::with_repositories(config, Repositories::in_memory())
    }

    pub fn with_repositories(config: &Config, repos: Repositories) -> Self {
        let state = Arc::new(HttpState::new(
            config,
            repos,
            Arc::new(KeywordEmbedder),
            Arc::new(EchoCompleter),
        ));
        Self { router: create_router(Arc::clone(&state)), state }
    }

    /// Send one request and decode the body as JSON, falling back to a
    /// string for HTML and an empty body to null.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };
        (status, headers, body)
    }

    pub async fn get(&self, uri: &str, bearer: Option<&str>) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::get(uri);
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(
        &self,
        uri: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> (StatusCode, HeaderMap, Value) {
        self.send_json(Method::POST, uri, bearer, body).await
    }

    pub async fn put_json(
        &self,
        uri: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> (StatusCode, HeaderMap, Value) {
        self.send_json(Method::PUT, uri, bearer, body).await
    }

    async fn send_json(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: &Value,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    pub async fn post_form(
        &self,
        uri: &str,
        form: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, Value) {
        let encoded = serde_urlencoded::to_string(form).unwrap();
        let request = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .unwrap();
        self.send(request).await
    }

    /// Register a client through `/register`.
    pub async fn register_client(&self, confidential: bool, scope: Option<&str>) -> Client {
        let mut body = json!({
            "client_name": "Test App",
            "redirect_uris": [REDIRECT_URI],
            "is_confidential": confidential
        });
        if let Some(scope) = scope {
            body["scope"] = json!(scope);
        }
        let (status, _, body) = self.post_json("/register", None, &body).await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        Client {
            client_id: body["client_id"].as_str().unwrap().to_string(),
            client_secret: body["client_secret"].as_str().map(str::to_string),
        }
    }

    /// Sign up through `/users`.
    pub async fn create_user(&self, username: &str) -> Uuid {
        let (status, _, body) = self
            .post_json("/users", None, &json!({"username": username, "password": PASSWORD}))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["id"].as_str().unwrap().parse().unwrap()
    }

    /// `GET /authorize` with HTTP Basic user credentials; returns the redirect.
    pub async fn authorize(
        &self,
        client: &Client,
        username: &str,
        scope: Option<&str>,
        challenge: &str,
    ) -> (StatusCode, Option<Url>) {
        let mut url = Url::parse("http://localhost/authorize").unwrap();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "code")
                .append_pair("client_id", &client.client_id)
                .append_pair("redirect_uri", REDIRECT_URI)
                .append_pair("state", "xyz")
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(scope) = scope {
                pairs.append_pair("scope", scope);
            }
        }
        let uri = format!("{}?{}", url.path(), url.query().unwrap_or_default());
        let credentials = STANDARD.encode(format!("{username}:{PASSWORD}"));
        let request = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .body(Body::empty())
            .unwrap();

        let (status, headers, _) = self.send(request).await;
        let location = headers
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Url::parse(v).ok());
        (status, location)
    }

    /// Walk the whole code flow and return the token response.
    pub async fn obtain_tokens(
        &self,
        client: &Client,
        username: &str,
        scope: Option<&str>,
    ) -> Value {
        let verifier = generate_verifier();
        let (status, location) =
            self.authorize(client, username, scope, &challenge_s256(&verifier)).await;
        assert_eq!(status, StatusCode::FOUND);
        let code = query_param(&location.unwrap(), "code").unwrap();

        let (status, _, body) = self.exchange_code(client, &code, &verifier).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    pub async fn exchange_code(
        &self,
        client: &Client,
        code: &str,
        verifier: &str,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", REDIRECT_URI),
            ("code_verifier", verifier),
        ];
        client.push_credentials(&mut form);
        self.post_form("/token", &form).await
    }

    pub async fn refresh(
        &self,
        client: &Client,
        refresh_token: &str,
    ) -> (StatusCode, HeaderMap, Value) {
        let mut form = vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        client.push_credentials(&mut form);
        self.post_form("/token", &form).await
    }

    /// Call a tool over REST with a bearer token.
    pub async fn call_tool(&self, token: &str, name: &str, args: &Value) -> (StatusCode, Value) {
        let (status, _, body) = self.post_json(&format!("/tools/{name}"), Some(token), args).await;
        (status, body)
    }

    /// A user with a full-scope access token from a fresh public client.
    pub async fn user_with_token(&self, username: &str) -> (Uuid, String) {
        let user_id = self.create_user(username).await;
        let client = self.register_client(false, None).await;
        let tokens = self.obtain_tokens(&client, username, None).await;
        (user_id, tokens["access_token"].as_str().unwrap().to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Client {
    pub client_id: String,
    pub client_secret: Option<String>,
}

impl Client {
    pub fn push_credentials<'a>(&'a self, form: &mut Vec<(&'a str, &'a str)>) {
        form.push(("client_id", &self.client_id));
        if let Some(secret) = self.client_secret.as_deref() {
            form.push(("client_secret", secret));
        }
    }
}

pub fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}
