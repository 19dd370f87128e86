//! OAuth 2.0 endpoint handlers.
//!
//! Implements:
//! - RFC 9728: OAuth Protected Resource Metadata
//! - RFC 8414: OAuth Authorization Server Metadata
//! - RFC 7591: Dynamic Client Registration
//! - RFC 6749: Authorization and Token Endpoints
//! - RFC 7009 / RFC 7662: Revocation and Introspection
//!
//! Plus the administrator client registry under `/admin/clients`.

use std::sync::Arc;

use axum::{
    Form, Json,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::login::render_login_page;
use super::provider::{
    AuthorizationRequest, AuthorizeError, ClientCredentials, ClientRegistration, ClientUpdate,
    RegisteredClient, ValidatedAuthorization,
};
use super::scope::Scope;
use super::types::{ClientInfo, TokenPair};
use crate::crypto::constant_time_eq;
use crate::error::{AuthError, OAuthError, ToolError};
use crate::server::auth::bearer_token;
use crate::server::transport::HttpState;

fn scopes_supported() -> Vec<&'static str> {
    Scope::ALL.iter().map(Scope::as_str).collect()
}

// ─── RFC 9728: Protected Resource Metadata ───────────────────────────────────

/// `GET /.well-known/oauth-protected-resource`
pub async fn handle_protected_resource(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "resource": state.base_url,
        "authorization_servers": [state.base_url],
        "bearer_methods_supported": ["header"],
        "scopes_supported": scopes_supported()
    }))
}

// ─── RFC 8414: Authorization Server Metadata ─────────────────────────────────

/// `GET /.well-known/oauth-authorization-server`
pub async fn handle_auth_server_metadata(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "issuer": state.base_url,
        "authorization_endpoint": format!("{}/authorize", state.base_url),
        "token_endpoint": format!("{}/token", state.base_url),
        "registration_endpoint": format!("{}/register", state.base_url),
        "revocation_endpoint": format!("{}/revoke", state.base_url),
        "introspection_endpoint": format!("{}/introspect", state.base_url),
        "scopes_supported": scopes_supported(),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post", "client_secret_basic"],
        "code_challenge_methods_supported": ["S256"]
    }))
}

// ─── RFC 7591: Dynamic Client Registration ───────────────────────────────────

#[derive(Debug, Serialize)]
struct RegistrationResponse {
    #[serde(flatten)]
    client: ClientInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    client_secret: Option<String>,
    grant_types: [&'static str; 2],
    response_types: [&'static str; 1],
}

impl From<RegisteredClient> for RegistrationResponse {
    fn from(registered: RegisteredClient) -> Self {
        Self {
            client: ClientInfo::from(&registered.client),
            client_secret: registered.client_secret,
            grant_types: ["authorization_code", "refresh_token"],
            response_types: ["code"],
        }
    }
}

/// `POST /register`
pub async fn handle_register(
    State(state): State<Arc<HttpState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let registration: ClientRegistration = match serde_json::from_value(body) {
        Ok(registration) => registration,
        Err(e) => {
            return OAuthError::InvalidClientMetadata(e.to_string())
                .into_response_with_status(StatusCode::BAD_REQUEST);
        }
    };

    match state.oauth.register_client(registration).await {
        Ok(registered) => {
            (StatusCode::CREATED, Json(RegistrationResponse::from(registered))).into_response()
        }
        Err(e @ OAuthError::ServerError(_)) => e.into_response(),
        Err(e) => e.into_response_with_status(StatusCode::BAD_REQUEST),
    }
}

// ─── Authorization Endpoint ──────────────────────────────────────────────────

/// `GET /authorize`
///
/// With valid `Authorization: Basic` user credentials the code is issued
/// immediately; otherwise the login form is rendered.
pub async fn handle_authorize_get(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Query(request): Query<AuthorizationRequest>,
) -> Response {
    let authorization = match state.oauth.validate_authorization(&request).await {
        Ok(authorization) => authorization,
        Err(e) => return authorize_error(e),
    };

    let Some((username, password)) = basic_credentials(&headers) else {
        return login_page(&authorization, StatusCode::OK, None);
    };

    login_and_approve(&state, &authorization, &username, &password).await
}

/// Form posted by the login page.
#[derive(Debug, Default, Deserialize)]
pub struct AuthorizeForm {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// `approve` (default) or `deny`.
    pub action: Option<String>,
}

impl AuthorizeForm {
    fn authorization_request(&self) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: self.response_type.clone(),
            client_id: self.client_id.clone(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            state: self.state.clone(),
            code_challenge: self.code_challenge.clone(),
            code_challenge_method: self.code_challenge_method.clone(),
        }
    }
}

/// `POST /authorize`
pub async fn handle_authorize_post(
    State(state): State<Arc<HttpState>>,
    Form(form): Form<AuthorizeForm>,
) -> Response {
    let request = form.authorization_request();
    let authorization = match state.oauth.validate_authorization(&request).await {
        Ok(authorization) => authorization,
        Err(e) => return authorize_error(e),
    };

    if form.action.as_deref() == Some("deny") {
        tracing::info!(client_id = %authorization.client.client_id, "User denied authorization");
        return match authorization.denied_redirect() {
            Some(location) => redirect(location),
            None => OAuthError::ServerError("Invalid redirect URI".into()).into_response(),
        };
    }

    let (Some(username), Some(password)) = (form.username.as_deref(), form.password.as_deref())
    else {
        return login_page(
            &authorization,
            StatusCode::BAD_REQUEST,
            Some("Username and password are required"),
        );
    };

    login_and_approve(&state, &authorization, username, password).await
}

async fn login_and_approve(
    state: &HttpState,
    authorization: &ValidatedAuthorization,
    username: &str,
    password: &str,
) -> Response {
    if state.login_limiter.check().is_err() {
        tracing::warn!(target: "security", "Login rate limit exceeded");
        return login_page(
            authorization,
            StatusCode::TOO_MANY_REQUESTS,
            Some("Too many login attempts. Please wait a minute and try again."),
        );
    }

    let user = match state.users.authenticate(username, password).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            tracing::warn!(
                target: "security",
                client_id = %authorization.client.client_id,
                "Failed login at authorization endpoint"
            );
            return login_page(
                authorization,
                StatusCode::UNAUTHORIZED,
                Some("Invalid username or password"),
            );
        }
        Err(e) => return e.into_response(),
    };

    let code = match state.oauth.issue_code(authorization, user.id).await {
        Ok(code) => code,
        Err(e) => return e.into_response(),
    };

    match authorization.success_redirect(&code) {
        Some(location) => redirect(location),
        None => OAuthError::ServerError("Invalid redirect URI".into()).into_response(),
    }
}

fn authorize_error(error: AuthorizeError) -> Response {
    match error.redirect_url() {
        Some(location) => redirect(location),
        None => match error.error {
            e @ OAuthError::ServerError(_) => e.into_response(),
            e => e.into_response_with_status(StatusCode::BAD_REQUEST),
        },
    }
}

fn login_page(
    authorization: &ValidatedAuthorization,
    status: StatusCode,
    error_message: Option<&str>,
) -> Response {
    (status, Html(render_login_page(authorization, error_message))).into_response()
}

fn redirect(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

// ─── Token Endpoint ──────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
}

/// `POST /token`
///
/// Exchange an authorization code for tokens, or rotate a refresh token.
pub async fn handle_token(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(form): Form<TokenRequest>,
) -> Response {
    let credentials =
        client_credentials(&headers, form.client_id.clone(), form.client_secret.clone());

    let result = match form.grant_type.as_deref() {
        Some("authorization_code") => {
            state
                .oauth
                .exchange_code(
                    &credentials,
                    form.code.as_deref(),
                    form.redirect_uri.as_deref(),
                    form.code_verifier.as_deref(),
                )
                .await
        }
        Some("refresh_token") => {
            state
                .oauth
                .refresh(&credentials, form.refresh_token.as_deref(), form.scope.as_deref())
                .await
        }
        Some(other) => {
            Err(OAuthError::UnsupportedGrantType(format!("Unsupported grant_type: {other}")))
        }
        None => Err(OAuthError::invalid_request("Missing grant_type")),
    };

    match result {
        Ok(pair) => token_success(&pair),
        Err(e) => token_error(e),
    }
}

/// Build a token response with required OAuth 2.0 cache headers (RFC 6749 §5.1).
fn token_success(pair: &TokenPair) -> Response {
    let mut response = Json(serde_json::json!({
        "access_token": pair.access_token,
        "token_type": "Bearer",
        "expires_in": pair.expires_in,
        "refresh_token": pair.refresh_token,
        "scope": pair.scope
    }))
    .into_response();

    no_store(&mut response);
    response
}

fn token_error(error: OAuthError) -> Response {
    let mut response = error.into_response();
    no_store(&mut response);
    response
}

fn no_store(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

// ─── RFC 7009 / RFC 7662 ─────────────────────────────────────────────────────

/// Body of `/revoke` and `/introspect`.
#[derive(Debug, Default, Deserialize)]
pub struct TokenActionRequest {
    pub token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

/// `POST /revoke`
pub async fn handle_revoke(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(form): Form<TokenActionRequest>,
) -> Response {
    let credentials = client_credentials(&headers, form.client_id, form.client_secret);
    let Some(token) = form.token else {
        return OAuthError::invalid_request("Missing token").into_response();
    };

    match state.oauth.revoke(&credentials, &token).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /introspect`
pub async fn handle_introspect(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Form(form): Form<TokenActionRequest>,
) -> Response {
    let credentials = client_credentials(&headers, form.client_id, form.client_secret);
    let Some(token) = form.token else {
        return OAuthError::invalid_request("Missing token").into_response();
    };

    match state.oauth.introspect(&credentials, &token).await {
        Ok(introspection) => {
            let mut response = Json(introspection).into_response();
            no_store(&mut response);
            response
        }
        Err(e) => e.into_response(),
    }
}

// ─── Client administration ───────────────────────────────────────────────────

fn require_admin(state: &HttpState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ToolError::not_found("Administration API is disabled").into_response());
    };

    let presented = bearer_token(headers).unwrap_or_default();
    if constant_time_eq(presented.as_bytes(), expected.as_bytes()) {
        Ok(())
    } else {
        tracing::warn!(target: "security", "Rejected administration request");
        Err(AuthError::invalid_token("Invalid administration token").into_response())
    }
}

/// `GET /admin/clients`
pub async fn handle_admin_list_clients(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }

    match state.oauth.list_clients().await {
        Ok(clients) => {
            Json(clients.iter().map(ClientInfo::from).collect::<Vec<_>>()).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// `GET /admin/clients/{client_id}`
pub async fn handle_admin_get_client(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    let Ok(client_id) = Uuid::parse_str(&client_id) else {
        return unknown_client();
    };

    match state.oauth.get_client(client_id).await {
        Ok(Some(client)) => Json(ClientInfo::from(&client)).into_response(),
        Ok(None) => unknown_client(),
        Err(e) => e.into_response(),
    }
}

/// `PUT /admin/clients/{client_id}`
pub async fn handle_admin_update_client(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
    Json(update): Json<ClientUpdate>,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    let Ok(client_id) = Uuid::parse_str(&client_id) else {
        return unknown_client();
    };

    match state.oauth.update_client(client_id, update).await {
        Ok(client) => Json(ClientInfo::from(&client)).into_response(),
        Err(OAuthError::InvalidClient(_)) => unknown_client(),
        Err(e @ OAuthError::ServerError(_)) => e.into_response(),
        Err(e) => e.into_response_with_status(StatusCode::BAD_REQUEST),
    }
}

/// `DELETE /admin/clients/{client_id}`
///
/// Also removes every code and token issued to the client.
pub async fn handle_admin_delete_client(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    Path(client_id): Path<String>,
) -> Response {
    if let Err(rejection) = require_admin(&state, &headers) {
        return rejection;
    }
    let Ok(client_id) = Uuid::parse_str(&client_id) else {
        return unknown_client();
    };

    match state.oauth.delete_client(client_id).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => unknown_client(),
        Err(e) => e.into_response(),
    }
}

fn unknown_client() -> Response {
    ToolError::not_found("Unknown client").into_response()
}

// ─── Credentials ─────────────────────────────────────────────────────────────

/// Decode `Authorization: Basic` into a name/secret pair.
pub(crate) fn basic_credentials(headers: &HeaderMap) -> Option<(String, String)> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (name, secret) = decoded.split_once(':')?;
    Some((name.to_string(), secret.to_string()))
}

/// HTTP Basic takes precedence over form fields.
fn client_credentials(
    headers: &HeaderMap,
    client_id: Option<String>,
    client_secret: Option<String>,
) -> ClientCredentials {
    match basic_credentials(headers) {
        Some((id, secret)) => {
            ClientCredentials { client_id: Some(id), client_secret: Some(secret) }
        }
        None => ClientCredentials { client_id, client_secret },
    }
}
