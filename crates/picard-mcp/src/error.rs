//! Error types for the Picard memory server.
//!
//! Each layer has its own `thiserror` enum. The HTTP-facing ones carry a stable
//! machine-readable `code()` and a `status()` mapping so handlers never invent
//! their own error strings.

use std::time::Duration;

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};

use crate::server::oauth::Scope;

/// Errors from the LLM HTTP client layer.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    /// HTTP transport error (connection, DNS, TLS, etc.)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Middleware error
    #[error("Middleware error: {0}")]
    Middleware(#[from] reqwest_middleware::Error),

    /// Rate limited by the provider (429 response)
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Suggested wait time before retry
        retry_after: Duration,
    },

    /// Resource not found (404 response)
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Description of the missing resource
        resource: String,
    },

    /// Invalid request parameters (400 response)
    #[error("Bad request: {message}")]
    BadRequest {
        /// Error message from API
        message: String,
    },

    /// Request timeout
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// JSON parsing error
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Response was well-formed JSON but not what we asked for.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Server error (5xx response)
    #[error("Server error ({status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Error message
        message: String,
    },

    /// Unexpected HTTP status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body or message
        message: String,
    },
}

impl ClientError {
    /// Create a rate limited error with retry-after duration.
    #[must_use]
    pub fn rate_limited(seconds: u64) -> Self {
        Self::RateLimited { retry_after: Duration::from_secs(seconds) }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    /// Create a bad request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }

    /// Create a server error.
    #[must_use]
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server { status, message: message.into() }
    }

    /// Create an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout(_) | Self::Server { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Middleware(_) => true,
            _ => false,
        }
    }

    /// Get the retry-after duration if this is a rate limit error.
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Errors from the persistence layer.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint violated.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl StoreError {
    #[must_use]
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::Corrupt(message.into())
    }
}

/// Errors from encryption and hashing.
#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed")]
    Decrypt,

    #[error("Invalid encoding: {0}")]
    Encoding(String),

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

/// OAuth 2.0 protocol errors (RFC 6749 §4.1.2.1 and §5.2).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum OAuthError {
    #[error("invalid_request: {0}")]
    InvalidRequest(String),

    #[error("invalid_client: {0}")]
    InvalidClient(String),

    #[error("invalid_redirect_uri: {0}")]
    InvalidRedirectUri(String),

    #[error("invalid_scope: {0}")]
    InvalidScope(String),

    #[error("invalid_grant: {0}")]
    InvalidGrant(String),

    #[error("unsupported_grant_type: {0}")]
    UnsupportedGrantType(String),

    #[error("unsupported_response_type: {0}")]
    UnsupportedResponseType(String),

    #[error("access_denied: {0}")]
    AccessDenied(String),

    #[error("invalid_client_metadata: {0}")]
    InvalidClientMetadata(String),

    #[error("server_error: {0}")]
    ServerError(String),
}

impl OAuthError {
    #[must_use]
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest(description.into())
    }

    #[must_use]
    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::InvalidClient(description.into())
    }

    #[must_use]
    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidGrant(description.into())
    }

    #[must_use]
    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::InvalidScope(description.into())
    }

    /// The OAuth error code sent on the wire.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::InvalidClient(_) => "invalid_client",
            Self::InvalidRedirectUri(_) => "invalid_redirect_uri",
            Self::InvalidScope(_) => "invalid_scope",
            Self::InvalidGrant(_) => "invalid_grant",
            Self::UnsupportedGrantType(_) => "unsupported_grant_type",
            Self::UnsupportedResponseType(_) => "unsupported_response_type",
            Self::AccessDenied(_) => "access_denied",
            Self::InvalidClientMetadata(_) => "invalid_client_metadata",
            Self::ServerError(_) => "server_error",
        }
    }

    /// Human-readable `error_description`.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::InvalidRequest(d)
            | Self::InvalidClient(d)
            | Self::InvalidRedirectUri(d)
            | Self::InvalidScope(d)
            | Self::InvalidGrant(d)
            | Self::UnsupportedGrantType(d)
            | Self::UnsupportedResponseType(d)
            | Self::AccessDenied(d)
            | Self::InvalidClientMetadata(d)
            | Self::ServerError(d) => d,
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidClient(_) | Self::AccessDenied(_) => StatusCode::UNAUTHORIZED,
            Self::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    /// Build the JSON error response with an explicit status.
    #[must_use]
    pub fn into_response_with_status(self, status: StatusCode) -> Response {
        (
            status,
            Json(serde_json::json!({
                "error": self.code(),
                "error_description": self.description()
            })),
        )
            .into_response()
    }
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "OAuth store failure");
        Self::ServerError("Temporary storage failure".to_string())
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        self.into_response_with_status(status)
    }
}

/// Bearer token failures on protected resources (RFC 6750 §3.1).
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown, expired, revoked or malformed token.
    #[error("invalid_token: {0}")]
    InvalidToken(String),

    /// Valid token without the scope the operation needs.
    #[error("insufficient_scope: requires {required}")]
    InsufficientScope { required: Scope },
}

impl AuthError {
    #[must_use]
    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::InvalidToken(description.into())
    }

    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientScope { .. } => "insufficient_scope",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Value of the `WWW-Authenticate` challenge header.
    #[must_use]
    pub fn challenge(&self) -> String {
        match self {
            Self::InvalidToken(description) => format!(
                r#"Bearer realm="picard", error="invalid_token", error_description="{}""#,
                description.replace('"', "'")
            ),
            Self::InsufficientScope { required } => {
                format!(r#"Bearer realm="picard", error="insufficient_scope", scope="{required}""#)
            }
        }
    }
}

/// Errors from memory operations, user accounts and protected endpoints.
#[derive(thiserror::Error, Debug)]
pub enum ToolError {
    /// Input validation failed
    #[error("Validation error: {message}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Validation error message
        message: String,
    },

    /// Requester may not see or change the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Unknown memory, user or tool.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Embedding or completion provider failed.
    #[error("Upstream unavailable: {0}")]
    Upstream(#[from] ClientError),

    /// Bearer authentication failed.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Encryption or hashing failure.
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    /// Create a validation error.
    #[must_use]
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation { field: field.into(), message: message.into() }
    }

    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Stable error code for JSON bodies.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => "validation",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Upstream(_) => "upstream_unavailable",
            Self::Auth(e) => e.code(),
            Self::Storage(_) | Self::Crypto(_) | Self::Internal(_) => "server_error",
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::Serialization(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Auth(e) => e.status(),
            Self::Storage(_) | Self::Crypto(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Upstream failures are always worth retrying; nothing was written.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }

    /// Convert to a user-friendly message. Internal details stay in the logs.
    #[must_use]
    pub fn to_user_message(&self) -> String {
        match self {
            Self::Upstream(ClientError::RateLimited { retry_after }) => {
                format!(
                    "The language model provider is rate limiting requests. Please retry in {:?}.",
                    retry_after
                )
            }
            Self::Upstream(_) => {
                "The language model provider is unavailable. Please retry shortly.".to_string()
            }
            Self::Validation { field, message } => {
                format!("Invalid input for '{field}': {message}")
            }
            Self::Serialization(e) => format!("Invalid input: {e}"),
            Self::Storage(_) | Self::Crypto(_) | Self::Internal(_) => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ToolError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, code = self.code(), "Request failed");
        }

        let mut response = (
            status,
            Json(serde_json::json!({
                "error": self.code(),
                "error_description": self.to_user_message(),
                "retryable": self.is_retryable()
            })),
        )
            .into_response();

        if let Self::Auth(auth) = &self {
            if let Ok(value) = HeaderValue::from_str(&auth.challenge()) {
                response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
            }
        }
        response
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ToolError::Auth(self).into_response()
    }
}

/// Errors seen by an application consuming the memory API.
#[derive(thiserror::Error, Debug)]
pub enum IntegrationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The callback's `state` does not belong to the pending authorization.
    #[error("OAuth state mismatch")]
    StateMismatch,

    /// The callback carried neither a code nor an error.
    #[error("Callback is missing the authorization code")]
    MissingCode,

    /// The resource owner or the server refused authorization.
    #[error("Authorization denied: {error}")]
    AuthorizationDenied { error: String, description: Option<String> },

    /// The token endpoint rejected a grant.
    #[error("Token endpoint returned {error} ({status})")]
    TokenEndpoint { status: u16, error: String, description: Option<String> },

    /// No tokens are stored for this account; start a new authorization.
    #[error("Not authorized")]
    NotAuthorized,

    /// The memory API returned an error body.
    #[error("Memory API returned {error} ({status})")]
    Api { status: u16, error: String, description: Option<String>, retryable: bool },

    #[error("Token storage error: {0}")]
    Storage(String),
}

impl IntegrationError {
    /// True when the caller should send the user through authorization again.
    #[must_use]
    pub fn requires_reauthorization(&self) -> bool {
        match self {
            Self::NotAuthorized => true,
            Self::TokenEndpoint { error, .. } => error == "invalid_grant",
            Self::Api { status, .. } => *status == 401,
            _ => false,
        }
    }
}

/// Result type alias for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type alias for tool operations.
pub type ToolResult<T> = Result<T, ToolError>;
