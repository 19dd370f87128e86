//! Bearer token extraction for protected routes.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};

use super::oauth::Identity;
use super::transport::HttpState;
use crate::error::{AuthError, ToolError};

/// The token from an `Authorization: Bearer ...` header. The scheme is
/// case-insensitive (RFC 7235 §2.1).
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Extractor resolving the bearer token to the caller's [`Identity`].
///
/// Scope checks are left to the handler, since they depend on the operation.
#[derive(Debug, Clone)]
pub struct Authenticated(pub Identity);

impl FromRequestParts<Arc<HttpState>> for Authenticated {
    type Rejection = ToolError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<HttpState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)
            .ok_or_else(|| AuthError::invalid_token("Missing bearer token"))?;
        let identity = state.oauth.authenticate_bearer(token).await?;
        Ok(Self(identity))
    }
}
