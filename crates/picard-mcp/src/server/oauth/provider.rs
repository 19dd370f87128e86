//! Authorization code issuer and token issuer/validator.
//!
//! All protocol decisions live here; the HTTP handlers only parse requests
//! and shape responses.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pkce;
use super::scope::{Scope, ScopeSet};
use super::store::OAuthRepository;
use super::types::{
    AccessToken, AuthCode, ConsumeOutcome, Identity, OAuthClient, RefreshState, RefreshToken,
    RotateOutcome, TokenPair,
};
use crate::config::{self, Config};
use crate::crypto::{constant_time_eq, hash_token, random_token};
use crate::error::{AuthError, OAuthError, ToolError};

/// Query parameters of an authorization request (RFC 6749 §4.1.1).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// An authorization request that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorization {
    pub client: OAuthClient,
    pub redirect_uri: String,
    pub scopes: ScopeSet,
    pub state: Option<String>,
    pub code_challenge: String,
}

impl ValidatedAuthorization {
    /// Redirect target carrying the issued code and the client's state.
    #[must_use]
    pub fn success_redirect(&self, code: &str) -> Option<String> {
        let mut params = vec![("code", code)];
        if let Some(state) = self.state.as_deref() {
            params.push(("state", state));
        }
        redirect_with(&self.redirect_uri, &params)
    }

    /// Redirect target telling the client the user declined.
    #[must_use]
    pub fn denied_redirect(&self) -> Option<String> {
        AuthorizeError {
            error: OAuthError::AccessDenied("The resource owner denied the request".into()),
            redirect_uri: Some(self.redirect_uri.clone()),
            state: self.state.clone(),
        }
        .redirect_url()
    }
}

/// A failed authorization request.
///
/// `redirect_uri` is set only once the client and redirect URI were verified;
/// otherwise the error must be shown directly and never redirected.
#[derive(Debug, Clone)]
pub struct AuthorizeError {
    pub error: OAuthError,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
}

impl AuthorizeError {
    fn direct(error: OAuthError) -> Self {
        Self { error, redirect_uri: None, state: None }
    }

    #[must_use]
    pub fn redirect_url(&self) -> Option<String> {
        let redirect_uri = self.redirect_uri.as_deref()?;
        let mut params =
            vec![("error", self.error.code()), ("error_description", self.error.description())];
        if let Some(state) = self.state.as_deref() {
            params.push(("state", state));
        }
        redirect_with(redirect_uri, &params)
    }
}

/// Append query parameters to a registered redirect URI.
#[must_use]
pub fn redirect_with(redirect_uri: &str, params: &[(&str, &str)]) -> Option<String> {
    let mut url = url::Url::parse(redirect_uri).ok()?;
    {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in params {
            pairs.append_pair(key, value);
        }
    }
    Some(url.into())
}

/// Client credentials from the form body or HTTP Basic.
#[derive(Clone, Default)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("has_secret", &self.client_secret.is_some())
            .finish()
    }
}

/// Client registration parameters (RFC 7591 subset).
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistration {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
    /// Space-delimited scopes; all supported scopes when absent.
    #[serde(default, alias = "scope")]
    pub scopes: Option<String>,
    #[serde(default)]
    pub is_confidential: bool,
}

/// Administrative changes to a client. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientUpdate {
    pub client_name: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
    #[serde(alias = "scope")]
    pub scopes: Option<String>,
}

/// A client plus its plaintext secret, shown once.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client: OAuthClient,
    pub client_secret: Option<String>,
}

/// Token introspection response (RFC 7662 §2.2).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Introspection {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<&'static str>,
}

/// The embedded OAuth 2.0 authorization server.
pub struct OAuthProvider {
    repo: Arc<dyn OAuthRepository>,
    auth_code_lifetime: Duration,
    access_token_lifetime: Duration,
    refresh_token_lifetime: Duration,
}

impl OAuthProvider {
    #[must_use]
    pub fn new(repo: Arc<dyn OAuthRepository>, config: &Config) -> Self {
        Self {
            repo,
            auth_code_lifetime: config
                .auth_code_lifetime
                .min(config::oauth::MAX_AUTH_CODE_LIFETIME),
            access_token_lifetime: config.access_token_lifetime,
            refresh_token_lifetime: config.refresh_token_lifetime,
        }
    }

    // ─── Client registry ─────────────────────────────────────────────────────

    /// Register a client. Confidential clients receive a generated secret.
    pub async fn register_client(
        &self,
        registration: ClientRegistration,
    ) -> Result<RegisteredClient, OAuthError> {
        let client_name = validate_client_name(&registration.client_name)?;
        let redirect_uris = validate_redirect_uris(registration.redirect_uris)?;
        let allowed_scopes = parse_client_scopes(registration.scopes.as_deref())?;

        let client_secret = registration.is_confidential.then(random_token);
        let now = Utc::now();
        let client = OAuthClient {
            client_id: Uuid::new_v4(),
            client_name,
            secret_hash: client_secret.as_deref().map(hash_token),
            redirect_uris,
            allowed_scopes,
            created_at: now,
            updated_at: now,
        };

        self.repo.insert_client(client.clone()).await?;

        tracing::info!(
            client_id = %client.client_id,
            confidential = client.is_confidential(),
            "Registered OAuth client"
        );

        Ok(RegisteredClient { client, client_secret })
    }

    pub async fn get_client(&self, client_id: Uuid) -> Result<Option<OAuthClient>, OAuthError> {
        Ok(self.repo.get_client(client_id).await?)
    }

    pub async fn list_clients(&self) -> Result<Vec<OAuthClient>, OAuthError> {
        Ok(self.repo.list_clients().await?)
    }

    pub async fn update_client(
        &self,
        client_id: Uuid,
        update: ClientUpdate,
    ) -> Result<OAuthClient, OAuthError> {
        let mut client = self
            .repo
            .get_client(client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_client("Unknown client"))?;

        if let Some(name) = update.client_name {
            client.client_name = validate_client_name(&name)?;
        }
        if let Some(uris) = update.redirect_uris {
            client.redirect_uris = validate_redirect_uris(uris)?;
        }
        if let Some(scopes) = update.scopes {
            client.allowed_scopes = parse_client_scopes(Some(&scopes))?;
        }
        client.updated_at = Utc::now();

        if !self.repo.update_client(client.clone()).await? {
            return Err(OAuthError::invalid_client("Unknown client"));
        }

        tracing::info!(client_id = %client_id, "Updated OAuth client");
        Ok(client)
    }

    pub async fn delete_client(&self, client_id: Uuid) -> Result<bool, OAuthError> {
        let deleted = self.repo.delete_client(client_id).await?;
        if deleted {
            tracing::info!(client_id = %client_id, "Deleted OAuth client");
        }
        Ok(deleted)
    }

    // ─── Authorization endpoint ──────────────────────────────────────────────

    /// Validate an authorization request.
    ///
    /// Unknown clients and unregistered redirect URIs are reported directly;
    /// everything after that is redirected back to the client with `state`.
    pub async fn validate_authorization(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<ValidatedAuthorization, AuthorizeError> {
        let client_id = request
            .client_id
            .as_deref()
            .and_then(|id| Uuid::parse_str(id).ok())
            .ok_or_else(|| AuthorizeError::direct(OAuthError::invalid_client("Unknown client")))?;

        let client = self
            .repo
            .get_client(client_id)
            .await
            .map_err(|e| AuthorizeError::direct(e.into()))?
            .ok_or_else(|| AuthorizeError::direct(OAuthError::invalid_client("Unknown client")))?;

        let redirect_uri = match request.redirect_uri.as_deref() {
            Some(uri) if client.allows_redirect(uri) => uri.to_string(),
            Some(_) => {
                return Err(AuthorizeError::direct(OAuthError::InvalidRedirectUri(
                    "redirect_uri is not registered for this client".into(),
                )));
            }
            None => {
                return Err(AuthorizeError::direct(OAuthError::InvalidRedirectUri(
                    "Missing redirect_uri".into(),
                )));
            }
        };

        let redirected = |error: OAuthError| AuthorizeError {
            error,
            redirect_uri: Some(redirect_uri.clone()),
            state: request.state.clone(),
        };

        if request.response_type.as_deref() != Some("code") {
            return Err(redirected(OAuthError::UnsupportedResponseType(
                "response_type must be 'code'".into(),
            )));
        }

        let requested = ScopeSet::parse(request.scope.as_deref().unwrap_or_default())
            .map_err(|e| redirected(OAuthError::invalid_scope(e)))?;
        let scopes = if requested.is_empty() {
            client.allowed_scopes.clone()
        } else if requested.is_subset(&client.allowed_scopes) {
            requested
        } else {
            return Err(redirected(OAuthError::invalid_scope(format!(
                "Requested scope exceeds the client's allowed scopes ({})",
                client.allowed_scopes
            ))));
        };

        let code_challenge = match request.code_challenge.as_deref() {
            Some(challenge) if pkce::is_well_formed(challenge) => challenge.to_string(),
            Some(_) => {
                return Err(redirected(OAuthError::invalid_request(
                    "code_challenge is malformed",
                )));
            }
            None => return Err(redirected(OAuthError::invalid_request("Missing code_challenge"))),
        };
        if request.code_challenge_method.as_deref() != Some(pkce::METHOD_S256) {
            return Err(redirected(OAuthError::invalid_request(
                "code_challenge_method must be 'S256'",
            )));
        }

        Ok(ValidatedAuthorization {
            client,
            redirect_uri,
            scopes,
            state: request.state.clone(),
            code_challenge,
        })
    }

    /// Issue a single-use code bound to the approving user.
    pub async fn issue_code(
        &self,
        authorization: &ValidatedAuthorization,
        user_id: Uuid,
    ) -> Result<String, OAuthError> {
        let code = random_token();
        let now = Utc::now();

        self.repo
            .insert_auth_code(AuthCode {
                code_hash: hash_token(&code),
                client_id: authorization.client.client_id,
                user_id,
                redirect_uri: authorization.redirect_uri.clone(),
                scopes: authorization.scopes.clone(),
                code_challenge: authorization.code_challenge.clone(),
                code_challenge_method: pkce::METHOD_S256.to_string(),
                expires_at: expiry(now, self.auth_code_lifetime),
                consumed: false,
            })
            .await?;

        tracing::info!(
            client_id = %authorization.client.client_id,
            user_id = %user_id,
            scope = %authorization.scopes,
            "Issued authorization code"
        );
        Ok(code)
    }

    // ─── Token endpoint ──────────────────────────────────────────────────────

    /// Authenticate the calling client. Confidential clients must present
    /// their secret.
    pub async fn authenticate_client(
        &self,
        credentials: &ClientCredentials,
    ) -> Result<OAuthClient, OAuthError> {
        let client_id = credentials
            .client_id
            .as_deref()
            .ok_or_else(|| OAuthError::invalid_client("Missing client_id"))?;
        let client_id =
            Uuid::parse_str(client_id).map_err(|_| OAuthError::invalid_client("Unknown client"))?;

        let client = self
            .repo
            .get_client(client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_client("Unknown client"))?;

        if let Some(expected) = client.secret_hash.as_deref() {
            let secret = credentials
                .client_secret
                .as_deref()
                .ok_or_else(|| OAuthError::invalid_client("Client authentication required"))?;
            if !constant_time_eq(hash_token(secret).as_bytes(), expected.as_bytes()) {
                tracing::warn!(target: "security", client_id = %client_id, "Client secret mismatch");
                return Err(OAuthError::invalid_client("Invalid client credentials"));
            }
        }

        Ok(client)
    }

    /// `authorization_code` grant.
    pub async fn exchange_code(
        &self,
        credentials: &ClientCredentials,
        code: Option<&str>,
        redirect_uri: Option<&str>,
        code_verifier: Option<&str>,
    ) -> Result<TokenPair, OAuthError> {
        let client = self.authenticate_client(credentials).await?;

        let code = code.ok_or_else(|| OAuthError::invalid_request("Missing code"))?;
        let redirect_uri =
            redirect_uri.ok_or_else(|| OAuthError::invalid_request("Missing redirect_uri"))?;
        let code_verifier =
            code_verifier.ok_or_else(|| OAuthError::invalid_request("Missing code_verifier"))?;

        let auth_code = match self.repo.consume_auth_code(&hash_token(code), Utc::now()).await? {
            ConsumeOutcome::Consumed(auth_code) => auth_code,
            ConsumeOutcome::AlreadyConsumed(previous) => {
                tracing::warn!(
                    target: "security",
                    client_id = %previous.client_id,
                    user_id = %previous.user_id,
                    "Authorization code replayed"
                );
                return Err(OAuthError::invalid_grant("Authorization code already used"));
            }
            ConsumeOutcome::Expired => {
                return Err(OAuthError::invalid_grant("Authorization code expired"));
            }
            ConsumeOutcome::NotFound => {
                return Err(OAuthError::invalid_grant("Invalid authorization code"));
            }
        };

        if auth_code.client_id != client.client_id {
            return Err(OAuthError::invalid_grant(
                "Authorization code was issued to another client",
            ));
        }
        if auth_code.redirect_uri != redirect_uri {
            return Err(OAuthError::invalid_grant("redirect_uri mismatch"));
        }
        if !pkce::verify_s256(code_verifier, &auth_code.code_challenge) {
            return Err(OAuthError::invalid_grant("PKCE verification failed"));
        }

        let pair = self
            .issue_tokens(client.client_id, auth_code.user_id, auth_code.scopes, Uuid::new_v4(), 0)
            .await?;

        tracing::info!(
            client_id = %client.client_id,
            user_id = %auth_code.user_id,
            "Issued token pair"
        );
        Ok(pair)
    }

    /// `refresh_token` grant with rotation and reuse detection.
    pub async fn refresh(
        &self,
        credentials: &ClientCredentials,
        refresh_token: Option<&str>,
        scope: Option<&str>,
    ) -> Result<TokenPair, OAuthError> {
        let client = self.authenticate_client(credentials).await?;
        let refresh_token =
            refresh_token.ok_or_else(|| OAuthError::invalid_request("Missing refresh_token"))?;
        let token_hash = hash_token(refresh_token);

        let narrowed = match scope.map(ScopeSet::parse).transpose() {
            Ok(Some(requested)) if !requested.is_empty() => Some(requested),
            Ok(_) => None,
            Err(e) => return Err(OAuthError::invalid_scope(e)),
        };
        // Only an active token is checked here; anything else goes through
        // rotation so a replayed token still trips reuse detection.
        if let Some(requested) = &narrowed {
            if let Some(current) = self.repo.get_refresh_token(&token_hash).await? {
                let active = current.state == RefreshState::Active;
                if active && !requested.is_subset(&current.scopes) {
                    return Err(OAuthError::invalid_scope(
                        "Requested scope exceeds the original grant",
                    ));
                }
            }
        }

        let previous = match self
            .repo
            .rotate_refresh_token(&token_hash, client.client_id, Utc::now())
            .await?
        {
            RotateOutcome::Rotated(previous) => previous,
            RotateOutcome::Reused(previous) => {
                let revoked =
                    self.repo.revoke_grants(previous.user_id, previous.client_id).await?;
                tracing::warn!(
                    target: "security",
                    client_id = %previous.client_id,
                    user_id = %previous.user_id,
                    family_id = %previous.family_id,
                    revoked,
                    "Refresh token reuse detected, revoked all grants for user and client"
                );
                return Err(OAuthError::invalid_grant(
                    "Refresh token reuse detected; re-authorization required",
                ));
            }
            RotateOutcome::Revoked => {
                return Err(OAuthError::invalid_grant("Refresh token revoked"));
            }
            RotateOutcome::Expired => {
                return Err(OAuthError::invalid_grant("Refresh token expired"));
            }
            RotateOutcome::ClientMismatch => {
                return Err(OAuthError::invalid_grant(
                    "Refresh token was issued to another client",
                ));
            }
            RotateOutcome::NotFound => {
                return Err(OAuthError::invalid_grant("Invalid refresh token"));
            }
        };

        let scopes = narrowed.unwrap_or(previous.scopes);
        let pair = self
            .issue_tokens(
                previous.client_id,
                previous.user_id,
                scopes,
                previous.family_id,
                previous.generation + 1,
            )
            .await?;

        tracing::info!(
            client_id = %previous.client_id,
            generation = previous.generation + 1,
            "Refreshed token pair"
        );
        Ok(pair)
    }

    async fn issue_tokens(
        &self,
        client_id: Uuid,
        user_id: Uuid,
        scopes: ScopeSet,
        family_id: Uuid,
        generation: u32,
    ) -> Result<TokenPair, OAuthError> {
        let access_token = random_token();
        let refresh_token = random_token();
        let now = Utc::now();

        self.repo
            .insert_token_pair(
                AccessToken {
                    token_hash: hash_token(&access_token),
                    client_id,
                    user_id,
                    scopes: scopes.clone(),
                    family_id,
                    expires_at: expiry(now, self.access_token_lifetime),
                    revoked: false,
                },
                RefreshToken {
                    token_hash: hash_token(&refresh_token),
                    client_id,
                    user_id,
                    scopes: scopes.clone(),
                    family_id,
                    generation,
                    expires_at: expiry(now, self.refresh_token_lifetime),
                    state: RefreshState::Active,
                },
            )
            .await?;

        Ok(TokenPair {
            access_token,
            refresh_token,
            expires_in: self.access_token_lifetime.as_secs(),
            scope: scopes,
        })
    }

    // ─── Resource access ─────────────────────────────────────────────────────

    /// Resolve a bearer token to the caller's identity.
    pub async fn authenticate_bearer(&self, token: &str) -> Result<Identity, ToolError> {
        if token.is_empty() {
            return Err(AuthError::invalid_token("Missing access token").into());
        }

        let record = self
            .repo
            .get_access_token(&hash_token(token))
            .await?
            .ok_or_else(|| AuthError::invalid_token("Unknown access token"))?;

        if record.revoked {
            return Err(AuthError::invalid_token("Access token revoked").into());
        }
        if record.is_expired(Utc::now()) {
            return Err(AuthError::invalid_token("Access token expired").into());
        }

        Ok(Identity { user_id: record.user_id, client_id: record.client_id, scopes: record.scopes })
    }

    /// Resolve a bearer token and require one scope.
    pub async fn validate_bearer(
        &self,
        token: &str,
        required: Scope,
    ) -> Result<Identity, ToolError> {
        let identity = self.authenticate_bearer(token).await?;
        identity.require(required)?;
        Ok(identity)
    }

    // ─── Revocation and introspection ────────────────────────────────────────

    /// RFC 7009 revocation. Unknown tokens and tokens of other clients are
    /// ignored so the response never reveals token validity.
    pub async fn revoke(
        &self,
        credentials: &ClientCredentials,
        token: &str,
    ) -> Result<(), OAuthError> {
        let client = self.authenticate_client(credentials).await?;
        let token_hash = hash_token(token);

        if let Some(access) = self.repo.get_access_token(&token_hash).await? {
            if access.client_id == client.client_id {
                self.repo.revoke_access_token(&token_hash).await?;
                tracing::info!(client_id = %client.client_id, "Revoked access token");
            }
            return Ok(());
        }

        if let Some(refresh) = self.repo.get_refresh_token(&token_hash).await? {
            if refresh.client_id == client.client_id {
                let count = self.repo.revoke_family(refresh.family_id).await?;
                tracing::info!(
                    client_id = %client.client_id,
                    family_id = %refresh.family_id,
                    count,
                    "Revoked refresh token family"
                );
            }
        }

        Ok(())
    }

    /// RFC 7662 introspection, limited to the caller's own tokens.
    pub async fn introspect(
        &self,
        credentials: &ClientCredentials,
        token: &str,
    ) -> Result<Introspection, OAuthError> {
        let client = self.authenticate_client(credentials).await?;
        let token_hash = hash_token(token);
        let now = Utc::now();

        if let Some(access) = self.repo.get_access_token(&token_hash).await? {
            if access.client_id == client.client_id && access.is_active(now) {
                return Ok(Introspection {
                    active: true,
                    scope: Some(access.scopes.to_string()),
                    client_id: Some(access.client_id),
                    sub: Some(access.user_id),
                    exp: Some(access.expires_at.timestamp()),
                    token_type: Some("access_token"),
                });
            }
            return Ok(Introspection::default());
        }

        if let Some(refresh) = self.repo.get_refresh_token(&token_hash).await? {
            if refresh.client_id == client.client_id
                && refresh.state == RefreshState::Active
                && !refresh.is_expired(now)
            {
                return Ok(Introspection {
                    active: true,
                    scope: Some(refresh.scopes.to_string()),
                    client_id: Some(refresh.client_id),
                    sub: Some(refresh.user_id),
                    exp: Some(refresh.expires_at.timestamp()),
                    token_type: Some("refresh_token"),
                });
            }
        }

        Ok(Introspection::default())
    }

    // ─── Maintenance ─────────────────────────────────────────────────────────

    /// Start background cleanup of expired codes and tokens.
    pub fn start_cleanup_task(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(config::oauth::CLEANUP_INTERVAL);
            loop {
                interval.tick().await;
                match self.repo.purge_expired(Utc::now()).await {
                    Ok(counts) => {
                        let total =
                            counts.auth_codes + counts.access_tokens + counts.refresh_tokens;
                        if total > 0 {
                            tracing::debug!(
                                auth_codes = counts.auth_codes,
                                access_tokens = counts.access_tokens,
                                refresh_tokens = counts.refresh_tokens,
                                "Cleaned up expired OAuth records"
                            );
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "OAuth cleanup failed"),
                }
            }
        });
    }
}

impl std::fmt::Debug for OAuthProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthProvider")
            .field("auth_code_lifetime", &self.auth_code_lifetime)
            .field("access_token_lifetime", &self.access_token_lifetime)
            .finish_non_exhaustive()
    }
}

fn expiry(now: DateTime<Utc>, lifetime: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(lifetime)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn validate_client_name(name: &str) -> Result<String, OAuthError> {
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 200 {
        return Err(OAuthError::InvalidClientMetadata(
            "client_name must be 1-200 characters".into(),
        ));
    }
    Ok(name.to_string())
}

fn validate_redirect_uris(uris: Vec<String>) -> Result<Vec<String>, OAuthError> {
    if uris.is_empty() {
        return Err(OAuthError::InvalidRedirectUri("redirect_uris is required".into()));
    }
    for uri in &uris {
        let parsed = url::Url::parse(uri)
            .map_err(|_| OAuthError::InvalidRedirectUri(format!("Invalid redirect URI: {uri}")))?;
        if parsed.fragment().is_some() {
            return Err(OAuthError::InvalidRedirectUri(format!(
                "Redirect URI must not contain a fragment: {uri}"
            )));
        }
    }
    Ok(uris)
}

fn parse_client_scopes(scopes: Option<&str>) -> Result<ScopeSet, OAuthError> {
    let parsed = ScopeSet::parse(scopes.unwrap_or_default()).map_err(OAuthError::invalid_scope)?;
    Ok(if parsed.is_empty() { ScopeSet::all() } else { parsed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::oauth::store::InMemoryOAuthStore;

    const REDIRECT: &str = "https://client.example.com/cb";
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

    fn provider() -> OAuthProvider {
        OAuthProvider::new(
            Arc::new(InMemoryOAuthStore::new()),
            &Config::for_testing("http://unused.localhost"),
        )
    }

    async fn register(
        provider: &OAuthProvider,
        scopes: &str,
        confidential: bool,
    ) -> RegisteredClient {
        provider
            .register_client(ClientRegistration {
                client_name: "Test App".into(),
                redirect_uris: vec![REDIRECT.into()],
                scopes: Some(scopes.into()),
                is_confidential: confidential,
            })
            .await
            .unwrap()
    }

    fn request(client_id: Uuid, scope: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            response_type: Some("code".into()),
            client_id: Some(client_id.to_string()),
            redirect_uri: Some(REDIRECT.into()),
            scope: Some(scope.into()),
            state: Some("xyz".into()),
            code_challenge: Some(pkce::challenge_s256(VERIFIER)),
            code_challenge_method: Some("S256".into()),
        }
    }

    fn creds(registered: &RegisteredClient) -> ClientCredentials {
        ClientCredentials {
            client_id: Some(registered.client.client_id.to_string()),
            client_secret: registered.client_secret.clone(),
        }
    }

    async fn issue(provider: &OAuthProvider, registered: &RegisteredClient) -> String {
        let validated = provider
            .validate_authorization(&request(registered.client.client_id, ""))
            .await
            .unwrap();
        provider.issue_code(&validated, Uuid::new_v4()).await.unwrap()
    }

    #[tokio::test]
    async fn test_scope_outside_client_allowance_is_invalid_scope() {
        let provider = provider();
        let registered = register(&provider, "memories:read memories:write", false).await;

        let err = provider
            .validate_authorization(&request(
                registered.client.client_id,
                "memories:read memories:admin",
            ))
            .await
            .unwrap_err();
        assert_eq!(err.error.code(), "invalid_scope");
        let redirect = err.redirect_url().unwrap();
        assert!(redirect.starts_with(REDIRECT));
        assert!(redirect.contains("error=invalid_scope"));
        assert!(redirect.contains("state=xyz"));

        let err = provider
            .validate_authorization(&request(registered.client.client_id, "profile:read"))
            .await
            .unwrap_err();
        assert_eq!(err.error.code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_unknown_client_and_redirect_are_not_redirected() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;

        let err = provider
            .validate_authorization(&request(Uuid::new_v4(), "memories:read"))
            .await
            .unwrap_err();
        assert_eq!(err.error.code(), "invalid_client");
        assert!(err.redirect_url().is_none());

        let mut bad_redirect = request(registered.client.client_id, "memories:read");
        bad_redirect.redirect_uri = Some("https://evil.example.com/cb".into());
        let err = provider.validate_authorization(&bad_redirect).await.unwrap_err();
        assert_eq!(err.error.code(), "invalid_redirect_uri");
        assert!(err.redirect_url().is_none());
    }

    #[tokio::test]
    async fn test_pkce_parameters_required() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;

        let mut req = request(registered.client.client_id, "memories:read");
        req.code_challenge_method = Some("plain".into());
        let err = provider.validate_authorization(&req).await.unwrap_err();
        assert_eq!(err.error.code(), "invalid_request");

        let mut req = request(registered.client.client_id, "memories:read");
        req.code_challenge = None;
        let err = provider.validate_authorization(&req).await.unwrap_err();
        assert_eq!(err.error.code(), "invalid_request");
    }

    #[tokio::test]
    async fn test_empty_scope_defaults_to_client_scopes() {
        let provider = provider();
        let registered = register(&provider, "memories:read memories:write", false).await;
        let validated = provider
            .validate_authorization(&request(registered.client.client_id, ""))
            .await
            .unwrap();
        assert_eq!(validated.scopes.to_string(), "memories:read memories:write");
    }

    #[tokio::test]
    async fn test_code_exchange_is_single_use() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;

        let pair = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();
        assert_eq!(pair.expires_in, 3600);

        let err = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_wrong_verifier_is_invalid_grant() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;

        let err = provider
            .exchange_code(
                &creds(&registered),
                Some(&code),
                Some(REDIRECT),
                Some("a-completely-different-verifier-that-is-long-enough-1234"),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_expired_code_is_invalid_grant() {
        let config = Config::for_testing("http://unused.localhost")
            .with_auth_code_lifetime(Duration::from_secs(0));
        let provider = OAuthProvider::new(Arc::new(InMemoryOAuthStore::new()), &config);
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;

        let err = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap_err();
        assert_eq!(err, OAuthError::invalid_grant("Authorization code expired"));
    }

    #[tokio::test]
    async fn test_confidential_client_requires_secret() {
        let provider = provider();
        let registered = register(&provider, "memories:read", true).await;
        assert!(registered.client_secret.is_some());
        let code = issue(&provider, &registered).await;

        let no_secret = ClientCredentials {
            client_id: Some(registered.client.client_id.to_string()),
            client_secret: None,
        };
        let err = provider
            .exchange_code(&no_secret, Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_client");

        let wrong_secret = ClientCredentials {
            client_id: Some(registered.client.client_id.to_string()),
            client_secret: Some("nope".into()),
        };
        let err = provider
            .exchange_code(&wrong_secret, Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_client");

        // The code was never consumed by the failed attempts.
        assert!(
            provider
                .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_reuse_revokes_family() {
        let provider = provider();
        let registered = register(&provider, "memories:read memories:write", false).await;
        let code = issue(&provider, &registered).await;
        let first = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();

        let second =
            provider.refresh(&creds(&registered), Some(&first.refresh_token), None).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(provider.authenticate_bearer(&second.access_token).await.is_ok());

        let err = provider
            .refresh(&creds(&registered), Some(&first.refresh_token), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_grant");

        // Reuse revoked the successor too.
        assert!(provider.authenticate_bearer(&second.access_token).await.is_err());
        let err = provider
            .refresh(&creds(&registered), Some(&second.refresh_token), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_reuse_with_scope_still_revokes_family() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;
        let first = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();
        let second =
            provider.refresh(&creds(&registered), Some(&first.refresh_token), None).await.unwrap();

        // A scope outside the grant must not short-circuit reuse detection.
        let err = provider
            .refresh(&creds(&registered), Some(&first.refresh_token), Some("memories:write"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_grant");

        assert!(provider.authenticate_bearer(&second.access_token).await.is_err());
        let err = provider
            .refresh(&creds(&registered), Some(&second.refresh_token), None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_grant");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_code_exchange_succeeds_once() {
        let provider = Arc::new(provider());
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let provider = Arc::clone(&provider);
                let creds = creds(&registered);
                let code = code.clone();
                tokio::spawn(async move {
                    provider
                        .exchange_code(&creds, Some(&code), Some(REDIRECT), Some(VERIFIER))
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let failure = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(failure.code(), "invalid_grant");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_refresh_rotates_once() {
        let provider = Arc::new(provider());
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;
        let pair = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let provider = Arc::clone(&provider);
                let creds = creds(&registered);
                let refresh_token = pair.refresh_token.clone();
                tokio::spawn(async move {
                    provider.refresh(&creds, Some(&refresh_token), None).await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap());
        }
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        let failure = results.into_iter().find_map(Result::err).unwrap();
        assert_eq!(failure.code(), "invalid_grant");
    }

    #[tokio::test]
    async fn test_refresh_can_narrow_but_not_widen() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;
        let pair = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();

        let err = provider
            .refresh(&creds(&registered), Some(&pair.refresh_token), Some("memories:write"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_scope");

        let narrowed = provider
            .refresh(&creds(&registered), Some(&pair.refresh_token), Some("memories:read"))
            .await
            .unwrap();
        assert_eq!(narrowed.scope.to_string(), "memories:read");
    }

    #[tokio::test]
    async fn test_bearer_scope_check() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;
        let pair = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();

        assert!(provider.validate_bearer(&pair.access_token, Scope::MemoriesRead).await.is_ok());
        let err =
            provider.validate_bearer(&pair.access_token, Scope::MemoriesWrite).await.unwrap_err();
        assert_eq!(err.code(), "insufficient_scope");

        let err = provider.validate_bearer("garbage", Scope::MemoriesRead).await.unwrap_err();
        assert_eq!(err.code(), "invalid_token");
    }

    #[tokio::test]
    async fn test_revoke_and_introspect() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let code = issue(&provider, &registered).await;
        let pair = provider
            .exchange_code(&creds(&registered), Some(&code), Some(REDIRECT), Some(VERIFIER))
            .await
            .unwrap();

        let info = provider.introspect(&creds(&registered), &pair.access_token).await.unwrap();
        assert!(info.active);
        assert_eq!(info.token_type, Some("access_token"));

        provider.revoke(&creds(&registered), &pair.refresh_token).await.unwrap();

        let info = provider.introspect(&creds(&registered), &pair.access_token).await.unwrap();
        assert!(!info.active);
        assert!(provider.authenticate_bearer(&pair.access_token).await.is_err());

        // Unknown tokens are accepted silently.
        assert!(provider.revoke(&creds(&registered), "unknown").await.is_ok());
    }

    #[tokio::test]
    async fn test_register_rejects_bad_metadata() {
        let provider = provider();
        let err = provider
            .register_client(ClientRegistration {
                client_name: "App".into(),
                redirect_uris: vec!["not a url".into()],
                scopes: None,
                is_confidential: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_redirect_uri");

        let err = provider
            .register_client(ClientRegistration {
                client_name: "App".into(),
                redirect_uris: vec![REDIRECT.into()],
                scopes: Some("memories:admin".into()),
                is_confidential: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_scope");
    }

    #[tokio::test]
    async fn test_update_and_delete_client() {
        let provider = provider();
        let registered = register(&provider, "memories:read", false).await;
        let id = registered.client.client_id;

        let update = ClientUpdate {
            scopes: Some("memories:read profile:read".into()),
            ..Default::default()
        };
        let updated = provider.update_client(id, update).await.unwrap();
        assert!(updated.allowed_scopes.contains(Scope::ProfileRead));

        assert!(provider.delete_client(id).await.unwrap());
        assert!(provider.get_client(id).await.unwrap().is_none());
        assert_eq!(
            provider.update_client(id, ClientUpdate::default()).await.unwrap_err().code(),
            "invalid_client"
        );
    }
}
