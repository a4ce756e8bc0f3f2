//! Bearer-token verification for the HTTP transport
//!
//! Inbound requests carry an access token issued by an external identity
//! provider. [`TokenVerifier`] checks it; [`JwksVerifier`] does so against the
//! provider's published key set. The `axum` middleware rejects requests that
//! fail verification, and unauthenticated clients discover where to obtain a
//! token from the OAuth protected resource metadata (RFC 9728).

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::{ACCESS_CONTROL_ALLOW_ORIGIN, AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::jwk::{Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::AuthConfig;
use crate::errors::{AppError, AppResult};

/// Path prefix of the protected resource metadata document
pub const RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// Minimum spacing between refreshes forced by unknown key ids
const FORCED_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Caller identity established from a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub subject: Option<String>,
    pub client_id: Option<String>,
    pub scopes: Vec<String>,
}

/// Checks an inbound bearer credential
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Verify `token`, returning the caller identity or `Unauthorized`
    async fn verify(&self, token: &str) -> AppResult<VerifiedIdentity>;
}

/// Claims read from access and ID tokens
#[derive(Debug, Deserialize)]
struct TokenClaims {
    sub: Option<String>,
    client_id: Option<String>,
    aud: Option<Value>,
    scope: Option<String>,
}

/// Verifies JWTs against a cached JSON Web Key Set
pub struct JwksVerifier {
    http: Client,
    jwks_uri: String,
    issuer: String,
    audience: String,
    algorithms: Vec<Algorithm>,
    ttl: Duration,
    keys: Mutex<KeyCache>,
}

#[derive(Default)]
struct KeyCache {
    keys: Option<(Instant, Arc<JwkSet>)>,
    last_forced: Option<Instant>,
}

impl JwksVerifier {
    /// Build a verifier from identity provider settings
    ///
    /// # Errors
    ///
    /// Returns `Internal` if an algorithm name is not recognized.
    pub fn new(http: Client, config: &AuthConfig) -> AppResult<Self> {
        let algorithms = config
            .algorithms
            .iter()
            .map(|name| {
                name.parse::<Algorithm>()
                    .map_err(|_| AppError::Internal(format!("unsupported JWT algorithm '{name}'")))
            })
            .collect::<AppResult<Vec<_>>>()?;
        if algorithms.is_empty() {
            return Err(AppError::Internal(
                "at least one JWT algorithm must be allowed".to_owned(),
            ));
        }

        Ok(Self {
            http,
            jwks_uri: config.jwks_uri.clone(),
            issuer: config.issuer_url.clone(),
            audience: config.audience.clone(),
            algorithms,
            ttl: Duration::from_secs(config.jwks_ttl_seconds),
            keys: Mutex::default(),
        })
    }

    /// Return the key set, fetching when stale, missing, or `force` is set
    ///
    /// Forced refreshes of a fresh set happen at most once per
    /// [`FORCED_REFRESH_INTERVAL`].
    async fn key_set(&self, force: bool) -> AppResult<Arc<JwkSet>> {
        let mut cache = self.keys.lock().await;
        let throttled = cache
            .last_forced
            .is_some_and(|at| at.elapsed() < FORCED_REFRESH_INTERVAL);
        if let Some((fetched_at, keys)) = cache.keys.as_ref()
            && fetched_at.elapsed() < self.ttl
            && (!force || throttled)
        {
            if force {
                debug!("forced JWKS refresh throttled");
            }
            return Ok(Arc::clone(keys));
        }
        if force {
            cache.last_forced = Some(Instant::now());
        }

        let response = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| AppError::Unauthorized(format!("key set unavailable: {e}")))?;
        if !response.status().is_success() {
            return Err(AppError::Unauthorized(format!(
                "key set endpoint returned {}",
                response.status()
            )));
        }
        let keys: JwkSet = response
            .json()
            .await
            .map_err(|e| AppError::Unauthorized(format!("malformed key set: {e}")))?;
        debug!(keys = keys.keys.len(), forced = force, "JWKS refreshed");

        let keys = Arc::new(keys);
        cache.keys = Some((Instant::now(), Arc::clone(&keys)));
        Ok(keys)
    }

    /// Find the signing key, refreshing once if `kid` is unknown
    async fn signing_key(&self, kid: Option<&str>) -> AppResult<Jwk> {
        let keys = self.key_set(false).await?;
        let Some(kid) = kid else {
            return match keys.keys.as_slice() {
                [only] => Ok(only.clone()),
                _ => Err(AppError::Unauthorized(
                    "token has no key id and the key set is ambiguous".to_owned(),
                )),
            };
        };
        if let Some(jwk) = keys.find(kid) {
            return Ok(jwk.clone());
        }
        self.key_set(true)
            .await?
            .find(kid)
            .cloned()
            .ok_or_else(|| AppError::Unauthorized(format!("unknown signing key '{kid}'")))
    }

    /// Accept `aud` matching the audience, or `client_id` when `aud` is absent
    fn audience_matches(&self, claims: &TokenClaims) -> bool {
        match &claims.aud {
            Some(Value::String(aud)) => *aud == self.audience,
            Some(Value::Array(items)) => items
                .iter()
                .any(|v| v.as_str() == Some(self.audience.as_str())),
            _ => claims.client_id.as_deref() == Some(self.audience.as_str()),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwksVerifier {
    async fn verify(&self, token: &str) -> AppResult<VerifiedIdentity> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AppError::Unauthorized(format!("malformed token: {e}")))?;
        if !self.algorithms.contains(&header.alg) {
            return Err(AppError::Unauthorized(format!(
                "token algorithm {:?} is not allowed",
                header.alg
            )));
        }

        let jwk = self.signing_key(header.kid.as_deref()).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AppError::Unauthorized(format!("unusable signing key: {e}")))?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss"]);
        validation.validate_nbf = true;
        validation.validate_aud = false;

        let claims = jsonwebtoken::decode::<TokenClaims>(token, &key, &validation)
            .map_err(|e| AppError::Unauthorized(format!("token rejected: {e}")))?
            .claims;
        if !self.audience_matches(&claims) {
            return Err(AppError::Unauthorized(
                "token audience does not match".to_owned(),
            ));
        }

        Ok(VerifiedIdentity {
            subject: claims.sub,
            client_id: claims.client_id,
            scopes: claims
                .scope
                .unwrap_or_default()
                .split_whitespace()
                .map(str::to_owned)
                .collect(),
        })
    }
}

/// OAuth 2.0 Protected Resource Metadata (RFC 9728)
#[derive(Debug, Clone, Serialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    pub authorization_servers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
    pub bearer_methods_supported: Vec<String>,
}

/// Shared state for the bearer middleware and metadata routes
#[derive(Clone)]
pub struct AuthState {
    verifier: Arc<dyn TokenVerifier>,
    metadata: Arc<ProtectedResourceMetadata>,
    metadata_url: String,
}

impl AuthState {
    pub fn new(verifier: Arc<dyn TokenVerifier>, config: &AuthConfig, mcp_path: &str) -> Self {
        let metadata = ProtectedResourceMetadata {
            resource: format!("{}{mcp_path}", config.resource_url),
            authorization_servers: vec![config.issuer_url.clone()],
            scopes_supported: config.scopes_supported.clone(),
            bearer_methods_supported: vec!["header".to_owned()],
        };
        Self {
            verifier,
            metadata: Arc::new(metadata),
            metadata_url: format!("{}{RESOURCE_METADATA_PATH}{mcp_path}", config.resource_url),
        }
    }

    fn challenge(&self, error: Option<&str>) -> Response {
        let value = match error {
            Some(error) => format!(
                "Bearer error=\"{error}\", resource_metadata=\"{}\"",
                self.metadata_url
            ),
            None => format!("Bearer resource_metadata=\"{}\"", self.metadata_url),
        };
        let mut response = (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        if let Ok(value) = HeaderValue::from_str(&value) {
            response.headers_mut().insert(WWW_AUTHENTICATE, value);
        }
        response
    }
}

/// Extract the token from an `Authorization: Bearer` header
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?.trim();
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

/// Reject requests without a valid bearer token
///
/// On success the [`VerifiedIdentity`] is stored in request extensions.
pub async fn require_bearer(
    State(state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(request.headers()) else {
        debug!(path = %request.uri().path(), "request without bearer token");
        return state.challenge(None);
    };

    let verified = state.verifier.verify(token).await;
    match verified {
        Ok(identity) => {
            debug!(
                subject = ?identity.subject,
                client_id = ?identity.client_id,
                scopes = ?identity.scopes,
                "bearer token accepted"
            );
            request.extensions_mut().insert(identity);
            next.run(request).await
        }
        Err(e) => {
            warn!(error = %e, "bearer token rejected");
            state.challenge(Some("invalid_token"))
        }
    }
}

/// Serve the protected resource metadata document
///
/// Browser-based clients fetch this cross-origin before authenticating.
pub async fn resource_metadata(State(state): State<AuthState>) -> impl IntoResponse {
    (
        [(ACCESS_CONTROL_ALLOW_ORIGIN, "*")],
        Json(state.metadata.as_ref().clone()),
    )
}
