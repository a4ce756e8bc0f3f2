//! JMAP session discovery and caching
//!
//! Resolves the account identifier and endpoint URLs from the well-known
//! session resource, and keeps the result for the process lifetime until a
//! caller invalidates it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::body::truncate_chars;
use crate::config::JmapAccountConfig;
use crate::errors::{AppError, AppResult};
use crate::jmap::{CAPABILITY_CORE, CAPABILITY_MAIL};

/// Maximum characters of an error body kept in error messages
const BODY_EXCERPT_CHARS: usize = 300;

/// Cached connection facts for the remote mail account
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    /// Primary mail account identifier
    pub account_id: String,
    /// Method-call endpoint
    pub api_url: String,
    /// Blob download URL template
    pub download_url: Option<String>,
    /// Blob upload URL template
    pub upload_url: Option<String>,
    /// Push event source URL
    pub event_source_url: Option<String>,
    /// Session state string; compared against `sessionState` in responses
    pub state: Option<String>,
    /// Capability URIs advertised by the server
    pub capabilities: Vec<String>,
    /// Core limit on ids per `/get` call, if advertised
    pub max_objects_in_get: Option<u64>,
    /// Core limit on calls per request, if advertised
    pub max_calls_in_request: Option<u64>,
    /// When this descriptor was fetched
    pub fetched_at: DateTime<Utc>,
}

/// Raw session resource (RFC 8620 §2)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionResource {
    #[serde(default)]
    capabilities: BTreeMap<String, Value>,
    #[serde(default)]
    accounts: BTreeMap<String, Value>,
    #[serde(default)]
    primary_accounts: BTreeMap<String, String>,
    api_url: Option<String>,
    download_url: Option<String>,
    upload_url: Option<String>,
    event_source_url: Option<String>,
    state: Option<String>,
}

impl SessionDescriptor {
    /// Build a descriptor from a raw session resource
    ///
    /// Relative endpoint URLs are resolved against `base`.
    fn from_resource(resource: SessionResource, base: &Url) -> AppResult<Self> {
        if !resource.capabilities.contains_key(CAPABILITY_MAIL) {
            return Err(AppError::Discovery(
                "session does not advertise the mail capability".to_owned(),
            ));
        }

        let api_url = resource
            .api_url
            .as_deref()
            .ok_or_else(|| AppError::Discovery("session is missing apiUrl".to_owned()))?;
        let api_url = resolve_url(base, api_url)?;

        let account_id = resource
            .primary_accounts
            .get(CAPABILITY_MAIL)
            .cloned()
            .or_else(|| resource.accounts.keys().next().cloned())
            .ok_or_else(|| AppError::Discovery("session lists no accounts".to_owned()))?;

        let core = resource.capabilities.get(CAPABILITY_CORE);
        let core_limit = |key: &str| core.and_then(|c| c.get(key)).and_then(Value::as_u64);

        Ok(Self {
            account_id,
            api_url,
            download_url: resource.download_url,
            upload_url: resource.upload_url,
            event_source_url: resource.event_source_url,
            state: resource.state,
            max_objects_in_get: core_limit("maxObjectsInGet"),
            max_calls_in_request: core_limit("maxCallsInRequest"),
            capabilities: resource.capabilities.into_keys().collect(),
            fetched_at: Utc::now(),
        })
    }
}

/// Resolve a possibly relative endpoint URL against the discovery URL
fn resolve_url(base: &Url, raw: &str) -> AppResult<String> {
    base.join(raw)
        .map(String::from)
        .map_err(|e| AppError::Discovery(format!("invalid endpoint URL '{raw}': {e}")))
}

/// Fetches the session resource from the well-known discovery endpoint
#[derive(Debug, Clone)]
pub struct SessionDiscovery {
    http: Client,
    discovery_url: String,
    api_token: SecretString,
}

impl SessionDiscovery {
    pub fn new(http: Client, account: &JmapAccountConfig) -> Self {
        Self {
            http,
            discovery_url: format!("{}/.well-known/jmap", account.base_url),
            api_token: account.api_token.clone(),
        }
    }

    /// Fetch and parse the session resource
    ///
    /// # Errors
    ///
    /// Returns `Discovery` on network failure or timeout, non-success status,
    /// malformed payload, or a session without a usable mail account.
    pub async fn discover(&self) -> AppResult<SessionDescriptor> {
        let response = self
            .http
            .get(&self.discovery_url)
            .bearer_auth(self.api_token.expose_secret())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AppError::Discovery("session request timed out".to_owned())
                } else {
                    AppError::Discovery(format!("session request failed: {e}"))
                }
            })?;

        let status = response.status();
        // Redirects are followed, so the final URL is the base for relative endpoints.
        let final_url = response.url().clone();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Discovery(format!(
                "session endpoint returned {status}: {}",
                truncate_chars(body, BODY_EXCERPT_CHARS)
            )));
        }

        let resource: SessionResource = response
            .json()
            .await
            .map_err(|e| AppError::Discovery(format!("malformed session payload: {e}")))?;
        SessionDescriptor::from_resource(resource, &final_url)
    }
}

/// Source of the current session descriptor
///
/// The gateway holds this as a trait object so tests can substitute a fake
/// and observe refresh behavior.
#[async_trait]
pub trait SessionSource: Send + Sync {
    /// Return the cached descriptor, discovering one if the cache is empty
    async fn get_or_refresh(&self) -> AppResult<Arc<SessionDescriptor>>;

    /// Drop the cached descriptor so the next lookup re-discovers
    async fn invalidate(&self);
}

/// Process-wide session cache
///
/// A single async mutex guards read, replace, and clear; discovery runs
/// while the guard is held so concurrent callers share one refresh.
#[derive(Debug)]
pub struct SessionCache {
    discovery: SessionDiscovery,
    cached: Mutex<Option<Arc<SessionDescriptor>>>,
}

impl SessionCache {
    pub fn new(discovery: SessionDiscovery) -> Self {
        Self {
            discovery,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SessionSource for SessionCache {
    async fn get_or_refresh(&self) -> AppResult<Arc<SessionDescriptor>> {
        let mut cached = self.cached.lock().await;
        if let Some(session) = cached.as_ref() {
            return Ok(Arc::clone(session));
        }

        let session = Arc::new(self.discovery.discover().await?);
        info!(
            account_id = %session.account_id,
            api_url = %session.api_url,
            event_source_url = ?session.event_source_url,
            download_url = ?session.download_url,
            upload_url = ?session.upload_url,
            capabilities = session.capabilities.len(),
            max_objects_in_get = ?session.max_objects_in_get,
            fetched_at = %session.fetched_at,
            "JMAP session discovered"
        );
        *cached = Some(Arc::clone(&session));
        Ok(session)
    }

    async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            debug!("JMAP session cache invalidated");
        }
    }
}
