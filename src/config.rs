//! Configuration for the JMAP account, transports, and identity provider
//!
//! All configuration is loaded from environment variables prefixed with
//! `MAIL_JMAP_`. A single remote account is served; the identity-provider
//! settings are only required when the HTTP transport is used.

use std::env;
use std::env::VarError;
use std::net::SocketAddr;

use secrecy::SecretString;

use crate::errors::{AppError, AppResult};

const DEFAULT_BASE_URL: &str = "https://api.fastmail.com";
const DEFAULT_HTTP_BIND: &str = "127.0.0.1:8000";
const DEFAULT_MCP_PATH: &str = "/mcp";

/// Remote JMAP account configuration
///
/// The API token is stored using `SecretString` to prevent accidental logging.
#[derive(Debug, Clone)]
pub struct JmapAccountConfig {
    /// Base URL of the JMAP service; discovery happens at `/.well-known/jmap`
    pub base_url: String,
    /// Static bearer token for the JMAP API
    pub api_token: SecretString,
}

/// Identity provider verification parameters
///
/// Consumed by the bearer-token middleware in front of the HTTP transport.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Expected `iss` claim and advertised authorization server
    pub issuer_url: String,
    /// Location of the provider's JSON Web Key Set
    pub jwks_uri: String,
    /// Expected `aud` claim (or `client_id` for tokens without `aud`)
    pub audience: String,
    /// Public base URL of this server, used in resource metadata
    pub resource_url: String,
    /// Accepted JWT signing algorithms (e.g. `RS256`)
    pub algorithms: Vec<String>,
    /// Scopes advertised in protected resource metadata
    pub scopes_supported: Vec<String>,
    /// Key set cache lifetime in seconds
    pub jwks_ttl_seconds: u64,
}

/// Server-wide configuration
///
/// Cloned into the MCP handler and HTTP router via `Arc`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The single remote mail account
    pub account: JmapAccountConfig,
    /// TCP/TLS connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in milliseconds (discovery and method calls)
    pub request_timeout_ms: u64,
    /// Listen address for the HTTP transport
    pub http_bind: SocketAddr,
    /// Path the MCP endpoint is mounted at
    pub mcp_path: String,
    /// Identity provider settings (required for the HTTP transport)
    pub auth: Option<AuthConfig>,
}

impl ServerConfig {
    /// Load all configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if required environment variables are missing
    /// or malformed.
    ///
    /// # Example Environment
    ///
    /// ```text
    /// MAIL_JMAP_API_TOKEN=fmu1-...
    /// MAIL_JMAP_HTTP_BIND=127.0.0.1:8000
    /// MAIL_JMAP_AUTH_ISSUER_URL=https://cognito-idp.us-east-1.amazonaws.com/us-east-1_abc
    /// MAIL_JMAP_AUTH_JWKS_URI=https://cognito-idp.us-east-1.amazonaws.com/us-east-1_abc/.well-known/jwks.json
    /// MAIL_JMAP_AUTH_AUDIENCE=client-id
    /// MAIL_JMAP_RESOURCE_URL=https://mail.example.ts.net
    /// ```
    pub fn load_from_env() -> AppResult<Self> {
        Self::load_with(|key| env::var(key))
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn load_with<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let base_url = optional_env(&lookup, "MAIL_JMAP_BASE_URL")?
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        let base_url = normalize_base_url(&base_url, "MAIL_JMAP_BASE_URL")?;
        let api_token = required_env(&lookup, "MAIL_JMAP_API_TOKEN")?;

        let http_bind = optional_env(&lookup, "MAIL_JMAP_HTTP_BIND")?
            .unwrap_or_else(|| DEFAULT_HTTP_BIND.to_owned());
        let http_bind = http_bind.parse::<SocketAddr>().map_err(|_| {
            AppError::InvalidInput(format!(
                "invalid socket address in MAIL_JMAP_HTTP_BIND: '{http_bind}'"
            ))
        })?;

        let mcp_path = optional_env(&lookup, "MAIL_JMAP_MCP_PATH")?
            .unwrap_or_else(|| DEFAULT_MCP_PATH.to_owned());
        let mcp_path = normalize_mcp_path(&mcp_path)?;

        Ok(Self {
            account: JmapAccountConfig {
                base_url,
                api_token: SecretString::new(api_token.into()),
            },
            connect_timeout_ms: parse_u64_env(&lookup, "MAIL_JMAP_CONNECT_TIMEOUT_MS", 10_000)?,
            request_timeout_ms: parse_u64_env(&lookup, "MAIL_JMAP_REQUEST_TIMEOUT_MS", 30_000)?,
            http_bind,
            mcp_path,
            auth: load_auth(&lookup)?,
        })
    }

    /// Get identity provider settings, failing if they are absent
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when no `MAIL_JMAP_AUTH_*` settings were given.
    pub fn require_auth(&self) -> AppResult<&AuthConfig> {
        self.auth.as_ref().ok_or_else(|| {
            AppError::InvalidInput(
                "HTTP transport requires MAIL_JMAP_AUTH_ISSUER_URL, MAIL_JMAP_AUTH_JWKS_URI, \
                 MAIL_JMAP_AUTH_AUDIENCE and MAIL_JMAP_RESOURCE_URL"
                    .to_owned(),
            )
        })
    }
}

/// Load identity provider settings
///
/// The four core variables are all-or-nothing: none set means no auth
/// configuration, a partial set is an error.
fn load_auth<F>(lookup: &F) -> AppResult<Option<AuthConfig>>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    const KEYS: [&str; 4] = [
        "MAIL_JMAP_AUTH_ISSUER_URL",
        "MAIL_JMAP_AUTH_JWKS_URI",
        "MAIL_JMAP_AUTH_AUDIENCE",
        "MAIL_JMAP_RESOURCE_URL",
    ];

    let issuer_url = optional_env(lookup, KEYS[0])?;
    let jwks_uri = optional_env(lookup, KEYS[1])?;
    let audience = optional_env(lookup, KEYS[2])?;
    let resource_url = optional_env(lookup, KEYS[3])?;

    let present = [&issuer_url, &jwks_uri, &audience, &resource_url].map(Option::is_some);
    let (issuer_url, jwks_uri, audience, resource_url) =
        match (issuer_url, jwks_uri, audience, resource_url) {
            (Some(issuer), Some(jwks), Some(aud), Some(resource)) => (issuer, jwks, aud, resource),
            _ if !present.contains(&true) => return Ok(None),
            _ => {
                let missing = KEYS
                    .iter()
                    .zip(present)
                    .filter(|(_, set)| !set)
                    .map(|(key, _)| *key)
                    .collect::<Vec<_>>();
                return Err(AppError::InvalidInput(format!(
                    "missing required environment variable {}; identity settings must be set together",
                    missing.join(", ")
                )));
            }
        };
    let resource_url = normalize_base_url(&resource_url, "MAIL_JMAP_RESOURCE_URL")?;

    let mut algorithms = parse_list_env(lookup, "MAIL_JMAP_AUTH_ALGORITHMS")?;
    if algorithms.is_empty() {
        algorithms.push("RS256".to_owned());
    }

    Ok(Some(AuthConfig {
        issuer_url,
        jwks_uri,
        audience,
        resource_url,
        algorithms,
        scopes_supported: parse_list_env(lookup, "MAIL_JMAP_AUTH_SCOPES")?,
        jwks_ttl_seconds: parse_u64_env(lookup, "MAIL_JMAP_AUTH_JWKS_TTL_SECONDS", 300)?,
    }))
}

/// Read a required environment variable, returning error if missing or empty
fn required_env<F>(lookup: &F, key: &str) -> AppResult<String>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    optional_env(lookup, key)?.ok_or_else(|| {
        AppError::InvalidInput(format!("missing required environment variable {key}"))
    })
}

/// Read an optional environment variable, treating blank values as unset
fn optional_env<F>(lookup: &F, key: &str) -> AppResult<Option<String>>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match lookup(key) {
        Ok(v) if !v.trim().is_empty() => Ok(Some(v.trim().to_owned())),
        Ok(_) | Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(AppError::InvalidInput(format!(
            "environment variable {key} contains non-unicode data"
        ))),
    }
}

/// Parse a `u64` environment variable with default fallback
///
/// # Errors
///
/// Returns `InvalidInput` if the variable is set but not a valid `u64`.
fn parse_u64_env<F>(lookup: &F, key: &str, default: u64) -> AppResult<u64>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    match optional_env(lookup, key)? {
        Some(v) => v.parse::<u64>().map_err(|_| {
            AppError::InvalidInput(format!("invalid u64 environment variable {key}: '{v}'"))
        }),
        None => Ok(default),
    }
}

/// Parse a comma-separated list, dropping empty items
fn parse_list_env<F>(lookup: &F, key: &str) -> AppResult<Vec<String>>
where
    F: Fn(&str) -> Result<String, VarError>,
{
    Ok(optional_env(lookup, key)?
        .map(|v| parse_list_value(&v))
        .unwrap_or_default())
}

fn parse_list_value(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Require an http(s) URL and strip trailing slashes
fn normalize_base_url(value: &str, key: &str) -> AppResult<String> {
    let trimmed = value.trim().trim_end_matches('/');
    if !(trimmed.starts_with("https://") || trimmed.starts_with("http://")) {
        return Err(AppError::InvalidInput(format!(
            "{key} must be an http(s) URL: '{value}'"
        )));
    }
    Ok(trimmed.to_owned())
}

/// Ensure the MCP path has a single leading slash and no trailing slash
fn normalize_mcp_path(value: &str) -> AppResult<String> {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput(
            "MAIL_JMAP_MCP_PATH must not be the root path".to_owned(),
        ));
    }
    Ok(format!("/{trimmed}"))
}
