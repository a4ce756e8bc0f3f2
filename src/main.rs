//! mail-jmap-mcp-rs: Read-only JMAP email MCP server
//!
//! Exposes a single JMAP mail account to MCP clients through five read-only
//! tools. The streamable HTTP transport sits behind OAuth bearer
//! verification; the stdio transport is intended for local clients.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and transport selection
//! - [`config`]: Environment-driven configuration for the account, transports, and identity provider
//! - [`errors`]: Application error model with MCP error mapping
//! - [`session`]: JMAP session discovery and the shared session cache
//! - [`jmap`]: Method-call batches, result references, and response types
//! - [`gateway`]: Authenticated batch execution with one stale-session retry
//! - [`tools`]: Tool semantics mapped onto JMAP method calls
//! - [`server`]: MCP tool handlers, envelopes, and logging
//! - [`auth`]: Bearer-token verification against the provider's JWKS
//! - [`http`]: Streamable HTTP router, metadata routes, and graceful shutdown
//! - [`models`]: Input/output DTOs and schema-bearing types
//! - [`body`]: Body text selection, HTML sanitization, and header curation
//! - [`ids`]: JMAP identifier validation
//! - [`pagination`]: Opaque continuation cursors

mod auth;
mod body;
mod config;
mod errors;
mod gateway;
mod http;
mod ids;
mod jmap;
mod models;
mod pagination;
mod server;
mod session;
mod tools;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::auth::{AuthState, JwksVerifier};
use crate::gateway::JmapGateway;
use crate::server::MailJmapServer;
use crate::session::{SessionCache, SessionDiscovery};
use crate::tools::MailTools;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    /// Streamable HTTP with bearer-token verification
    Http,
    /// Newline-delimited JSON-RPC over stdin/stdout
    Stdio,
}

#[derive(Debug, Parser)]
#[command(version, about = "Read-only JMAP email MCP server")]
struct Cli {
    /// Transport to serve MCP over
    #[arg(long, value_enum, default_value_t = Transport::Http)]
    transport: Transport,
    /// Override MAIL_JMAP_HTTP_BIND
    #[arg(long)]
    bind: Option<SocketAddr>,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, and serves the MCP
/// server over the selected transport.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
///
/// # Example
///
/// ```no_run
/// MAIL_JMAP_API_TOKEN=fmu1-... \
/// cargo run -- --transport stdio
/// ```
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load_from_env()?;
    if let Some(bind) = cli.bind {
        config.http_bind = bind;
    }

    let http_client = gateway::http_client(&config)?;
    let sessions = Arc::new(SessionCache::new(SessionDiscovery::new(
        http_client.clone(),
        &config.account,
    )));
    let gateway = JmapGateway::new(http_client.clone(), &config.account, sessions);
    let server = MailJmapServer::new(MailTools::new(Arc::new(gateway)));

    match cli.transport {
        Transport::Stdio => {
            info!(base_url = %config.account.base_url, "serving MCP over stdio");
            let service = server.serve(stdio()).await?;
            service.waiting().await?;
        }
        Transport::Http => {
            let auth_config = config.require_auth()?;
            let verifier = JwksVerifier::new(http_client, auth_config)?;
            let auth = AuthState::new(Arc::new(verifier), auth_config, &config.mcp_path);
            let hosts = http::allowed_hosts(&auth_config.resource_url, config.http_bind);
            let router =
                http::build_router(auth, &config.mcp_path, http::mcp_service(server, hosts));
            info!(
                base_url = %config.account.base_url,
                mcp_path = %config.mcp_path,
                "serving MCP over streamable HTTP"
            );
            http::serve(config.http_bind, router).await?;
        }
    }
    Ok(())
}
