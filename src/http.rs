//! Streamable HTTP transport
//!
//! Mounts the rmcp streamable HTTP service behind the bearer middleware,
//! exposes protected resource metadata and a health probe without
//! authentication, and shuts down gracefully on SIGINT/SIGTERM.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::Router;
use axum::extract::Request;
use axum::http::Uri;
use axum::middleware::{Next, from_fn, from_fn_with_state};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use rmcp::transport::streamable_http_server::session::local::LocalSessionManager;
use rmcp::transport::streamable_http_server::{StreamableHttpServerConfig, StreamableHttpService};
use tokio::net::TcpListener;
use tower::{Layer, Service};
use tracing::{info, warn};

use crate::auth::{AuthState, RESOURCE_METADATA_PATH, require_bearer, resource_metadata};
use crate::server::MailJmapServer;

/// Wrap the MCP handler in an rmcp streamable HTTP service
///
/// Each MCP session gets a clone of `server`; clones share the session cache.
/// Requests whose `Host` is not in `allowed_hosts` are rejected by rmcp.
pub fn mcp_service(
    server: MailJmapServer,
    allowed_hosts: Vec<String>,
) -> StreamableHttpService<MailJmapServer, LocalSessionManager> {
    StreamableHttpService::new(
        move || Ok(server.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig::default().with_allowed_hosts(allowed_hosts),
    )
}

/// Hosts the MCP endpoint answers to
///
/// Loopback names, the bind address when it is not a wildcard, and the host
/// of the public resource URL the tunnel forwards from.
pub fn allowed_hosts(resource_url: &str, bind: SocketAddr) -> Vec<String> {
    let mut hosts = vec!["localhost".to_owned(), "127.0.0.1".to_owned(), "::1".to_owned()];
    let mut push = |host: String| {
        if !hosts.contains(&host) {
            hosts.push(host);
        }
    };
    if !bind.ip().is_unspecified() {
        push(bind.ip().to_string());
    }
    match reqwest::Url::parse(resource_url) {
        Ok(url) => {
            if let Some(host) = url.host_str() {
                push(host.trim_start_matches('[').trim_end_matches(']').to_owned());
            }
        }
        Err(e) => warn!(error = %e, resource_url, "resource URL has no usable host"),
    }
    hosts
}

/// Build the HTTP router
///
/// `mcp_path` requires a bearer token; the metadata documents (at the root
/// well-known path and the path-suffixed one) and `/healthz` do not.
pub fn build_router<S>(auth: AuthState, mcp_path: &str, mcp: S) -> Router
where
    S: Service<Request, Error = Infallible> + Clone + Send + Sync + 'static,
    S::Response: IntoResponse,
    S::Future: Send + 'static,
{
    let protected = Router::new()
        .nest_service(mcp_path, mcp)
        .route_layer(from_fn_with_state(auth.clone(), require_bearer));

    let metadata = Router::new()
        .route(RESOURCE_METADATA_PATH, get(resource_metadata))
        .route(
            &format!("{RESOURCE_METADATA_PATH}{mcp_path}"),
            get(resource_metadata),
        )
        .with_state(auth);

    protected
        .merge(metadata)
        .route("/healthz", get(healthz))
}

async fn healthz() -> &'static str {
    "ok"
}

/// Strip trailing slashes so `/mcp/` routes like `/mcp`
///
/// Must wrap the router (not be layered inside it) so the rewrite happens
/// before route matching.
pub async fn normalize_trailing_slash(mut request: Request, next: Next) -> Response {
    let rewritten = {
        let uri = request.uri();
        let path = uri.path();
        if path.len() > 1 && path.ends_with('/') {
            let trimmed = match path.trim_end_matches('/') {
                "" => "/",
                trimmed => trimmed,
            };
            Some(match uri.query() {
                Some(query) => format!("{trimmed}?{query}"),
                None => trimmed.to_owned(),
            })
        } else {
            None
        }
    };

    if let Some(path_and_query) = rewritten {
        let mut parts = request.uri().clone().into_parts();
        if let Ok(pq) = path_and_query.parse() {
            parts.path_and_query = Some(pq);
            if let Ok(uri) = Uri::from_parts(parts) {
                *request.uri_mut() = uri;
            }
        }
    }
    next.run(request).await
}

/// Serve `router` on `bind` until a shutdown signal arrives
///
/// # Errors
///
/// Returns the I/O error if binding or serving fails.
pub async fn serve(bind: SocketAddr, router: Router) -> std::io::Result<()> {
    let app = from_fn(normalize_trailing_slash).layer(router);
    let listener = TcpListener::bind(bind).await?;
    info!(%bind, "HTTP transport listening");
    axum::serve(listener, axum::ServiceExt::<Request>::into_make_service(app))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode, header};
    use axum::middleware::from_fn;
    use axum::routing::{MethodRouter, any};
    use tower::{Layer, ServiceExt};

    use super::{allowed_hosts, build_router, mcp_service, normalize_trailing_slash};
    use crate::auth::{AuthState, TokenVerifier, VerifiedIdentity};
    use crate::config::AuthConfig;
    use crate::errors::{AppError, AppResult};
    use crate::gateway::MethodCaller;
    use crate::jmap::{MethodCallBatch, MethodResponse};
    use crate::server::MailJmapServer;
    use crate::tools::MailTools;

    struct StaticVerifier;

    #[async_trait]
    impl TokenVerifier for StaticVerifier {
        async fn verify(&self, token: &str) -> AppResult<VerifiedIdentity> {
            match token {
                "good" => Ok(VerifiedIdentity {
                    subject: Some("user-1".to_owned()),
                    client_id: None,
                    scopes: Vec::new(),
                }),
                _ => Err(AppError::Unauthorized("bad token".to_owned())),
            }
        }
    }

    fn auth() -> AuthState {
        AuthState::new(
            Arc::new(StaticVerifier),
            &AuthConfig {
                issuer_url: "https://idp.example.com".to_owned(),
                jwks_uri: "https://idp.example.com/jwks".to_owned(),
                audience: "client".to_owned(),
                resource_url: "https://mail.example.com".to_owned(),
                algorithms: vec!["RS256".to_owned()],
                scopes_supported: Vec::new(),
                jwks_ttl_seconds: 300,
            },
            "/mcp",
        )
    }

    fn router() -> Router {
        let mcp: MethodRouter = any(|| async { "mcp" });
        build_router(auth(), "/mcp", mcp)
    }

    async fn status(app: Router, method: Method, uri: &str, token: Option<&str>) -> StatusCode {
        let mut request = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = request.body(Body::empty()).expect("request");
        from_fn(normalize_trailing_slash)
            .layer(app)
            .oneshot(request)
            .await
            .expect("response")
            .status()
    }

    #[tokio::test]
    async fn health_and_metadata_are_public() {
        assert_eq!(status(router(), Method::GET, "/healthz", None).await, StatusCode::OK);
        assert_eq!(
            status(router(), Method::GET, "/.well-known/oauth-protected-resource", None).await,
            StatusCode::OK
        );
        assert_eq!(
            status(router(), Method::GET, "/.well-known/oauth-protected-resource/mcp", None).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn mcp_endpoint_requires_bearer_token() {
        assert_eq!(
            status(router(), Method::POST, "/mcp", None).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(router(), Method::POST, "/mcp", Some("bad")).await,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status(router(), Method::POST, "/mcp", Some("good")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn trailing_slashes_are_normalized() {
        assert_eq!(status(router(), Method::GET, "/healthz/", None).await, StatusCode::OK);
        assert_eq!(
            status(router(), Method::POST, "/mcp/", Some("good")).await,
            StatusCode::OK
        );
        assert_eq!(
            status(router(), Method::POST, "/mcp//", None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        assert_eq!(
            status(router(), Method::GET, "/favicon.ico", None).await,
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn healthz_body_is_ok() {
        let response = router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let body = to_bytes(response.into_body(), 16).await.expect("body");
        assert_eq!(&body[..], b"ok");
    }

    struct Offline;

    #[async_trait]
    impl MethodCaller for Offline {
        async fn call(&self, _batch: &MethodCallBatch) -> AppResult<Vec<MethodResponse>> {
            Err(AppError::remote("offline", None, true))
        }
    }

    #[tokio::test]
    async fn real_mcp_service_sits_behind_auth() {
        let server = MailJmapServer::new(MailTools::new(Arc::new(Offline)));
        let hosts = allowed_hosts("https://mail.example.com", "127.0.0.1:8000".parse().expect("addr"));
        let app = build_router(auth(), "/mcp", mcp_service(server, hosts));
        assert_eq!(
            status(app, Method::POST, "/mcp", None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn allowed_hosts_cover_loopback_bind_and_resource() {
        let hosts = allowed_hosts(
            "https://mail.example.ts.net",
            "192.168.1.10:8000".parse().expect("addr"),
        );
        assert_eq!(
            hosts,
            ["localhost", "127.0.0.1", "::1", "192.168.1.10", "mail.example.ts.net"]
        );

        let hosts = allowed_hosts("https://mail.example.ts.net", "0.0.0.0:8000".parse().expect("addr"));
        assert!(!hosts.iter().any(|h| h == "0.0.0.0"));
    }

    async fn initialize_status(host: &str) -> StatusCode {
        let server = MailJmapServer::new(MailTools::new(Arc::new(Offline)));
        let hosts = allowed_hosts(
            "https://mail.example.ts.net",
            "127.0.0.1:8000".parse().expect("addr"),
        );
        let app = build_router(auth(), "/mcp", mcp_service(server, hosts));
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": { "name": "test", "version": "0.0.0" }
            }
        });
        let request = Request::builder()
            .method(Method::POST)
            .uri("/mcp")
            .header(header::HOST, host)
            .header(header::AUTHORIZATION, "Bearer good")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/json, text/event-stream")
            .body(Body::from(body.to_string()))
            .expect("request");
        app.oneshot(request).await.expect("response").status()
    }

    #[tokio::test]
    async fn tunnel_host_reaches_mcp_service() {
        assert_eq!(initialize_status("127.0.0.1:8000").await, StatusCode::OK);
        assert_eq!(initialize_status("mail.example.ts.net").await, StatusCode::OK);
        assert_eq!(initialize_status("evil.example.org").await, StatusCode::FORBIDDEN);
    }
}
