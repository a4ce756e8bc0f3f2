//! Remote call gateway for JMAP method-call batches
//!
//! Sends a batch to the API endpoint named by the current session, correlates
//! responses back to calls by call ID, and absorbs exactly one session refresh
//! when the remote side reports the cached session as stale.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{debug, warn};

use crate::body::truncate_chars;
use crate::config::{JmapAccountConfig, ServerConfig};
use crate::errors::{AppError, AppResult};
use crate::jmap::{JmapResponse, MethodCallBatch, MethodResponse};
use crate::session::{SessionDescriptor, SessionSource};

/// Maximum characters of an error body kept in error messages
const BODY_EXCERPT_CHARS: usize = 300;

/// Build the shared HTTP client with configured timeouts
///
/// # Errors
///
/// Returns `Internal` if the TLS backend cannot be initialized.
pub fn http_client(config: &ServerConfig) -> AppResult<Client> {
    Client::builder()
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::Internal(format!("failed to build HTTP client: {e}")))
}

/// Executes method-call batches against the remote mail API
///
/// Returns one response per input call, in input order.
#[async_trait]
pub trait MethodCaller: Send + Sync {
    async fn call(&self, batch: &MethodCallBatch) -> AppResult<Vec<MethodResponse>>;
}

/// Outcome of a single HTTP round trip
enum Attempt {
    Completed(Vec<MethodResponse>),
    SessionInvalid { reason: String, status: Option<u16> },
}

/// HTTP gateway to the JMAP API endpoint
pub struct JmapGateway {
    http: Client,
    api_token: SecretString,
    sessions: Arc<dyn SessionSource>,
}

impl JmapGateway {
    pub fn new(http: Client, account: &JmapAccountConfig, sessions: Arc<dyn SessionSource>) -> Self {
        Self {
            http,
            api_token: account.api_token.clone(),
            sessions,
        }
    }

    async fn execute(
        &self,
        session: &SessionDescriptor,
        batch: &MethodCallBatch,
    ) -> AppResult<Attempt> {
        let body = batch.to_request(&session.account_id);
        let response = self
            .http
            .post(&session.api_url)
            .bearer_auth(self.api_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Ok(Attempt::SessionInvalid {
                reason: format!("API endpoint returned {status}"),
                status: Some(status.as_u16()),
            });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AppError::remote(
                format!(
                    "API endpoint returned {status}: {}",
                    truncate_chars(text, BODY_EXCERPT_CHARS)
                ),
                Some(status.as_u16()),
                status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            ));
        }

        let payload: JmapResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                AppError::remote("response body timed out", Some(status.as_u16()), true)
            } else {
                AppError::remote(
                    format!("malformed JMAP response: {e}"),
                    Some(status.as_u16()),
                    false,
                )
            }
        })?;

        if let (Some(observed), Some(cached)) = (&payload.session_state, &session.state)
            && observed != cached
        {
            debug!(%observed, %cached, "session state changed; refreshing on next call");
            self.sessions.invalidate().await;
        }

        let responses = payload
            .method_responses
            .into_iter()
            .map(|(name, arguments, call_id)| {
                MethodResponse::from_invocation(name, arguments, call_id)
            })
            .collect::<Vec<_>>();

        if let Some(stale) = responses.iter().find_map(|r| {
            r.outcome
                .as_ref()
                .err()
                .filter(|e| e.is_session_invalid())
                .map(|e| (r.call_id.clone(), e.error_type.clone()))
        }) {
            return Ok(Attempt::SessionInvalid {
                reason: format!("call {} reported {}", stale.0, stale.1),
                status: None,
            });
        }

        Ok(Attempt::Completed(correlate(batch, responses)?))
    }
}

#[async_trait]
impl MethodCaller for JmapGateway {
    async fn call(&self, batch: &MethodCallBatch) -> AppResult<Vec<MethodResponse>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.sessions.get_or_refresh().await?;
        if let Some(max) = session.max_calls_in_request
            && batch.calls().len() as u64 > max
        {
            return Err(AppError::invalid(format!(
                "batch of {} calls exceeds the server limit of {max}",
                batch.calls().len()
            )));
        }
        // Referenced id lists are sized by the server; it answers
        // `requestTooLarge` if they exceed the limit.
        if let Some(max) = session.max_objects_in_get
            && let Some((call, ids)) = batch.calls().iter().find_map(|call| {
                call.arguments
                    .get("ids")
                    .and_then(Value::as_array)
                    .filter(|ids| ids.len() as u64 > max)
                    .map(|ids| (call, ids.len()))
            })
        {
            return Err(AppError::invalid(format!(
                "{} for {ids} ids exceeds the server limit of {max}",
                call.method.as_str()
            )));
        }

        match self.execute(&session, batch).await? {
            Attempt::Completed(responses) => return Ok(responses),
            Attempt::SessionInvalid { reason, .. } => {
                warn!(%reason, "JMAP session invalid; re-discovering and retrying once");
                self.sessions.invalidate().await;
            }
        }

        let session = self.sessions.get_or_refresh().await?;
        match self.execute(&session, batch).await? {
            Attempt::Completed(responses) => Ok(responses),
            Attempt::SessionInvalid { reason, status } => Err(AppError::remote(
                format!("session still invalid after refresh: {reason}"),
                status,
                false,
            )),
        }
    }
}

/// Order responses to match the batch, keyed by call ID
///
/// The first response for a call ID wins; a call with no response fails the
/// batch.
fn correlate(
    batch: &MethodCallBatch,
    responses: Vec<MethodResponse>,
) -> AppResult<Vec<MethodResponse>> {
    let mut by_call_id: HashMap<String, MethodResponse> = HashMap::with_capacity(responses.len());
    for response in responses {
        by_call_id
            .entry(response.call_id.clone())
            .or_insert(response);
    }

    batch
        .calls()
        .iter()
        .map(|call| {
            by_call_id.remove(&call.call_id).ok_or_else(|| {
                AppError::remote(
                    format!(
                        "no response for call {} ({})",
                        call.call_id,
                        call.method.as_str()
                    ),
                    None,
                    false,
                )
            })
        })
        .collect()
}

/// Map a `reqwest` send failure to a transient `RemoteCall` error
fn transport_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() {
        AppError::remote("request timed out", None, true)
    } else if e.is_connect() {
        AppError::remote(format!("connection failed: {e}"), None, true)
    } else {
        AppError::remote(
            format!("request failed: {e}"),
            e.status().map(|s| s.as_u16()),
            true,
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use reqwest::Client;
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::{JmapGateway, MethodCaller};
    use crate::config::JmapAccountConfig;
    use crate::errors::{AppError, AppResult};
    use crate::jmap::{Method, MethodCallBatch};
    use crate::session::{SessionDescriptor, SessionSource};

    /// Fixed session pointing at a mock server, counting refresh activity
    struct FakeSessions {
        api_url: String,
        lookups: AtomicUsize,
        invalidations: AtomicUsize,
    }

    impl FakeSessions {
        fn new(server: &MockServer) -> Arc<Self> {
            Arc::new(Self {
                api_url: format!("{}/api/", server.uri()),
                lookups: AtomicUsize::new(0),
                invalidations: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SessionSource for FakeSessions {
        async fn get_or_refresh(&self) -> AppResult<Arc<SessionDescriptor>> {
            let n = self.lookups.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(SessionDescriptor {
                account_id: format!("acct{n}"),
                api_url: self.api_url.clone(),
                download_url: None,
                upload_url: None,
                event_source_url: None,
                state: Some("s1".to_owned()),
                capabilities: Vec::new(),
                max_objects_in_get: Some(2),
                max_calls_in_request: Some(4),
                fetched_at: Utc::now(),
            }))
        }

        async fn invalidate(&self) {
            self.invalidations.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn gateway(sessions: Arc<FakeSessions>) -> JmapGateway {
        let http = Client::builder()
            .timeout(Duration::from_millis(300))
            .build()
            .expect("client must build");
        JmapGateway::new(
            http,
            &JmapAccountConfig {
                base_url: "http://unused".to_owned(),
                api_token: SecretString::new("test-token".into()),
            },
            sessions,
        )
    }

    fn two_call_batch() -> MethodCallBatch {
        let mut batch = MethodCallBatch::new();
        batch.push(Method::MailboxGet, json!({ "ids": null }));
        batch.push(Method::EmailGet, json!({ "ids": ["e1"] }));
        batch
    }

    fn ok_body() -> Value {
        // Deliberately out of order.
        json!({
            "methodResponses": [
                ["Email/get", { "list": [{ "id": "e1" }], "notFound": [] }, "c1"],
                ["Mailbox/get", { "list": [] }, "c0"]
            ],
            "sessionState": "s1"
        })
    }

    #[tokio::test]
    async fn correlates_responses_by_call_id_and_injects_account() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let sessions = FakeSessions::new(&server);
        let responses = gateway(Arc::clone(&sessions))
            .call(&two_call_batch())
            .await
            .expect("call must succeed");

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0].call_id, "c0");
        assert_eq!(responses[0].name, "Mailbox/get");
        assert_eq!(responses[1].call_id, "c1");
        assert_eq!(sessions.invalidations.load(Ordering::SeqCst), 0);

        let requests = server.received_requests().await.expect("recording enabled");
        let sent: Value = serde_json::from_slice(&requests[0].body).expect("json body");
        assert_eq!(sent["methodCalls"][0][1]["accountId"], "acct0");
        assert_eq!(sent["methodCalls"][1][1]["accountId"], "acct0");
    }

    #[tokio::test]
    async fn per_call_errors_do_not_fail_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "methodResponses": [
                    ["Mailbox/get", { "list": [] }, "c0"],
                    ["error", { "type": "invalidArguments", "description": "bad ids" }, "c1"]
                ]
            })))
            .mount(&server)
            .await;

        let responses = gateway(FakeSessions::new(&server))
            .call(&two_call_batch())
            .await
            .expect("batch must succeed");
        assert!(responses[0].outcome.is_ok());
        let err = responses[1].outcome.clone().expect_err("call must fail");
        assert_eq!(err.error_type, "invalidArguments");
        assert_eq!(err.description.as_deref(), Some("bad ids"));
    }

    #[tokio::test]
    async fn retries_once_after_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .with_priority(2)
            .mount(&server)
            .await;

        let sessions = FakeSessions::new(&server);
        let responses = gateway(Arc::clone(&sessions))
            .call(&two_call_batch())
            .await
            .expect("retry must succeed");
        assert_eq!(responses.len(), 2);
        assert_eq!(sessions.invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.lookups.load(Ordering::SeqCst), 2);

        let requests = server.received_requests().await.expect("recording enabled");
        let retried: Value = serde_json::from_slice(&requests[1].body).expect("json body");
        assert_eq!(retried["methodCalls"][0][1]["accountId"], "acct1");
    }

    #[tokio::test]
    async fn retries_once_after_account_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "methodResponses": [
                    ["error", { "type": "accountNotFound" }, "c0"],
                    ["error", { "type": "accountNotFound" }, "c1"]
                ]
            })))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .with_priority(2)
            .mount(&server)
            .await;

        let sessions = FakeSessions::new(&server);
        gateway(Arc::clone(&sessions))
            .call(&two_call_batch())
            .await
            .expect("retry must succeed");
        assert_eq!(sessions.invalidations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_session_invalid_result_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .expect(2)
            .mount(&server)
            .await;

        let sessions = FakeSessions::new(&server);
        let err = gateway(Arc::clone(&sessions))
            .call(&two_call_batch())
            .await
            .expect_err("must fail");
        match err {
            AppError::RemoteCall {
                message,
                status,
                transient,
            } => {
                assert!(message.contains("still invalid"));
                assert_eq!(status, Some(403));
                assert!(!transient);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(sessions.invalidations.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_fail_the_batch_with_excerpt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance window"))
            .expect(1)
            .mount(&server)
            .await;

        let err = gateway(FakeSessions::new(&server))
            .call(&two_call_batch())
            .await
            .expect_err("must fail");
        match err {
            AppError::RemoteCall {
                message,
                status,
                transient,
            } => {
                assert!(message.contains("maintenance window"));
                assert_eq!(status, Some(503));
                assert!(transient);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_level_problem_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "type": "urn:ietf:params:jmap:error:unknownCapability",
                "status": 400
            })))
            .expect(1)
            .mount(&server)
            .await;

        let sessions = FakeSessions::new(&server);
        let err = gateway(Arc::clone(&sessions))
            .call(&two_call_batch())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("unknownCapability"));
        assert_eq!(sessions.invalidations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn timeouts_are_transient_remote_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(ok_body())
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let err = gateway(FakeSessions::new(&server))
            .call(&two_call_batch())
            .await
            .expect_err("must time out");
        assert!(matches!(
            err,
            AppError::RemoteCall {
                transient: true,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn missing_response_fails_the_batch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "methodResponses": [["Mailbox/get", { "list": [] }, "c0"]]
            })))
            .mount(&server)
            .await;

        let err = gateway(FakeSessions::new(&server))
            .call(&two_call_batch())
            .await
            .expect_err("must fail");
        assert!(err.to_string().contains("no response for call c1 (Email/get)"));
    }

    #[tokio::test]
    async fn changed_session_state_invalidates_without_retry() {
        let server = MockServer::start().await;
        let mut body = ok_body();
        body["sessionState"] = json!("s2");
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .expect(1)
            .mount(&server)
            .await;

        let sessions = FakeSessions::new(&server);
        gateway(Arc::clone(&sessions))
            .call(&two_call_batch())
            .await
            .expect("results are still valid");
        assert_eq!(sessions.invalidations.load(Ordering::SeqCst), 1);
        assert_eq!(sessions.lookups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(0)
            .mount(&server)
            .await;

        let mut batch = MethodCallBatch::new();
        for _ in 0..5 {
            batch.push(Method::MailboxGet, json!({}));
        }
        let err = gateway(FakeSessions::new(&server))
            .call(&batch)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn oversized_get_is_rejected_locally() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(0)
            .mount(&server)
            .await;

        let mut batch = MethodCallBatch::new();
        batch.push(Method::EmailGet, json!({ "ids": ["e1", "e2", "e3"] }));
        let err = gateway(FakeSessions::new(&server))
            .call(&batch)
            .await
            .expect_err("must fail");
        assert!(matches!(err, AppError::InvalidInput(msg) if msg.contains("Email/get for 3 ids")));
    }
}
