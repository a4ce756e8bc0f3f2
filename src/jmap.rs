//! JMAP wire types for method-call batches and mail objects
//!
//! Covers the subset of RFC 8620 (core) and RFC 8621 (mail) this server
//! speaks: request envelopes, result references, method responses, and the
//! `Mailbox`, `Email`, and `Thread` shapes it reads.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::{Map, Value, json};

/// Core capability URI
pub const CAPABILITY_CORE: &str = "urn:ietf:params:jmap:core";
/// Mail capability URI
pub const CAPABILITY_MAIL: &str = "urn:ietf:params:jmap:mail";

/// Remote methods this server is able to issue
///
/// Only non-mutating methods exist here, so a batch can never change
/// mailbox state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    MailboxGet,
    EmailQuery,
    EmailGet,
    ThreadGet,
}

impl Method {
    /// Wire name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MailboxGet => "Mailbox/get",
            Self::EmailQuery => "Email/query",
            Self::EmailGet => "Email/get",
            Self::ThreadGet => "Thread/get",
        }
    }
}

/// One invocation inside a batch
#[derive(Debug, Clone)]
pub struct MethodCall {
    /// Client-assigned identifier, unique within the batch
    pub call_id: String,
    /// Method to invoke
    pub method: Method,
    /// Method arguments without `accountId` (injected at send time)
    pub arguments: Map<String, Value>,
}

/// Handle to a queued call, used to build result references
#[derive(Debug, Clone)]
pub struct CallHandle {
    call_id: String,
    method: Method,
}

impl CallHandle {
    /// Build a `ResultReference` pointing at `path` in this call's result
    pub fn result_ref(&self, path: &str) -> Value {
        json!({
            "resultOf": self.call_id,
            "name": self.method.as_str(),
            "path": path,
        })
    }
}

/// Ordered sequence of method calls sent in one request
#[derive(Debug, Clone, Default)]
pub struct MethodCallBatch {
    calls: Vec<MethodCall>,
}

impl MethodCallBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a call and return a handle for later result references
    ///
    /// Call IDs are assigned sequentially (`c0`, `c1`, ...). Non-object
    /// arguments are treated as empty.
    pub fn push(&mut self, method: Method, arguments: Value) -> CallHandle {
        let call_id = format!("c{}", self.calls.len());
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        self.calls.push(MethodCall {
            call_id: call_id.clone(),
            method,
            arguments,
        });
        CallHandle { call_id, method }
    }

    pub fn calls(&self) -> &[MethodCall] {
        &self.calls
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Build the JSON request envelope for `account_id`
    pub fn to_request(&self, account_id: &str) -> Value {
        let method_calls = self
            .calls
            .iter()
            .map(|call| {
                let mut arguments = call.arguments.clone();
                arguments.insert("accountId".to_owned(), Value::from(account_id));
                json!([call.method.as_str(), arguments, call.call_id])
            })
            .collect::<Vec<_>>();

        json!({
            "using": [CAPABILITY_CORE, CAPABILITY_MAIL],
            "methodCalls": method_calls,
        })
    }
}

/// Response envelope returned by the API endpoint
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JmapResponse {
    /// `[name, arguments, callId]` triples
    pub method_responses: Vec<(String, Value, String)>,
    pub session_state: Option<String>,
}

/// Method-level error object (`["error", {...}, callId]`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodError {
    /// Error type, e.g. `notFound`, `invalidArguments`, `accountNotFound`
    pub error_type: String,
    pub description: Option<String>,
}

impl MethodError {
    /// Whether this error means the cached session no longer addresses the account
    pub fn is_session_invalid(&self) -> bool {
        self.error_type == "accountNotFound"
    }
}

/// Parsed result of one call in a batch
#[derive(Debug, Clone)]
pub struct MethodResponse {
    pub call_id: String,
    /// Response name (the method name, or `error`)
    pub name: String,
    pub outcome: Result<Value, MethodError>,
}

impl MethodResponse {
    /// Build from a raw `[name, arguments, callId]` invocation
    pub fn from_invocation(name: String, arguments: Value, call_id: String) -> Self {
        let outcome = if name == "error" {
            Err(MethodError {
                error_type: arguments
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("serverFail")
                    .to_owned(),
                description: arguments
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            })
        } else {
            Ok(arguments)
        };
        Self {
            call_id,
            name,
            outcome,
        }
    }
}

/// Arguments of a `Foo/get` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetResponse<T> {
    pub list: Vec<T>,
    pub not_found: Option<Vec<String>>,
}

impl<T> GetResponse<T> {
    /// Whether the server reported `id` as not found
    pub fn reports_missing(&self, id: &str) -> bool {
        self.not_found
            .as_ref()
            .is_some_and(|ids| ids.iter().any(|candidate| candidate == id))
    }
}

/// Arguments of a `Foo/query` response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub ids: Vec<String>,
    #[serde(default)]
    pub position: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub parent_id: Option<String>,
    pub role: Option<String>,
    #[serde(default)]
    pub total_emails: u64,
    #[serde(default)]
    pub unread_emails: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub email_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailAddress {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailHeader {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBodyPart {
    pub part_id: Option<String>,
    pub blob_id: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub content_type: Option<String>,
    pub disposition: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailBodyValue {
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub is_truncated: bool,
}

/// `Email` object; every property is optional because only requested
/// properties are returned
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Email {
    pub id: String,
    pub thread_id: Option<String>,
    pub mailbox_ids: Option<HashMap<String, bool>>,
    pub keywords: Option<HashMap<String, bool>>,
    pub from: Option<Vec<EmailAddress>>,
    pub to: Option<Vec<EmailAddress>>,
    pub cc: Option<Vec<EmailAddress>>,
    pub bcc: Option<Vec<EmailAddress>>,
    pub reply_to: Option<Vec<EmailAddress>>,
    pub subject: Option<String>,
    pub received_at: Option<String>,
    pub sent_at: Option<String>,
    pub preview: Option<String>,
    pub has_attachment: Option<bool>,
    pub size: Option<u64>,
    pub message_id: Option<Vec<String>>,
    pub in_reply_to: Option<Vec<String>>,
    pub headers: Option<Vec<EmailHeader>>,
    pub text_body: Option<Vec<EmailBodyPart>>,
    pub html_body: Option<Vec<EmailBodyPart>>,
    pub attachments: Option<Vec<EmailBodyPart>>,
    pub body_values: Option<HashMap<String, EmailBodyValue>>,
}
