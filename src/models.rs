//! Input/output DTOs and schema-bearing types
//!
//! Defines all data structures used in MCP tool contracts. Each type is
//! annotated with `JsonSchema` for automatic schema generation.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Metadata included in all tool responses
///
/// Provides timing information and current UTC timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Meta {
    /// Current UTC timestamp in RFC 3339 format with milliseconds
    pub now_utc: String,
    /// Tool execution duration in milliseconds
    pub duration_ms: u64,
}

impl Meta {
    /// Create metadata populated with current time and elapsed duration
    pub fn now(duration_ms: u64) -> Self {
        Self {
            now_utc: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            duration_ms,
        }
    }
}

/// Standard response envelope for all tools
///
/// Wraps tool-specific data with human-readable summary and execution metadata.
/// This structure provides consistent response shape across all MCP tools.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolEnvelope<T>
where
    T: JsonSchema,
{
    /// Human-readable summary of the operation outcome
    pub summary: String,
    /// Tool-specific data payload
    pub data: T,
    /// Execution metadata (timestamp, duration)
    pub meta: Meta,
}

/// Mailbox metadata
///
/// Returned by `list_mailboxes`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MailboxInfo {
    /// Mailbox identifier (pass to `list_emails` or `search_emails`)
    pub id: String,
    /// Display name
    pub name: String,
    /// Well-known role (`inbox`, `sent`, `archive`, `trash`, ...)
    pub role: Option<String>,
    /// Parent mailbox identifier for nested folders
    pub parent_id: Option<String>,
    pub total_emails: u64,
    pub unread_emails: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MailboxList {
    pub mailboxes: Vec<MailboxInfo>,
}

/// Email summary for listings and search results
///
/// `from`, `subject`, and `date` are formatted identically by `get_email`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailSummary {
    /// Email identifier (pass to `get_email`)
    pub id: String,
    /// Thread identifier (pass to `get_thread`)
    pub thread_id: Option<String>,
    /// Identifiers of mailboxes containing this email
    pub mailbox_ids: Vec<String>,
    /// Sender, formatted as `Name <address>` or `address`
    pub from: String,
    pub subject: String,
    /// Received timestamp (RFC 3339, UTC)
    pub date: Option<String>,
    /// Short plain-text preview
    pub preview: String,
    pub has_attachment: bool,
    /// Whether the email lacks the `$seen` keyword
    pub unread: bool,
}

/// One page of emails
///
/// Returned by `list_emails` and `search_emails`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailPage {
    /// Mailbox the page is scoped to, if any
    pub mailbox_id: Option<String>,
    /// Mailbox display name, when listing a mailbox
    pub mailbox_name: Option<String>,
    /// Total matching emails, if the server calculated it
    pub total: Option<u64>,
    /// Offset of the first item in this page
    pub position: u64,
    pub items: Vec<EmailSummary>,
    /// Opaque continuation token for the next page; absent at end of list
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// Attachment metadata
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AttachmentInfo {
    /// Filename if present
    pub filename: Option<String>,
    /// MIME content type (e.g., `application/pdf`, `image/jpeg`)
    pub content_type: Option<String>,
    /// Attachment size in bytes
    pub size_bytes: u64,
    /// Body part identifier
    pub part_id: Option<String>,
    /// Blob identifier for the attachment content
    pub blob_id: Option<String>,
    /// `attachment` or `inline`
    pub disposition: Option<String>,
}

/// Header name/value pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HeaderField {
    pub name: String,
    pub value: String,
}

/// Full email detail
///
/// Returned by `get_email`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailDetail {
    pub id: String,
    pub thread_id: Option<String>,
    pub mailbox_ids: Vec<String>,
    /// Sender, formatted as in listings
    pub from: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub reply_to: Vec<String>,
    pub subject: String,
    /// Received timestamp (RFC 3339, UTC), as in listings
    pub date: Option<String>,
    /// Sent timestamp from the Date header
    pub sent_at: Option<String>,
    /// Keywords set on the email (e.g., `$seen`, `$flagged`)
    pub keywords: Vec<String>,
    pub unread: bool,
    /// Message size in bytes
    pub size_bytes: Option<u64>,
    /// Message-ID header values
    pub message_id: Vec<String>,
    /// In-Reply-To header values
    pub in_reply_to: Vec<String>,
    pub preview: String,
    pub has_attachment: bool,
    /// Curated headers, or all headers if `include_all_headers=true`
    pub headers: Vec<HeaderField>,
    /// Plain text body (truncated to `body_max_chars`)
    pub body_text: Option<String>,
    /// Sanitized HTML body (if `include_html=true`, truncated)
    pub body_html: Option<String>,
    /// Whether any body content was cut short
    pub body_truncated: bool,
    /// Attachment metadata (up to `MAX_ATTACHMENTS`)
    pub attachments: Vec<AttachmentInfo>,
}

/// Message within a thread view
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThreadMessage {
    pub id: String,
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub date: Option<String>,
    /// Plain text body, or the preview when no body was available
    pub body_text: String,
    pub body_truncated: bool,
}

/// Conversation view
///
/// Returned by `get_thread`. Messages are ordered oldest first.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ThreadView {
    pub thread_id: String,
    /// Subject of the earliest message
    pub subject: String,
    pub message_count: usize,
    pub messages: Vec<ThreadMessage>,
}

/// Input: list emails in a mailbox
///
/// Used by `list_emails`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListEmailsInput {
    /// Mailbox identifier (from `list_mailboxes`)
    pub mailbox_id: String,
    /// Continuation token from a previous page
    pub cursor: Option<String>,
    /// Offset to start from (default 0; cannot combine with `cursor`)
    pub position: Option<u64>,
    /// Maximum emails to return (1..50, default 20)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Input: get one email
///
/// Used by `get_email`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetEmailInput {
    /// Email identifier (from `list_emails` or `search_emails`)
    pub email_id: String,
    /// Maximum body characters (100..100000, default 20000)
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
    /// Include sanitized HTML body
    #[serde(default)]
    pub include_html: bool,
    /// Include all headers instead of the curated subset
    #[serde(default)]
    pub include_all_headers: bool,
}

/// Input: search emails
///
/// Used by `search_emails`. At least one filter (or a cursor) is required.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct SearchEmailsInput {
    /// Full-text search across all fields
    pub query: Option<String>,
    /// Filter by sender address or name
    pub from: Option<String>,
    /// Filter by recipient address or name
    pub to: Option<String>,
    /// Filter by subject text
    pub subject: Option<String>,
    /// Filter by body text
    pub body: Option<String>,
    /// Only emails received on or after this date (YYYY-MM-DD)
    pub after: Option<String>,
    /// Only emails received on or before this date (YYYY-MM-DD)
    pub before: Option<String>,
    /// Filter emails with/without attachments
    pub has_attachment: Option<bool>,
    /// Restrict the search to one mailbox
    pub mailbox_id: Option<String>,
    /// Continuation token from a previous page (cannot combine with filters)
    pub cursor: Option<String>,
    /// Maximum emails to return (1..50, default 20)
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// Input: get a conversation thread
///
/// Used by `get_thread`.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetThreadInput {
    /// Thread identifier (from `list_emails` or `search_emails`)
    pub thread_id: String,
    /// Maximum body characters per message (100..20000, default 2000)
    #[serde(default = "default_thread_body_max_chars")]
    pub body_max_chars: usize,
}

/// Validated search criteria, carried inside continuation tokens
///
/// Dates are stored as validated `YYYY-MM-DD` strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_attachment: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mailbox_id: Option<String>,
}

impl SearchFilter {
    /// Whether no search criterion is set
    ///
    /// A mailbox scope alone does not count as a criterion.
    pub fn is_empty(&self) -> bool {
        let scope_only = Self {
            mailbox_id: self.mailbox_id.clone(),
            ..Self::default()
        };
        *self == scope_only
    }

    /// Criteria as `name=value` pairs, for summaries
    pub fn describe(&self) -> BTreeMap<&'static str, String> {
        let mut out = BTreeMap::new();
        let fields = [
            ("query", &self.text),
            ("from", &self.from),
            ("to", &self.to),
            ("subject", &self.subject),
            ("body", &self.body),
            ("after", &self.after),
            ("before", &self.before),
            ("mailbox_id", &self.mailbox_id),
        ];
        for (name, value) in fields {
            if let Some(value) = value {
                out.insert(name, value.clone());
            }
        }
        if let Some(flag) = self.has_attachment {
            out.insert("has_attachment", flag.to_string());
        }
        out
    }
}

/// Default value for `limit` in listings
fn default_limit() -> usize {
    20
}

/// Default value for `body_max_chars` in get_email
fn default_body_max_chars() -> usize {
    20_000
}

/// Default value for `body_max_chars` in get_thread
///
/// Threads return many bodies at once, so each is kept shorter.
fn default_thread_body_max_chars() -> usize {
    2_000
}
