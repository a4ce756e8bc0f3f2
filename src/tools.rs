//! Tool mapping layer
//!
//! Turns each read-only tool into one method-call batch, then shapes the
//! responses into the DTOs in [`crate::models`]. Nothing here knows about the
//! MCP transport; the server module wraps these results in envelopes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Days, NaiveDate, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::body::{self, BodyContent, truncate_chars};
use crate::errors::{AppError, AppResult};
use crate::gateway::MethodCaller;
use crate::ids::JmapId;
use crate::jmap::{
    Email, EmailAddress, EmailBodyPart, GetResponse, Mailbox, Method, MethodCallBatch,
    MethodError, MethodResponse, QueryResponse, Thread,
};
use crate::models::{
    AttachmentInfo, EmailDetail, EmailPage, EmailSummary, GetEmailInput, GetThreadInput,
    ListEmailsInput, MailboxInfo, MailboxList, SearchEmailsInput, SearchFilter, ThreadMessage,
    ThreadView,
};
use crate::pagination::{PageCursor, PageScope, next_position};

/// Maximum emails per page
const MAX_PAGE_SIZE: usize = 50;
/// Maximum preview characters in summaries
const PREVIEW_MAX_CHARS: usize = 150;
/// Maximum attachments to return per email
const MAX_ATTACHMENTS: usize = 50;
/// Upper bound on each body value fetched from the server
const MAX_BODY_VALUE_BYTES: u64 = 1_048_576;
/// Maximum length of free-text search fields
const MAX_SEARCH_TEXT_CHARS: usize = 256;

/// Properties fetched for list and search summaries
const SUMMARY_PROPERTIES: [&str; 9] = [
    "id",
    "threadId",
    "mailboxIds",
    "keywords",
    "from",
    "subject",
    "receivedAt",
    "preview",
    "hasAttachment",
];

/// Properties fetched for a single email
const DETAIL_PROPERTIES: [&str; 22] = [
    "id",
    "threadId",
    "mailboxIds",
    "keywords",
    "from",
    "to",
    "cc",
    "bcc",
    "replyTo",
    "subject",
    "receivedAt",
    "sentAt",
    "preview",
    "hasAttachment",
    "size",
    "messageId",
    "inReplyTo",
    "headers",
    "textBody",
    "htmlBody",
    "attachments",
    "bodyValues",
];

/// Properties fetched for each message in a thread
const THREAD_PROPERTIES: [&str; 9] = [
    "id",
    "from",
    "to",
    "subject",
    "receivedAt",
    "preview",
    "textBody",
    "htmlBody",
    "bodyValues",
];

/// Read-only mail operations over a [`MethodCaller`]
#[derive(Clone)]
pub struct MailTools {
    gateway: Arc<dyn MethodCaller>,
}

impl MailTools {
    pub fn new(gateway: Arc<dyn MethodCaller>) -> Self {
        Self { gateway }
    }

    /// List every mailbox with its counts, sorted by name
    pub async fn list_mailboxes(&self) -> AppResult<MailboxList> {
        let mut batch = MethodCallBatch::new();
        batch.push(
            Method::MailboxGet,
            json!({
                "ids": null,
                "properties": ["name", "parentId", "role", "totalEmails", "unreadEmails"],
            }),
        );
        let [response] = self.call::<1>(&batch).await?;
        let result: GetResponse<Mailbox> = parse_result(response, Method::MailboxGet)?;

        let mut mailboxes = result
            .list
            .into_iter()
            .map(|mb| MailboxInfo {
                id: mb.id,
                name: mb.name,
                role: mb.role,
                parent_id: mb.parent_id,
                total_emails: mb.total_emails,
                unread_emails: mb.unread_emails,
            })
            .collect::<Vec<_>>();
        mailboxes.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        Ok(MailboxList { mailboxes })
    }

    /// One page of a mailbox, newest first
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a malformed id, limit, or cursor
    /// - `NotFound` if the mailbox does not exist
    pub async fn list_emails(&self, input: ListEmailsInput) -> AppResult<EmailPage> {
        let mailbox_id = JmapId::parse(&input.mailbox_id, "mailbox_id")?;
        validate_range(input.limit, 1, MAX_PAGE_SIZE, "limit")?;
        let position = match (&input.cursor, input.position) {
            (Some(_), Some(_)) => {
                return Err(AppError::invalid(
                    "cursor cannot be combined with position",
                ));
            }
            (Some(raw), None) => match PageCursor::decode(raw)? {
                PageCursor {
                    scope: PageScope::Mailbox { mailbox_id: scoped },
                    position,
                } if scoped == mailbox_id.as_str() => position,
                _ => {
                    return Err(AppError::invalid(
                        "cursor does not belong to this mailbox listing",
                    ));
                }
            },
            (None, position) => position.unwrap_or(0),
        };

        let mut batch = MethodCallBatch::new();
        batch.push(
            Method::MailboxGet,
            json!({ "ids": [mailbox_id.as_str()], "properties": ["name"] }),
        );
        let query = batch.push(
            Method::EmailQuery,
            json!({
                "filter": { "inMailbox": mailbox_id.as_str() },
                "sort": [{ "property": "receivedAt", "isAscending": false }],
                "position": position,
                "limit": input.limit,
                "calculateTotal": true,
            }),
        );
        batch.push(
            Method::EmailGet,
            json!({
                "#ids": query.result_ref("/ids"),
                "properties": SUMMARY_PROPERTIES,
            }),
        );

        let [mailbox, query, emails] = self.call::<3>(&batch).await?;
        let mailbox: GetResponse<Mailbox> = parse_result(mailbox, Method::MailboxGet)?;
        if mailbox.reports_missing(mailbox_id.as_str()) {
            return Err(AppError::NotFound(format!("mailbox '{mailbox_id}'")));
        }
        let mailbox_name = mailbox
            .list
            .into_iter()
            .find(|mb| mb.id == mailbox_id.as_str())
            .map(|mb| mb.name)
            .ok_or_else(|| AppError::NotFound(format!("mailbox '{mailbox_id}'")))?;
        let query: QueryResponse = parse_result(query, Method::EmailQuery)?;
        let emails: GetResponse<Email> = parse_result(emails, Method::EmailGet)?;

        let page = build_page(
            query,
            emails.list,
            input.limit,
            Some(mailbox_id.as_str()),
            PageScope::Mailbox {
                mailbox_id: mailbox_id.to_string(),
            },
        )?;
        Ok(EmailPage {
            mailbox_id: Some(mailbox_id.to_string()),
            mailbox_name: Some(mailbox_name),
            ..page
        })
    }

    /// Full detail for one email
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a malformed id or `body_max_chars` out of range
    /// - `NotFound` if the email does not exist
    pub async fn get_email(&self, input: GetEmailInput) -> AppResult<EmailDetail> {
        let email_id = JmapId::parse(&input.email_id, "email_id")?;
        validate_range(input.body_max_chars, 100, 100_000, "body_max_chars")?;

        let mut batch = MethodCallBatch::new();
        batch.push(
            Method::EmailGet,
            json!({
                "ids": [email_id.as_str()],
                "properties": DETAIL_PROPERTIES,
                "fetchTextBodyValues": true,
                "fetchHTMLBodyValues": true,
                "maxBodyValueBytes": MAX_BODY_VALUE_BYTES,
            }),
        );
        let [response] = self.call::<1>(&batch).await?;
        let result: GetResponse<Email> = parse_result(response, Method::EmailGet)?;
        if result.reports_missing(email_id.as_str()) {
            return Err(AppError::NotFound(format!("email '{email_id}'")));
        }
        let email = result
            .list
            .into_iter()
            .find(|e| e.id == email_id.as_str())
            .ok_or_else(|| AppError::NotFound(format!("email '{email_id}'")))?;

        Ok(email_detail(email, &input))
    }

    /// Search emails with combined criteria, newest first
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if no criterion is given, a cursor is mixed with
    ///   criteria, or any field is malformed; no remote call is made
    pub async fn search_emails(&self, input: SearchEmailsInput) -> AppResult<EmailPage> {
        validate_range(input.limit, 1, MAX_PAGE_SIZE, "limit")?;
        let (filter, position) = resolve_search(&input)?;
        debug!(criteria = ?filter.describe(), position, "searching emails");

        let mut batch = MethodCallBatch::new();
        let query = batch.push(
            Method::EmailQuery,
            json!({
                "filter": jmap_filter(&filter)?,
                "sort": [{ "property": "receivedAt", "isAscending": false }],
                "position": position,
                "limit": input.limit,
                "calculateTotal": true,
            }),
        );
        batch.push(
            Method::EmailGet,
            json!({
                "#ids": query.result_ref("/ids"),
                "properties": SUMMARY_PROPERTIES,
            }),
        );

        let [query, emails] = self.call::<2>(&batch).await?;
        let query: QueryResponse = parse_result(query, Method::EmailQuery)?;
        let emails: GetResponse<Email> = parse_result(emails, Method::EmailGet)?;

        let mailbox_id = filter.mailbox_id.clone();
        let page = build_page(
            query,
            emails.list,
            input.limit,
            mailbox_id.as_deref(),
            PageScope::Search { filter },
        )?;
        Ok(EmailPage { mailbox_id, ..page })
    }

    /// Every message of a conversation, oldest first
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for a malformed id or `body_max_chars` out of range
    /// - `NotFound` if the thread does not exist
    pub async fn get_thread(&self, input: GetThreadInput) -> AppResult<ThreadView> {
        let thread_id = JmapId::parse(&input.thread_id, "thread_id")?;
        validate_range(input.body_max_chars, 100, 20_000, "body_max_chars")?;

        let mut batch = MethodCallBatch::new();
        let thread = batch.push(Method::ThreadGet, json!({ "ids": [thread_id.as_str()] }));
        batch.push(
            Method::EmailGet,
            json!({
                "#ids": thread.result_ref("/list/*/emailIds"),
                "properties": THREAD_PROPERTIES,
                "fetchTextBodyValues": true,
                "fetchHTMLBodyValues": true,
                "maxBodyValueBytes": MAX_BODY_VALUE_BYTES,
            }),
        );

        let [thread, emails] = self.call::<2>(&batch).await?;
        let thread: GetResponse<Thread> = parse_result(thread, Method::ThreadGet)?;
        let listed = thread
            .list
            .iter()
            .find(|t| t.id == thread_id.as_str())
            .filter(|_| !thread.reports_missing(thread_id.as_str()))
            .map(|t| t.email_ids.len())
            .ok_or_else(|| AppError::NotFound(format!("thread '{thread_id}'")))?;
        let emails: GetResponse<Email> = parse_result(emails, Method::EmailGet)?;
        debug!(%thread_id, listed, fetched = emails.list.len(), "thread loaded");

        let mut seen = HashSet::new();
        let mut emails = emails
            .list
            .into_iter()
            .filter(|e| seen.insert(e.id.clone()))
            .collect::<Vec<_>>();
        emails.sort_by(|a, b| {
            received_sort_key(a)
                .cmp(&received_sort_key(b))
                .then_with(|| a.id.cmp(&b.id))
        });

        let messages = emails
            .into_iter()
            .map(|email| {
                let body = body::body_text(&email)
                    .unwrap_or_else(|| BodyContent {
                        text: email.preview.clone().unwrap_or_default(),
                        truncated: false,
                    })
                    .bounded(input.body_max_chars);
                ThreadMessage {
                    from: format_sender(email.from.as_deref()),
                    to: format_addresses(email.to.as_deref()),
                    subject: format_subject(email.subject.as_deref()),
                    date: format_date(email.received_at.as_deref()),
                    body_text: body.text,
                    body_truncated: body.truncated,
                    id: email.id,
                }
            })
            .collect::<Vec<_>>();

        Ok(ThreadView {
            thread_id: thread_id.to_string(),
            subject: messages
                .first()
                .map(|m| m.subject.clone())
                .unwrap_or_else(|| format_subject(None)),
            message_count: messages.len(),
            messages,
        })
    }

    /// Send a batch and split the responses into a fixed-size array
    async fn call<const N: usize>(&self, batch: &MethodCallBatch) -> AppResult<[MethodResponse; N]> {
        debug!(
            calls = ?batch.calls().iter().map(|c| c.method.as_str()).collect::<Vec<_>>(),
            "sending method-call batch"
        );
        let responses = self.gateway.call(batch).await?;
        let received = responses.len();
        responses.try_into().map_err(|_| {
            AppError::Internal(format!("expected {N} method responses, received {received}"))
        })
    }
}

/// Deserialize a successful response, or map its method error
fn parse_result<T: DeserializeOwned>(response: MethodResponse, method: Method) -> AppResult<T> {
    let MethodResponse {
        call_id,
        name,
        outcome,
    } = response;
    let arguments = outcome.map_err(|e| method_error(method, &call_id, e))?;
    serde_json::from_value(arguments).map_err(|e| {
        AppError::remote(
            format!("malformed {name} response to {}: {e}", method.as_str()),
            None,
            false,
        )
    })
}

/// Map a per-call error to the caller-facing taxonomy
fn method_error(method: Method, call_id: &str, err: MethodError) -> AppError {
    let detail = match &err.description {
        Some(description) => format!("{}: {description}", err.error_type),
        None => err.error_type.clone(),
    };
    match err.error_type.as_str() {
        "notFound" => AppError::NotFound(format!("{} reported {detail}", method.as_str())),
        "invalidArguments" | "unsupportedFilter" | "unsupportedSort" | "anchorNotFound"
        | "requestTooLarge" => {
            AppError::invalid(format!("{} rejected the request: {detail}", method.as_str()))
        }
        other => AppError::remote(
            format!("{} ({call_id}) failed: {detail}", method.as_str()),
            None,
            other == "serverUnavailable",
        ),
    }
}

/// Assemble a page from query ids and fetched summaries
///
/// Emails are reordered to match the query and capped at `limit`; ids the
/// server could no longer fetch, and emails outside `mailbox_id`, are skipped.
fn build_page(
    query: QueryResponse,
    emails: Vec<Email>,
    limit: usize,
    mailbox_id: Option<&str>,
    scope: PageScope,
) -> AppResult<EmailPage> {
    let returned = query.ids.len().min(limit);
    if query.ids.len() > limit {
        debug!(ids = query.ids.len(), limit, "query returned more ids than requested");
    }
    let mut by_id = emails
        .into_iter()
        .map(|e| (e.id.clone(), e))
        .collect::<HashMap<_, _>>();
    let items = query
        .ids
        .iter()
        .take(limit)
        .filter_map(|id| by_id.remove(id))
        .filter(|e| mailbox_id.is_none_or(|mb| in_mailbox(e, mb)))
        .map(email_summary)
        .collect::<Vec<_>>();

    let next_cursor = next_position(query.position, returned, limit, query.total)
        .map(|position| PageCursor::new(scope, position).encode())
        .transpose()?;

    Ok(EmailPage {
        mailbox_id: None,
        mailbox_name: None,
        total: query.total,
        position: query.position,
        items,
        has_more: next_cursor.is_some(),
        next_cursor,
    })
}

fn email_summary(email: Email) -> EmailSummary {
    EmailSummary {
        thread_id: email.thread_id.clone(),
        mailbox_ids: mailbox_ids(&email),
        from: format_sender(email.from.as_deref()),
        subject: format_subject(email.subject.as_deref()),
        date: format_date(email.received_at.as_deref()),
        preview: truncate_chars(email.preview.clone().unwrap_or_default(), PREVIEW_MAX_CHARS),
        has_attachment: email.has_attachment.unwrap_or(false),
        unread: is_unread(&email),
        id: email.id,
    }
}

fn email_detail(email: Email, input: &GetEmailInput) -> EmailDetail {
    let text = body::body_text(&email).map(|b| b.bounded(input.body_max_chars));
    let html = if input.include_html {
        body::body_html(&email).map(|b| b.bounded(input.body_max_chars))
    } else {
        None
    };
    let body_truncated = text.as_ref().is_some_and(|b| b.truncated)
        || html.as_ref().is_some_and(|b| b.truncated);

    let mut keywords = email
        .keywords
        .iter()
        .flatten()
        .filter(|(_, set)| **set)
        .map(|(k, _)| k.clone())
        .collect::<Vec<_>>();
    keywords.sort();

    EmailDetail {
        thread_id: email.thread_id.clone(),
        mailbox_ids: mailbox_ids(&email),
        from: format_sender(email.from.as_deref()),
        to: format_addresses(email.to.as_deref()),
        cc: format_addresses(email.cc.as_deref()),
        bcc: format_addresses(email.bcc.as_deref()),
        reply_to: format_addresses(email.reply_to.as_deref()),
        subject: format_subject(email.subject.as_deref()),
        date: format_date(email.received_at.as_deref()),
        sent_at: format_date(email.sent_at.as_deref()),
        keywords,
        unread: is_unread(&email),
        size_bytes: email.size,
        message_id: email.message_id.clone().unwrap_or_default(),
        in_reply_to: email.in_reply_to.clone().unwrap_or_default(),
        preview: email.preview.clone().unwrap_or_default(),
        has_attachment: email.has_attachment.unwrap_or(false),
        headers: body::curated_headers(
            email.headers.as_deref().unwrap_or_default(),
            input.include_all_headers,
        ),
        body_text: text.map(|b| b.text),
        body_html: html.map(|b| b.text),
        body_truncated,
        attachments: email
            .attachments
            .iter()
            .flatten()
            .take(MAX_ATTACHMENTS)
            .map(attachment_info)
            .collect(),
        id: email.id,
    }
}

fn attachment_info(part: &EmailBodyPart) -> AttachmentInfo {
    AttachmentInfo {
        filename: part.name.clone(),
        content_type: part.content_type.clone(),
        size_bytes: part.size,
        part_id: part.part_id.clone(),
        blob_id: part.blob_id.clone(),
        disposition: part.disposition.clone(),
    }
}

/// Resolve search criteria and start position from input
///
/// A cursor carries its own criteria, so it cannot be mixed with new ones.
fn resolve_search(input: &SearchEmailsInput) -> AppResult<(SearchFilter, u64)> {
    let filter = validated_filter(&SearchFilter {
        text: input.query.clone(),
        from: input.from.clone(),
        to: input.to.clone(),
        subject: input.subject.clone(),
        body: input.body.clone(),
        after: input.after.clone(),
        before: input.before.clone(),
        has_attachment: input.has_attachment,
        mailbox_id: input.mailbox_id.clone(),
    })?;

    if let Some(raw) = &input.cursor {
        if filter != SearchFilter::default() {
            return Err(AppError::invalid(
                "cursor cannot be combined with search criteria",
            ));
        }
        // Decoded criteria get the same checks as fresh input.
        return match PageCursor::decode(raw)? {
            PageCursor {
                scope: PageScope::Search { filter },
                position,
            } => match validated_filter(&filter)? {
                filter if !filter.is_empty() => Ok((filter, position)),
                _ => Err(AppError::invalid("cursor does not belong to a search")),
            },
            _ => Err(AppError::invalid("cursor does not belong to a search")),
        };
    }

    if filter.is_empty() {
        return Err(AppError::invalid(
            "at least one search criterion is required (query, from, to, subject, body, after, before, has_attachment)",
        ));
    }
    Ok((filter, 0))
}

/// Validate and normalize every field of a search filter
fn validated_filter(raw: &SearchFilter) -> AppResult<SearchFilter> {
    let filter = SearchFilter {
        text: validated_text(raw.text.as_deref(), "query")?,
        from: validated_text(raw.from.as_deref(), "from")?,
        to: validated_text(raw.to.as_deref(), "to")?,
        subject: validated_text(raw.subject.as_deref(), "subject")?,
        body: validated_text(raw.body.as_deref(), "body")?,
        after: raw.after.as_deref().map(|d| parse_ymd(d, "after")).transpose()?.map(ymd),
        before: raw.before.as_deref().map(|d| parse_ymd(d, "before")).transpose()?.map(ymd),
        has_attachment: raw.has_attachment,
        mailbox_id: raw
            .mailbox_id
            .as_deref()
            .map(|id| JmapId::parse(id, "mailbox_id"))
            .transpose()?
            .map(|id| id.to_string()),
    };
    if let (Some(after), Some(before)) = (&filter.after, &filter.before)
        && after > before
    {
        return Err(AppError::invalid("after must be <= before"));
    }
    Ok(filter)
}

/// Build the JMAP `FilterCondition`/`FilterOperator` for `filter`
///
/// Dates are whole UTC days: `after` starts at midnight, `before` ends at the
/// following midnight.
fn jmap_filter(filter: &SearchFilter) -> AppResult<Value> {
    let mut conditions = Vec::new();
    if let Some(v) = &filter.text {
        conditions.push(json!({ "text": v }));
    }
    if let Some(v) = &filter.from {
        conditions.push(json!({ "from": v }));
    }
    if let Some(v) = &filter.to {
        conditions.push(json!({ "to": v }));
    }
    if let Some(v) = &filter.subject {
        conditions.push(json!({ "subject": v }));
    }
    if let Some(v) = &filter.body {
        conditions.push(json!({ "body": v }));
    }
    if let Some(v) = &filter.after {
        conditions.push(json!({ "after": utc_midnight(parse_ymd(v, "after")?) }));
    }
    if let Some(v) = &filter.before {
        let day_after = parse_ymd(v, "before")?
            .checked_add_days(Days::new(1))
            .ok_or_else(|| AppError::invalid("before is out of range"))?;
        conditions.push(json!({ "before": utc_midnight(day_after) }));
    }
    if let Some(v) = filter.has_attachment {
        conditions.push(json!({ "hasAttachment": v }));
    }
    if let Some(v) = &filter.mailbox_id {
        conditions.push(json!({ "inMailbox": v }));
    }

    Ok(match conditions.len() {
        1 => conditions.remove(0),
        _ => json!({ "operator": "AND", "conditions": conditions }),
    })
}

/// Format an address as `Name <email>`, or whichever part exists
fn format_address(addr: &EmailAddress) -> Option<String> {
    let name = addr.name.as_deref().map(str::trim).filter(|n| !n.is_empty());
    let email = addr.email.as_deref().map(str::trim).filter(|e| !e.is_empty());
    match (name, email) {
        (Some(name), Some(email)) => Some(format!("{name} <{email}>")),
        (None, Some(email)) => Some(email.to_owned()),
        (Some(name), None) => Some(name.to_owned()),
        (None, None) => None,
    }
}

fn format_sender(from: Option<&[EmailAddress]>) -> String {
    from.and_then(|addrs| addrs.iter().find_map(format_address))
        .unwrap_or_else(|| "unknown".to_owned())
}

fn format_addresses(addrs: Option<&[EmailAddress]>) -> Vec<String> {
    addrs
        .unwrap_or_default()
        .iter()
        .filter_map(format_address)
        .collect()
}

fn format_subject(subject: Option<&str>) -> String {
    match subject.map(str::trim) {
        Some(s) if !s.is_empty() => s.to_owned(),
        _ => "(no subject)".to_owned(),
    }
}

/// Normalize a JMAP `UTCDate`/`Date` to RFC 3339 UTC
///
/// Unparseable values are passed through unchanged.
fn format_date(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    Some(match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt
            .with_timezone(&Utc)
            .to_rfc3339_opts(SecondsFormat::Secs, true),
        Err(_) => raw.to_owned(),
    })
}

/// Oldest first; messages without a parseable `receivedAt` go last
fn received_sort_key(email: &Email) -> (bool, Option<DateTime<Utc>>) {
    let received = email
        .received_at
        .as_deref()
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|dt| dt.with_timezone(&Utc));
    (received.is_none(), received)
}

fn mailbox_ids(email: &Email) -> Vec<String> {
    let mut ids = email
        .mailbox_ids
        .iter()
        .flatten()
        .filter(|(_, member)| **member)
        .map(|(id, _)| id.clone())
        .collect::<Vec<_>>();
    ids.sort();
    ids
}

fn in_mailbox(email: &Email, mailbox_id: &str) -> bool {
    email
        .mailbox_ids
        .as_ref()
        .is_some_and(|ids| ids.get(mailbox_id).copied().unwrap_or(false))
}

fn is_unread(email: &Email) -> bool {
    !email
        .keywords
        .as_ref()
        .is_some_and(|k| k.get("$seen").copied().unwrap_or(false))
}

/// Validate an optional free-text field, treating blank as absent
fn validated_text(value: Option<&str>, field: &str) -> AppResult<Option<String>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if value.chars().count() > MAX_SEARCH_TEXT_CHARS {
        return Err(AppError::invalid(format!(
            "{field} must be 1..{MAX_SEARCH_TEXT_CHARS} characters"
        )));
    }
    validate_no_controls(value, field)?;
    Ok(Some(value.to_owned()))
}

/// Reject control characters in user-provided values
fn validate_no_controls(value: &str, field: &str) -> AppResult<()> {
    if value.chars().any(char::is_control) {
        return Err(AppError::invalid(format!(
            "{field} must not contain control characters"
        )));
    }
    Ok(())
}

/// Validate numeric value in range
fn validate_range(value: usize, min: usize, max: usize, field: &str) -> AppResult<()> {
    if value < min || value > max {
        return Err(AppError::invalid(format!(
            "{field} must be in range {min}..{max}"
        )));
    }
    Ok(())
}

/// Parse YYYY-MM-DD date string
fn parse_ymd(input: &str, field: &str) -> AppResult<NaiveDate> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d").map_err(|_| {
        AppError::invalid(format!("invalid {field} date '{input}', expected YYYY-MM-DD"))
    })
}

fn ymd(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn utc_midnight(date: NaiveDate) -> String {
    format!("{}T00:00:00Z", ymd(date))
}
