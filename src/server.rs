//! MCP server implementation with tool handlers
//!
//! Implements the `ServerHandler` trait and registers the five read-only mail
//! tools. Business logic lives in [`crate::tools`]; this module handles
//! response envelopes and error mapping.

use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{ErrorData, ServerCapabilities, ServerInfo};
use rmcp::{Json, ServerHandler, tool, tool_handler, tool_router};
use tracing::{info, warn};

use crate::errors::AppResult;
use crate::models::{
    EmailDetail, EmailPage, GetEmailInput, GetThreadInput, ListEmailsInput, MailboxList, Meta,
    SearchEmailsInput, ThreadView, ToolEnvelope,
};
use crate::tools::MailTools;

/// JMAP mail MCP server
///
/// Holds the shared tool layer. Implements MCP tool handlers via `#[tool]`
/// attribute macro and `ServerHandler` trait. Cloned once per MCP session by
/// the HTTP transport; clones share the same session cache.
#[derive(Clone)]
pub struct MailJmapServer {
    /// Read-only mail operations
    tools: Arc<MailTools>,
    /// Tool router for dispatching MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl MailJmapServer {
    pub fn new(tools: MailTools) -> Self {
        Self {
            tools: Arc::new(tools),
            tool_router: Self::tool_router(),
        }
    }

    /// Tool: List mailboxes with counts
    #[tool(
        name = "list_mailboxes",
        description = "List all mailboxes (folders) with total and unread counts. Start here to find mailbox ids.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = false
        )
    )]
    async fn list_mailboxes(&self) -> Result<Json<ToolEnvelope<MailboxList>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "list_mailboxes",
            started,
            self.tools.list_mailboxes().await.map(|data| {
                (format!("{} mailbox(es)", data.mailboxes.len()), data)
            }),
        )
    }

    /// Tool: Page through a mailbox, newest first
    #[tool(
        name = "list_emails",
        description = "List emails in a mailbox, newest first, showing sender, subject, date, and preview. Use next_cursor to fetch the following page.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = false
        )
    )]
    async fn list_emails(
        &self,
        Parameters(input): Parameters<ListEmailsInput>,
    ) -> Result<Json<ToolEnvelope<EmailPage>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "list_emails",
            started,
            self.tools
                .list_emails(input)
                .await
                .map(|data| (page_summary(&data), data)),
        )
    }

    /// Tool: Get one email with body, headers, and attachment metadata
    #[tool(
        name = "get_email",
        description = "Get the full content of an email by id: addresses, body text, optional sanitized HTML, headers, and attachment metadata.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = false
        )
    )]
    async fn get_email(
        &self,
        Parameters(input): Parameters<GetEmailInput>,
    ) -> Result<Json<ToolEnvelope<EmailDetail>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "get_email",
            started,
            self.tools
                .get_email(input)
                .await
                .map(|data| (format!("Email '{}' retrieved", data.subject), data)),
        )
    }

    /// Tool: Search with combined criteria
    #[tool(
        name = "search_emails",
        description = "Search emails by text, sender, recipient, subject, body, date range (YYYY-MM-DD), or attachment presence. Criteria are combined with AND; at least one is required.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = false
        )
    )]
    async fn search_emails(
        &self,
        Parameters(input): Parameters<SearchEmailsInput>,
    ) -> Result<Json<ToolEnvelope<EmailPage>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "search_emails",
            started,
            self.tools
                .search_emails(input)
                .await
                .map(|data| (page_summary(&data), data)),
        )
    }

    /// Tool: Get a conversation in date order
    #[tool(
        name = "get_thread",
        description = "Get all emails in a conversation thread, oldest first, with bounded body text per message.",
        annotations(
            read_only_hint = true,
            destructive_hint = false,
            idempotent_hint = true,
            open_world_hint = false
        )
    )]
    async fn get_thread(
        &self,
        Parameters(input): Parameters<GetThreadInput>,
    ) -> Result<Json<ToolEnvelope<ThreadView>>, ErrorData> {
        let started = Instant::now();
        finalize_tool(
            "get_thread",
            started,
            self.tools.get_thread(input).await.map(|data| {
                (
                    format!("Thread '{}' ({} message(s))", data.subject, data.message_count),
                    data,
                )
            }),
        )
    }
}

#[tool_handler(router = self.tool_router)]
impl ServerHandler for MailJmapServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo::new(ServerCapabilities::builder().enable_tools().build()).with_instructions(
            "Read-only access to a JMAP mail account. Start with list_mailboxes to see available folders, then use list_emails or search_emails to find specific messages. Use get_email for full content and get_thread for conversation context.".to_owned(),
        )
    }
}

fn page_summary(page: &EmailPage) -> String {
    let total = page
        .total
        .map_or_else(|| "?".to_owned(), |total| total.to_string());
    let more = if page.has_more { ", more available" } else { "" };
    format!(
        "{} of {total} email(s) from offset {}{more}",
        page.items.len(),
        page.position
    )
}

/// Calculate elapsed milliseconds
fn duration_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

/// Build a standardized MCP tool response envelope from business logic output
fn finalize_tool<T>(
    tool: &str,
    started: Instant,
    result: AppResult<(String, T)>,
) -> Result<Json<ToolEnvelope<T>>, ErrorData>
where
    T: schemars::JsonSchema,
{
    let elapsed_ms = duration_ms(started);
    match result {
        Ok((summary, data)) => {
            info!(tool, duration_ms = elapsed_ms, "tool completed");
            Ok(Json(ToolEnvelope {
                summary,
                data,
                meta: Meta::now(elapsed_ms),
            }))
        }
        Err(e) => {
            warn!(tool, duration_ms = elapsed_ms, error = %e, "tool failed");
            Err(e.to_error_data())
        }
    }
}
