//! Body selection and header curation for JMAP emails
//!
//! Picks readable text from the body values the server returned, converts
//! HTML to text with `html2text`, sanitizes HTML with `ammonia`, and bounds
//! output by character count.

use crate::jmap::{Email, EmailBodyPart, EmailHeader};
use crate::models::HeaderField;

/// Wrap width used when rendering HTML to text
const HTML_TEXT_WIDTH: usize = 100;

/// Header names returned when the caller does not ask for all headers
const CURATED_HEADERS: [&str; 6] = ["date", "from", "to", "cc", "subject", "message-id"];

/// Body content selected from an email
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodyContent {
    pub text: String,
    /// Whether the server or the caller's limit cut the content short
    pub truncated: bool,
}

impl BodyContent {
    /// Apply a character limit, keeping the truncation flag sticky
    pub fn bounded(self, max_chars: usize) -> Self {
        let truncated = self.truncated || self.text.chars().count() > max_chars;
        Self {
            text: truncate_chars(self.text, max_chars),
            truncated,
        }
    }
}

/// Readable plain-text body of `email`
///
/// Uses the `textBody` parts first; `text/html` parts within it are converted
/// to text. Falls back to the `htmlBody` parts converted to text. Returns
/// `None` when no body value was fetched.
pub fn body_text(email: &Email) -> Option<BodyContent> {
    collect_parts(email, email.text_body.as_deref(), true)
        .or_else(|| collect_parts(email, email.html_body.as_deref(), true))
}

/// Sanitized HTML body of `email`, if it has one
pub fn body_html(email: &Email) -> Option<BodyContent> {
    let parts = email.html_body.as_deref()?;
    let html_parts = parts
        .iter()
        .filter(|part| is_html(part))
        .cloned()
        .collect::<Vec<_>>();
    collect_parts(email, Some(&html_parts), false).map(|content| BodyContent {
        text: sanitize_html(&content.text),
        truncated: content.truncated,
    })
}

fn collect_parts(
    email: &Email,
    parts: Option<&[EmailBodyPart]>,
    render_html: bool,
) -> Option<BodyContent> {
    let values = email.body_values.as_ref()?;
    let mut chunks = Vec::new();
    let mut truncated = false;

    for part in parts.unwrap_or_default() {
        let Some(value) = part.part_id.as_ref().and_then(|id| values.get(id)) else {
            continue;
        };
        truncated |= value.is_truncated;
        let chunk = if render_html && is_html(part) {
            html_to_text(&value.value)
        } else {
            value.value.clone()
        };
        if !chunk.trim().is_empty() {
            chunks.push(chunk);
        }
    }

    if chunks.is_empty() {
        return None;
    }
    Some(BodyContent {
        text: chunks.join("\n"),
        truncated,
    })
}

fn is_html(part: &EmailBodyPart) -> bool {
    part.content_type
        .as_deref()
        .is_some_and(|ct| ct.eq_ignore_ascii_case("text/html"))
}

/// Render HTML as plain text
///
/// Falls back to stripping every tag with `ammonia` if the renderer fails.
pub fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), HTML_TEXT_WIDTH) {
        Ok(text) => text.trim_end().to_owned(),
        Err(_) => ammonia::Builder::empty().clean(html).to_string(),
    }
}

/// Remove scripts, event handlers, and other unsafe markup
pub fn sanitize_html(html: &str) -> String {
    ammonia::clean(html)
}

/// Return headers, either curated or all
///
/// If `include_all=true`, returns all headers in message order. Otherwise,
/// returns only a safe subset (Date, From, To, Cc, Subject, Message-ID).
pub fn curated_headers(headers: &[EmailHeader], include_all: bool) -> Vec<HeaderField> {
    headers
        .iter()
        .filter(|h| include_all || CURATED_HEADERS.contains(&h.name.to_ascii_lowercase().as_str()))
        .map(|h| HeaderField {
            name: h.name.clone(),
            value: h.value.trim().to_owned(),
        })
        .collect()
}

/// Truncate string to maximum characters (Unicode-aware)
///
/// Preserves complete characters, never splitting multi-byte sequences.
pub fn truncate_chars(input: String, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input;
    }
    input.chars().take(max_chars).collect()
}
