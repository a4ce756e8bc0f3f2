//! Stateless continuation tokens for email pages
//!
//! A cursor encodes what was being listed (a mailbox, or a search filter) and
//! the position of the next page. Tokens are base64url JSON, so nothing is
//! kept server-side and a token survives restarts.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};
use crate::models::SearchFilter;

/// Longest cursor string accepted from a caller
const MAX_CURSOR_LEN: usize = 4096;

/// What a page listing is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PageScope {
    Mailbox { mailbox_id: String },
    Search { filter: SearchFilter },
}

/// Decoded continuation token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCursor {
    pub scope: PageScope,
    /// Zero-based offset of the next page in the query result
    pub position: u64,
}

impl PageCursor {
    pub fn new(scope: PageScope, position: u64) -> Self {
        Self { scope, position }
    }

    /// Serialize into an opaque token
    pub fn encode(&self) -> AppResult<String> {
        let json = serde_json::to_vec(self)
            .map_err(|e| AppError::Internal(format!("failed to encode cursor: {e}")))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Parse a token produced by [`PageCursor::encode`]
    ///
    /// # Errors
    ///
    /// - `InvalidInput` if the token is oversized, not base64url, or not a cursor
    pub fn decode(raw: &str) -> AppResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() || raw.len() > MAX_CURSOR_LEN {
            return Err(AppError::invalid("cursor is empty or too long"));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|_| AppError::invalid("cursor is not a valid continuation token"))?;
        serde_json::from_slice(&bytes)
            .map_err(|_| AppError::invalid("cursor is not a valid continuation token"))
    }
}

/// Compute the cursor for the page after one starting at `position`
///
/// Returns `None` when the page was the last one. Without a server total, a
/// full page is taken to mean more may follow.
pub fn next_position(position: u64, returned: usize, limit: usize, total: Option<u64>) -> Option<u64> {
    if returned == 0 {
        return None;
    }
    let next = position + returned as u64;
    match total {
        Some(total) => (next < total).then_some(next),
        None => (returned >= limit).then_some(next),
    }
}

#[cfg(test)]
mod tests {
    use super::{PageCursor, PageScope, next_position};
    use crate::models::SearchFilter;

    #[test]
    fn cursor_survives_encoding() {
        let cursor = PageCursor::new(
            PageScope::Search {
                filter: SearchFilter {
                    from: Some("alice@example.com".to_owned()),
                    has_attachment: Some(true),
                    ..SearchFilter::default()
                },
            },
            40,
        );
        let token = cursor.encode().expect("encode");
        assert!(!token.contains('='));
        assert_eq!(PageCursor::decode(&token).expect("decode"), cursor);
    }

    #[test]
    fn rejects_garbage_tokens() {
        for raw in ["", "not base64!", "e30", &"A".repeat(5000)] {
            let err = PageCursor::decode(raw).expect_err("must fail");
            assert!(err.to_string().contains("cursor"), "{raw}: {err}");
        }
    }

    #[test]
    fn next_position_uses_total_when_known() {
        assert_eq!(next_position(0, 20, 20, Some(45)), Some(20));
        assert_eq!(next_position(40, 5, 20, Some(45)), None);
        assert_eq!(next_position(0, 20, 20, Some(20)), None);
    }

    #[test]
    fn next_position_without_total_follows_full_pages() {
        assert_eq!(next_position(0, 20, 20, None), Some(20));
        assert_eq!(next_position(20, 3, 20, None), None);
        assert_eq!(next_position(0, 0, 20, None), None);
    }
}
