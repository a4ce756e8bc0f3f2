//! JMAP identifier validation
//!
//! Mailbox, email, and thread identifiers are opaque strings chosen by the
//! server. They are validated against the JMAP `Id` syntax before any remote
//! call is made, so malformed input is rejected locally.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

/// Maximum length of a JMAP `Id`
const MAX_ID_LEN: usize = 255;

/// Validated JMAP identifier
///
/// # Format
///
/// 1 to 255 characters from the URL-safe base64 alphabet
/// (`A-Z`, `a-z`, `0-9`, `-`, `_`).
///
/// # Example
///
/// ```text
/// P-F
/// Mf3a21c9b8e0d4a7e
/// T1a2b3c
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JmapId(String);

impl JmapId {
    /// Parse an identifier supplied for `field`
    ///
    /// Surrounding whitespace is trimmed. Returns `InvalidInput` if the value
    /// is empty, too long, or contains characters outside the `Id` alphabet.
    pub fn parse(raw: &str, field: &str) -> AppResult<Self> {
        let value = raw.trim();
        if value.is_empty() || value.len() > MAX_ID_LEN {
            return Err(AppError::invalid(format!(
                "{field} must be 1..{MAX_ID_LEN} characters"
            )));
        }
        if !value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
        {
            return Err(AppError::invalid(format!(
                "{field} must match [A-Za-z0-9_-]+"
            )));
        }
        Ok(Self(value.to_owned()))
    }

    /// Borrow the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JmapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::JmapId;

    #[test]
    fn accepts_server_style_identifiers() {
        for raw in ["P-F", "Mf3a21c9b8e0d4a7e", "T1_a", "nonexistent-id"] {
            let id = JmapId::parse(raw, "email_id").expect("id must be valid");
            assert_eq!(id.as_str(), raw);
        }
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let id = JmapId::parse("  M123 ", "email_id").expect("id must be valid");
        assert_eq!(id.to_string(), "M123");
    }

    #[test]
    fn rejects_empty_and_oversized_identifiers() {
        let err = JmapId::parse("   ", "thread_id").expect_err("must fail");
        assert!(err.to_string().contains("thread_id must be 1..255"));

        let long = "a".repeat(256);
        assert!(JmapId::parse(&long, "thread_id").is_err());
    }

    #[test]
    fn rejects_characters_outside_id_alphabet() {
        for raw in ["a/b", "a:b", "a b", "\"quoted\"", "in\nbox"] {
            let err = JmapId::parse(raw, "mailbox_id").expect_err("must fail");
            assert!(err.to_string().contains("mailbox_id"));
        }
    }
}
