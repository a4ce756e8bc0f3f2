//! Application error model with MCP error mapping
//!
//! Defines a typed error hierarchy using `thiserror` for internal error handling,
//! and maps each variant to the appropriate MCP `ErrorData` type for protocol
//! compliance.

use rmcp::model::ErrorData;
use serde_json::json;
use thiserror::Error;

/// Application error type
///
/// Covers every failure a tool invocation can surface. Each variant maps to an
/// MCP error code in [`ErrorData`]; none of them terminate the process.
#[derive(Debug, Error)]
pub enum AppError {
    /// Caller arguments violate a tool's input constraints
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Referenced mailbox, email, or thread does not exist
    #[error("not found: {0}")]
    NotFound(String),
    /// The JMAP session resource could not be fetched or understood
    #[error("session discovery failed: {0}")]
    Discovery(String),
    /// A method-call batch failed at the transport or session level
    #[error("remote call failed: {message}")]
    RemoteCall {
        /// Human-readable failure description (may include a body excerpt)
        message: String,
        /// HTTP status returned by the remote API, if any
        status: Option<u16>,
        /// Whether retrying the whole request later may succeed
        transient: bool,
    },
    /// Inbound bearer credential missing or rejected
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Internal error (unexpected failure, external crate error)
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Convenience constructor for `InvalidInput`
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Convenience constructor for a `RemoteCall` failure
    pub fn remote(msg: impl Into<String>, status: Option<u16>, transient: bool) -> Self {
        Self::RemoteCall {
            message: msg.into(),
            status,
            transient,
        }
    }

    /// Convert to MCP `ErrorData`
    ///
    /// # Mappings
    ///
    /// - `InvalidInput` → `invalid_params`
    /// - `NotFound` → `resource_not_found`
    /// - `Discovery` → `internal_error`
    /// - `RemoteCall` → `internal_error` (status and transient flag in data)
    /// - `Unauthorized` → `invalid_request`
    /// - `Internal` → `internal_error`
    pub fn to_error_data(&self) -> ErrorData {
        match self {
            Self::InvalidInput(msg) => {
                ErrorData::invalid_params(msg.clone(), Some(json!({ "code": "invalid_input" })))
            }
            Self::NotFound(msg) => {
                ErrorData::resource_not_found(msg.clone(), Some(json!({ "code": "not_found" })))
            }
            Self::Discovery(msg) => ErrorData::internal_error(
                format!("session discovery failed: {msg}"),
                Some(json!({ "code": "discovery" })),
            ),
            Self::RemoteCall {
                message,
                status,
                transient,
            } => ErrorData::internal_error(
                format!("remote call failed: {message}"),
                Some(json!({
                    "code": "remote_call",
                    "status": status,
                    "transient": transient,
                })),
            ),
            Self::Unauthorized(msg) => {
                ErrorData::invalid_request(msg.clone(), Some(json!({ "code": "unauthorized" })))
            }
            Self::Internal(msg) => {
                ErrorData::internal_error(msg.clone(), Some(json!({ "code": "internal" })))
            }
        }
    }
}

/// Type alias for fallible return values
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use rmcp::model::ErrorCode;

    use super::AppError;

    #[test]
    fn remote_call_error_carries_status_and_transient_flag() {
        let data = AppError::remote("upstream returned 502", Some(502), true).to_error_data();
        assert_eq!(data.code, ErrorCode::INTERNAL_ERROR);
        let extra = data.data.expect("error data must be present");
        assert_eq!(extra["code"], "remote_call");
        assert_eq!(extra["status"], 502);
        assert_eq!(extra["transient"], true);
    }

    #[test]
    fn caller_errors_map_to_client_error_codes() {
        let invalid = AppError::invalid("no filter").to_error_data();
        assert_eq!(invalid.code, ErrorCode::INVALID_PARAMS);

        let missing = AppError::NotFound("email 'x'".to_owned()).to_error_data();
        assert_eq!(missing.code, ErrorCode::RESOURCE_NOT_FOUND);
    }
}
