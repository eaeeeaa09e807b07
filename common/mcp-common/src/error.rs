//! Error handling utilities for MCP servers
//!
//! Servers keep their own domain error types and decide, per variant, whether
//! a failure reaches the client as a protocol error or as tool content.
//! [`IntoMcpError`] is the protocol-error half of that decision.

use rmcp::ErrorData as McpError;

/// Type alias for MCP handler results
pub type McpResult<T> = Result<T, McpError>;

/// Trait for converting errors into MCP protocol errors
///
/// # Example
///
/// ```rust,ignore
/// use mcp_common::{invalid_params, internal_error, IntoMcpError};
///
/// impl IntoMcpError for MyError {
///     fn into_mcp_error(self) -> McpError {
///         match self {
///             MyError::BadInput(msg) => invalid_params(msg),
///             other => internal_error(other.to_string()),
///         }
///     }
/// }
/// ```
pub trait IntoMcpError {
    /// Convert this error into an MCP error
    fn into_mcp_error(self) -> McpError;
}

impl IntoMcpError for serde_json::Error {
    fn into_mcp_error(self) -> McpError {
        McpError::internal_error(format!("JSON error: {}", self), None)
    }
}

impl IntoMcpError for String {
    fn into_mcp_error(self) -> McpError {
        McpError::internal_error(self, None)
    }
}

impl IntoMcpError for &str {
    fn into_mcp_error(self) -> McpError {
        McpError::internal_error(self.to_string(), None)
    }
}

/// Extension trait for Result types to convert to MCP errors
///
/// ```rust,ignore
/// use mcp_common::ResultExt;
///
/// let schema = self.router.read_resource(&request.uri).await.to_mcp_err()?;
/// ```
pub trait ResultExt<T> {
    /// Convert the error to an MCP error
    fn to_mcp_err(self) -> Result<T, McpError>;
}

impl<T, E: IntoMcpError> ResultExt<T> for Result<T, E> {
    fn to_mcp_err(self) -> Result<T, McpError> {
        self.map_err(|e| e.into_mcp_error())
    }
}

/// Create an internal error with a message
pub fn internal_error(message: impl Into<String>) -> McpError {
    McpError::internal_error(message.into(), None)
}

/// Create an invalid params error with a message
///
/// Use this when the request names something that does not exist or
/// carries arguments of the wrong shape.
pub fn invalid_params(message: impl Into<String>) -> McpError {
    McpError::invalid_params(message.into(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::ErrorCode;

    #[test]
    fn test_into_mcp_error_string() {
        let err = "test error".into_mcp_error();
        assert!(err.message.contains("test error"));
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), String> = Err("lost connection".to_string());
        let err = result.to_mcp_err().unwrap_err();
        assert!(err.message.contains("lost connection"));
    }

    #[test]
    fn test_invalid_params_code() {
        let err = invalid_params("bad uri");
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(err.message.contains("bad uri"));
    }
}
