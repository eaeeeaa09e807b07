//! Result helpers for MCP tool responses
//!
//! Tool failures that the client should read (rather than a protocol fault)
//! are returned as ordinary content with `is_error` set, see [`text_error`].

use rmcp::{
    model::{CallToolResult, Content},
    ErrorData as McpError,
};
use serde::Serialize;

/// Create a successful JSON response from any serializable data
///
/// The payload is pretty-printed JSON in a single text content item.
///
/// ```rust,ignore
/// let rows: Vec<serde_json::Map<String, Value>> = executor.execute(sql).await?;
/// json_success(&rows)
/// ```
pub fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Create a tool-level error response carrying a plain text message
///
/// The response is still well-formed: the message travels as content and
/// `is_error` is set, so the client sees it without a protocol error.
pub fn text_error(text: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text.into())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_json_success() {
        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };
        let result = json_success(&data).unwrap();
        assert!(!result.is_error.unwrap_or(false));
        assert_eq!(result.content.len(), 1);
    }

    #[test]
    fn test_text_error() {
        let result = text_error("Error executing query: boom");
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content.len(), 1);
    }
}
