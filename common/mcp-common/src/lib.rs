//! MCP Common - Shared utilities for MCP servers
//!
//! This crate provides common functionality used by the MCP servers in this
//! workspace:
//!
//! - **Runtime**: tracing setup and the termination-signal future
//! - **Results**: Helper functions for creating `CallToolResult` responses
//! - **Errors**: Traits for converting errors to MCP-compatible format
//!
//! # Example
//!
//! ```rust,ignore
//! use mcp_common::{init_tracing, json_success, shutdown_signal};
//!
//! init_tracing("my_mcp")?;
//! let signal = shutdown_signal().await;
//! tracing::info!("Received {}", signal);
//! ```

pub mod error;
pub mod init;
pub mod result;

// Re-export commonly used items at crate root
pub use error::{internal_error, invalid_params, IntoMcpError, McpResult, ResultExt};
pub use init::{init_tracing, shutdown_signal, ShutdownSignal};
pub use result::{json_success, text_error};

// Re-export rmcp types that are commonly needed
pub use rmcp::{
    model::{CallToolResult, Content, Tool},
    ErrorData as McpError,
};
