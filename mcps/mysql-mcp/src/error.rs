//! Error types for the MySQL MCP server
//!
//! Startup failures (`Config`, `Tunnel`, `Pool`) are fatal. Per-request
//! failures (`Validation`, `Execution`) are turned into response content by
//! the router and never cross the protocol boundary as faults.

use mcp_common::{internal_error, invalid_params, IntoMcpError, McpError};
use thiserror::Error;

use crate::config::ConfigError;

/// Errors raised by the server components
#[derive(Error, Debug)]
pub enum Error {
    /// Missing or invalid setting
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Establishing or closing the SSH forward failed
    #[error("SSH tunnel error: {0}")]
    Tunnel(String),

    /// Pool creation or the reachability check failed
    #[error("Database initialization failed: {0}")]
    Pool(String),

    /// The protocol transport failed to start or stop cleanly
    #[error("Transport error: {0}")]
    Transport(String),

    /// Disallowed statement or malformed resource identifier
    #[error("{0}")]
    Validation(String),

    /// The database rejected or failed a submitted statement
    #[error("{0}")]
    Execution(String),

    /// A handler ran before the pool was initialized
    #[error("Database pool has not been initialized")]
    NotInitialized,

    #[error("Unknown tool requested: {0}")]
    UnknownTool(String),

    /// Driver-level failure from the connection capability
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A metadata row did not have the expected shape
    #[error("failed to decode metadata row: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Result type alias for server operations
pub type Result<T> = std::result::Result<T, Error>;

impl IntoMcpError for Error {
    fn into_mcp_error(self) -> McpError {
        match self {
            Error::Validation(msg) => invalid_params(msg),
            Error::UnknownTool(_) => invalid_params(self.to_string()),
            other => internal_error(other.to_string()),
        }
    }
}
