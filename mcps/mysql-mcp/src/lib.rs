//! MySQL MCP Library
//!
//! Exposes one MySQL database over MCP: each table's schema as a resource and
//! a single `query` tool for read-only statements. The database can be
//! reached directly or through an SSH tunnel via a bastion host.
//!
//! # Usage as Library
//!
//! ```rust,ignore
//! use mysql_mcp::{config::Config, db::mysql::MySqlPoolFactory, Coordinator};
//!
//! let config = Config::load()?;
//! let code = Coordinator::new(config, Arc::new(MySqlPoolFactory)).run().await;
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod lifecycle;
pub mod query;
pub mod router;
pub mod schema;
pub mod server;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use lifecycle::Coordinator;
pub use router::Router;
pub use server::MysqlMcpServer;
