//! Database capability layer
//!
//! The rest of the server only sees three things: a pool that hands out
//! sessions, a session that can run statements inside a transaction, and a
//! factory that builds pools. [`mysql`] is the production implementation;
//! tests substitute recording fakes.
//!
//! A session is released by dropping it. A session dropped while a
//! transaction is still open must not go back to the pool as-is.

mod pool;

pub mod mysql;

pub use pool::{PoolHandle, PoolManager};

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{DatabaseConfig, Secret};
use crate::error::Result;

/// One result row, column name to value, in select-list order
pub type Row = Map<String, Value>;

/// Waiters beyond the connection limit queue for up to this long
pub const QUEUE_WAIT_LIMIT: Duration = Duration::from_secs(300);

/// Everything needed to build a pool
#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
    pub database: String,
    pub max_connections: u32,
    /// Bound on the reachability check performed at initialization
    pub connect_timeout: Duration,
}

impl PoolOptions {
    /// Options for reaching the database directly
    pub fn direct(config: &DatabaseConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            user: config.user.clone(),
            password: config.password.clone(),
            database: config.name.clone(),
            max_connections: config.connection_limit,
            connect_timeout: config.connect_timeout,
        }
    }

    /// Options for reaching the database through a local forward
    pub fn through_tunnel(config: &DatabaseConfig, local: std::net::SocketAddr) -> Self {
        Self {
            host: local.ip().to_string(),
            port: local.port(),
            ..Self::direct(config)
        }
    }
}

/// A pool of database sessions
#[async_trait]
pub trait DbPool: Send + Sync {
    /// Acquire a session, waiting in the pool's queue when all are busy
    async fn acquire(&self) -> Result<Box<dyn DbSession>>;

    /// Wait for checked-out sessions to come back, then close everything
    async fn close(&self);
}

/// A single checked-out connection
///
/// There is no commit operation; every transaction ends in a rollback.
#[async_trait]
pub trait DbSession: Send {
    /// Open a read-only transaction
    async fn begin_read_only(&mut self) -> Result<()>;

    /// Roll back the open transaction
    async fn rollback(&mut self) -> Result<()>;

    /// Run a statement and collect all rows
    ///
    /// With no parameters the statement text is sent as-is; otherwise `?`
    /// placeholders are bound to `params` in order.
    async fn fetch(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>>;
}

/// Builds pools from options without connecting
pub trait PoolFactory: Send + Sync {
    fn build(&self, options: &PoolOptions) -> Result<Arc<dyn DbPool>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn database() -> DatabaseConfig {
        DatabaseConfig {
            host: "db.internal".to_string(),
            port: 3306,
            user: "reader".to_string(),
            password: Secret::new("pw"),
            name: "mydb".to_string(),
            connection_limit: 4,
            connect_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_direct_options() {
        let options = PoolOptions::direct(&database());
        assert_eq!(options.host, "db.internal");
        assert_eq!(options.port, 3306);
        assert_eq!(options.max_connections, 4);
    }

    #[test]
    fn test_tunnel_options_target_local_endpoint() {
        let local: SocketAddr = "127.0.0.1:3333".parse().unwrap();
        let options = PoolOptions::through_tunnel(&database(), local);
        assert_eq!(options.host, "127.0.0.1");
        assert_eq!(options.port, 3333);
        assert_eq!(options.database, "mydb");
    }
}
