//! MySQL MCP - Read-only MySQL access over stdio
//!
//! Each table's schema is a resource; the `query` tool runs SELECT, SHOW,
//! DESCRIBE and EXPLAIN statements. The database can sit behind a bastion
//! reached over SSH.

use anyhow::Context;
use mysql_mcp::{config::Config, db::mysql::MySqlPoolFactory, Coordinator};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Invalid configuration")?;

    mcp_common::init_tracing("mysql_mcp")?;

    let code = Coordinator::new(config, Arc::new(MySqlPoolFactory)).run().await;

    // The stdio reader can hold the runtime open, so exit directly
    std::process::exit(code);
}
