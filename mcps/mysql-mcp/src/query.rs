//! Query Executor
//!
//! Read-only enforcement is two layers: a statement-prefix check before any
//! connection is touched, and a read-only transaction that is rolled back
//! whatever happens.

use std::sync::Arc;
use std::time::Duration;

use crate::db::{PoolManager, Row};
use crate::error::{Error, Result};

/// Statement forms accepted by the query tool
pub const ALLOWED_STATEMENTS: [&str; 4] = ["select", "show", "describe", "explain"];

/// Check that a statement is a single statement starting with an allowed
/// keyword
///
/// Case and surrounding whitespace are ignored. A `;` may only end the
/// statement: the text protocol runs everything after it as further
/// statements, outside the read-only transaction. Semicolons inside string
/// literals are rejected too.
pub fn validate_read_only(statement: &str) -> Result<()> {
    let normalized = statement.trim().to_lowercase();
    if !ALLOWED_STATEMENTS
        .iter()
        .any(|keyword| normalized.starts_with(keyword))
    {
        return Err(Error::Validation(
            "Only read-only queries (SELECT, SHOW, DESCRIBE, EXPLAIN) are allowed.".to_string(),
        ));
    }

    let body = normalized.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    if body.contains(';') {
        return Err(Error::Validation(
            "Only a single statement is allowed per query.".to_string(),
        ));
    }
    Ok(())
}

/// Runs validated statements inside always-rolled-back transactions
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Arc<PoolManager>,
    timeout: Option<Duration>,
}

impl QueryExecutor {
    pub fn new(pool: Arc<PoolManager>, timeout: Option<Duration>) -> Self {
        Self { pool, timeout }
    }

    /// Execute one read-only statement and return its rows
    ///
    /// Fails with [`Error::Validation`] before acquiring a connection, or with
    /// [`Error::Execution`] for anything the database reports. The session is
    /// released on every path; if the statement outlives the timeout the
    /// session is dropped with its transaction still open, which closes the
    /// connection instead of returning it to the pool.
    pub async fn execute(&self, statement: &str) -> Result<Vec<Row>> {
        validate_read_only(statement)?;

        let pool = self.pool.get().await?;
        let mut session = pool
            .acquire()
            .await
            .map_err(|e| Error::Execution(e.to_string()))?;

        session
            .begin_read_only()
            .await
            .map_err(|e| Error::Execution(e.to_string()))?;

        tracing::info!(sql = %statement, "Executing read-only query");

        let fetched = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, session.fetch(statement, &[]))
                .await
                .ok(),
            None => Some(session.fetch(statement, &[]).await),
        };

        let Some(outcome) = fetched else {
            tracing::warn!(sql = %statement, "Query timed out, discarding connection");
            drop(session);
            let limit = self.timeout.unwrap_or_default();
            return Err(Error::Execution(format!(
                "query exceeded {}s timeout",
                limit.as_secs_f64()
            )));
        };

        if let Err(e) = session.rollback().await {
            tracing::warn!(error = %e, "Rollback failed, connection will be discarded");
        }

        outcome.map_err(|e| {
            tracing::error!(sql = %statement, error = %e, "Error executing query");
            match e {
                Error::Database(sqlx::Error::Database(db)) => Error::Execution(db.message().to_string()),
                other => Error::Execution(other.to_string()),
            }
        })
    }
}
