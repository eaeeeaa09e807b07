//! sqlx-backed MySQL implementation of the database capability traits

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::mysql::{MySql, MySqlConnectOptions, MySqlConnection, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::pool::PoolConnection;
use sqlx::{Column, Executor, Row as _, TypeInfo};
use std::sync::Arc;

use super::{DbPool, DbSession, PoolFactory, PoolOptions, Row, QUEUE_WAIT_LIMIT};
use crate::error::{Error, Result};

/// Builds lazily-connecting MySQL pools
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlPoolFactory;

impl PoolFactory for MySqlPoolFactory {
    fn build(&self, options: &PoolOptions) -> Result<Arc<dyn DbPool>> {
        let connect = MySqlConnectOptions::new()
            .host(&options.host)
            .port(options.port)
            .username(&options.user)
            .password(options.password.expose())
            .database(&options.database);

        let pool = MySqlPoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(QUEUE_WAIT_LIMIT)
            .connect_lazy_with(connect);

        Ok(Arc::new(MySqlDbPool { pool }))
    }
}

struct MySqlDbPool {
    pool: MySqlPool,
}

#[async_trait]
impl DbPool for MySqlDbPool {
    async fn acquire(&self) -> Result<Box<dyn DbSession>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(MySqlSession {
            conn: Some(conn),
            in_transaction: false,
        }))
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

struct MySqlSession {
    conn: Option<PoolConnection<MySql>>,
    in_transaction: bool,
}

impl MySqlSession {
    fn connection(&mut self) -> Result<&mut MySqlConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::Execution("connection is no longer available".to_string()))
    }
}

#[async_trait]
impl DbSession for MySqlSession {
    async fn begin_read_only(&mut self) -> Result<()> {
        // Set first: if BEGIN itself fails the connection state is unknown
        self.in_transaction = true;
        let conn: &mut MySqlConnection = self.connection()?;
        conn.execute(sqlx::raw_sql("START TRANSACTION READ ONLY")).await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let conn: &mut MySqlConnection = self.connection()?;
        conn.execute(sqlx::raw_sql("ROLLBACK")).await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn fetch(&mut self, sql: &str, params: &[&str]) -> Result<Vec<Row>> {
        let conn: &mut MySqlConnection = self.connection()?;

        // Unparameterized statements go over the text protocol, which
        // accepts every statement form (SHOW, DESCRIBE, ...)
        let rows = if params.is_empty() {
            conn.fetch_all(sqlx::raw_sql(sql)).await?
        } else {
            let mut query = sqlx::query(sql);
            for param in params {
                query = query.bind(*param);
            }
            query.fetch_all(&mut *conn).await?
        };

        Ok(rows.iter().map(row_to_json).collect())
    }
}

impl Drop for MySqlSession {
    fn drop(&mut self) {
        if !self.in_transaction {
            return;
        }
        if let Some(conn) = self.conn.take() {
            // The server discards the uncommitted transaction when the
            // connection goes away
            tracing::warn!("Session released with an open transaction, closing its connection");
            drop(conn.detach());
        }
    }
}

fn row_to_json(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|column| {
            let value = column_value(row, column.ordinal(), column.type_info().name());
            (column.name().to_string(), value)
        })
        .collect()
}

fn column_value(row: &MySqlRow, index: usize, type_name: &str) -> Value {
    let value = match type_name {
        "BOOLEAN" => decode::<bool>(row, index).map(Value::Bool),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            decode::<i64>(row, index).map(Value::from)
        }
        t if t.ends_with("INT UNSIGNED") => decode::<u64>(row, index).map(Value::from),
        "FLOAT" => decode::<f32>(row, index).map(|v| json!(f64::from(v))),
        "DOUBLE" => decode::<f64>(row, index).map(|v| json!(v)),
        // `_bin` collated text columns are reported under these names too
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            decode::<Vec<u8>>(row, index).map(binary_to_json)
        }
        "BIT" | "GEOMETRY" => decode::<Vec<u8>>(row, index).map(|b| blob_marker(b.len())),
        "JSON" => decode::<String>(row, index)
            .map(|s| serde_json::from_str(&s).unwrap_or(Value::String(s))),
        _ => decode::<String>(row, index).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

/// Text stored in a binary-typed column comes back as a string; anything
/// that is not valid UTF-8 is summarized by its length.
fn binary_to_json(bytes: Vec<u8>) -> Value {
    match String::from_utf8(bytes) {
        Ok(text) => Value::String(text),
        Err(e) => blob_marker(e.as_bytes().len()),
    }
}

fn blob_marker(len: usize) -> Value {
    Value::String(format!("<blob {} bytes>", len))
}

/// Decode a nullable column without sqlx's type-compatibility check
///
/// The text protocol reports exact column types, but DECIMAL and temporal
/// values are carried as strings, which the checked accessor would refuse.
fn decode<'r, T>(row: &'r MySqlRow, index: usize) -> Option<T>
where
    T: sqlx::Decode<'r, MySql> + sqlx::Type<MySql>,
{
    match row.try_get_unchecked::<Option<T>, _>(index) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(column = index, error = %e, "Failed to decode column value");
            None
        }
    }
}
