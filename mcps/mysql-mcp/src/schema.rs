//! Schema Inspector
//!
//! Read-only `information_schema` queries assembled into table descriptions.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::db::{PoolManager, Row};
use crate::error::Result;

/// MIME type of every schema resource
pub const JSON_MIME: &str = "application/json";

// ============================================================================
// Data Model
// ============================================================================

/// One discoverable schema resource per table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    pub mime_type: String,
    pub name: String,
}

impl ResourceDescriptor {
    pub fn for_table(database: &str, table: &str) -> Self {
        Self {
            uri: schema_uri(database, table),
            mime_type: JSON_MIME.to_string(),
            name: format!("\"{}\".\"{}\" schema", database, table),
        }
    }
}

/// `db://<database>/<table>/schema`
pub fn schema_uri(database: &str, table: &str) -> String {
    format!("db://{}/{}/schema", database, table)
}

/// Columns in ordinal order plus foreign keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
    pub foreign_keys: Vec<ForeignKeyDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForeignKeyDescriptor {
    pub column: String,
    pub references: ColumnReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnReference {
    pub table: String,
    pub column: String,
}

// ============================================================================
// Metadata Rows
// ============================================================================

#[derive(Debug, Deserialize)]
struct TableRow {
    table_name: String,
}

#[derive(Debug, Deserialize)]
struct ColumnRow {
    column_name: String,
    data_type: String,
    is_nullable: String,
    column_default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PrimaryKeyRow {
    column_name: String,
}

#[derive(Debug, Deserialize)]
struct ForeignKeyRow {
    column_name: String,
    referenced_table_name: String,
    referenced_column_name: String,
}

fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>> {
    rows.into_iter()
        .map(|row| serde_json::from_value(serde_json::Value::Object(row)).map_err(Into::into))
        .collect()
}

// Every selected column is aliased so the labels are lower case on all
// MySQL versions
pub(crate) const TABLES_SQL: &str = "SELECT table_name AS table_name \
     FROM information_schema.tables \
     WHERE table_schema = ? \
     ORDER BY table_name";

pub(crate) const COLUMNS_SQL: &str = "SELECT column_name AS column_name, data_type AS data_type, \
     is_nullable AS is_nullable, column_default AS column_default \
     FROM information_schema.columns \
     WHERE table_schema = ? AND table_name = ? \
     ORDER BY ordinal_position";

pub(crate) const PRIMARY_KEY_SQL: &str = "SELECT k.column_name AS column_name \
     FROM information_schema.key_column_usage k \
     JOIN information_schema.table_constraints t \
       ON k.constraint_name = t.constraint_name \
      AND k.table_schema = t.table_schema \
      AND k.table_name = t.table_name \
     WHERE t.constraint_type = 'PRIMARY KEY' \
       AND k.table_schema = ? AND k.table_name = ? \
     ORDER BY k.ordinal_position";

pub(crate) const FOREIGN_KEY_SQL: &str = "SELECT k.column_name AS column_name, \
     k.referenced_table_name AS referenced_table_name, \
     k.referenced_column_name AS referenced_column_name \
     FROM information_schema.key_column_usage k \
     JOIN information_schema.table_constraints t \
       ON k.constraint_name = t.constraint_name \
      AND k.table_schema = t.table_schema \
      AND k.table_name = t.table_name \
     WHERE t.constraint_type = 'FOREIGN KEY' \
       AND k.table_schema = ? AND k.table_name = ? \
     ORDER BY k.constraint_name, k.ordinal_position";

// ============================================================================
// Inspector
// ============================================================================

#[derive(Clone)]
pub struct SchemaInspector {
    pool: Arc<PoolManager>,
    database: String,
}

impl SchemaInspector {
    pub fn new(pool: Arc<PoolManager>, database: impl Into<String>) -> Self {
        Self {
            pool,
            database: database.into(),
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// One resource per table in the configured database
    ///
    /// Any failure is logged and yields an empty list.
    pub async fn list_tables(&self) -> Vec<ResourceDescriptor> {
        match self.fetch_table_names().await {
            Ok(names) => names
                .iter()
                .map(|table| ResourceDescriptor::for_table(&self.database, table))
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Error fetching resources");
                Vec::new()
            }
        }
    }

    async fn fetch_table_names(&self) -> Result<Vec<String>> {
        let pool = self.pool.get().await?;
        let mut session = pool.acquire().await?;
        let rows = session.fetch(TABLES_SQL, &[&self.database]).await?;
        Ok(decode_rows::<TableRow>(rows)?
            .into_iter()
            .map(|r| r.table_name)
            .collect())
    }

    /// Describe one table
    ///
    /// A table that does not exist yields a schema with no columns and no
    /// foreign keys.
    pub async fn describe_table(&self, table: &str) -> Result<TableSchema> {
        let pool = self.pool.get().await?;
        let mut session = pool.acquire().await?;
        let params = [self.database.as_str(), table];

        let columns: Vec<ColumnRow> = decode_rows(session.fetch(COLUMNS_SQL, &params).await?)?;
        let primary_keys: HashSet<String> =
            decode_rows::<PrimaryKeyRow>(session.fetch(PRIMARY_KEY_SQL, &params).await?)?
                .into_iter()
                .map(|r| r.column_name)
                .collect();
        let foreign_keys: Vec<ForeignKeyRow> =
            decode_rows(session.fetch(FOREIGN_KEY_SQL, &params).await?)?;
        drop(session);

        if columns.is_empty() {
            tracing::warn!(table, "Table has no columns, it may not exist");
        }

        Ok(TableSchema {
            name: table.to_string(),
            columns: columns
                .into_iter()
                .map(|c| ColumnDescriptor {
                    primary_key: primary_keys.contains(&c.column_name),
                    nullable: c.is_nullable.eq_ignore_ascii_case("YES"),
                    name: c.column_name,
                    data_type: c.data_type,
                    default: c.column_default,
                })
                .collect(),
            foreign_keys: foreign_keys
                .into_iter()
                .map(|fk| ForeignKeyDescriptor {
                    column: fk.column_name,
                    references: ColumnReference {
                        table: fk.referenced_table_name,
                        column: fk.referenced_column_name,
                    },
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::{initialized_manager, row, FakeFactory, FakeLog};
    use serde_json::json;

    fn self_referencing_table(sql: &str, _params: &[&str]) -> Result<Vec<Row>> {
        Ok(match sql {
            COLUMNS_SQL => vec![
                row(&[
                    ("column_name", json!("id")),
                    ("data_type", json!("int")),
                    ("is_nullable", json!("NO")),
                    ("column_default", json!(null)),
                ]),
                row(&[
                    ("column_name", json!("name")),
                    ("data_type", json!("varchar")),
                    ("is_nullable", json!("YES")),
                    ("column_default", json!("anonymous")),
                ]),
                row(&[
                    ("column_name", json!("parent_id")),
                    ("data_type", json!("int")),
                    ("is_nullable", json!("YES")),
                    ("column_default", json!(null)),
                ]),
            ],
            PRIMARY_KEY_SQL => vec![row(&[("column_name", json!("id"))])],
            FOREIGN_KEY_SQL => vec![row(&[
                ("column_name", json!("parent_id")),
                ("referenced_table_name", json!("self")),
                ("referenced_column_name", json!("id")),
            ])],
            _ => Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_describe_table_merges_keys() {
        let log = FakeLog::default();
        let manager =
            initialized_manager(FakeFactory::new(log.clone()).responding(self_referencing_table))
                .await;
        let inspector = SchemaInspector::new(manager, "mydb");

        let schema = inspector.describe_table("self").await.unwrap();

        assert_eq!(schema.name, "self");
        let names: Vec<_> = schema.columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["id", "name", "parent_id"]);
        assert!(schema.columns[0].primary_key);
        assert!(!schema.columns[1].primary_key);
        assert!(!schema.columns[0].nullable);
        assert!(schema.columns[1].nullable);
        assert_eq!(schema.columns[1].default.as_deref(), Some("anonymous"));
        assert_eq!(
            schema.foreign_keys,
            vec![ForeignKeyDescriptor {
                column: "parent_id".to_string(),
                references: ColumnReference {
                    table: "self".to_string(),
                    column: "id".to_string(),
                },
            }]
        );
    }

    #[tokio::test]
    async fn test_describe_table_uses_one_session() {
        let log = FakeLog::default();
        let manager =
            initialized_manager(FakeFactory::new(log.clone()).responding(self_referencing_table))
                .await;
        let acquired_before = log.acquired();
        let inspector = SchemaInspector::new(manager, "mydb");

        inspector.describe_table("users").await.unwrap();

        assert_eq!(log.acquired() - acquired_before, 1);
        assert_eq!(log.acquired(), log.released());
        let queries = log.queries();
        assert_eq!(queries.len(), 3);
        for (_, params) in &queries {
            assert_eq!(params, &["mydb", "users"]);
        }
    }

    #[tokio::test]
    async fn test_describe_missing_table_is_empty() {
        let manager = initialized_manager(FakeFactory::new(FakeLog::default())).await;
        let inspector = SchemaInspector::new(manager, "mydb");

        let schema = inspector.describe_table("ghost").await.unwrap();

        assert_eq!(schema.name, "ghost");
        assert!(schema.columns.is_empty());
        assert!(schema.foreign_keys.is_empty());
    }

    #[tokio::test]
    async fn test_describe_failure_releases_session() {
        let log = FakeLog::default();
        let factory = FakeFactory::new(log.clone()).responding(|sql, _| {
            if sql == PRIMARY_KEY_SQL {
                Err(Error::Database(sqlx::Error::Protocol("lost".into())))
            } else {
                Ok(Vec::new())
            }
        });
        let manager = initialized_manager(factory).await;
        let inspector = SchemaInspector::new(manager, "mydb");

        assert!(inspector.describe_table("users").await.is_err());
        assert_eq!(log.acquired(), log.released());
    }

    #[tokio::test]
    async fn test_list_tables() {
        let factory = FakeFactory::new(FakeLog::default()).responding(|sql, _| {
            Ok(if sql == TABLES_SQL {
                vec![
                    row(&[("table_name", json!("orders"))]),
                    row(&[("table_name", json!("users"))]),
                ]
            } else {
                Vec::new()
            })
        });
        let inspector = SchemaInspector::new(initialized_manager(factory).await, "mydb");

        let resources = inspector.list_tables().await;

        assert_eq!(resources.len(), 2);
        assert_eq!(resources[1].uri, "db://mydb/users/schema");
        assert_eq!(resources[1].mime_type, "application/json");
        assert_eq!(resources[1].name, "\"mydb\".\"users\" schema");
    }

    #[tokio::test]
    async fn test_list_tables_empty_database() {
        let manager = initialized_manager(FakeFactory::new(FakeLog::default())).await;
        let inspector = SchemaInspector::new(manager, "mydb");
        assert!(inspector.list_tables().await.is_empty());
    }

    #[tokio::test]
    async fn test_list_tables_failure_is_soft() {
        let factory = FakeFactory::new(FakeLog::default())
            .responding(|_, _| Err(Error::Database(sqlx::Error::PoolTimedOut)));
        let inspector = SchemaInspector::new(initialized_manager(factory).await, "mydb");
        assert!(inspector.list_tables().await.is_empty());
    }

    #[test]
    fn test_schema_serialization_shape() {
        let schema = TableSchema {
            name: "users".to_string(),
            columns: vec![ColumnDescriptor {
                name: "id".to_string(),
                data_type: "int".to_string(),
                nullable: false,
                default: None,
                primary_key: true,
            }],
            foreign_keys: Vec::new(),
        };
        let value = serde_json::to_value(&schema).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "users",
                "columns": [{
                    "name": "id",
                    "type": "int",
                    "nullable": false,
                    "default": null,
                    "primaryKey": true
                }],
                "foreignKeys": []
            })
        );
    }
}
