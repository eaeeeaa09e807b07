//! Request Router
//!
//! Transport-agnostic dispatch of the four operation kinds onto the schema
//! inspector and the query executor.

use mcp_common::{json_success, text_error, CallToolResult, Tool};
use rmcp::model::JsonObject;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::query::QueryExecutor;
use crate::schema::{ResourceDescriptor, SchemaInspector, JSON_MIME};

/// Name of the single exposed tool
pub const QUERY_TOOL: &str = "query";

const QUERY_TOOL_DESCRIPTION: &str = "Executes a read-only SQL query (SELECT, SHOW, DESCRIBE, \
     EXPLAIN) against the connected MySQL database. Returns the query results as a JSON string. \
     Note: Write operations (INSERT, UPDATE, DELETE, etc.) are strictly prohibited and will \
     result in an error.";

/// Parameters for the query tool
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// The read-only SQL query to execute (e.g., "SELECT * FROM users LIMIT 10"). Only SELECT, SHOW, DESCRIBE, and EXPLAIN statements are allowed.
    pub sql: String,
}

/// Text content of one read resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceText {
    pub uri: String,
    pub mime_type: String,
    pub text: String,
}

/// Split `db://<database>/<table>/schema` into its database and table
pub fn parse_resource_uri(uri: &str) -> Result<(&str, &str)> {
    let invalid = || Error::Validation(format!("Invalid resource URI: {}", uri));

    let path = uri.strip_prefix("db://").ok_or_else(invalid)?;
    let segments: Vec<&str> = path.split('/').collect();
    match segments.as_slice() {
        [database, table, "schema"] if !database.is_empty() && !table.is_empty() => {
            Ok((*database, *table))
        }
        _ => Err(invalid()),
    }
}

#[derive(Clone)]
pub struct Router {
    inspector: SchemaInspector,
    executor: QueryExecutor,
}

impl Router {
    pub fn new(inspector: SchemaInspector, executor: QueryExecutor) -> Self {
        Self {
            inspector,
            executor,
        }
    }

    /// Name of the connected database
    pub fn database(&self) -> &str {
        self.inspector.database()
    }

    pub async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        self.inspector.list_tables().await
    }

    /// Describe the table named by `uri`
    ///
    /// The returned text is the pretty-printed table schema, keyed by the uri
    /// exactly as requested.
    pub async fn read_resource(&self, uri: &str) -> Result<ResourceText> {
        let (database, table) = parse_resource_uri(uri)?;
        if database != self.inspector.database() {
            return Err(Error::Validation(format!(
                "Unknown database in resource URI: {}",
                uri
            )));
        }

        let schema = self.inspector.describe_table(table).await?;
        Ok(ResourceText {
            uri: uri.to_string(),
            mime_type: JSON_MIME.to_string(),
            text: serde_json::to_string_pretty(&schema)?,
        })
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        vec![query_tool()]
    }

    /// Dispatch a tool call
    ///
    /// Statement failures come back as error content; only an unknown tool or
    /// unusable arguments are returned as `Err`.
    pub async fn call_tool(&self, name: &str, arguments: Option<JsonObject>) -> Result<CallToolResult> {
        if name != QUERY_TOOL {
            return Err(Error::UnknownTool(name.to_string()));
        }

        let params: QueryParams =
            serde_json::from_value(Value::Object(arguments.unwrap_or_default()))
                .map_err(|e| Error::Validation(format!("Invalid arguments for {}: {}", QUERY_TOOL, e)))?;

        match self.executor.execute(&params.sql).await {
            Ok(rows) => json_success(&rows).or_else(|e| Ok(text_error(e.message))),
            Err(Error::Validation(msg)) => Ok(text_error(format!("Validation error: {}", msg))),
            Err(Error::NotInitialized) => Err(Error::NotInitialized),
            Err(e) => Ok(text_error(format!("Error executing query: {}", e))),
        }
    }
}

fn query_tool() -> Tool {
    let mut schema = match serde_json::to_value(schemars::schema_for!(QueryParams)) {
        Ok(Value::Object(map)) => map,
        _ => JsonObject::new(),
    };
    schema.remove("$schema");
    Tool::new(QUERY_TOOL, QUERY_TOOL_DESCRIPTION, Arc::new(schema))
}
