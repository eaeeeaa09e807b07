//! MySQL MCP Server implementation
//!
//! Thin rmcp adapter over [`Router`]; every handler is stateless.

use mcp_common::{McpError, ResultExt};
use rmcp::{
    model::{
        AnnotateAble, CallToolRequestParam, CallToolResult, Implementation, ListResourcesResult,
        ListToolsResult, PaginatedRequestParam, RawResource, ReadResourceRequestParam,
        ReadResourceResult, ResourceContents, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    RoleServer, ServerHandler,
};

use crate::router::Router;
use crate::schema::ResourceDescriptor;

/// MySQL MCP Server
#[derive(Clone)]
pub struct MysqlMcpServer {
    router: Router,
}

impl MysqlMcpServer {
    pub fn new(router: Router) -> Self {
        Self { router }
    }
}

fn to_resource(descriptor: ResourceDescriptor) -> rmcp::model::Resource {
    let mut raw = RawResource::new(descriptor.uri, descriptor.name);
    raw.mime_type = Some(descriptor.mime_type);
    raw.no_annotation()
}

impl ServerHandler for MysqlMcpServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(format!(
                "Read-only access to the MySQL database `{db}`. Each table's schema is a \
                 resource at db://{db}/<table>/schema. Use the query tool to run SELECT, \
                 SHOW, DESCRIBE or EXPLAIN statements; results are returned as JSON.",
                db = self.router.database()
            )),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Implementation::default()
            },
            ..Default::default()
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move {
            let resources = self
                .router
                .list_resources()
                .await
                .into_iter()
                .map(to_resource)
                .collect();
            Ok(ListResourcesResult::with_all_items(resources))
        }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            let resource = self
                .router
                .read_resource(&request.uri)
                .await
                .to_mcp_err()?;

            let mut contents = ResourceContents::text(resource.text, resource.uri);
            if let ResourceContents::TextResourceContents { mime_type, .. } = &mut contents {
                *mime_type = Some(resource.mime_type);
            }
            Ok(ReadResourceResult {
                contents: vec![contents],
            })
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move { Ok(ListToolsResult::with_all_items(self.router.list_tools())) }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            self.router
                .call_tool(&request.name, request.arguments)
                .await
                .to_mcp_err()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryExecutor;
    use crate::schema::SchemaInspector;
    use crate::testing::{initialized_manager, FakeFactory, FakeLog};
    use rmcp::model::ErrorCode;

    #[tokio::test]
    async fn test_get_info_advertises_tools_and_resources() {
        let manager = initialized_manager(FakeFactory::new(FakeLog::default())).await;
        let server = MysqlMcpServer::new(Router::new(
            SchemaInspector::new(manager.clone(), "mydb"),
            QueryExecutor::new(manager, None),
        ));

        let info = server.get_info();

        assert!(info.capabilities.tools.is_some());
        assert!(info.capabilities.resources.is_some());
        assert_eq!(info.server_info.name, "mysql-mcp");
        assert!(info
            .instructions
            .unwrap_or_default()
            .contains("db://mydb/<table>/schema"));
    }

    #[tokio::test]
    async fn test_router_errors_become_protocol_errors() {
        let manager = initialized_manager(FakeFactory::new(FakeLog::default())).await;
        let router = Router::new(
            SchemaInspector::new(manager.clone(), "mydb"),
            QueryExecutor::new(manager, None),
        );

        let err = router
            .read_resource("db://otherdb/users/schema")
            .await
            .to_mcp_err()
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);

        let err = router.call_tool("mutate", None).await.to_mcp_err().unwrap_err();
        assert_eq!(err.code, ErrorCode::INVALID_PARAMS);
        assert!(err.message.contains("mutate"));
    }

    #[test]
    fn test_resource_conversion() {
        let resource = to_resource(ResourceDescriptor::for_table("mydb", "users"));
        assert_eq!(resource.uri, "db://mydb/users/schema");
        assert_eq!(resource.name, "\"mydb\".\"users\" schema");
        assert_eq!(resource.mime_type.as_deref(), Some("application/json"));
    }
}
