//! The multi-connection query toolkit.
//!
//! Implements the SQL-facing tool surface over [`QueryDispatcher`]. Catalog
//! operations are expressed through the engine's own SQL surface
//! (SHOW/DESCRIBE), so every backend capable of running queries serves them
//! without extra driver support.

use crate::error::{Error, Result};
use crate::server::context::{RequestContext, ToolContext};
use crate::toolkit::backend::QueryBackend;
use crate::toolkit::dispatcher::QueryDispatcher;
use crate::toolkit::input::{
    DescribeTableInput, ExecuteInput, ExplainInput, ListCatalogsInput, ListSchemasInput,
    ListTablesInput, QueryInput, ToolInput,
};
use crate::types::protocol::ToolResult;
use std::sync::Arc;

/// Toolkit kind recorded in audit events for query tools.
pub const QUERY_TOOLKIT_KIND: &str = "trino";

/// Quote an identifier for interpolation into SHOW/DESCRIBE statements.
fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// The query toolkit bound to a dispatcher.
pub struct QueryToolkit {
    name: String,
    dispatcher: Arc<QueryDispatcher>,
}

impl QueryToolkit {
    /// Create a toolkit over the given dispatcher.
    pub fn new(name: impl Into<String>, dispatcher: Arc<QueryDispatcher>) -> Self {
        Self {
            name: name.into(),
            dispatcher,
        }
    }

    /// Toolkit instance name, for audit attribution.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The dispatcher backing this toolkit.
    pub fn dispatcher(&self) -> &Arc<QueryDispatcher> {
        &self.dispatcher
    }

    /// Serve one tool call.
    pub async fn call(&self, cx: &RequestContext, tc: &ToolContext) -> Result<ToolResult> {
        match &tc.input {
            ToolInput::Query(input) => self.query(cx, input).await,
            ToolInput::Execute(input) => self.execute(cx, input).await,
            ToolInput::Explain(input) => self.explain(cx, input).await,
            ToolInput::ListCatalogs(input) => self.list_catalogs(cx, input).await,
            ToolInput::ListSchemas(input) => self.list_schemas(cx, input).await,
            ToolInput::ListTables(input) => self.list_tables(cx, input).await,
            ToolInput::DescribeTable(input) => self.describe_table(cx, input).await,
            ToolInput::ListConnections => self.list_connections(),
            ToolInput::Other { .. } => Err(Error::validation(format!(
                "unknown tool '{}'",
                tc.name
            ))),
        }
    }

    /// Dispatch with the instance timeout applied on top of the carrier.
    async fn run_rows(
        &self,
        cx: &RequestContext,
        connection: &str,
        sql: String,
    ) -> Result<ToolResult> {
        let connection = (!connection.trim().is_empty()).then_some(connection);
        let backend = self.dispatcher.dispatch(connection)?;
        let cx = cx.clone().with_timeout(self.dispatcher.timeout_for(connection));
        let rows = cx.guard(backend.query(&cx, &sql)).await?;
        Ok(ToolResult::json(rows.to_json()))
    }

    async fn query(&self, cx: &RequestContext, input: &QueryInput) -> Result<ToolResult> {
        self.run_rows(cx, &input.connection, input.sql.clone()).await
    }

    async fn execute(&self, cx: &RequestContext, input: &ExecuteInput) -> Result<ToolResult> {
        let connection = (!input.connection.trim().is_empty()).then_some(input.connection.as_str());
        let backend = self.dispatcher.dispatch(connection)?;
        let cx = cx.clone().with_timeout(self.dispatcher.timeout_for(connection));
        let outcome = cx.guard(backend.execute(&cx, &input.sql)).await?;
        Ok(ToolResult::json(serde_json::json!({
            "rows_affected": outcome.rows_affected,
        })))
    }

    async fn explain(&self, cx: &RequestContext, input: &ExplainInput) -> Result<ToolResult> {
        let connection = (!input.connection.trim().is_empty()).then_some(input.connection.as_str());
        let backend = self.dispatcher.dispatch(connection)?;
        let cx = cx.clone().with_timeout(self.dispatcher.timeout_for(connection));
        let plan = cx.guard(backend.explain(&cx, &input.sql, input.kind)).await?;
        Ok(ToolResult::text(plan))
    }

    async fn list_catalogs(
        &self,
        cx: &RequestContext,
        input: &ListCatalogsInput,
    ) -> Result<ToolResult> {
        self.run_rows(cx, &input.connection, "SHOW CATALOGS".to_string())
            .await
    }

    async fn list_schemas(
        &self,
        cx: &RequestContext,
        input: &ListSchemasInput,
    ) -> Result<ToolResult> {
        let sql = format!("SHOW SCHEMAS FROM {}", quote_ident(&input.catalog));
        self.run_rows(cx, &input.connection, sql).await
    }

    async fn list_tables(
        &self,
        cx: &RequestContext,
        input: &ListTablesInput,
    ) -> Result<ToolResult> {
        let sql = format!(
            "SHOW TABLES FROM {}.{}",
            quote_ident(&input.catalog),
            quote_ident(&input.schema)
        );
        self.run_rows(cx, &input.connection, sql).await
    }

    async fn describe_table(
        &self,
        cx: &RequestContext,
        input: &DescribeTableInput,
    ) -> Result<ToolResult> {
        let sql = format!(
            "DESCRIBE {}.{}.{}",
            quote_ident(&input.catalog),
            quote_ident(&input.schema),
            quote_ident(&input.table)
        );
        self.run_rows(cx, &input.connection, sql).await
    }

    fn list_connections(&self) -> Result<ToolResult> {
        let details = self.dispatcher.list_connections();
        Ok(ToolResult::json(serde_json::json!({
            "connections": details,
            "default": self.dispatcher.default_connection(),
        })))
    }
}

impl std::fmt::Debug for QueryToolkit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryToolkit")
            .field("name", &self.name)
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::backend::{ExecuteOutcome, QueryRows};
    use crate::toolkit::input::ExplainKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct ScriptedBackend {
        statements: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl QueryBackend for ScriptedBackend {
        async fn query(&self, _cx: &RequestContext, sql: &str) -> Result<QueryRows> {
            self.statements.lock().push(sql.to_string());
            Ok(QueryRows {
                columns: vec!["col".to_string()],
                rows: vec![vec![json!(1)]],
            })
        }

        async fn execute(&self, _cx: &RequestContext, sql: &str) -> Result<ExecuteOutcome> {
            self.statements.lock().push(sql.to_string());
            Ok(ExecuteOutcome {
                rows_affected: Some(3),
            })
        }

        async fn explain(
            &self,
            _cx: &RequestContext,
            sql: &str,
            _kind: ExplainKind,
        ) -> Result<String> {
            self.statements.lock().push(format!("EXPLAIN {}", sql));
            Ok("plan".to_string())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn toolkit() -> (QueryToolkit, Arc<ScriptedBackend>) {
        let backend = Arc::new(ScriptedBackend::default());
        let mut backends: BTreeMap<String, Arc<dyn QueryBackend>> = BTreeMap::new();
        backends.insert("warehouse".to_string(), backend.clone());
        let dispatcher =
            Arc::new(QueryDispatcher::from_backends("warehouse", backends).unwrap());
        (QueryToolkit::new("sql", dispatcher), backend)
    }

    fn tc(tool: &str, args: serde_json::Value) -> ToolContext {
        ToolContext::new(tool, ToolInput::parse(tool, args).unwrap(), "req-1", "sess-1")
    }

    #[tokio::test]
    async fn query_returns_rows_json() {
        let (toolkit, _backend) = toolkit();
        let result = toolkit
            .call(&RequestContext::new(), &tc("query", json!({"sql": "SELECT 1"})))
            .await
            .unwrap();
        match &result.content[0] {
            crate::types::protocol::Content::Json { data } => {
                assert_eq!(data["row_count"], json!(1));
                assert_eq!(data["columns"], json!(["col"]));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn catalog_tools_compose_show_statements() {
        let (toolkit, backend) = toolkit();
        let cx = RequestContext::new();

        toolkit
            .call(&cx, &tc("list_catalogs", json!({})))
            .await
            .unwrap();
        toolkit
            .call(&cx, &tc("list_schemas", json!({"catalog": "hive"})))
            .await
            .unwrap();
        toolkit
            .call(
                &cx,
                &tc("list_tables", json!({"catalog": "hive", "schema": "sales"})),
            )
            .await
            .unwrap();
        toolkit
            .call(
                &cx,
                &tc(
                    "describe_table",
                    json!({"catalog": "hive", "schema": "sales", "table": "orders"}),
                ),
            )
            .await
            .unwrap();

        let statements = backend.statements.lock();
        assert_eq!(
            *statements,
            vec![
                "SHOW CATALOGS",
                "SHOW SCHEMAS FROM \"hive\"",
                "SHOW TABLES FROM \"hive\".\"sales\"",
                "DESCRIBE \"hive\".\"sales\".\"orders\"",
            ]
        );
    }

    #[tokio::test]
    async fn execute_reports_rows_affected() {
        let (toolkit, _backend) = toolkit();
        let result = toolkit
            .call(
                &RequestContext::new(),
                &tc("execute", json!({"sql": "DELETE FROM t"})),
            )
            .await
            .unwrap();
        match &result.content[0] {
            crate::types::protocol::Content::Json { data } => {
                assert_eq!(data["rows_affected"], json!(3));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn list_connections_marks_default() {
        let (toolkit, _backend) = toolkit();
        let result = toolkit
            .call(&RequestContext::new(), &tc("list_connections", json!({})))
            .await
            .unwrap();
        match &result.content[0] {
            crate::types::protocol::Content::Json { data } => {
                assert_eq!(data["default"], json!("warehouse"));
                assert_eq!(data["connections"][0]["is_default"], json!(true));
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_a_validation_error() {
        let (toolkit, _backend) = toolkit();
        let err = toolkit
            .call(
                &RequestContext::new(),
                &tc("profile_table", json!({"table": "t"})),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }
}
