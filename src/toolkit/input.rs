//! Typed tool inputs.
//!
//! Each tool's arguments are a distinct variant of [`ToolInput`]. All
//! variants that address a backend share the `connection` accessor, which
//! the connection-required middleware consumes instead of reflecting on
//! field names. Unknown tools still flow through the pipeline (and into the
//! audit log) via the `Other` variant.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical tool names.
pub mod tool_name {
    /// Run a SQL query and return rows.
    pub const QUERY: &str = "query";
    /// Run a statement for its side effects.
    pub const EXECUTE: &str = "execute";
    /// Return the engine's plan for a statement.
    pub const EXPLAIN: &str = "explain";
    /// List catalogs visible on a connection.
    pub const LIST_CATALOGS: &str = "list_catalogs";
    /// List schemas in a catalog.
    pub const LIST_SCHEMAS: &str = "list_schemas";
    /// List tables in a schema.
    pub const LIST_TABLES: &str = "list_tables";
    /// Describe a table's columns.
    pub const DESCRIBE_TABLE: &str = "describe_table";
    /// List configured connections.
    pub const LIST_CONNECTIONS: &str = "list_connections";
}

/// Plan flavor requested from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExplainKind {
    /// Logical plan.
    #[default]
    Logical,
    /// Distributed execution plan.
    Distributed,
    /// IO and cost estimate plan.
    Io,
}

/// Arguments for `query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
    /// Statement to run.
    pub sql: String,
}

/// Arguments for `execute`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
    /// Statement to run.
    pub sql: String,
}

/// Arguments for `explain`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplainInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
    /// Statement to plan.
    pub sql: String,
    /// Plan flavor.
    #[serde(default)]
    pub kind: ExplainKind,
}

/// Arguments for `list_catalogs`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListCatalogsInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
}

/// Arguments for `list_schemas`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSchemasInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
    /// Catalog to list.
    pub catalog: String,
}

/// Arguments for `list_tables`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTablesInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
    /// Catalog holding the schema.
    pub catalog: String,
    /// Schema to list.
    pub schema: String,
}

/// Arguments for `describe_table`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DescribeTableInput {
    /// Target connection name.
    #[serde(default)]
    pub connection: String,
    /// Catalog holding the schema.
    pub catalog: String,
    /// Schema holding the table.
    pub schema: String,
    /// Table to describe.
    pub table: String,
}

/// Typed input for one tool call.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ToolInput {
    /// `query`
    Query(QueryInput),
    /// `execute`
    Execute(ExecuteInput),
    /// `explain`
    Explain(ExplainInput),
    /// `list_catalogs`
    ListCatalogs(ListCatalogsInput),
    /// `list_schemas`
    ListSchemas(ListSchemasInput),
    /// `list_tables`
    ListTables(ListTablesInput),
    /// `describe_table`
    DescribeTable(DescribeTableInput),
    /// `list_connections` takes no arguments.
    ListConnections,
    /// Any tool the toolkit does not type.
    Other {
        /// Raw arguments as received.
        args: Value,
    },
}

impl ToolInput {
    /// Parse raw JSON arguments for the named tool.
    pub fn parse(tool: &str, args: Value) -> Result<Self> {
        fn typed<T: serde::de::DeserializeOwned>(tool: &str, args: Value) -> Result<T> {
            serde_json::from_value(args)
                .map_err(|e| Error::validation(format!("invalid arguments for '{}': {}", tool, e)))
        }

        Ok(match tool {
            tool_name::QUERY => Self::Query(typed(tool, args)?),
            tool_name::EXECUTE => Self::Execute(typed(tool, args)?),
            tool_name::EXPLAIN => Self::Explain(typed(tool, args)?),
            tool_name::LIST_CATALOGS => Self::ListCatalogs(typed(tool, args)?),
            tool_name::LIST_SCHEMAS => Self::ListSchemas(typed(tool, args)?),
            tool_name::LIST_TABLES => Self::ListTables(typed(tool, args)?),
            tool_name::DESCRIBE_TABLE => Self::DescribeTable(typed(tool, args)?),
            tool_name::LIST_CONNECTIONS => Self::ListConnections,
            _ => Self::Other { args },
        })
    }

    /// The connection this call addresses, when the input names one.
    ///
    /// An empty or whitespace-only value counts as absent.
    pub fn connection(&self) -> Option<&str> {
        let raw = match self {
            Self::Query(input) => Some(input.connection.as_str()),
            Self::Execute(input) => Some(input.connection.as_str()),
            Self::Explain(input) => Some(input.connection.as_str()),
            Self::ListCatalogs(input) => Some(input.connection.as_str()),
            Self::ListSchemas(input) => Some(input.connection.as_str()),
            Self::ListTables(input) => Some(input.connection.as_str()),
            Self::DescribeTable(input) => Some(input.connection.as_str()),
            Self::ListConnections => None,
            Self::Other { args } => args.get("connection").and_then(Value::as_str),
        };
        raw.map(str::trim).filter(|s| !s.is_empty())
    }

    /// The SQL statement carried by this input, when there is one.
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::Query(input) => Some(&input.sql),
            Self::Execute(input) => Some(&input.sql),
            Self::Explain(input) => Some(&input.sql),
            _ => None,
        }
    }

    /// Input rendered as an audit parameter map.
    pub fn to_parameters(&self) -> Option<serde_json::Map<String, Value>> {
        match self {
            Self::Other { args } => args.as_object().cloned(),
            _ => match serde_json::to_value(self) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            },
        }
    }
}
