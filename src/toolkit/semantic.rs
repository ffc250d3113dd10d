//! Semantic metadata seam.
//!
//! A semantic provider (a metadata catalog such as DataHub) answers column
//! metadata questions for fully-qualified tables. The elicitation
//! middleware uses it to detect PII access; providers are wired after
//! construction and may be absent entirely.

use crate::error::Result;
use crate::server::context::RequestContext;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Column metadata returned by the semantic provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMetadata {
    /// Column name.
    pub name: String,
    /// Description, when the catalog has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Whether the catalog flags this column as PII.
    #[serde(default)]
    pub is_pii: bool,
}

/// Provider of table-level semantic metadata.
#[async_trait]
pub trait SemanticProvider: Send + Sync {
    /// Column metadata for a qualified table (`catalog.schema.table` or
    /// `schema.table`).
    async fn table_columns(&self, cx: &RequestContext, table: &str)
        -> Result<Vec<ColumnMetadata>>;
}

static TABLE_REF: LazyLock<Regex> = LazyLock::new(|| {
    // Qualified identifiers after FROM/JOIN: schema.table or
    // catalog.schema.table. Bare table names are not resolvable against the
    // catalog and are skipped.
    Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_$]*(?:\.[A-Za-z_][A-Za-z0-9_$]*){1,2})")
        .expect("table reference regex")
});

/// Extract qualified table identifiers referenced by a query.
///
/// Duplicates are removed; first-seen order is preserved.
pub fn extract_tables(sql: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for captures in TABLE_REF.captures_iter(sql) {
        let table = captures[1].to_string();
        if !seen.iter().any(|t: &String| t.eq_ignore_ascii_case(&table)) {
            seen.push(table);
        }
    }
    seen
}
