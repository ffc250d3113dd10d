//! Backend seam for query engines.
//!
//! The engine's wire protocol lives in an external driver; the toolkit only
//! depends on this trait. Implementations receive the request carrier and
//! are expected to honor its cancellation signal and, when present, report
//! progress through the injected reporter.

use crate::error::Result;
use crate::server::context::RequestContext;
use crate::toolkit::input::ExplainKind;
use async_trait::async_trait;
use serde_json::Value;

/// Rows returned by a query.
#[derive(Debug, Clone, Default)]
pub struct QueryRows {
    /// Column names, in engine order.
    pub columns: Vec<String>,
    /// Row values, one `Vec` per row.
    pub rows: Vec<Vec<Value>>,
}

impl QueryRows {
    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Render as a structured JSON payload.
    pub fn to_json(&self) -> Value {
        serde_json::json!({
            "columns": self.columns,
            "rows": self.rows,
            "row_count": self.rows.len(),
        })
    }
}

/// Outcome of a statement run for its side effects.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOutcome {
    /// Rows affected, when the engine reports it.
    pub rows_affected: Option<u64>,
}

/// A connection to one configured query engine instance.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run a query and return its rows.
    async fn query(&self, cx: &RequestContext, sql: &str) -> Result<QueryRows>;

    /// Run a statement for its side effects.
    async fn execute(&self, cx: &RequestContext, sql: &str) -> Result<ExecuteOutcome>;

    /// Return the engine's plan for a statement.
    ///
    /// `ExplainKind::Io` plans carry the row estimates the cost gate
    /// parses.
    async fn explain(&self, cx: &RequestContext, sql: &str, kind: ExplainKind) -> Result<String>;

    /// Release pooled resources.
    async fn close(&self) -> Result<()>;
}
