//! User-consent elicitation for expensive or sensitive queries.
//!
//! Two gates run for the `query` tool, cost first:
//!
//! 1. **Cost gate** — asks the backend for an IO plan, takes the largest
//!    `rows: <n>` estimate, and requests confirmation above the configured
//!    threshold.
//! 2. **PII gate** — resolves the query's tables against the semantic
//!    provider and requests confirmation when any referenced column is
//!    flagged as PII.
//!
//! Declines fail the call with the `user_declined` category. Transport or
//! backend failures inside a gate never fail the call; the gate degrades to
//! allow. Cancellation always propagates.

use crate::config::ElicitationConfig;
use crate::error::{Error, Result};
use crate::server::context::{RequestContext, ToolContext};
use crate::server::middleware::ToolMiddleware;
use crate::server::session::ServerSession;
use crate::toolkit::backend::QueryBackend;
use crate::toolkit::dispatcher::QueryDispatcher;
use crate::toolkit::input::{tool_name, ExplainKind};
use crate::toolkit::semantic::{extract_tables, SemanticProvider};
use crate::types::protocol::ElicitRequest;
use async_trait::async_trait;
use parking_lot::RwLock;
use regex::Regex;
use std::sync::Arc;

/// Seam for obtaining a cost plan for a statement.
#[async_trait]
pub trait CostEstimator: Send + Sync {
    /// The engine's IO plan for the statement on the given connection.
    async fn explain_io(
        &self,
        cx: &RequestContext,
        connection: Option<&str>,
        sql: &str,
    ) -> Result<String>;
}

#[async_trait]
impl CostEstimator for QueryDispatcher {
    async fn explain_io(
        &self,
        cx: &RequestContext,
        connection: Option<&str>,
        sql: &str,
    ) -> Result<String> {
        let backend = self.dispatch(connection)?;
        backend.explain(cx, sql, ExplainKind::Io).await
    }
}

/// Format an integer with thousands separators.
fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Consent middleware for the `query` tool.
pub struct ElicitationMiddleware {
    config: ElicitationConfig,
    estimator: Arc<dyn CostEstimator>,
    // Set once at wiring time; readers hold the lock only for the pointer
    // load.
    semantic: RwLock<Option<Arc<dyn SemanticProvider>>>,
    row_estimate: Regex,
}

impl ElicitationMiddleware {
    /// Create the middleware over a cost estimator.
    pub fn new(config: ElicitationConfig, estimator: Arc<dyn CostEstimator>) -> Self {
        Self {
            config,
            estimator,
            semantic: RwLock::new(None),
            row_estimate: Regex::new(r"rows:\s*(\d+)").expect("row estimate regex"),
        }
    }

    /// Wire or replace the semantic provider.
    pub fn set_semantic_provider(&self, provider: Option<Arc<dyn SemanticProvider>>) {
        *self.semantic.write() = provider;
    }

    /// Largest `rows: <n>` estimate in the plan, 0 when none parse.
    fn max_row_estimate(&self, plan: &str) -> u64 {
        self.row_estimate
            .captures_iter(plan)
            .filter_map(|c| c[1].parse::<u64>().ok())
            .max()
            .unwrap_or(0)
    }

    async fn cost_gate(
        &self,
        cx: &RequestContext,
        session: &Arc<dyn ServerSession>,
        connection: Option<&str>,
        sql: &str,
    ) -> Result<()> {
        if !self.config.cost_estimation.enabled {
            return Ok(());
        }

        let plan = match cx.guard(self.estimator.explain_io(cx, connection, sql)).await {
            Ok(plan) => plan,
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(err) => {
                tracing::debug!(error = %err, "cost estimation unavailable, allowing query");
                return Ok(());
            }
        };

        let estimate = self.max_row_estimate(&plan);
        let threshold = self.config.cost_estimation.row_threshold;
        if estimate <= threshold {
            return Ok(());
        }

        let message = format!(
            "This query is estimated to scan approximately {} rows (threshold: {}). Proceed?",
            format_thousands(estimate),
            format_thousands(threshold)
        );
        match cx.guard(session.elicit(ElicitRequest::confirmation(message))).await {
            Ok(answer) if answer.action.is_accepted() => Ok(()),
            Ok(_) => Err(Error::user_declined(format!(
                "query declined: estimated scan of {} rows was not approved",
                format_thousands(estimate)
            ))),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                tracing::debug!(error = %err, "cost elicitation failed, allowing query");
                Ok(())
            }
        }
    }

    async fn pii_gate(
        &self,
        cx: &RequestContext,
        session: &Arc<dyn ServerSession>,
        sql: &str,
    ) -> Result<()> {
        if !self.config.pii_consent.enabled {
            return Ok(());
        }
        let provider = self.semantic.read().clone();
        let Some(provider) = provider else {
            return Ok(());
        };

        let tables = extract_tables(sql);
        if tables.is_empty() {
            return Ok(());
        }

        let mut pii_columns = Vec::new();
        for table in &tables {
            match cx.guard(provider.table_columns(cx, table)).await {
                Ok(columns) => pii_columns.extend(
                    columns
                        .into_iter()
                        .filter(|c| c.is_pii)
                        .map(|c| format!("{}.{}", table, c.name)),
                ),
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => {
                    tracing::debug!(table = %table, error = %err, "semantic lookup failed, skipping table");
                }
            }
        }
        if pii_columns.is_empty() {
            return Ok(());
        }

        let message = format!(
            "This query accesses {} PII column(s). Proceed with access?",
            pii_columns.len()
        );
        match cx.guard(session.elicit(ElicitRequest::confirmation(message))).await {
            Ok(answer) if answer.action.is_accepted() => Ok(()),
            Ok(_) => Err(Error::user_declined(format!(
                "query declined: access to {} PII column(s) was not approved",
                pii_columns.len()
            ))),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => {
                tracing::debug!(error = %err, "PII elicitation failed, allowing query");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ToolMiddleware for ElicitationMiddleware {
    fn name(&self) -> &'static str {
        "elicitation"
    }

    async fn before(&self, cx: RequestContext, tc: &ToolContext) -> Result<RequestContext> {
        if tc.name != tool_name::QUERY || !self.config.enabled {
            return Ok(cx);
        }
        let Some(session) = cx.session() else {
            return Ok(cx);
        };
        if !session.client_capabilities().elicitation {
            return Ok(cx);
        }
        let Some(sql) = tc.input.sql() else {
            return Ok(cx);
        };

        let connection = tc.input.connection();
        self.cost_gate(&cx, &session, connection, sql).await?;
        self.pii_gate(&cx, &session, sql).await?;
        Ok(cx)
    }
}

impl std::fmt::Debug for ElicitationMiddleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElicitationMiddleware")
            .field("enabled", &self.config.enabled)
            .field("cost_estimation", &self.config.cost_estimation.enabled)
            .field("pii_consent", &self.config.pii_consent.enabled)
            .field("has_semantic_provider", &self.semantic.read().is_some())
            .finish()
    }
}
