//! Connection selection enforcement.
//!
//! Attached only when the dispatcher holds two or more backends. Every tool
//! except `list_connections` must then name its target connection; the
//! rejection message doubles as a discovery aid, listing every configured
//! backend.

use crate::error::{Error, Result};
use crate::server::context::{RequestContext, ToolContext};
use crate::server::middleware::ToolMiddleware;
use crate::toolkit::dispatcher::ConnectionDetail;
use crate::toolkit::input::tool_name;
use async_trait::async_trait;

/// Middleware rejecting multi-connection calls without a `connection`.
#[derive(Debug)]
pub struct ConnectionRequired {
    connections: Vec<ConnectionDetail>,
}

impl ConnectionRequired {
    /// Create the middleware over the dispatcher's connection listing.
    ///
    /// The listing is sorted by name at render time regardless of input
    /// order.
    pub fn new(mut connections: Vec<ConnectionDetail>) -> Self {
        connections.sort_by(|a, b| a.name.cmp(&b.name));
        Self { connections }
    }

    fn discovery_message(&self) -> String {
        let mut message = String::from(
            "the 'connection' parameter is required when multiple connections are configured. \
             Available connections:",
        );
        for detail in &self.connections {
            message.push_str("\n  - ");
            message.push_str(&detail.name);
            if detail.is_default {
                message.push_str(" (default)");
            }
            if !detail.description.is_empty() {
                message.push_str(": ");
                message.push_str(&detail.description);
            }
        }
        message
    }
}

#[async_trait]
impl ToolMiddleware for ConnectionRequired {
    fn name(&self) -> &'static str {
        "connection_required"
    }

    async fn before(&self, cx: RequestContext, tc: &ToolContext) -> Result<RequestContext> {
        if tc.name == tool_name::LIST_CONNECTIONS || tc.input.connection().is_some() {
            return Ok(cx);
        }
        Err(Error::connection_required(self.discovery_message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::input::ToolInput;
    use serde_json::json;

    fn middleware() -> ConnectionRequired {
        ConnectionRequired::new(vec![
            ConnectionDetail {
                name: "warehouse".to_string(),
                description: "Primary warehouse".to_string(),
                is_default: true,
            },
            ConnectionDetail {
                name: "analytics".to_string(),
                description: String::new(),
                is_default: false,
            },
        ])
    }

    fn tc(tool: &str, args: serde_json::Value) -> ToolContext {
        ToolContext::new(tool, ToolInput::parse(tool, args).unwrap(), "req-1", "sess-1")
    }

    #[tokio::test]
    async fn missing_connection_is_rejected_with_discovery() {
        let mw = middleware();
        let err = mw
            .before(RequestContext::new(), &tc("query", json!({"sql": "SELECT 1"})))
            .await
            .unwrap_err();

        assert_eq!(
            err.category(),
            crate::error::ErrorCategory::ConnectionRequired
        );
        let message = err.to_string();
        assert!(message.contains("analytics"));
        assert!(message.contains("warehouse (default): Primary warehouse"));
        // Sorted order: analytics before warehouse.
        assert!(message.find("analytics").unwrap() < message.find("warehouse").unwrap());
    }

    #[tokio::test]
    async fn named_connection_passes() {
        let mw = middleware();
        let result = mw
            .before(
                RequestContext::new(),
                &tc("query", json!({"connection": "analytics", "sql": "SELECT 1"})),
            )
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn list_connections_is_exempt() {
        let mw = middleware();
        let result = mw
            .before(RequestContext::new(), &tc("list_connections", json!({})))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn whitespace_connection_counts_as_missing() {
        let mw = middleware();
        let err = mw
            .before(
                RequestContext::new(),
                &tc("query", json!({"connection": "   ", "sql": "SELECT 1"})),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.category(),
            crate::error::ErrorCategory::ConnectionRequired
        );
    }

    #[tokio::test]
    async fn untyped_tools_are_also_guarded() {
        let mw = middleware();
        let err = mw
            .before(
                RequestContext::new(),
                &tc("profile_table", json!({"table": "t"})),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.category(),
            crate::error::ErrorCategory::ConnectionRequired
        );
    }
}
