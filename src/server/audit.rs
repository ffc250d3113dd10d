//! Audit recording middleware.
//!
//! Registered first so its `after` hook observes the final result of every
//! call, including rejections from later middlewares. Exactly one event is
//! written per completed call; `success` equals the absence of a
//! user-visible error. A failing audit write never fails the call.

use crate::audit::event::AuditEvent;
use crate::audit::store::AuditStore;
use crate::config::AuditConfig;
use crate::error::Result;
use crate::server::context::{RequestContext, ToolContext};
use crate::server::middleware::ToolMiddleware;
use crate::toolkit::input::tool_name;
use crate::types::protocol::ToolResult;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Destination for audit events.
///
/// Implementations must not block the call path beyond the write itself;
/// failures are logged by the middleware and never propagate.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Persist one event.
    async fn log(&self, event: AuditEvent) -> Result<()>;
}

#[async_trait]
impl AuditSink for AuditStore {
    async fn log(&self, event: AuditEvent) -> Result<()> {
        AuditStore::log(self, event).await
    }
}

/// Toolkit attribution for a registered tool.
#[derive(Debug, Clone)]
pub struct ToolkitAttribution {
    /// Toolkit kind (e.g. `trino`, `datahub`).
    pub kind: String,
    /// Toolkit instance name.
    pub name: String,
}

/// Middleware writing one audit event per completed call.
pub struct AuditRecorder {
    sink: Arc<dyn AuditSink>,
    config: AuditConfig,
    transport: String,
    source: String,
    toolkits: BTreeMap<String, ToolkitAttribution>,
    default_connection: Option<String>,
}

impl AuditRecorder {
    /// Create the recorder.
    pub fn new(
        sink: Arc<dyn AuditSink>,
        config: AuditConfig,
        transport: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            config,
            transport: transport.into(),
            source: source.into(),
            toolkits: BTreeMap::new(),
            default_connection: None,
        }
    }

    /// Register toolkit attribution for a tool name.
    pub fn with_tool_attribution(
        mut self,
        tool: impl Into<String>,
        attribution: ToolkitAttribution,
    ) -> Self {
        self.toolkits.insert(tool.into(), attribution);
        self
    }

    /// Record the connection calls fall back to when they name none.
    pub fn with_default_connection(mut self, connection: impl Into<String>) -> Self {
        self.default_connection = Some(connection.into());
        self
    }

    fn build_event(
        &self,
        cx: &RequestContext,
        tc: &ToolContext,
        result: &Result<ToolResult>,
    ) -> AuditEvent {
        let parameters = tc.input.to_parameters();
        let request_chars = parameters
            .as_ref()
            .map(|map| Value::Object(map.clone()).to_string().chars().count() as i64)
            .unwrap_or(0);

        let mut event = AuditEvent::new(tc.name.clone(), result.is_ok())
            .with_correlation(tc.request_id.clone(), tc.session_id.clone())
            .with_duration_ms(tc.elapsed_ms())
            .with_parameters(parameters)
            .with_origin(self.transport.clone(), self.source.clone())
            .with_authorized(true);

        if let Some(identity) = cx.identity() {
            event = event.with_user(
                identity.user_id.clone(),
                identity.email.clone(),
                identity.persona.clone(),
            );
        }

        if let Some(attribution) = self.toolkits.get(&tc.name) {
            event = event.with_toolkit(attribution.kind.clone(), attribution.name.clone());
            if tc.name != tool_name::LIST_CONNECTIONS {
                let connection = tc
                    .input
                    .connection()
                    .map(str::to_string)
                    .or_else(|| self.default_connection.clone());
                if let Some(connection) = connection {
                    event = event.with_connection(connection);
                }
            }
        }

        match result {
            Ok(output) => {
                event = event
                    .with_sizes(
                        request_chars,
                        output.response_chars() as i64,
                        output.content.len() as i64,
                    )
                    .with_enrichment(output.enrichment_applied);
            }
            Err(err) => {
                event = event
                    .with_sizes(request_chars, 0, 0)
                    .with_error(err.to_string(), err.category().as_str());
            }
        }
        event
    }
}

#[async_trait]
impl ToolMiddleware for AuditRecorder {
    fn name(&self) -> &'static str {
        "audit"
    }

    async fn after(
        &self,
        cx: &RequestContext,
        tc: &ToolContext,
        result: Result<ToolResult>,
    ) -> Result<ToolResult> {
        if !self.config.enabled || !self.config.log_tool_calls {
            return result;
        }

        let event = self.build_event(cx, tc, &result);
        if let Err(err) = self.sink.log(event).await {
            // Audit failure is logged, never surfaced to the caller.
            tracing::warn!(tool = %tc.name, error = %err, "audit write failed");
        }
        result
    }
}

impl std::fmt::Debug for AuditRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditRecorder")
            .field("enabled", &self.config.enabled)
            .field("tools", &self.toolkits.keys().collect::<Vec<_>>())
            .finish()
    }
}
