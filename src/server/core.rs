//! Server assembly.
//!
//! [`ToolServer`] owns the registered tool surface, the middleware chain,
//! and the audit store handle. The transport adapter parses frames and
//! calls [`ToolServer::handle_call`]; everything from argument typing to
//! audit recording happens here.
//!
//! Chain order is fixed: audit first (so its `after` sees every outcome),
//! then connection enforcement, read-only enforcement, progress injection,
//! and elicitation immediately before dispatch.

use crate::audit::store::AuditStore;
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::server::audit::{AuditRecorder, ToolkitAttribution};
use crate::server::connection::ConnectionRequired;
use crate::server::context::{RequestContext, ToolContext};
use crate::server::elicitation::ElicitationMiddleware;
use crate::server::middleware::MiddlewareChain;
use crate::server::progress::ProgressInjector;
use crate::server::readonly::ReadOnlyGuard;
use crate::server::session::ServerSession;
use crate::toolkit::input::{tool_name, ToolInput};
use crate::toolkit::query::{QueryToolkit, QUERY_TOOLKIT_KIND};
use crate::toolkit::semantic::SemanticProvider;
use crate::types::identity::{Persona, UserIdentity};
use crate::types::protocol::{ProgressToken, ToolResult};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// All tools served by the query toolkit.
const QUERY_TOOLS: &[&str] = &[
    tool_name::QUERY,
    tool_name::EXECUTE,
    tool_name::EXPLAIN,
    tool_name::LIST_CATALOGS,
    tool_name::LIST_SCHEMAS,
    tool_name::LIST_TABLES,
    tool_name::DESCRIBE_TABLE,
    tool_name::LIST_CONNECTIONS,
];

/// One inbound tool call, as decoded by the transport.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    /// Tool name.
    pub tool: String,
    /// Raw JSON arguments.
    pub arguments: Value,
    /// Request ID for correlation.
    pub request_id: String,
    /// Session the call belongs to.
    pub session_id: String,
    /// Progress token, when the caller asked for progress.
    pub progress_token: Option<ProgressToken>,
}

/// The assembled tool server.
pub struct ToolServer {
    toolkit: Arc<QueryToolkit>,
    chain: MiddlewareChain,
    tools: BTreeSet<String>,
    personas: BTreeMap<String, Persona>,
    store: Option<Arc<AuditStore>>,
}

impl ToolServer {
    /// Start building a server.
    pub fn builder() -> ToolServerBuilder {
        ToolServerBuilder::new()
    }

    /// The audit store, when auditing is wired.
    pub fn store(&self) -> Option<&Arc<AuditStore>> {
        self.store.as_ref()
    }

    /// Tools visible to the given persona.
    pub fn list_tools(&self, persona: Option<&str>) -> Vec<String> {
        self.tools
            .iter()
            .filter(|tool| self.persona_allows(persona, tool))
            .cloned()
            .collect()
    }

    fn persona_allows(&self, persona: Option<&str>, tool: &str) -> bool {
        match persona.and_then(|name| self.personas.get(name)) {
            Some(persona) => persona.allows(tool),
            None => true,
        }
    }

    /// Drive one call through the full pipeline.
    pub async fn handle_call(
        &self,
        call: IncomingCall,
        session: Option<Arc<dyn ServerSession>>,
        identity: Option<UserIdentity>,
        cancellation: CancellationToken,
    ) -> Result<ToolResult> {
        if !self.tools.contains(&call.tool) {
            return Err(Error::validation(format!("unknown tool '{}'", call.tool)));
        }
        let persona = identity.as_ref().and_then(|id| id.persona.as_deref());
        if !self.persona_allows(persona, &call.tool) {
            return Err(Error::validation(format!(
                "tool '{}' is not available to this persona",
                call.tool
            )));
        }

        let input = ToolInput::parse(&call.tool, call.arguments)?;
        let tc = ToolContext::new(call.tool, input, call.request_id, call.session_id);

        let cx = RequestContext::with_cancellation(cancellation)
            .with_session(session)
            .with_progress_token(call.progress_token)
            .with_identity(identity);

        let toolkit = self.toolkit.clone();
        let tc_for_handler = tc.clone();
        self.chain
            .run(cx, &tc, move |cx| async move {
                toolkit.call(&cx, &tc_for_handler).await
            })
            .await
    }
}

impl std::fmt::Debug for ToolServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolServer")
            .field("tools", &self.tools)
            .field("chain", &self.chain)
            .field("audited", &self.store.is_some())
            .finish()
    }
}

/// Builder for [`ToolServer`].
pub struct ToolServerBuilder {
    config: ServerConfig,
    toolkit: Option<QueryToolkit>,
    store: Option<Arc<AuditStore>>,
    semantic: Option<Arc<dyn SemanticProvider>>,
    personas: BTreeMap<String, Persona>,
}

impl ToolServerBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            toolkit: None,
            store: None,
            semantic: None,
            personas: BTreeMap::new(),
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the query toolkit.
    pub fn toolkit(mut self, toolkit: QueryToolkit) -> Self {
        self.toolkit = Some(toolkit);
        self
    }

    /// Attach the audit store.
    pub fn store(mut self, store: Arc<AuditStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach the semantic provider used by the PII consent gate.
    pub fn semantic_provider(mut self, provider: Arc<dyn SemanticProvider>) -> Self {
        self.semantic = Some(provider);
        self
    }

    /// Register a persona definition.
    pub fn persona(mut self, persona: Persona) -> Self {
        self.personas.insert(persona.name.clone(), persona);
        self
    }

    /// Assemble the server.
    pub fn build(self) -> Result<ToolServer> {
        let toolkit = self
            .toolkit
            .ok_or_else(|| Error::validation("a query toolkit is required"))?;
        let toolkit = Arc::new(toolkit);
        let dispatcher = toolkit.dispatcher().clone();

        let tools: BTreeSet<String> = QUERY_TOOLS
            .iter()
            .filter(|tool| self.config.tools.permits(tool))
            .map(|tool| tool.to_string())
            .collect();

        let mut chain = MiddlewareChain::new();

        if let Some(store) = &self.store {
            if self.config.audit.enabled {
                let mut recorder = AuditRecorder::new(
                    store.clone(),
                    self.config.audit.clone(),
                    self.config.server.transport.clone(),
                    self.config.server.name.clone(),
                )
                .with_default_connection(dispatcher.default_connection());
                for tool in &tools {
                    recorder = recorder.with_tool_attribution(
                        tool.clone(),
                        ToolkitAttribution {
                            kind: QUERY_TOOLKIT_KIND.to_string(),
                            name: toolkit.name().to_string(),
                        },
                    );
                }
                chain.push(Arc::new(recorder));
            }
        }

        if dispatcher.is_multi() {
            chain.push(Arc::new(ConnectionRequired::new(
                dispatcher.list_connections(),
            )));
        }

        if self.config.query.read_only {
            chain.push(Arc::new(ReadOnlyGuard::new()));
        }

        if self.config.progress.enabled {
            chain.push(Arc::new(ProgressInjector::new()));
        }

        if self.config.elicitation.enabled {
            let elicitation = ElicitationMiddleware::new(
                self.config.elicitation.clone(),
                dispatcher.clone(),
            );
            elicitation.set_semantic_provider(self.semantic.clone());
            chain.push(Arc::new(elicitation));
        }

        tracing::info!(
            tools = tools.len(),
            middlewares = chain.len(),
            multi_connection = dispatcher.is_multi(),
            "tool server assembled"
        );

        Ok(ToolServer {
            toolkit,
            chain,
            tools,
            personas: self.personas,
            store: self.store,
        })
    }
}

impl Default for ToolServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::filter::QueryFilter;
    use crate::config::{QueryToolkitConfig, ToolFilterConfig};
    use crate::server::context::RequestContext;
    use crate::toolkit::backend::{ExecuteOutcome, QueryBackend, QueryRows};
    use crate::toolkit::dispatcher::QueryDispatcher;
    use crate::toolkit::input::ExplainKind;
    use async_trait::async_trait;
    use serde_json::json;

    struct OkBackend;

    #[async_trait]
    impl QueryBackend for OkBackend {
        async fn query(&self, _cx: &RequestContext, _sql: &str) -> Result<QueryRows> {
            Ok(QueryRows {
                columns: vec!["n".to_string()],
                rows: vec![vec![json!(1)]],
            })
        }

        async fn execute(&self, _cx: &RequestContext, _sql: &str) -> Result<ExecuteOutcome> {
            Ok(ExecuteOutcome::default())
        }

        async fn explain(
            &self,
            _cx: &RequestContext,
            _sql: &str,
            _kind: ExplainKind,
        ) -> Result<String> {
            Ok("rows: 10".to_string())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn dispatcher(names: &[&str]) -> Arc<QueryDispatcher> {
        let backends = names
            .iter()
            .map(|n| (n.to_string(), Arc::new(OkBackend) as Arc<dyn QueryBackend>))
            .collect();
        Arc::new(QueryDispatcher::from_backends(names[0], backends).unwrap())
    }

    fn call(tool: &str, args: Value) -> IncomingCall {
        IncomingCall {
            tool: tool.to_string(),
            arguments: args,
            request_id: "req-1".to_string(),
            session_id: "sess-1".to_string(),
            progress_token: None,
        }
    }

    async fn run(server: &ToolServer, tool: &str, args: Value) -> Result<ToolResult> {
        server
            .handle_call(call(tool, args), None, None, CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn single_connection_call_needs_no_connection_argument() {
        let server = ToolServer::builder()
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse"])))
            .build()
            .unwrap();

        let result = run(&server, "query", json!({"sql": "SELECT 1"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn multi_connection_call_requires_connection() {
        let server = ToolServer::builder()
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse", "analytics"])))
            .build()
            .unwrap();

        let err = run(&server, "query", json!({"sql": "SELECT 1"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.category(),
            crate::error::ErrorCategory::ConnectionRequired
        );

        let result = run(
            &server,
            "query",
            json!({"connection": "analytics", "sql": "SELECT 1"}),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn unknown_and_denied_tools_are_rejected() {
        let server = ToolServer::builder()
            .config(ServerConfig {
                tools: ToolFilterConfig {
                    allow: vec![],
                    deny: vec!["execute".to_string()],
                },
                ..ServerConfig::default()
            })
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse"])))
            .build()
            .unwrap();

        let err = run(&server, "no_such_tool", json!({})).await.unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);

        let err = run(&server, "execute", json!({"sql": "SELECT 1"}))
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn persona_scopes_tool_visibility() {
        let server = ToolServer::builder()
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse"])))
            .persona(Persona {
                name: "viewer".to_string(),
                description: String::new(),
                tools: vec!["list_catalogs".to_string()],
            })
            .build()
            .unwrap();

        let viewer = UserIdentity::new("v").with_persona("viewer");
        let err = server
            .handle_call(
                call("query", json!({"sql": "SELECT 1"})),
                None,
                Some(viewer.clone()),
                CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);

        let visible = server.list_tools(Some("viewer"));
        assert_eq!(visible, vec!["list_catalogs"]);

        let everything = server.list_tools(None);
        assert!(everything.len() > 1);
    }

    #[tokio::test]
    async fn read_only_config_attaches_the_guard() {
        let server = ToolServer::builder()
            .config(ServerConfig {
                query: QueryToolkitConfig {
                    read_only: true,
                    ..QueryToolkitConfig::default()
                },
                ..ServerConfig::default()
            })
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse"])))
            .build()
            .unwrap();

        let err = run(&server, "execute", json!({"sql": "DELETE FROM t"}))
            .await
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::ReadOnly);

        let result = run(&server, "query", json!({"sql": "SELECT delete_col FROM t"})).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn audited_calls_write_exactly_one_event() {
        let store = Arc::new(AuditStore::open_in_memory().unwrap());
        let server = ToolServer::builder()
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse"])))
            .store(store.clone())
            .build()
            .unwrap();

        run(&server, "query", json!({"sql": "SELECT 1"}))
            .await
            .unwrap();

        let events = store.query(QueryFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
        assert_eq!(events[0].toolkit_kind.as_deref(), Some("trino"));
        assert_eq!(events[0].connection.as_deref(), Some("warehouse"));
    }

    #[tokio::test]
    async fn rejected_calls_are_audited_as_failures() {
        let store = Arc::new(AuditStore::open_in_memory().unwrap());
        let server = ToolServer::builder()
            .toolkit(QueryToolkit::new("sql", dispatcher(&["warehouse", "analytics"])))
            .store(store.clone())
            .build()
            .unwrap();

        let err = run(&server, "query", json!({"sql": "SELECT 1"}))
            .await
            .unwrap_err();
        assert_eq!(
            err.category(),
            crate::error::ErrorCategory::ConnectionRequired
        );

        let events = store.query(QueryFilter::default()).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(!events[0].success);
        assert_eq!(
            events[0].error_category.as_deref(),
            Some("connection_required")
        );
    }
}
