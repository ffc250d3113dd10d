//! # mcp-dataplane
//!
//! Core of a data-platform tool server: a fixed surface of named tools
//! exposed to AI clients over a bidirectional JSON-RPC-style protocol, with
//! every invocation routed through a deterministic middleware pipeline
//! (connection enforcement, read-only guarding, user-consent elicitation,
//! progress streaming) and recorded to a durable, queryable audit log with
//! rollup analytics.
//!
//! The crate is transport-agnostic: adapters decode frames and call
//! [`server::ToolServer::handle_call`], providing a [`server::ServerSession`]
//! handle for elicitation round-trips and progress notifications.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mcp_dataplane::audit::AuditStore;
//! use mcp_dataplane::config::ServerConfig;
//! use mcp_dataplane::server::ToolServer;
//! use mcp_dataplane::toolkit::{QueryDispatcher, QueryToolkit};
//! use std::sync::Arc;
//!
//! # fn backends() -> std::collections::BTreeMap<String, Arc<dyn mcp_dataplane::toolkit::QueryBackend>> { unimplemented!() }
//! # fn main() -> mcp_dataplane::Result<()> {
//! let dispatcher = Arc::new(QueryDispatcher::from_backends("warehouse", backends())?);
//! let store = Arc::new(AuditStore::open_in_memory()?);
//! store.start_cleanup_routine(std::time::Duration::from_secs(3600));
//!
//! let server = ToolServer::builder()
//!     .config(ServerConfig::default())
//!     .toolkit(QueryToolkit::new("sql", dispatcher))
//!     .store(store)
//!     .build()?;
//! # let _ = server;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod server;
pub mod toolkit;
pub mod types;

pub use error::{Error, ErrorCategory, Result};

/// Initialize tracing for binaries and examples.
///
/// Respects `RUST_LOG`; defaults to `info` for this crate.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("mcp_dataplane=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
