//! Multi-connection dispatch.
//!
//! The dispatcher owns every configured backend instance and routes each
//! call to the named one. With a single instance the connection argument is
//! optional everywhere and the connection-required middleware is never
//! attached.

use crate::config::BackendConfig;
use crate::error::{Error, Result};
use crate::toolkit::backend::QueryBackend;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(120);

/// A configured, named backend as shown in listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDetail {
    /// Instance name.
    pub name: String,
    /// Description from configuration, possibly empty.
    pub description: String,
    /// Whether this instance is the default.
    pub is_default: bool,
}

/// Multi-connection configuration resolved against instance configs.
#[derive(Debug, Clone, Default)]
pub struct MultiConnectionConfig {
    /// Explicit default instance name. Must be a configured instance.
    pub default_connection: Option<String>,
    /// Instance name → backend configuration.
    pub instances: BTreeMap<String, BackendConfig>,
}

/// Routes calls across named backend instances.
pub struct QueryDispatcher {
    backends: BTreeMap<String, Arc<dyn QueryBackend>>,
    descriptions: BTreeMap<String, String>,
    timeouts: BTreeMap<String, Duration>,
    default_connection: String,
}

impl QueryDispatcher {
    /// Build a dispatcher from configuration.
    ///
    /// Every instance config is validated before any backend is built; a
    /// single invalid instance aborts construction. The factory turns a
    /// validated config into a live backend.
    pub fn new<F>(config: MultiConnectionConfig, factory: F) -> Result<Self>
    where
        F: Fn(&str, &BackendConfig) -> Result<Arc<dyn QueryBackend>>,
    {
        if config.instances.is_empty() {
            return Err(Error::validation("at least one connection must be configured"));
        }
        for (name, instance) in &config.instances {
            instance.validate(name)?;
        }

        let default_connection = match &config.default_connection {
            Some(name) => {
                if !config.instances.contains_key(name) {
                    return Err(Error::validation(format!(
                        "default connection '{}' is not a configured instance",
                        name
                    )));
                }
                name.clone()
            }
            // BTreeMap iterates in key order, so the first key is the
            // lexicographic minimum.
            None => config
                .instances
                .keys()
                .next()
                .expect("instances checked non-empty")
                .clone(),
        };

        let mut backends = BTreeMap::new();
        let mut descriptions = BTreeMap::new();
        let mut timeouts = BTreeMap::new();
        for (name, instance) in &config.instances {
            let backend = factory(name, instance)
                .map_err(|e| e.with_context(format!("connection '{}'", name)))?;
            backends.insert(name.clone(), backend);
            descriptions.insert(name.clone(), instance.description.clone());
            timeouts.insert(name.clone(), instance.timeout());
        }

        Ok(Self {
            backends,
            descriptions,
            timeouts,
            default_connection,
        })
    }

    /// Build a dispatcher directly from live backends (used by tests and
    /// embedded wiring).
    pub fn from_backends(
        default_connection: impl Into<String>,
        backends: BTreeMap<String, Arc<dyn QueryBackend>>,
    ) -> Result<Self> {
        let default_connection = default_connection.into();
        if !backends.contains_key(&default_connection) {
            return Err(Error::validation(format!(
                "default connection '{}' is not a configured instance",
                default_connection
            )));
        }
        let descriptions = backends.keys().map(|k| (k.clone(), String::new())).collect();
        let timeouts = backends
            .keys()
            .map(|k| (k.clone(), DEFAULT_BACKEND_TIMEOUT))
            .collect();
        Ok(Self {
            backends,
            descriptions,
            timeouts,
            default_connection,
        })
    }

    /// Number of configured instances.
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether no instance is configured. Construction forbids this; kept
    /// for API symmetry.
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Whether more than one instance is configured.
    pub fn is_multi(&self) -> bool {
        self.backends.len() >= 2
    }

    /// The resolved default connection name.
    pub fn default_connection(&self) -> &str {
        &self.default_connection
    }

    /// The name a call with this `connection` argument resolves to.
    pub fn resolve_name<'a>(&'a self, connection: Option<&'a str>) -> &'a str {
        match connection {
            Some(name) if !name.trim().is_empty() => name.trim(),
            _ => &self.default_connection,
        }
    }

    /// The configured timeout for the resolved connection.
    pub fn timeout_for(&self, connection: Option<&str>) -> Duration {
        self.timeouts
            .get(self.resolve_name(connection))
            .copied()
            .unwrap_or(DEFAULT_BACKEND_TIMEOUT)
    }

    /// Route to the named instance, or the default when `connection` is
    /// absent.
    pub fn dispatch(&self, connection: Option<&str>) -> Result<Arc<dyn QueryBackend>> {
        let name = self.resolve_name(connection);
        self.backends.get(name).cloned().ok_or_else(|| {
            Error::validation(format!(
                "unknown connection '{}'; use list_connections to see configured connections",
                name
            ))
        })
    }

    /// Sorted connection listing.
    pub fn list_connections(&self) -> Vec<ConnectionDetail> {
        self.backends
            .keys()
            .map(|name| ConnectionDetail {
                name: name.clone(),
                description: self.descriptions.get(name).cloned().unwrap_or_default(),
                is_default: *name == self.default_connection,
            })
            .collect()
    }

    /// Close every instance. The first error is returned after all close
    /// attempts complete.
    pub async fn close(&self) -> Result<()> {
        let mut first_err = None;
        for (name, backend) in &self.backends {
            if let Err(err) = backend.close().await {
                tracing::warn!(connection = %name, error = %err, "backend close failed");
                if first_err.is_none() {
                    first_err = Some(err.with_context(format!("closing connection '{}'", name)));
                }
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for QueryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryDispatcher")
            .field("connections", &self.backends.keys().collect::<Vec<_>>())
            .field("default", &self.default_connection)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::context::RequestContext;
    use crate::toolkit::backend::{ExecuteOutcome, QueryRows};
    use crate::toolkit::input::ExplainKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct StubBackend {
        closed: AtomicBool,
        fail_close: bool,
    }

    impl StubBackend {
        fn arc(fail_close: bool) -> Arc<Self> {
            Arc::new(Self {
                closed: AtomicBool::new(false),
                fail_close,
            })
        }
    }

    #[async_trait]
    impl QueryBackend for StubBackend {
        async fn query(&self, _cx: &RequestContext, _sql: &str) -> crate::error::Result<QueryRows> {
            Ok(QueryRows::default())
        }

        async fn execute(
            &self,
            _cx: &RequestContext,
            _sql: &str,
        ) -> crate::error::Result<ExecuteOutcome> {
            Ok(ExecuteOutcome::default())
        }

        async fn explain(
            &self,
            _cx: &RequestContext,
            _sql: &str,
            _kind: ExplainKind,
        ) -> crate::error::Result<String> {
            Ok(String::new())
        }

        async fn close(&self) -> crate::error::Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                Err(Error::backend("close failed"))
            } else {
                Ok(())
            }
        }
    }

    fn config(default: Option<&str>, names: &[&str]) -> MultiConnectionConfig {
        MultiConnectionConfig {
            default_connection: default.map(String::from),
            instances: names
                .iter()
                .map(|n| {
                    (
                        n.to_string(),
                        BackendConfig {
                            host: format!("{}.internal", n),
                            ..BackendConfig::default()
                        },
                    )
                })
                .collect(),
        }
    }

    fn stub_factory(
        _name: &str,
        _config: &BackendConfig,
    ) -> crate::error::Result<Arc<dyn QueryBackend>> {
        Ok(StubBackend::arc(false))
    }

    #[test]
    fn explicit_default_is_honored() {
        let dispatcher =
            QueryDispatcher::new(config(Some("warehouse"), &["analytics", "warehouse"]), stub_factory)
                .unwrap();
        assert_eq!(dispatcher.default_connection(), "warehouse");
    }

    #[test]
    fn missing_default_falls_back_to_lexicographic_minimum() {
        let dispatcher =
            QueryDispatcher::new(config(None, &["warehouse", "analytics"]), stub_factory).unwrap();
        assert_eq!(dispatcher.default_connection(), "analytics");
    }

    #[test]
    fn unknown_default_aborts_construction() {
        let err = QueryDispatcher::new(config(Some("missing"), &["warehouse"]), stub_factory)
            .unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn invalid_instance_aborts_construction() {
        let mut cfg = config(None, &["warehouse"]);
        cfg.instances.get_mut("warehouse").unwrap().host = String::new();
        let err = QueryDispatcher::new(cfg, stub_factory).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Validation);
    }

    #[test]
    fn factory_failures_name_the_connection() {
        let counter = AtomicUsize::new(0);
        let err = QueryDispatcher::new(config(None, &["analytics", "warehouse"]), |_n, _c| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::backend("refused"))
            } else {
                Ok(StubBackend::arc(false) as Arc<dyn QueryBackend>)
            }
        })
        .unwrap_err();
        assert!(err.to_string().contains("analytics"));
        assert_eq!(err.category(), crate::error::ErrorCategory::Backend);
    }

    #[test]
    fn dispatch_routes_and_rejects_unknown() {
        let dispatcher =
            QueryDispatcher::new(config(None, &["analytics", "warehouse"]), stub_factory).unwrap();
        assert!(dispatcher.dispatch(Some("warehouse")).is_ok());
        assert!(dispatcher.dispatch(None).is_ok());
        let err = dispatcher.dispatch(Some("nope")).err().unwrap();
        assert!(err.to_string().contains("list_connections"));
    }

    #[test]
    fn listing_is_sorted_and_marks_default() {
        let dispatcher =
            QueryDispatcher::new(config(Some("warehouse"), &["warehouse", "analytics"]), stub_factory)
                .unwrap();
        let details = dispatcher.list_connections();
        assert_eq!(details.len(), 2);
        assert_eq!(details[0].name, "analytics");
        assert!(!details[0].is_default);
        assert_eq!(details[1].name, "warehouse");
        assert!(details[1].is_default);
    }

    #[tokio::test]
    async fn close_reaches_every_backend_and_keeps_first_error() {
        let failing = StubBackend::arc(true);
        let healthy = StubBackend::arc(false);
        let mut backends: BTreeMap<String, Arc<dyn QueryBackend>> = BTreeMap::new();
        backends.insert("a".to_string(), failing.clone());
        backends.insert("b".to_string(), healthy.clone());

        let dispatcher = QueryDispatcher::from_backends("a", backends).unwrap();
        let err = dispatcher.close().await.unwrap_err();
        assert!(err.to_string().contains("'a'"));
        assert!(failing.closed.load(Ordering::SeqCst));
        assert!(healthy.closed.load(Ordering::SeqCst));
    }
}
