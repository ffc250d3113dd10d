//! Tool-call middleware chain.
//!
//! A middleware wraps every tool call with a `before` and an `after` hook.
//! `before` hooks run in registration order and thread the request carrier;
//! the first failure skips the backend. `after` hooks run in reverse order
//! over exactly the middlewares whose `before` succeeded, each receiving
//! the result produced by the backend or by the next-inner `after` — never
//! a stale value. Nothing on the chain can retry the backend.

use crate::error::Result;
use crate::server::context::{RequestContext, ToolContext};
use crate::types::protocol::ToolResult;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// A policy object composed into the call pipeline.
///
/// Middleware instances are shared by all in-flight calls and must be safe
/// to invoke concurrently.
#[async_trait]
pub trait ToolMiddleware: Send + Sync {
    /// Short name used in traces.
    fn name(&self) -> &'static str;

    /// Runs before the backend. May derive a new carrier or reject the
    /// call; rejection skips the backend and every outer middleware's
    /// `before`.
    async fn before(&self, cx: RequestContext, tc: &ToolContext) -> Result<RequestContext> {
        let _ = tc;
        Ok(cx)
    }

    /// Runs after the backend (or after a `before` rejection), in reverse
    /// registration order. May rewrite the result or the error; purely
    /// observational middlewares return the value unchanged.
    async fn after(
        &self,
        cx: &RequestContext,
        tc: &ToolContext,
        result: Result<ToolResult>,
    ) -> Result<ToolResult> {
        let _ = (cx, tc);
        result
    }
}

/// Ordered middleware chain driving one call end to end.
#[derive(Default)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn ToolMiddleware>>,
}

impl MiddlewareChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware. Registration order is execution order for
    /// `before` hooks.
    pub fn push(&mut self, middleware: Arc<dyn ToolMiddleware>) {
        self.middlewares.push(middleware);
    }

    /// Number of registered middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the chain is empty.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run a full call: all `before` hooks, the handler, then the `after`
    /// hooks of every middleware whose `before` succeeded, in reverse.
    pub async fn run<F, Fut>(
        &self,
        cx: RequestContext,
        tc: &ToolContext,
        handler: F,
    ) -> Result<ToolResult>
    where
        F: FnOnce(RequestContext) -> Fut + Send,
        Fut: Future<Output = Result<ToolResult>> + Send,
    {
        let mut cx = cx;
        let mut entered = 0;
        let mut halted = None;

        for middleware in &self.middlewares {
            match middleware.before(cx.clone(), tc).await {
                Ok(next) => {
                    cx = next;
                    entered += 1;
                }
                Err(err) => {
                    tracing::debug!(
                        middleware = middleware.name(),
                        tool = %tc.name,
                        error = %err,
                        "before hook rejected call"
                    );
                    halted = Some(err);
                    break;
                }
            }
        }

        let mut result = match halted {
            Some(err) => Err(err),
            None => handler(cx.clone()).await,
        };

        for middleware in self.middlewares[..entered].iter().rev() {
            result = middleware.after(&cx, tc, result).await;
        }

        result
    }
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.middlewares.iter().map(|m| m.name()).collect();
        f.debug_struct("MiddlewareChain")
            .field("middlewares", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::toolkit::input::ToolInput;
    use parking_lot::Mutex;

    fn tool_context() -> ToolContext {
        ToolContext::new(
            "query",
            ToolInput::parse("query", serde_json::json!({"sql": "SELECT 1"})).unwrap(),
            "req-1",
            "sess-1",
        )
    }

    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
    }

    #[async_trait]
    impl ToolMiddleware for Recorder {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn before(&self, cx: RequestContext, _tc: &ToolContext) -> Result<RequestContext> {
            self.log.lock().push(format!("{}:before", self.label));
            if self.fail_before {
                return Err(Error::validation(format!("{} rejected", self.label)));
            }
            Ok(cx)
        }

        async fn after(
            &self,
            _cx: &RequestContext,
            _tc: &ToolContext,
            result: Result<ToolResult>,
        ) -> Result<ToolResult> {
            self.log.lock().push(format!("{}:after", self.label));
            result
        }
    }

    fn recorder(
        label: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
        fail_before: bool,
    ) -> Arc<dyn ToolMiddleware> {
        Arc::new(Recorder {
            label,
            log: log.clone(),
            fail_before,
        })
    }

    #[tokio::test]
    async fn before_in_order_after_in_reverse() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(recorder("a", &log, false));
        chain.push(recorder("b", &log, false));
        chain.push(recorder("c", &log, false));

        let tc = tool_context();
        let result = chain
            .run(RequestContext::new(), &tc, |_cx| async {
                Ok(ToolResult::text("ok"))
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(
            *log.lock(),
            vec![
                "a:before", "b:before", "c:before", "c:after", "b:after", "a:after"
            ]
        );
    }

    #[tokio::test]
    async fn failed_before_skips_backend_and_outer_afters() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        chain.push(recorder("a", &log, false));
        chain.push(recorder("b", &log, true));
        chain.push(recorder("c", &log, false));

        let tc = tool_context();
        let backend_ran = Arc::new(Mutex::new(false));
        let backend_flag = backend_ran.clone();
        let result = chain
            .run(RequestContext::new(), &tc, move |_cx| async move {
                *backend_flag.lock() = true;
                Ok(ToolResult::text("ok"))
            })
            .await;

        assert!(result.is_err());
        assert!(!*backend_ran.lock());
        // c never entered; b's before failed so it gets no after; a's after
        // still runs.
        assert_eq!(*log.lock(), vec!["a:before", "b:before", "a:after"]);
    }

    #[tokio::test]
    async fn after_count_matches_successful_before_count() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut chain = MiddlewareChain::new();
        for label in ["a", "b", "c", "d"] {
            chain.push(recorder(label, &log, label == "c"));
        }

        let tc = tool_context();
        let _ = chain
            .run(RequestContext::new(), &tc, |_cx| async {
                Ok(ToolResult::text("ok"))
            })
            .await;

        let entries = log.lock();
        let befores_ok = entries
            .iter()
            .filter(|e| e.ends_with(":before") && !e.starts_with("c"))
            .count();
        let afters = entries.iter().filter(|e| e.ends_with(":after")).count();
        assert_eq!(befores_ok, afters);
    }

    #[tokio::test]
    async fn context_values_flow_to_later_middlewares_and_backend() {
        struct SetReadOnly;

        #[async_trait]
        impl ToolMiddleware for SetReadOnly {
            fn name(&self) -> &'static str {
                "set_read_only"
            }

            async fn before(
                &self,
                cx: RequestContext,
                _tc: &ToolContext,
            ) -> Result<RequestContext> {
                Ok(cx.with_read_only(true))
            }
        }

        struct AssertReadOnly;

        #[async_trait]
        impl ToolMiddleware for AssertReadOnly {
            fn name(&self) -> &'static str {
                "assert_read_only"
            }

            async fn before(
                &self,
                cx: RequestContext,
                _tc: &ToolContext,
            ) -> Result<RequestContext> {
                assert!(cx.read_only());
                Ok(cx)
            }
        }

        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(SetReadOnly));
        chain.push(Arc::new(AssertReadOnly));

        let tc = tool_context();
        let result = chain
            .run(RequestContext::new(), &tc, |cx| async move {
                assert!(cx.read_only());
                Ok(ToolResult::text("ok"))
            })
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn after_receives_threaded_result() {
        struct Rewriter {
            tag: &'static str,
        }

        #[async_trait]
        impl ToolMiddleware for Rewriter {
            fn name(&self) -> &'static str {
                "rewriter"
            }

            async fn after(
                &self,
                _cx: &RequestContext,
                _tc: &ToolContext,
                result: Result<ToolResult>,
            ) -> Result<ToolResult> {
                let inner = result?;
                let text = match &inner.content[0] {
                    crate::types::protocol::Content::Text { text } => text.clone(),
                    _ => String::new(),
                };
                Ok(ToolResult::text(format!("{}<{}>", text, self.tag)))
            }
        }

        let mut chain = MiddlewareChain::new();
        chain.push(Arc::new(Rewriter { tag: "outer" }));
        chain.push(Arc::new(Rewriter { tag: "inner" }));

        let tc = tool_context();
        let result = chain
            .run(RequestContext::new(), &tc, |_cx| async {
                Ok(ToolResult::text("base"))
            })
            .await
            .unwrap();

        match &result.content[0] {
            crate::types::protocol::Content::Text { text } => {
                // Inner middleware's after runs first, outer sees its output.
                assert_eq!(text, "base<inner><outer>");
            }
            other => panic!("unexpected content: {:?}", other),
        }
    }
}
