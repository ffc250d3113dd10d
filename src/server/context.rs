//! Per-call context types.
//!
//! [`ToolContext`] is the immutable envelope describing one tool call.
//! [`RequestContext`] is the derivable carrier of per-call values that
//! middlewares thread toward the backend: the server session handle, the
//! caller's progress token, the read-only flag, the user identity, and the
//! injected progress reporter. The carrier holds exactly this recognized
//! set; there is no open key space to log or serialize.

use crate::error::{Error, Result};
use crate::server::progress::ProgressReporter;
use crate::server::session::ServerSession;
use crate::toolkit::input::ToolInput;
use crate::types::identity::UserIdentity;
use crate::types::protocol::ProgressToken;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Envelope for a single tool call.
///
/// Created at dispatch, never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Tool name.
    pub name: String,
    /// Typed input.
    pub input: ToolInput,
    /// Request ID for correlation.
    pub request_id: String,
    /// Session the call belongs to.
    pub session_id: String,
    /// When the call was accepted.
    pub started_at: DateTime<Utc>,
}

impl ToolContext {
    /// Create a new tool context, stamping the start time.
    pub fn new(
        name: impl Into<String>,
        input: ToolInput,
        request_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            input,
            request_id: request_id.into(),
            session_id: session_id.into(),
            started_at: Utc::now(),
        }
    }

    /// Milliseconds elapsed since the call was accepted.
    pub fn elapsed_ms(&self) -> i64 {
        (Utc::now() - self.started_at).num_milliseconds()
    }
}

/// Immutable per-call value carrier.
///
/// Deriving setters return a new carrier; the parent is untouched. Storing
/// `None` is indistinguishable from never storing the value. Cancellation
/// and deadline propagate through every derivation.
#[derive(Clone, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    session: Option<Arc<dyn ServerSession>>,
    progress_token: Option<ProgressToken>,
    read_only: bool,
    identity: Option<UserIdentity>,
    reporter: Option<Arc<dyn ProgressReporter>>,
}

impl RequestContext {
    /// Create a root carrier with a fresh cancellation token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a carrier governed by an existing cancellation token.
    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: token,
            ..Self::default()
        }
    }

    /// Derive a carrier with the given session handle.
    pub fn with_session(mut self, session: Option<Arc<dyn ServerSession>>) -> Self {
        self.session = session;
        self
    }

    /// Derive a carrier with the caller's progress token.
    pub fn with_progress_token(mut self, token: Option<ProgressToken>) -> Self {
        self.progress_token = token;
        self
    }

    /// Derive a carrier with read-only enforcement set.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Derive a carrier with the caller's identity.
    pub fn with_identity(mut self, identity: Option<UserIdentity>) -> Self {
        self.identity = identity;
        self
    }

    /// Derive a carrier with an injected progress reporter.
    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Derive a carrier whose deadline is `timeout` from now.
    ///
    /// An existing earlier deadline wins.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        });
        self
    }

    /// The session handle, when the transport provided one.
    pub fn session(&self) -> Option<Arc<dyn ServerSession>> {
        self.session.clone()
    }

    /// The caller's progress token, when provided.
    pub fn progress_token(&self) -> Option<&ProgressToken> {
        self.progress_token.as_ref()
    }

    /// Whether read-only enforcement applies to this call.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// The caller's identity, when resolved.
    pub fn identity(&self) -> Option<&UserIdentity> {
        self.identity.as_ref()
    }

    /// The injected progress reporter, when one was attached.
    pub fn reporter(&self) -> Option<Arc<dyn ProgressReporter>> {
        self.reporter.clone()
    }

    /// The governing cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the call has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Time remaining until the deadline, when one is set.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Error out immediately when the call is already cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a suspension-point future under this call's cancellation signal
    /// and deadline.
    pub async fn guard<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_cancelled()?;
        let bounded = async {
            match self.remaining() {
                Some(remaining) => tokio::time::timeout(remaining, fut)
                    .await
                    .map_err(|_| Error::internal("call deadline exceeded"))?,
                None => fut.await,
            }
        };
        tokio::select! {
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            result = bounded => result,
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("has_session", &self.session.is_some())
            .field("progress_token", &self.progress_token)
            .field("read_only", &self.read_only)
            .field("identity", &self.identity)
            .field("has_reporter", &self.reporter.is_some())
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolkit::input::ToolInput;

    #[test]
    fn absent_values_read_as_zero() {
        let cx = RequestContext::new();
        assert!(cx.session().is_none());
        assert!(cx.progress_token().is_none());
        assert!(!cx.read_only());
        assert!(cx.identity().is_none());
        assert!(cx.reporter().is_none());
        assert!(cx.remaining().is_none());
    }

    #[test]
    fn storing_none_equals_not_storing() {
        let cx = RequestContext::new()
            .with_session(None)
            .with_progress_token(None)
            .with_identity(None);
        assert!(cx.session().is_none());
        assert!(cx.progress_token().is_none());
        assert!(cx.identity().is_none());
    }

    #[test]
    fn derivation_leaves_parent_untouched() {
        let parent = RequestContext::new();
        let child = parent
            .clone()
            .with_read_only(true)
            .with_identity(Some(UserIdentity::new("alice")));

        assert!(!parent.read_only());
        assert!(parent.identity().is_none());
        assert!(child.read_only());
        assert_eq!(child.identity().unwrap().user_id, "alice");
    }

    #[test]
    fn earlier_deadline_wins() {
        let cx = RequestContext::new()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(3600));
        assert!(cx.remaining().unwrap() <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn guard_propagates_cancellation() {
        let token = CancellationToken::new();
        let cx = RequestContext::with_cancellation(token.clone());
        token.cancel();

        let result: Result<()> = cx.guard(async { Ok(()) }).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn guard_cancels_inflight_work() {
        let token = CancellationToken::new();
        let cx = RequestContext::with_cancellation(token.clone());

        let guarded = cx.guard(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        });
        tokio::pin!(guarded);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(10)) => token.cancel(),
            _ = &mut guarded => panic!("guard resolved before cancellation"),
        }
        assert!(matches!(guarded.await, Err(Error::Cancelled)));
    }

    #[test]
    fn tool_context_stamps_start() {
        let tc = ToolContext::new(
            "query",
            ToolInput::parse("query", serde_json::json!({"sql": "SELECT 1"})).unwrap(),
            "req-1",
            "sess-1",
        );
        assert_eq!(tc.name, "query");
        assert!(tc.elapsed_ms() >= 0);
    }
}
