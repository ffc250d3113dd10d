//! Progress reporting for long-running backend operations.
//!
//! The injector middleware attaches a per-call reporter when the transport
//! provided both a session and a progress token; backends invoke it with
//! `(progress, total, message)` and the reporter bridges to the session
//! under the caller's original token.

use crate::error::{Error, Result};
use crate::server::context::{RequestContext, ToolContext};
use crate::server::middleware::ToolMiddleware;
use crate::server::session::ServerSession;
use crate::types::protocol::{ProgressNotification, ProgressToken};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for reporting progress during tool execution.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    /// Report progress with optional total and message.
    async fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<()>;

    /// Report count-based progress (e.g. "5 of 10 splits").
    async fn report_count(
        &self,
        current: usize,
        total: usize,
        message: Option<String>,
    ) -> Result<()> {
        self.report_progress(current as f64, Some(total as f64), message)
            .await
    }
}

/// Reporter that forwards to the client session.
///
/// - Validates that values are finite and non-negative.
/// - Treats non-increasing progress as a no-op.
/// - Rate-limits notifications, except final updates (progress == total).
///
/// Safe to invoke from the backend task; all state is behind mutexes.
pub struct SessionProgressReporter {
    token: ProgressToken,
    session: Arc<dyn ServerSession>,
    last_progress: Mutex<Option<f64>>,
    last_sent: Mutex<Option<Instant>>,
    rate_limit_interval: Duration,
}

impl SessionProgressReporter {
    /// Create a reporter for the given token and session.
    pub fn new(token: ProgressToken, session: Arc<dyn ServerSession>) -> Self {
        Self::with_rate_limit(token, session, Duration::from_millis(100))
    }

    /// Create a reporter with a custom rate-limit interval.
    pub fn with_rate_limit(
        token: ProgressToken,
        session: Arc<dyn ServerSession>,
        rate_limit_interval: Duration,
    ) -> Self {
        Self {
            token,
            session,
            last_progress: Mutex::new(None),
            last_sent: Mutex::new(None),
            rate_limit_interval,
        }
    }

    fn validate_values(progress: f64, total: Option<f64>) -> Result<()> {
        const EPSILON: f64 = 1e-9;

        if !progress.is_finite() || progress < 0.0 {
            return Err(Error::validation(
                "progress must be a finite, non-negative number",
            ));
        }
        if let Some(t) = total {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::validation(
                    "total must be a finite, non-negative number",
                ));
            }
            if progress > t + EPSILON {
                return Err(Error::validation(format!(
                    "progress ({}) exceeds total ({})",
                    progress, t
                )));
            }
        }
        Ok(())
    }

    fn should_send(&self) -> bool {
        match *self.last_sent.lock().unwrap() {
            None => true,
            Some(instant) => instant.elapsed() >= self.rate_limit_interval,
        }
    }
}

#[async_trait]
impl ProgressReporter for SessionProgressReporter {
    async fn report_progress(
        &self,
        progress: f64,
        total: Option<f64>,
        message: Option<String>,
    ) -> Result<()> {
        const EPSILON: f64 = 1e-9;

        Self::validate_values(progress, total)?;

        let is_final = total.is_some_and(|t| (progress - t).abs() < EPSILON);
        {
            let mut last = self.last_progress.lock().unwrap();
            if let Some(prev) = *last {
                if progress <= prev + EPSILON && !is_final {
                    tracing::debug!(progress, prev, "skipping non-increasing progress update");
                    return Ok(());
                }
            }
            if !is_final && !self.should_send() {
                tracing::trace!(progress, "progress notification rate-limited");
                *last = Some(progress);
                return Ok(());
            }
            *last = Some(progress);
        }
        *self.last_sent.lock().unwrap() = Some(Instant::now());

        self.session
            .notify_progress(ProgressNotification {
                progress_token: self.token.clone(),
                progress,
                total,
                message,
            })
            .await
    }
}

impl std::fmt::Debug for SessionProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionProgressReporter")
            .field("token", &self.token)
            .field("rate_limit_interval", &self.rate_limit_interval)
            .finish()
    }
}

/// Middleware that attaches a [`SessionProgressReporter`] to the carrier
/// when the transport provided both a session and a progress token.
///
/// `after` is a pure pass-through.
#[derive(Debug, Default)]
pub struct ProgressInjector;

impl ProgressInjector {
    /// Create the injector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ToolMiddleware for ProgressInjector {
    fn name(&self) -> &'static str {
        "progress"
    }

    async fn before(&self, cx: RequestContext, _tc: &ToolContext) -> Result<RequestContext> {
        let token = cx.progress_token().cloned();
        match (cx.session(), token) {
            (Some(session), Some(token)) => {
                let reporter = SessionProgressReporter::new(token, session);
                Ok(cx.with_reporter(Arc::new(reporter)))
            }
            _ => Ok(cx),
        }
    }
}
