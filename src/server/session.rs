//! Server-side session handle.
//!
//! The transport adapter owns the actual connection to the client; the
//! pipeline only needs the two server-initiated exchanges modeled here.

use crate::error::Result;
use crate::types::protocol::{
    ClientCapabilities, ElicitRequest, ElicitResult, ProgressNotification,
};
use async_trait::async_trait;

/// Handle to the client session behind a call.
///
/// Implementations must be safe to share across tasks; both operations may
/// be invoked from the backend's task while the call is suspended.
#[async_trait]
pub trait ServerSession: Send + Sync {
    /// Capabilities the client declared during the handshake.
    fn client_capabilities(&self) -> ClientCapabilities;

    /// Send an elicitation request and await the user's answer.
    ///
    /// This is a full round-trip; callers bound it with the call's
    /// deadline. Transport failures surface as errors and are handled by
    /// the caller's degradation policy.
    async fn elicit(&self, request: ElicitRequest) -> Result<ElicitResult>;

    /// Deliver a progress notification to the client.
    async fn notify_progress(&self, notification: ProgressNotification) -> Result<()>;
}
