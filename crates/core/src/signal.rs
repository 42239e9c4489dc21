//! Signaling collaborator boundary.

use async_trait::async_trait;

use roomlink_protocol::{
    ConnectResponse, IceCandidateInit, LeaveReason, SessionDescription, SignalTarget, SyncState,
};

use crate::error::Result;
use crate::state::ReconnectMode;

/// Options forwarded to the signaling server on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalOptions {
    /// Subscribe to all published tracks automatically on join.
    pub auto_subscribe: bool,
}

impl Default for SignalOptions {
    fn default() -> Self {
        Self { auto_subscribe: true }
    }
}

/// The signaling client as the engine sees it. Wire encoding and the message
/// schema live behind this boundary.
#[async_trait]
pub trait SignalClient: Send + Sync {
    /// Performs the signaling handshake. `reconnect` selects reconnect mode
    /// on the wire; `None` requests an initial join.
    async fn connect(
        &self,
        url: &str,
        token: &str,
        options: &SignalOptions,
        reconnect: Option<ReconnectMode>,
        adaptive_stream: bool,
    ) -> Result<ConnectResponse>;

    /// Flushes requests queued while the signaling channel was resuming.
    async fn resume_queues(&self) -> Result<()>;

    async fn send_candidate(&self, candidate: IceCandidateInit, target: SignalTarget)
    -> Result<()>;

    async fn send_offer(&self, offer: SessionDescription) -> Result<()>;

    /// Sends the reconcile snapshot during a quick reconnect.
    async fn send_sync_state(&self, sync: SyncState) -> Result<()>;

    async fn send_leave(&self, reason: LeaveReason) -> Result<()>;

    async fn close(&self);
}
