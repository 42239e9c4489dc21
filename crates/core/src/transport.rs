//! Transport capability boundary.
//!
//! The engine never speaks ICE/DTLS/SDP itself; it drives opaque transport
//! handles through this trait, one per [`SignalTarget`] role, and observes
//! them through [`TransportEvent`]s delivered on an unbounded channel. Real
//! implementations wrap a WebRTC peer connection; tests use the fakes in
//! [`crate::fakes`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use roomlink_protocol::{
    ClientConfig, DataChannelInfo, IceCandidateInit, IceServerInfo, SessionDescription,
    SignalTarget,
};

use crate::error::Result;

/// Label of the ordered publisher data channel.
pub const RELIABLE_DC_LABEL: &str = "_reliable";
/// Label of the unordered, no-retransmit publisher data channel.
pub const LOSSY_DC_LABEL: &str = "_lossy";

/// Connectivity of a single transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    pub fn is_connected(&self) -> bool {
        matches!(self, TransportState::Connected)
    }

    /// Connectivity has been lost in a way that warrants recovery.
    pub fn is_down(&self) -> bool {
        matches!(self, TransportState::Disconnected | TransportState::Failed)
    }
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportState::New => "new",
            TransportState::Connecting => "connecting",
            TransportState::Connected => "connected",
            TransportState::Disconnected => "disconnected",
            TransportState::Failed => "failed",
            TransportState::Closed => "closed",
        };
        write!(f, "{name}")
    }
}

/// Configuration applied to a transport at creation and on reconnect.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcConfig {
    pub ice_servers: Vec<IceServerInfo>,
    pub force_relay: bool,
}

impl RtcConfig {
    /// Merges server-provided ICE servers with a caller override and the
    /// forced-relay policy. Caller-supplied servers win when present; relay
    /// is forced when either side asks for it.
    pub fn build(
        server_ice: &[IceServerInfo],
        client_config: Option<&ClientConfig>,
        override_ice: &[IceServerInfo],
        force_relay: bool,
    ) -> Self {
        let ice_servers = if override_ice.is_empty() {
            server_ice.to_vec()
        } else {
            override_ice.to_vec()
        };
        let force_relay = force_relay || client_config.is_some_and(|c| c.force_relay);
        Self { ice_servers, force_relay }
    }
}

/// Per-channel setup handed to [`Transport::data_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChannelSetup {
    pub ordered: bool,
    pub max_retransmits: Option<u16>,
}

impl DataChannelSetup {
    pub fn reliable() -> Self {
        Self { ordered: true, max_retransmits: None }
    }

    pub fn lossy() -> Self {
        Self { ordered: false, max_retransmits: Some(0) }
    }
}

/// Delegate callbacks from a transport, delivered in occurrence order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    StateChanged { target: SignalTarget, state: TransportState },
    OfferGenerated { target: SignalTarget, sdp: SessionDescription },
    IceCandidate { target: SignalTarget, candidate: IceCandidateInit },
    TrackAdded { track_sid: String },
    TrackRemoved { track_sid: String },
    DataChannelOpened { target: SignalTarget, info: DataChannelInfo },
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Opaque capability set over one peer transport.
#[async_trait]
pub trait Transport: Send + Sync {
    fn target(&self) -> SignalTarget;

    fn state(&self) -> TransportState;

    /// Kicks off offer/answer negotiation.
    async fn negotiate(&self) -> Result<()>;

    /// Creates an offer (optionally with an ICE restart) and sends it
    /// through the transport's own signaling path.
    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<()>;

    /// Reapplies configuration in place; used by quick reconnects.
    async fn set_configuration(&self, config: RtcConfig) -> Result<()>;

    /// Opens a data channel and returns its metadata.
    async fn data_channel(&self, label: &str, setup: DataChannelSetup) -> Result<DataChannelInfo>;

    /// Current local session description, when one has been set.
    async fn local_description(&self) -> Option<SessionDescription>;

    async fn close(&self);
}

/// Constructs transport handles; full reconnects go through this again so
/// the engine can replace handles rather than mutate them.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        target: SignalTarget,
        config: RtcConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>>;
}
