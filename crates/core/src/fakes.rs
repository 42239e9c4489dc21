//! Fake collaborators for testing the engine without WebRTC or a server.
//!
//! Each fake records the calls it receives and exposes a small control
//! surface for driving the engine from tests: scripted connect outcomes on
//! the signal client, and transport handles that can emit events into the
//! engine's event channel.
//!
//! # Example
//!
//! ```ignore
//! let signal = FakeSignalClient::new();
//! let factory = FakeTransportFactory::new();
//! factory.set_auto_connect(AutoConnect::OnCreate);
//! let cleanup = FakeCleanup::new();
//!
//! let (engine, _events) =
//!     ConnectionEngine::new(signal.clone(), factory.clone(), cleanup.clone(), options);
//! engine.connect("wss://example.test", "token").await?;
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use roomlink_protocol::{
    ConnectResponse, DataChannelInfo, IceCandidateInit, JoinDetails, LeaveReason,
    ReconnectDetails, SessionDescription, SignalTarget, SyncState,
};

use crate::cleanup::SessionCleanup;
use crate::error::{EngineError, Result};
use crate::signal::{SignalClient, SignalOptions};
use crate::state::ReconnectMode;
use crate::transport::{
    DataChannelSetup, RtcConfig, Transport, TransportEvent, TransportEventSender, TransportFactory,
    TransportState,
};

/// When a fake transport reports itself connected without the test driving
/// it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoConnect {
    /// Only explicit [`FakeTransport::emit_state`] calls change state.
    Never,
    /// Emit `Connected` as soon as the factory creates the transport.
    OnCreate,
    /// Emit `Connected` when `set_configuration` is applied (exercises the
    /// quick-reconnect path).
    OnConfigure,
}

/// Factory handed to the engine; keeps every transport it created so tests
/// can reach them afterwards.
pub struct FakeTransportFactory {
    auto_connect: Arc<Mutex<AutoConnect>>,
    created: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeTransportFactory {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            auto_connect: Arc::new(Mutex::new(AutoConnect::Never)),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn set_auto_connect(&self, mode: AutoConnect) {
        *self.auto_connect.lock() = mode;
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().len()
    }

    /// The most recently created transport for `target`.
    pub fn transport(&self, target: SignalTarget) -> Option<Arc<FakeTransport>> {
        self.created.lock().iter().rev().find(|t| t.target == target).cloned()
    }
}

#[async_trait]
impl TransportFactory for FakeTransportFactory {
    async fn create(
        &self,
        target: SignalTarget,
        config: RtcConfig,
        events: TransportEventSender,
    ) -> Result<Arc<dyn Transport>> {
        let transport = Arc::new(FakeTransport {
            target,
            state: Mutex::new(TransportState::New),
            events,
            auto_connect: Arc::clone(&self.auto_connect),
            negotiate_calls: AtomicUsize::new(0),
            offers: Mutex::new(Vec::new()),
            configurations: Mutex::new(vec![config]),
            local_desc: Mutex::new(None),
            next_channel_id: AtomicU16::new(1),
            channels: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.created.lock().push(Arc::clone(&transport));
        if *self.auto_connect.lock() == AutoConnect::OnCreate {
            transport.emit_state(TransportState::Connected);
        }
        Ok(transport)
    }
}

/// A transport handle that records what the engine does to it and lets the
/// test emit delegate events.
pub struct FakeTransport {
    target: SignalTarget,
    state: Mutex<TransportState>,
    events: TransportEventSender,
    auto_connect: Arc<Mutex<AutoConnect>>,
    negotiate_calls: AtomicUsize,
    offers: Mutex<Vec<bool>>,
    configurations: Mutex<Vec<RtcConfig>>,
    local_desc: Mutex<Option<SessionDescription>>,
    next_channel_id: AtomicU16,
    channels: Mutex<Vec<DataChannelInfo>>,
    closed: AtomicBool,
}

impl FakeTransport {
    /// Sets the state and delivers the change through the engine's event
    /// channel, like a real delegate callback would.
    pub fn emit_state(&self, state: TransportState) {
        *self.state.lock() = state;
        let _ = self
            .events
            .send(TransportEvent::StateChanged { target: self.target, state });
    }

    pub fn emit_track_added(&self, track_sid: impl Into<String>) {
        let _ = self.events.send(TransportEvent::TrackAdded { track_sid: track_sid.into() });
    }

    pub fn emit_track_removed(&self, track_sid: impl Into<String>) {
        let _ = self.events.send(TransportEvent::TrackRemoved { track_sid: track_sid.into() });
    }

    pub fn emit_offer(&self, sdp: SessionDescription) {
        let _ = self.events.send(TransportEvent::OfferGenerated { target: self.target, sdp });
    }

    pub fn emit_candidate(&self, candidate: IceCandidateInit) {
        let _ = self
            .events
            .send(TransportEvent::IceCandidate { target: self.target, candidate });
    }

    pub fn emit_data_channel_opened(&self, info: DataChannelInfo) {
        let _ = self
            .events
            .send(TransportEvent::DataChannelOpened { target: self.target, info });
    }

    pub fn set_local_description(&self, desc: SessionDescription) {
        *self.local_desc.lock() = Some(desc);
    }

    pub fn negotiate_count(&self) -> usize {
        self.negotiate_calls.load(Ordering::SeqCst)
    }

    /// The `ice_restart` flag of every offer the engine requested.
    pub fn offers(&self) -> Vec<bool> {
        self.offers.lock().clone()
    }

    /// Configurations applied, including the one passed at creation.
    pub fn configurations(&self) -> Vec<RtcConfig> {
        self.configurations.lock().clone()
    }

    pub fn channels(&self) -> Vec<DataChannelInfo> {
        self.channels.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn target(&self) -> SignalTarget {
        self.target
    }

    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    async fn negotiate(&self) -> Result<()> {
        self.negotiate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_and_send_offer(&self, ice_restart: bool) -> Result<()> {
        self.offers.lock().push(ice_restart);
        Ok(())
    }

    async fn set_configuration(&self, config: RtcConfig) -> Result<()> {
        self.configurations.lock().push(config);
        if *self.auto_connect.lock() == AutoConnect::OnConfigure {
            self.emit_state(TransportState::Connected);
        }
        Ok(())
    }

    async fn data_channel(&self, label: &str, _setup: DataChannelSetup) -> Result<DataChannelInfo> {
        let info = DataChannelInfo {
            label: label.to_string(),
            id: self.next_channel_id.fetch_add(1, Ordering::SeqCst),
        };
        self.channels.lock().push(info.clone());
        Ok(info)
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local_desc.lock().clone()
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        *self.state.lock() = TransportState::Closed;
    }
}

/// One scripted outcome for a `connect` call on the fake signal client.
enum ScriptedConnect {
    Respond(Result<ConnectResponse>),
    /// Never answers; the call stays pending for the rest of the test.
    Pend,
}

/// Everything the engine said to the signaling collaborator, in order.
#[derive(Debug, Clone)]
pub enum SignalCall {
    Connect { reconnect: Option<ReconnectMode> },
    Candidate { target: SignalTarget },
    Offer,
    SyncState(SyncState),
    Leave(LeaveReason),
    ResumeQueues,
    Close,
}

/// Scriptable signal client. With an empty script, `connect` answers with
/// default join details (or default reconnect details when a reconnect mode
/// was requested).
pub struct FakeSignalClient {
    script: Mutex<VecDeque<ScriptedConnect>>,
    calls: Mutex<Vec<SignalCall>>,
    default_join: Mutex<JoinDetails>,
}

impl FakeSignalClient {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            default_join: Mutex::new(JoinDetails {
                session_id: "RM_fake".to_string(),
                subscriber_primary: true,
                ..Default::default()
            }),
        })
    }

    pub fn set_default_join(&self, join: JoinDetails) {
        *self.default_join.lock() = join;
    }

    pub fn script_join(&self, join: JoinDetails) {
        self.script
            .lock()
            .push_back(ScriptedConnect::Respond(Ok(ConnectResponse::Join(join))));
    }

    pub fn script_reconnect(&self, details: ReconnectDetails) {
        self.script
            .lock()
            .push_back(ScriptedConnect::Respond(Ok(ConnectResponse::Reconnect(details))));
    }

    pub fn script_error(&self, message: &str) {
        self.script
            .lock()
            .push_back(ScriptedConnect::Respond(Err(EngineError::signal(message))));
    }

    /// The next `connect` call never completes.
    pub fn script_pending(&self) {
        self.script.lock().push_back(ScriptedConnect::Pend);
    }

    pub fn calls(&self) -> Vec<SignalCall> {
        self.calls.lock().clone()
    }

    /// Takes all recorded calls, clearing the log.
    pub fn take_calls(&self) -> Vec<SignalCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn connect_count(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| matches!(call, SignalCall::Connect { .. }))
            .count()
    }

    /// The reconnect mode of each `connect` call, in order.
    pub fn connect_modes(&self) -> Vec<Option<ReconnectMode>> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                SignalCall::Connect { reconnect } => Some(*reconnect),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalClient for FakeSignalClient {
    async fn connect(
        &self,
        _url: &str,
        _token: &str,
        _options: &SignalOptions,
        reconnect: Option<ReconnectMode>,
        _adaptive_stream: bool,
    ) -> Result<ConnectResponse> {
        self.calls.lock().push(SignalCall::Connect { reconnect });
        let scripted = self.script.lock().pop_front();
        match scripted {
            Some(ScriptedConnect::Respond(result)) => result,
            Some(ScriptedConnect::Pend) => std::future::pending().await,
            None => {
                if reconnect.is_some() {
                    Ok(ConnectResponse::Reconnect(ReconnectDetails::default()))
                } else {
                    Ok(ConnectResponse::Join(self.default_join.lock().clone()))
                }
            }
        }
    }

    async fn resume_queues(&self) -> Result<()> {
        self.calls.lock().push(SignalCall::ResumeQueues);
        Ok(())
    }

    async fn send_candidate(
        &self,
        _candidate: IceCandidateInit,
        target: SignalTarget,
    ) -> Result<()> {
        self.calls.lock().push(SignalCall::Candidate { target });
        Ok(())
    }

    async fn send_offer(&self, _offer: SessionDescription) -> Result<()> {
        self.calls.lock().push(SignalCall::Offer);
        Ok(())
    }

    async fn send_sync_state(&self, sync: SyncState) -> Result<()> {
        self.calls.lock().push(SignalCall::SyncState(sync));
        Ok(())
    }

    async fn send_leave(&self, reason: LeaveReason) -> Result<()> {
        self.calls.lock().push(SignalCall::Leave(reason));
        Ok(())
    }

    async fn close(&self) {
        self.calls.lock().push(SignalCall::Close);
    }
}

/// Recorded clean-up collaborator invocation.
#[derive(Debug, Clone)]
pub enum CleanupCall {
    CleanUp { is_full_reconnect: bool },
    CleanUpWithError(EngineError),
}

/// Clean-up collaborator that records every invocation.
#[derive(Default)]
pub struct FakeCleanup {
    calls: Mutex<Vec<CleanupCall>>,
}

impl FakeCleanup {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<CleanupCall> {
        self.calls.lock().clone()
    }

    pub fn error_calls(&self) -> Vec<EngineError> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                CleanupCall::CleanUpWithError(err) => Some(err.clone()),
                CleanupCall::CleanUp { .. } => None,
            })
            .collect()
    }
}

#[async_trait]
impl SessionCleanup for FakeCleanup {
    async fn clean_up(&self, is_full_reconnect: bool) {
        self.calls.lock().push(CleanupCall::CleanUp { is_full_reconnect });
    }

    async fn clean_up_with_error(&self, error: EngineError) {
        self.calls.lock().push(CleanupCall::CleanUpWithError(error));
    }
}
