//! Connection engine: transport configuration, the connect handshake, and
//! the quick/full reconnection state machine.
//!
//! The engine owns the only strong references to the transport handles and
//! mutates shared session state through a single serialized path. External
//! triggers (caller connect, transport state changes, network-path changes)
//! feed in; the engine resolves/resets completers and drains the condition
//! queue on every state transition.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use roomlink_protocol::{
    DataChannelInfo, JoinDetails, LeaveReason, RequestResponse, SignalTarget, SyncState,
    TrackPublishedInfo,
};

use crate::cleanup::SessionCleanup;
use crate::error::{EngineError, Result};
use crate::options::EngineOptions;
use crate::queue::ConditionQueue;
use crate::signal::SignalClient;
use crate::state::{ConnectionState, ReconnectMode, SessionStore};
use crate::sync::{Completer, CompleterRegistry};
use crate::transport::{
    DataChannelSetup, LOSSY_DC_LABEL, RELIABLE_DC_LABEL, RtcConfig, Transport, TransportEvent,
    TransportFactory,
};

/// Events the engine surfaces to its owner.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        new: ConnectionState,
        old: ConnectionState,
    },
    TrackAdded {
        track_sid: String,
    },
    TrackRemoved {
        track_sid: String,
    },
    DataChannelOpened {
        target: SignalTarget,
        info: DataChannelInfo,
    },
    /// Terminal disconnect. `error` carries the last reconnect failure, or
    /// `None` for a client-initiated close. Intermediate attempt failures
    /// are never surfaced individually.
    Disconnected {
        reason: LeaveReason,
        error: Option<EngineError>,
    },
}

pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Clone)]
struct TransportPair {
    publisher: Arc<dyn Transport>,
    subscriber: Arc<dyn Transport>,
    data_channels: Vec<DataChannelInfo>,
}

/// Outcome of the atomic reconnect-start guard.
enum ReconnectStart {
    Started,
    AlreadyRunning,
    Rejected(String),
}

struct EngineInner {
    signal: Arc<dyn SignalClient>,
    factory: Arc<dyn TransportFactory>,
    cleanup: Arc<dyn SessionCleanup>,
    options: EngineOptions,
    store: SessionStore,
    queue: ConditionQueue,
    primary_connected: Completer<()>,
    publisher_connected: Completer<()>,
    requests: CompleterRegistry<RequestResponse>,
    transports: Mutex<Option<TransportPair>>,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    emitter: mpsc::UnboundedSender<SessionEvent>,
    shutdown: CancellationToken,
}

/// Orchestrates the session lifecycle: connect, observe, recover, close.
pub struct ConnectionEngine {
    inner: Arc<EngineInner>,
}

impl ConnectionEngine {
    /// Creates the engine and the receiving end of its session events.
    /// Spawns the transport event pump; it runs until [`close`] or drop.
    ///
    /// [`close`]: ConnectionEngine::close
    pub fn new(
        signal: Arc<dyn SignalClient>,
        factory: Arc<dyn TransportFactory>,
        cleanup: Arc<dyn SessionCleanup>,
        options: EngineOptions,
    ) -> (Self, SessionEvents) {
        let (emitter, session_events) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let wait_timeout = options.default_wait_timeout;
        let inner = Arc::new(EngineInner {
            signal,
            factory,
            cleanup,
            options,
            store: SessionStore::new(),
            queue: ConditionQueue::new(),
            primary_connected: Completer::new("primary transport connected", wait_timeout),
            publisher_connected: Completer::new("publisher transport connected", wait_timeout),
            requests: CompleterRegistry::new("request response", wait_timeout),
            transports: Mutex::new(None),
            events_tx,
            emitter,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(Arc::clone(&inner).event_task(events_rx));

        (Self { inner }, session_events)
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.store.connection_state()
    }

    /// The mode of the in-flight reconnect sequence, when one is running.
    pub fn reconnect_mode(&self) -> Option<ReconnectMode> {
        self.inner.store.read(|state| state.reconnect_mode)
    }

    /// Performs the full connect handshake against `url`.
    ///
    /// Fails with [`EngineError::InvalidState`] unless the engine is
    /// disconnected, with [`EngineError::TimedOut`] when the primary
    /// transport does not connect within the configured bound, and with
    /// whatever the collaborators surface otherwise.
    pub async fn connect(&self, url: &str, token: &str) -> Result<()> {
        let inner = &self.inner;
        let old = inner.store.mutate(|state| {
            if state.connection_state != ConnectionState::Disconnected {
                return Err(EngineError::invalid_state(format!(
                    "connect attempted while {}",
                    state.connection_state
                )));
            }
            Ok(std::mem::replace(&mut state.connection_state, ConnectionState::Connecting))
        })?;
        inner.notify_state_change(old, ConnectionState::Connecting);

        inner.primary_connected.reset();
        inner.publisher_connected.reset();

        let cancel = inner.shutdown.child_token();
        match inner.establish(url, token, &cancel).await {
            Ok(()) => {
                inner.set_connection_state(ConnectionState::Connected);
                info!(target: "roomlink.engine", url, "session connected");
                Ok(())
            }
            Err(err) => {
                warn!(target: "roomlink.engine", url, error = %err, "connect failed");
                inner.teardown_transports().await;
                inner.set_connection_state(ConnectionState::Disconnected);
                Err(err)
            }
        }
    }

    /// Explicit caller-requested reconnect. Surfaces
    /// [`EngineError::InvalidState`] immediately when no reconnect may
    /// start; never retried at this level.
    pub fn reconnect(&self) -> Result<()> {
        match self
            .inner
            .try_start_reconnect(EngineError::internal("reconnect requested by caller"), None)
        {
            ReconnectStart::Started => Ok(()),
            ReconnectStart::AlreadyRunning => {
                Err(EngineError::invalid_state("reconnect already in progress"))
            }
            ReconnectStart::Rejected(reason) => Err(EngineError::InvalidState(reason)),
        }
    }

    /// Requests a reconnect in a specific mode. When a sequence is already
    /// running the override is recorded and applied to its next attempt.
    pub fn request_reconnect(&self, mode: ReconnectMode) -> Result<()> {
        match self.inner.try_start_reconnect(
            EngineError::internal(format!("{mode} reconnect requested by caller")),
            Some(mode),
        ) {
            ReconnectStart::Started | ReconnectStart::AlreadyRunning => Ok(()),
            ReconnectStart::Rejected(reason) => Err(EngineError::InvalidState(reason)),
        }
    }

    /// Network-path change notification; a benign no-op unless the session
    /// is connected.
    pub fn on_network_path_changed(&self) {
        match self
            .inner
            .try_start_reconnect(EngineError::transport("network path changed"), None)
        {
            ReconnectStart::Started => {}
            ReconnectStart::AlreadyRunning | ReconnectStart::Rejected(_) => {
                debug!(target: "roomlink.engine", "network path change ignored");
            }
        }
    }

    /// Blocks until the primary transport reports connected.
    pub async fn wait_until_connected(&self, timeout: Option<Duration>) -> Result<()> {
        self.inner.primary_connected.wait_with(timeout, &self.inner.shutdown).await
    }

    /// Records a locally published track; publisher connectivity now
    /// participates in reconnect triggers and waits.
    pub fn publish_started(&self, info: TrackPublishedInfo) {
        self.inner.store.mutate(|state| {
            state.has_published = true;
            state.published_tracks.push(info);
        });
    }

    pub fn publish_stopped(&self, cid: &str) {
        self.inner.store.mutate(|state| {
            state.published_tracks.retain(|track| track.cid != cid);
            state.has_published = !state.published_tracks.is_empty();
        });
    }

    /// Resolves the per-request completer; called when the signaling layer
    /// delivers an acknowledgement.
    pub fn handle_request_response(&self, response: RequestResponse) {
        self.inner.requests.resolve(&response.request_id.to_string(), response);
    }

    /// Waits for the server acknowledgement of `request_id`.
    pub async fn request_response(&self, request_id: u32) -> Result<RequestResponse> {
        self.inner.requests.completer(&request_id.to_string()).wait().await
    }

    /// Defers `action` until the connection state satisfies `execute_when`,
    /// dropping it once `remove_when` holds first. Runs synchronously when
    /// the condition already holds.
    pub fn defer(
        &self,
        execute_when: impl Fn(ConnectionState, Option<ConnectionState>) -> bool + Send + 'static,
        remove_when: impl Fn(ConnectionState, Option<ConnectionState>) -> bool + Send + 'static,
        action: impl FnOnce() + Send + 'static,
    ) {
        let current = self.inner.store.connection_state();
        self.inner.queue.enqueue(current, execute_when, remove_when, action);
    }

    /// Defers `action` until connected; dropped if the session disconnects
    /// first.
    pub fn when_connected(&self, action: impl FnOnce() + Send + 'static) {
        self.defer(
            |new, _| new == ConnectionState::Connected,
            |new, _| new == ConnectionState::Disconnected,
            action,
        );
    }

    /// Client-initiated teardown: cancels in-flight sequences, notifies the
    /// server, releases transports, and surfaces a single error-free
    /// disconnect event.
    pub async fn close(&self) {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return;
        }
        info!(target: "roomlink.engine", "closing session");
        inner.shutdown.cancel();

        if let Err(err) = inner.signal.send_leave(LeaveReason::ClientInitiated).await {
            debug!(target: "roomlink.engine", error = %err, "leave not delivered");
        }
        inner.teardown_transports().await;
        inner.signal.close().await;
        inner.cleanup.clean_up(false).await;

        inner.store.mutate(|state| {
            state.reconnect_mode = None;
            state.next_reconnect_mode = None;
            state.has_published = false;
            state.published_tracks.clear();
            state.subscribed_tracks.clear();
        });
        inner.set_connection_state(ConnectionState::Disconnected);
        let _ = inner.emitter.send(SessionEvent::Disconnected {
            reason: LeaveReason::ClientInitiated,
            error: None,
        });
    }
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        // Stops the event pump and fails any in-flight sequence with
        // cancellation; waiters deregister through their drop guards.
        self.inner.shutdown.cancel();
    }
}

impl EngineInner {
    async fn event_task(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<TransportEvent>) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    self.on_transport_event(event).await;
                }
                _ = self.shutdown.cancelled() => break,
            }
        }
        debug!(target: "roomlink.engine", "event task closed");
    }

    async fn on_transport_event(self: &Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged { target, state } => {
                debug!(target: "roomlink.engine", transport = %target, state = %state, "transport state changed");
                let (primary, has_published, connection) = self.store.read(|s| {
                    (s.primary_target(), s.has_published, s.connection_state)
                });

                if state.is_connected() {
                    if target == primary {
                        self.primary_connected.resolve(());
                    }
                    if target == SignalTarget::Publisher {
                        self.publisher_connected.resolve(());
                    }
                } else if state.is_down() {
                    let relevant = target == primary
                        || (target == SignalTarget::Publisher && has_published);
                    if relevant && connection == ConnectionState::Connected {
                        let trigger =
                            EngineError::transport(format!("{target} transport {state}"));
                        match self.try_start_reconnect(trigger, None) {
                            ReconnectStart::Started => {}
                            ReconnectStart::AlreadyRunning | ReconnectStart::Rejected(_) => {
                                debug!(target: "roomlink.engine", transport = %target, "recovery already underway");
                            }
                        }
                    }
                }
            }
            TransportEvent::OfferGenerated { target, sdp } => {
                debug!(target: "roomlink.engine", transport = %target, "forwarding offer");
                if let Err(err) = self.signal.send_offer(sdp).await {
                    warn!(target: "roomlink.engine", error = %err, "failed to send offer");
                }
            }
            TransportEvent::IceCandidate { target, candidate } => {
                if let Err(err) = self.signal.send_candidate(candidate, target).await {
                    warn!(target: "roomlink.engine", error = %err, "failed to send candidate");
                }
            }
            TransportEvent::TrackAdded { track_sid } => {
                self.store.mutate(|state| state.subscribed_tracks.push(track_sid.clone()));
                let _ = self.emitter.send(SessionEvent::TrackAdded { track_sid });
            }
            TransportEvent::TrackRemoved { track_sid } => {
                self.store.mutate(|state| state.subscribed_tracks.retain(|sid| *sid != track_sid));
                let _ = self.emitter.send(SessionEvent::TrackRemoved { track_sid });
            }
            TransportEvent::DataChannelOpened { target, info } => {
                let _ = self.emitter.send(SessionEvent::DataChannelOpened { target, info });
            }
        }
    }

    /// Shared by the initial connect and full reconnects: the signaling
    /// handshake, transport construction, data channels, and the bounded
    /// wait for primary connectivity. Cancellation is observed at each
    /// phase boundary.
    async fn establish(&self, url: &str, token: &str, cancel: &CancellationToken) -> Result<()> {
        let response = self
            .signal
            .connect(url, token, &self.options.signal, None, self.options.adaptive_stream)
            .await?;
        ensure_active(cancel)?;

        let join = response
            .as_join()
            .ok_or_else(|| EngineError::signal("expected join details from initial connect"))?
            .clone();
        debug!(target: "roomlink.engine", session_id = %join.session_id, subscriber_primary = join.subscriber_primary, "received join details");

        self.store.mutate(|state| {
            state.url = Some(url.to_string());
            state.token = Some(token.to_string());
            state.session_id = Some(join.session_id.clone());
            state.subscriber_primary = join.subscriber_primary;
        });

        let config = self.rtc_config(&join);
        let publisher = self
            .factory
            .create(SignalTarget::Publisher, config.clone(), self.events_tx.clone())
            .await?;
        let subscriber = self
            .factory
            .create(SignalTarget::Subscriber, config, self.events_tx.clone())
            .await?;
        ensure_active(cancel)?;

        let reliable = publisher
            .data_channel(RELIABLE_DC_LABEL, DataChannelSetup::reliable())
            .await?;
        let lossy = publisher.data_channel(LOSSY_DC_LABEL, DataChannelSetup::lossy()).await?;
        *self.transports.lock() = Some(TransportPair {
            publisher: Arc::clone(&publisher),
            subscriber,
            data_channels: vec![reliable, lossy],
        });

        // With the publisher as primary the server waits for our offer.
        if !join.subscriber_primary {
            publisher.negotiate().await?;
        }
        ensure_active(cancel)?;

        self.primary_connected
            .wait_with(Some(self.options.connect_timeout), cancel)
            .await
    }

    fn rtc_config(&self, join: &JoinDetails) -> RtcConfig {
        RtcConfig::build(
            &join.ice_servers,
            join.client_config.as_ref(),
            &self.options.ice_servers,
            self.options.force_relay,
        )
    }

    /// The idempotent-start guard: checks preconditions and commits the
    /// `Reconnecting` transition in one atomic state mutation, then spawns
    /// the retry task.
    fn try_start_reconnect(
        self: &Arc<Self>,
        trigger: EngineError,
        override_mode: Option<ReconnectMode>,
    ) -> ReconnectStart {
        let has_transports = self.transports.lock().is_some();
        let decision = self.store.mutate(|state| {
            if state.reconnect_mode.is_some() {
                if let Some(mode) = override_mode {
                    state.next_reconnect_mode = Some(mode);
                }
                return ReconnectStart::AlreadyRunning;
            }
            if state.connection_state != ConnectionState::Connected {
                return ReconnectStart::Rejected(format!(
                    "reconnect attempted while {}",
                    state.connection_state
                ));
            }
            if state.url.is_none() || state.token.is_none() {
                return ReconnectStart::Rejected("no server url/token for reconnect".to_string());
            }
            if !has_transports {
                return ReconnectStart::Rejected("no transports to recover".to_string());
            }
            if let Some(mode) = override_mode {
                state.next_reconnect_mode = Some(mode);
            }
            state.reconnect_mode = Some(ReconnectMode::Quick);
            state.connection_state = ConnectionState::Reconnecting;
            ReconnectStart::Started
        });

        if matches!(decision, ReconnectStart::Started) {
            info!(target: "roomlink.engine", trigger = %trigger, "starting reconnect sequence");
            self.notify_state_change(ConnectionState::Connected, ConnectionState::Reconnecting);
            let inner = Arc::clone(self);
            let cancel = self.shutdown.child_token();
            tokio::spawn(async move {
                inner.reconnect_task(trigger, cancel).await;
            });
        }
        decision
    }

    /// The bounded retry loop. Attempt failures feed the next attempt; a
    /// failed full attempt or exhaustion is terminal; cancellation exits
    /// silently.
    async fn reconnect_task(self: Arc<Self>, trigger: EngineError, cancel: CancellationToken) {
        let total = self.options.reconnect_attempts;
        let mut last_err = trigger;
        let mut attempt = 0;
        while attempt < total {
            if cancel.is_cancelled() {
                self.abort_reconnect();
                return;
            }

            let mode = self.store.mutate(|state| {
                let requested = state.next_reconnect_mode.take();
                let current = state.reconnect_mode.unwrap_or(ReconnectMode::Quick);
                let mode = self.options.policy.mode_for_attempt(attempt, total, current, requested);
                state.reconnect_mode = Some(mode);
                state.reconnect_attempt = attempt;
                mode
            });
            info!(target: "roomlink.engine", attempt = attempt + 1, total, mode = %mode, "reconnect attempt");

            let result = match mode {
                ReconnectMode::Quick => self.quick_reconnect(&cancel).await,
                ReconnectMode::Full => self.full_reconnect(&cancel).await,
            };

            match result {
                Ok(()) => {
                    self.store.mutate(|state| {
                        state.reconnect_mode = None;
                        state.next_reconnect_mode = None;
                        state.reconnect_attempt = 0;
                    });
                    if let Err(err) = self.signal.resume_queues().await {
                        warn!(target: "roomlink.engine", error = %err, "failed to resume signal queues");
                    }
                    self.set_connection_state(ConnectionState::Connected);
                    info!(target: "roomlink.engine", mode = %mode, "reconnect succeeded");
                    return;
                }
                Err(err) if err.is_cancelled() => {
                    debug!(target: "roomlink.engine", "reconnect cancelled");
                    self.abort_reconnect();
                    return;
                }
                Err(err) => {
                    warn!(target: "roomlink.engine", attempt = attempt + 1, mode = %mode, error = %err, "reconnect attempt failed");
                    last_err = err;
                    if mode == ReconnectMode::Full {
                        // full is the last resort; no further attempts
                        break;
                    }
                    attempt += 1;
                    if attempt < total {
                        tokio::select! {
                            _ = tokio::time::sleep(self.options.reconnect_delay) => {}
                            _ = cancel.cancelled() => {
                                self.abort_reconnect();
                                return;
                            }
                        }
                    }
                }
            }
        }

        error!(target: "roomlink.engine", error = %last_err, "reconnect exhausted");
        self.store.mutate(|state| {
            state.reconnect_mode = None;
            state.next_reconnect_mode = None;
        });
        self.set_connection_state(ConnectionState::Disconnected);
        self.cleanup.clean_up_with_error(last_err.clone()).await;
        let _ = self.emitter.send(SessionEvent::Disconnected {
            reason: LeaveReason::TransportFailed,
            error: Some(last_err),
        });
    }

    /// A cancelled sequence exits silently: no clean-up-with-error, no
    /// disconnect event; `close` owns the final state.
    fn abort_reconnect(&self) {
        self.store.mutate(|state| {
            state.reconnect_mode = None;
            state.next_reconnect_mode = None;
        });
    }

    /// In-place recovery: re-run the signaling connect in reconnect mode,
    /// reconfigure the existing transports, reconcile state with the
    /// server, then restart ICE.
    async fn quick_reconnect(&self, cancel: &CancellationToken) -> Result<()> {
        let (url, token, has_published) = self.store.read(|state| {
            (state.url.clone(), state.token.clone(), state.has_published)
        });
        let (url, token) = url
            .zip(token)
            .ok_or_else(|| EngineError::invalid_state("no server url/token for reconnect"))?;

        self.primary_connected.reset();
        self.publisher_connected.reset();

        let response = self
            .signal
            .connect(
                &url,
                &token,
                &self.options.signal,
                Some(ReconnectMode::Quick),
                self.options.adaptive_stream,
            )
            .await?;
        ensure_active(cancel)?;

        let details = response
            .as_reconnect()
            .ok_or_else(|| EngineError::signal("expected reconnect details"))?
            .clone();

        let config = RtcConfig::build(
            &details.ice_servers,
            details.client_config.as_ref(),
            &self.options.ice_servers,
            self.options.force_relay,
        );
        let pair = self
            .transports
            .lock()
            .clone()
            .ok_or_else(|| EngineError::invalid_state("no transports to recover"))?;
        pair.publisher.set_configuration(config.clone()).await?;
        pair.subscriber.set_configuration(config).await?;
        ensure_active(cancel)?;

        // Reconcile before the restart so the server can re-associate
        // subscriptions and channel ids with the surviving session.
        let sync = self.capture_sync_state(&pair).await;
        self.signal.send_sync_state(sync).await?;
        if has_published {
            pair.publisher.create_and_send_offer(true).await?;
        }
        ensure_active(cancel)?;

        self.primary_connected
            .wait_with(Some(self.options.connect_timeout), cancel)
            .await?;
        if has_published {
            self.publisher_connected
                .wait_with(Some(self.options.connect_timeout), cancel)
                .await?;
        }
        Ok(())
    }

    /// Last-resort recovery: tear everything down, then run the initial
    /// connect sequence from scratch with fresh transports.
    async fn full_reconnect(&self, cancel: &CancellationToken) -> Result<()> {
        let (url, token) = self
            .store
            .read(|state| state.url.clone().zip(state.token.clone()))
            .ok_or_else(|| EngineError::invalid_state("no server url/token for reconnect"))?;

        self.cleanup.clean_up(true).await;
        self.teardown_transports().await;
        self.store.mutate(|state| {
            state.session_id = None;
            state.has_published = false;
            state.published_tracks.clear();
            state.subscribed_tracks.clear();
        });
        ensure_active(cancel)?;

        self.establish(&url, &token, cancel).await
    }

    async fn capture_sync_state(&self, pair: &TransportPair) -> SyncState {
        let (track_sids, publish_tracks) = self.store.read(|state| {
            (state.subscribed_tracks.clone(), state.published_tracks.clone())
        });
        SyncState {
            answer: pair.subscriber.local_description().await,
            offer: pair.publisher.local_description().await,
            track_sids,
            subscribe: self.options.signal.auto_subscribe,
            publish_tracks,
            data_channels: pair.data_channels.clone(),
        }
    }

    async fn teardown_transports(&self) {
        let pair = self.transports.lock().take();
        if let Some(pair) = pair {
            futures_util::future::join(pair.publisher.close(), pair.subscriber.close()).await;
        }
        self.primary_connected.reset();
        self.publisher_connected.reset();
        self.requests.reset_all();
    }

    fn set_connection_state(&self, new: ConnectionState) {
        let old = self.store.mutate(|state| std::mem::replace(&mut state.connection_state, new));
        self.notify_state_change(old, new);
    }

    fn notify_state_change(&self, old: ConnectionState, new: ConnectionState) {
        if old == new {
            return;
        }
        debug!(target: "roomlink.engine", from = %old, to = %new, "connection state changed");
        let _ = self.emitter.send(SessionEvent::StateChanged { new, old });
        self.queue.on_state_change(new, Some(old));
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}
