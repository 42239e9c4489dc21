//! Engine configuration.

use std::sync::Arc;
use std::time::Duration;

use roomlink_protocol::IceServerInfo;

use crate::signal::SignalOptions;
use crate::state::ReconnectMode;

/// Default bound on waiting for the primary transport to connect.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
/// Default bound for completer waits issued without an explicit timeout.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default number of reconnect attempts before giving up.
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;
/// Default fixed delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Chooses the recovery mode for each reconnect attempt.
///
/// The escalation rule is a tunable strategy, not an invariant; swap the
/// implementation to change it.
pub trait ReconnectPolicy: Send + Sync {
    /// `attempt` is zero-based; `current` is the mode the sequence is
    /// presently in; `requested` is a pending caller-requested override,
    /// consumed before this call.
    fn mode_for_attempt(
        &self,
        attempt: u32,
        total: u32,
        current: ReconnectMode,
        requested: Option<ReconnectMode>,
    ) -> ReconnectMode;
}

/// Escalates to `Full` only on an explicit override or when the sequence is
/// already in `Full`. With no override pending, the final attempt runs one
/// more `Quick` rather than escalating.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultReconnectPolicy;

impl ReconnectPolicy for DefaultReconnectPolicy {
    fn mode_for_attempt(
        &self,
        attempt: u32,
        total: u32,
        current: ReconnectMode,
        requested: Option<ReconnectMode>,
    ) -> ReconnectMode {
        if let Some(mode) = requested {
            return mode;
        }
        if attempt + 1 >= total {
            return ReconnectMode::Quick;
        }
        current
    }
}

/// Tunables for the connection engine.
#[derive(Clone)]
pub struct EngineOptions {
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    pub default_wait_timeout: Duration,
    /// Caller-supplied ICE servers; overrides the server-provided set when
    /// non-empty.
    pub ice_servers: Vec<IceServerInfo>,
    pub force_relay: bool,
    pub adaptive_stream: bool,
    pub signal: SignalOptions,
    pub policy: Arc<dyn ReconnectPolicy>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            default_wait_timeout: DEFAULT_WAIT_TIMEOUT,
            ice_servers: Vec::new(),
            force_relay: false,
            adaptive_stream: false,
            signal: SignalOptions::default(),
            policy: Arc::new(DefaultReconnectPolicy),
        }
    }
}

impl std::fmt::Debug for EngineOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("reconnect_attempts", &self.reconnect_attempts)
            .field("reconnect_delay", &self.reconnect_delay)
            .field("default_wait_timeout", &self.default_wait_timeout)
            .field("ice_servers", &self.ice_servers.len())
            .field("force_relay", &self.force_relay)
            .field("adaptive_stream", &self.adaptive_stream)
            .finish()
    }
}
