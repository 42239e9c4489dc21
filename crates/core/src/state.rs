//! Shared session state and the atomic store guarding it.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use roomlink_protocol::{SignalTarget, TrackPublishedInfo};

/// Connection lifecycle of the whole session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Recovery strategy for a reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectMode {
    /// In-place ICE restart reusing the existing transports.
    Quick,
    /// Complete teardown followed by a fresh connect sequence.
    Full,
}

impl std::fmt::Display for ReconnectMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconnectMode::Quick => write!(f, "quick"),
            ReconnectMode::Full => write!(f, "full"),
        }
    }
}

/// The one logically atomic container for connection/session state.
///
/// All fields that participate in multi-field decisions live here so the
/// decision and the commit happen inside a single [`SessionStore::mutate`].
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub connection_state: ConnectionState,
    /// Set while a reconnect sequence is in flight; doubles as the
    /// idempotent-start guard.
    pub reconnect_mode: Option<ReconnectMode>,
    /// Caller-requested escalation applied to the next attempt.
    pub next_reconnect_mode: Option<ReconnectMode>,
    pub reconnect_attempt: u32,
    pub url: Option<String>,
    pub token: Option<String>,
    pub session_id: Option<String>,
    /// The server designated the subscriber transport as primary.
    pub subscriber_primary: bool,
    pub has_published: bool,
    pub published_tracks: Vec<TrackPublishedInfo>,
    pub subscribed_tracks: Vec<String>,
}

impl SessionState {
    /// Which transport carries the primary connectivity signal.
    pub fn primary_target(&self) -> SignalTarget {
        if self.subscriber_primary {
            SignalTarget::Subscriber
        } else {
            SignalTarget::Publisher
        }
    }
}

/// Mutual-exclusion discipline over [`SessionState`].
///
/// `read` returns a projection computed over a consistent snapshot; `mutate`
/// applies a transformation under the lock and hands any derived value back
/// to the caller. Raw fields are never exposed across a concurrency
/// boundary.
#[derive(Debug, Default)]
pub struct SessionStore {
    state: Mutex<SessionState>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<R>(&self, project: impl FnOnce(&SessionState) -> R) -> R {
        project(&self.state.lock())
    }

    pub fn mutate<R>(&self, transform: impl FnOnce(&mut SessionState) -> R) -> R {
        transform(&mut self.state.lock())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.read(|state| state.connection_state)
    }
}
