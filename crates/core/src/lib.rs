// roomlink: session-lifecycle engine for a real-time media client.
//
// Drives connect -> negotiate -> (re)connect-on-failure, and provides the
// async rendezvous primitives the rest of the client waits on. WebRTC
// internals, media rendering, and the signaling wire schema live behind the
// collaborator traits in `transport`, `signal`, and `cleanup`.

pub mod cleanup;
pub mod engine;
pub mod error;
pub mod fakes;
pub mod options;
pub mod queue;
pub mod signal;
pub mod state;
pub mod sync;
pub mod transport;

pub use cleanup::SessionCleanup;
pub use engine::{ConnectionEngine, SessionEvent, SessionEvents};
pub use error::{EngineError, Result};
pub use options::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
    DEFAULT_WAIT_TIMEOUT, DefaultReconnectPolicy, EngineOptions, ReconnectPolicy,
};
pub use queue::ConditionQueue;
pub use signal::{SignalClient, SignalOptions};
pub use state::{ConnectionState, ReconnectMode, SessionState, SessionStore};
pub use sync::{Completer, CompleterRegistry};
pub use transport::{
    LOSSY_DC_LABEL, RELIABLE_DC_LABEL, RtcConfig, Transport, TransportEvent, TransportFactory,
    TransportState,
};

pub use roomlink_protocol as protocol;
