//! Error type shared across the session engine.
//!
//! Errors are cloneable because a single terminal result can fan out to any
//! number of concurrent waiters on a [`Completer`](crate::sync::Completer);
//! opaque collaborator failures are carried as `Arc`-backed messages so the
//! clone is cheap.

use std::sync::Arc;

use thiserror::Error;

/// Failures surfaced by the engine and its synchronization primitives.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// Operation attempted from a state that forbids it, e.g. a reconnect
    /// requested while one is already in progress. Never retried.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A bounded wait exceeded its deadline.
    #[error("timed out: {0}")]
    TimedOut(String),

    /// The owning task was cancelled, or the completer was reset while the
    /// wait was still pending.
    #[error("cancelled")]
    Cancelled,

    /// Opaque failure from the signaling collaborator.
    #[error("signal error: {0}")]
    Signal(Arc<str>),

    /// Opaque failure from a transport collaborator.
    #[error("transport error: {0}")]
    Transport(Arc<str>),

    /// Engine invariant breakage.
    #[error("internal error: {0}")]
    Internal(Arc<str>),
}

impl EngineError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        EngineError::InvalidState(message.into())
    }

    pub fn timed_out(message: impl Into<String>) -> Self {
        EngineError::TimedOut(message.into())
    }

    pub fn signal(message: impl Into<String>) -> Self {
        EngineError::Signal(message.into().into())
    }

    pub fn transport(message: impl Into<String>) -> Self {
        EngineError::Transport(message.into().into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        EngineError::Internal(message.into().into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::TimedOut(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, EngineError::InvalidState(_))
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
