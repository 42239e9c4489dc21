//! Clean-up collaborator boundary.

use async_trait::async_trait;

use crate::error::EngineError;

/// Hook the surrounding client registers so it can release its own
/// references (renderers, published tracks, UI surfaces) when the engine
/// tears a session down. Invoked by the engine, never owned by it.
#[async_trait]
pub trait SessionCleanup: Send + Sync {
    /// A teardown that may be followed by a fresh connect (full reconnect)
    /// or is part of an orderly close.
    async fn clean_up(&self, is_full_reconnect: bool);

    /// Terminal teardown after reconnection was exhausted; `error` is the
    /// last attempt's failure.
    async fn clean_up_with_error(&self, error: EngineError);
}
