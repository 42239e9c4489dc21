//! Keyed registry of lazily-created completers.
//!
//! Used when multiple concurrent identities - one per pending signaling
//! request, for example - each need their own one-shot signal. Lookup and
//! construction happen under one lock, so a construction race between two
//! first-time lookups of the same key yields a single live completer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::EngineError;
use crate::sync::Completer;

pub struct CompleterRegistry<T> {
    label: String,
    default_timeout: Duration,
    entries: Mutex<HashMap<String, Arc<Completer<T>>>>,
}

impl<T> std::fmt::Debug for CompleterRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompleterRegistry")
            .field("label", &self.label)
            .field("entries", &self.entries.lock().len())
            .finish()
    }
}

impl<T: Clone + Send + 'static> CompleterRegistry<T> {
    pub fn new(label: impl Into<String>, default_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            default_timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the completer for `key`, creating it on first access.
    pub fn completer(&self, key: &str) -> Arc<Completer<T>> {
        let mut entries = self.entries.lock();
        Arc::clone(entries.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Completer::new(
                format!("{}[{}]", self.label, key),
                self.default_timeout,
            ))
        }))
    }

    /// Fetches-or-creates the completer for `key` and resolves it.
    pub fn resolve(&self, key: &str, value: T) {
        self.completer(key).resolve(value);
    }

    /// Fetches-or-creates the completer for `key` and fails it.
    pub fn fail(&self, key: &str, error: EngineError) {
        self.completer(key).fail(error);
    }

    /// Resets every live completer, then discards all entries; the next
    /// access per key recreates a fresh one.
    pub fn reset_all(&self) {
        let entries = std::mem::take(&mut *self.entries.lock());
        for completer in entries.values() {
            completer.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<CompleterRegistry<String>> {
        Arc::new(CompleterRegistry::new("request", Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn concurrent_first_lookups_share_one_completer() {
        let registry = registry();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move { registry.completer("42") }));
        }

        let mut completers = Vec::new();
        for handle in handles {
            completers.push(handle.await.unwrap());
        }
        let first = &completers[0];
        assert!(completers.iter().all(|c| Arc::ptr_eq(first, c)));
    }

    #[tokio::test]
    async fn resolve_creates_then_resolves() {
        let registry = registry();
        registry.resolve("7", "ack".to_string());
        // a wait issued after the resolve returns immediately
        assert_eq!(registry.completer("7").wait().await.unwrap(), "ack");
    }

    #[tokio::test]
    async fn reset_all_cancels_and_discards() {
        let registry = registry();
        let completer = registry.completer("1");
        let waiter = {
            let completer = Arc::clone(&completer);
            tokio::spawn(async move { completer.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        registry.reset_all();
        assert!(waiter.await.unwrap().unwrap_err().is_cancelled());

        // next access recreates a fresh instance
        let fresh = registry.completer("1");
        assert!(!Arc::ptr_eq(&completer, &fresh));
        assert!(!fresh.is_resolved());
    }

    #[tokio::test]
    async fn distinct_keys_are_independent() {
        let registry = registry();
        registry.resolve("a", "first".to_string());
        assert!(registry.completer("a").is_resolved());
        assert!(!registry.completer("b").is_resolved());
    }
}
