//! Deferred actions gated by predicates over connection state.
//!
//! Entries are evaluated in insertion order on every observed state
//! transition and execute at most once. Actions run outside the queue lock,
//! so an action may enqueue further entries without deadlocking, and entries
//! capture only what they need - never the owning engine - so a teardown
//! mid-drain cannot dangle.

use parking_lot::Mutex;

use crate::state::ConnectionState;

type StatePredicate = Box<dyn Fn(ConnectionState, Option<ConnectionState>) -> bool + Send>;
type Action = Box<dyn FnOnce() + Send>;

struct Entry {
    execute_when: StatePredicate,
    remove_when: StatePredicate,
    action: Action,
}

#[derive(Default)]
pub struct ConditionQueue {
    entries: Mutex<Vec<Entry>>,
}

impl std::fmt::Debug for ConditionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionQueue").field("pending", &self.len()).finish()
    }
}

impl ConditionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Defers `action` until `execute_when` holds, or drops it once
    /// `remove_when` holds first.
    ///
    /// When `execute_when(current, None)` already holds the action runs
    /// synchronously, immediately, and is never deferred.
    pub fn enqueue(
        &self,
        current: ConnectionState,
        execute_when: impl Fn(ConnectionState, Option<ConnectionState>) -> bool + Send + 'static,
        remove_when: impl Fn(ConnectionState, Option<ConnectionState>) -> bool + Send + 'static,
        action: impl FnOnce() + Send + 'static,
    ) {
        if execute_when(current, None) {
            action();
            return;
        }
        self.entries.lock().push(Entry {
            execute_when: Box::new(execute_when),
            remove_when: Box::new(remove_when),
            action: Box::new(action),
        });
    }

    /// Evaluates every entry against the transition, in insertion order.
    ///
    /// An entry whose `execute_when` holds executes and is removed; an entry
    /// whose `remove_when` holds (and `execute_when` does not) is removed
    /// without executing.
    pub fn on_state_change(&self, new: ConnectionState, old: Option<ConnectionState>) {
        let entries = std::mem::take(&mut *self.entries.lock());
        let mut ready = Vec::new();
        let mut kept = Vec::new();
        for entry in entries {
            if (entry.execute_when)(new, old) {
                ready.push(entry.action);
            } else if !(entry.remove_when)(new, old) {
                kept.push(entry);
            }
        }

        // Survivors go back in ahead of anything enqueued mid-drain, so
        // insertion order is preserved; actions run after the lock drops.
        if !kept.is_empty() {
            let mut entries = self.entries.lock();
            let newer = std::mem::replace(&mut *entries, kept);
            entries.extend(newer);
        }
        for action in ready {
            action();
        }
    }
}
