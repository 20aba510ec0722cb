//! Per-key holder of merged state with change notification.
//!
//! Publishes are diffed per field; subscribers only hear about a publish when
//! at least one field value changed. Provenance-only updates are stored
//! silently.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::state::MergedState;
use crate::types::FieldKey;

type Callback = Arc<dyn Fn(&MergedState) + Send + Sync>;

#[derive(Default)]
struct Entry {
    state: MergedState,
    subscribers: BTreeMap<u64, Callback>,
}

#[derive(Default)]
struct StoreInner {
    entries: HashMap<String, Entry>,
    next_subscriber: u64,
}

/// Shared store of merged states, one per logical key.
///
/// Cloning is cheap; clones share the same entries.
#[derive(Clone, Default)]
pub struct Store {
    inner: Arc<Mutex<StoreInner>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<MergedState> {
        self.inner
            .lock()
            .entries
            .get(key)
            .map(|entry| entry.state.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Register `callback` for changes to `key`.
    ///
    /// The callback runs on the publishing task, outside the store lock.
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(
        &self,
        key: impl Into<String>,
        callback: impl Fn(&MergedState) + Send + Sync + 'static,
    ) -> Subscription {
        let key = key.into();
        let mut inner = self.inner.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner
            .entries
            .entry(key.clone())
            .or_default()
            .subscribers
            .insert(id, Arc::new(callback));

        Subscription {
            store: Arc::downgrade(&self.inner),
            key,
            id,
        }
    }

    /// Store `state` under `key` and notify subscribers if any value changed.
    ///
    /// Returns the changed field keys.
    pub fn publish(&self, key: &str, state: MergedState) -> Vec<FieldKey> {
        let (changed, callbacks) = {
            let mut inner = self.inner.lock();
            let entry = inner.entries.entry(key.to_string()).or_default();
            let changed = state.changed_fields(&entry.state);
            entry.state = state.clone();
            let callbacks: Vec<Callback> = if changed.is_empty() {
                Vec::new()
            } else {
                entry.subscribers.values().cloned().collect()
            };
            (changed, callbacks)
        };

        if !changed.is_empty() {
            debug!(
                key,
                changed_fields = changed.len(),
                subscribers = callbacks.len(),
                "State published"
            );
        }
        for callback in callbacks {
            callback(&state);
        }
        changed
    }

    /// Drop the entry for `key` along with its subscribers
    pub fn remove(&self, key: &str) -> Option<MergedState> {
        self.inner.lock().entries.remove(key).map(|e| e.state)
    }

    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .lock()
            .entries
            .get(key)
            .map_or(0, |e| e.subscribers.len())
    }
}

/// Handle for a store subscription; unsubscribes on drop
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<Mutex<StoreInner>>,
    key: String,
    id: u64,
}

impl Subscription {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.store.upgrade() {
            if let Some(entry) = inner.lock().entries.get_mut(&self.key) {
                entry.subscribers.remove(&self.id);
            }
        }
    }
}
