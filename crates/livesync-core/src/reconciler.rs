//! Field-level merge of per-source snapshots and pending mutations.
//!
//! ## Rules
//!
//! For every field mentioned by any source:
//!
//! 1. Candidates are the latest successful snapshots that mention the field
//!    and are at least as fresh as the field's watermark (the newest source
//!    timestamp the field already reflects). A failed fetch leaves its
//!    source's last successful snapshot in place.
//! 2. Candidates are ranked by `(priority desc, fetched_at desc, registration
//!    order asc)`; the first usable one wins.
//! 3. An explicit absent value only clears a present value when it is strictly
//!    newer than the current value and comes from a source of equal or higher
//!    priority.
//! 4. No usable candidate means the previous value is kept.
//!
//! Pending mutations are laid over the source-derived values afterwards, and
//! stamp the field's provenance with their `applied_at`.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LiveSyncError, LiveSyncResult};
use crate::mutation::{Confirmation, MutationCoordinator};
use crate::snapshot::Snapshot;
use crate::state::MergedState;
use crate::types::{FieldKey, Provenance, SourceId, Timestamp};

#[derive(Debug, Clone)]
struct RegisteredSource {
    priority: u32,
    order: usize,
}

/// Source-derived value of one field, before mutations are overlaid
#[derive(Debug, Clone, PartialEq)]
struct FieldState {
    value: Option<Value>,
    provenance: Provenance,
    priority: u32,
}

/// Outcome of one merge pass
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub state: MergedState,
    pub confirmed: Vec<Confirmation>,
}

/// Owns the merged state of one logical key
#[derive(Debug, Default)]
pub struct Reconciler {
    sources: BTreeMap<SourceId, RegisteredSource>,
    latest: BTreeMap<SourceId, Snapshot>,
    baseline: BTreeMap<FieldKey, FieldState>,
    current: MergedState,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source. Duplicate ids are a configuration error.
    pub fn register(&mut self, source_id: SourceId, priority: u32) -> LiveSyncResult<()> {
        if self.sources.contains_key(&source_id) {
            return Err(LiveSyncError::DuplicateSource(source_id));
        }
        let order = self.sources.len();
        self.sources
            .insert(source_id, RegisteredSource { priority, order });
        Ok(())
    }

    pub fn current(&self) -> &MergedState {
        &self.current
    }

    pub fn latest_snapshots(&self) -> &BTreeMap<SourceId, Snapshot> {
        &self.latest
    }

    /// Record a successful snapshot as its source's latest.
    ///
    /// Returns `false` when the snapshot is dropped: unknown source, failed
    /// fetch, or older than what the source already delivered. A failed fetch
    /// never displaces the source's last successful data.
    pub fn ingest(&mut self, snapshot: Snapshot) -> bool {
        if !self.sources.contains_key(&snapshot.source_id) {
            warn!(source_id = %snapshot.source_id, "Snapshot from unregistered source ignored");
            return false;
        }
        if !snapshot.ok {
            debug!(
                source_id = %snapshot.source_id,
                fetched_at = %snapshot.fetched_at,
                "Failed fetch leaves last successful snapshot in force"
            );
            return false;
        }
        if let Some(existing) = self.latest.get(&snapshot.source_id) {
            if snapshot.fetched_at < existing.fetched_at {
                debug!(
                    source_id = %snapshot.source_id,
                    fetched_at = %snapshot.fetched_at,
                    latest = %existing.fetched_at,
                    "Out-of-order snapshot dropped"
                );
                return false;
            }
        }
        self.latest.insert(snapshot.source_id.clone(), snapshot);
        true
    }

    /// Run a merge pass over the latest snapshots and pending mutations
    pub fn merge(&mut self, mutations: &mut MutationCoordinator) -> MergeOutcome {
        self.resolve_sources();

        let confirmed = mutations.on_reconcile(&self.latest);
        for confirmation in &confirmed {
            self.settle_confirmed(confirmation);
        }

        let state = self.overlay(mutations);
        self.current = state.clone();
        MergeOutcome { state, confirmed }
    }

    fn priority_of(&self, source_id: &SourceId) -> u32 {
        self.sources.get(source_id).map(|s| s.priority).unwrap_or(0)
    }

    /// Newest source timestamp the field already reflects. Pending mutations
    /// do not raise it: snapshots older than a mutation still update the
    /// value a rollback returns to.
    fn watermark(&self, key: &str) -> Timestamp {
        self.baseline
            .get(key)
            .map_or(Timestamp(i64::MIN), |f| f.provenance.fetched_at)
    }

    fn resolve_sources(&mut self) {
        let mut keys: Vec<FieldKey> = self
            .latest
            .values()
            .filter(|s| s.ok)
            .flat_map(|s| s.data.keys().cloned())
            .collect();
        keys.sort();
        keys.dedup();

        for key in keys {
            if let Some(next) = self.resolve_field(&key) {
                if self.baseline.get(&key) != Some(&next) {
                    self.baseline.insert(key, next);
                }
            }
        }
    }

    fn resolve_field(&self, key: &str) -> Option<FieldState> {
        let watermark = self.watermark(key);

        let mut candidates: Vec<(&Snapshot, &RegisteredSource)> = self
            .latest
            .values()
            .filter(|s| s.supplies(key) && s.fetched_at >= watermark)
            .filter_map(|s| self.sources.get(&s.source_id).map(|r| (s, r)))
            .collect();
        candidates.sort_by_key(|(s, r)| (Reverse(r.priority), Reverse(s.fetched_at), r.order));

        if let [(first, first_src), (second, second_src), ..] = candidates.as_slice() {
            if first_src.priority == second_src.priority
                && first.fetched_at == second.fetched_at
                && first.data.get(key) != second.data.get(key)
            {
                debug!(
                    field = key,
                    winner = %first.source_id,
                    loser = %second.source_id,
                    fetched_at = %first.fetched_at,
                    "Conflicting values at equal priority and freshness, using registration order"
                );
            }
        }

        let current = self.baseline.get(key);
        for (snapshot, source) in candidates {
            let Some(value) = snapshot.data.get(key) else {
                continue;
            };

            if value.is_none() {
                if let Some(current) = current.filter(|c| c.value.is_some()) {
                    let newer = snapshot.fetched_at > current.provenance.fetched_at;
                    if !newer || source.priority < current.priority {
                        debug!(
                            field = key,
                            source_id = %snapshot.source_id,
                            "Explicit absence does not supersede current value"
                        );
                        continue;
                    }
                }
            }

            return Some(FieldState {
                value: value.clone(),
                provenance: Provenance::from_source(snapshot.source_id.clone(), snapshot.fetched_at),
                priority: source.priority,
            });
        }

        None
    }

    /// After confirmation the field returns to source control. If no source
    /// value at least as new as the mutation has been folded yet, the
    /// confirming snapshot becomes the field's source-derived value.
    fn settle_confirmed(&mut self, confirmation: &Confirmation) {
        let mutation = &confirmation.mutation;
        let priority = self.priority_of(&confirmation.source_id);
        let confirming = self.latest.get(&confirmation.source_id);

        for (key, mutated) in mutation.fields.iter() {
            let behind = self
                .baseline
                .get(key)
                .map_or(true, |f| f.provenance.fetched_at < mutation.applied_at);
            if !behind {
                continue;
            }

            let value = confirming
                .and_then(|s| s.data.get(key))
                .cloned()
                .unwrap_or_else(|| mutated.clone());
            self.baseline.insert(
                key.clone(),
                FieldState {
                    value,
                    provenance: Provenance::from_source(
                        confirmation.source_id.clone(),
                        confirmation.fetched_at,
                    ),
                    priority,
                },
            );
        }
    }

    fn overlay(&self, mutations: &MutationCoordinator) -> MergedState {
        let mut state = MergedState::default();

        for (key, field) in &self.baseline {
            if let Some(value) = &field.value {
                state.value.insert(key.clone(), value.clone());
            }
            state
                .field_provenance
                .insert(key.clone(), field.provenance.clone());
        }

        for (key, (value, mutation_id, applied_at)) in mutations.overlay() {
            match value {
                Some(value) => {
                    state.value.insert(key.clone(), value);
                }
                None => {
                    state.value.remove(&key);
                }
            }
            state
                .field_provenance
                .insert(key, Provenance::from_mutation(mutation_id, applied_at));
        }

        state.pending_mutations = mutations.pending_ids();
        state
    }
}
