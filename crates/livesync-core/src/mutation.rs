//! Optimistic mutations and their confirmation against fetched snapshots.
//!
//! A mutation is a local edit shown before the server has acknowledged it.
//! It stays in force until a snapshot issued *after* the mutation explicitly
//! reflects it, or until the caller rolls it back because the backing write
//! failed. Snapshots that predate the mutation, or that are silent on its
//! fields, never remove it.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{LiveSyncError, LiveSyncResult};
use crate::snapshot::Snapshot;
use crate::types::{FieldKey, MutationId, PartialRecord, SourceId, Timestamp};

type ConfirmFn = Arc<dyn Fn(&PartialRecord) -> bool + Send + Sync>;

/// How a pending mutation recognises that the server caught up
#[derive(Clone, Default)]
pub enum Confirm {
    /// Every mutated field appears in the snapshot with exactly the mutated value
    #[default]
    Reflected,
    /// Caller-supplied predicate over the snapshot's data
    Custom(ConfirmFn),
}

impl Confirm {
    pub fn custom(f: impl Fn(&PartialRecord) -> bool + Send + Sync + 'static) -> Self {
        Confirm::Custom(Arc::new(f))
    }
}

impl fmt::Debug for Confirm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Confirm::Reflected => write!(f, "Reflected"),
            Confirm::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// A pending optimistic edit
#[derive(Debug, Clone)]
pub struct Mutation {
    pub id: MutationId,
    pub applied_at: Timestamp,
    pub fields: PartialRecord,
    confirm: Confirm,
}

impl Mutation {
    pub fn is_confirmed_by(&self, data: &PartialRecord) -> bool {
        match &self.confirm {
            Confirm::Reflected => self
                .fields
                .iter()
                .all(|(key, value)| data.get(key) == Some(value)),
            Confirm::Custom(f) => f(data),
        }
    }

    /// A snapshot can only judge this mutation if it was issued afterwards
    /// and says something about at least one mutated field.
    fn qualifies(&self, snapshot: &Snapshot) -> bool {
        snapshot.ok
            && snapshot.fetched_at > self.applied_at
            && self.fields.keys().any(|k| snapshot.data.mentions(k))
    }
}

/// A mutation retired by a qualifying snapshot
#[derive(Debug, Clone)]
pub struct Confirmation {
    pub mutation: Mutation,
    pub source_id: SourceId,
    pub fetched_at: Timestamp,
}

/// Tracks pending optimistic mutations for one session.
///
/// Each field is owned by at most one pending mutation: applying a new edit
/// to a field takes it over from any older mutation, and an older mutation
/// left without fields is dropped as superseded.
#[derive(Debug, Default)]
pub struct MutationCoordinator {
    pending: BTreeMap<MutationId, Mutation>,
}

impl MutationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an optimistic edit. The caller re-merges to make it visible.
    pub fn apply(
        &mut self,
        fields: PartialRecord,
        confirm: Confirm,
        applied_at: Timestamp,
    ) -> MutationId {
        let id = MutationId::new();

        let mut superseded = Vec::new();
        for (older_id, older) in self.pending.iter_mut() {
            let retained: PartialRecord = older
                .fields
                .iter()
                .filter(|(k, _)| !fields.mentions(k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            if retained.len() != older.fields.len() {
                older.fields = retained;
                if older.fields.is_empty() {
                    superseded.push(*older_id);
                }
            }
        }
        for older_id in superseded {
            debug!(mutation_id = %older_id, superseded_by = %id, "Mutation superseded");
            self.pending.remove(&older_id);
        }

        debug!(mutation_id = %id, fields = fields.len(), %applied_at, "Mutation applied");
        self.pending.insert(
            id,
            Mutation {
                id,
                applied_at,
                fields,
                confirm,
            },
        );
        id
    }

    /// Withdraw a mutation whose backing write failed
    pub fn rollback(&mut self, id: MutationId) -> LiveSyncResult<Mutation> {
        let mutation = self
            .pending
            .remove(&id)
            .ok_or(LiveSyncError::MutationNotFound(id))?;
        info!(mutation_id = %id, "Mutation rolled back");
        Ok(mutation)
    }

    /// Evaluate every pending mutation against the newest qualifying snapshot
    /// and retire the confirmed ones.
    pub fn on_reconcile(
        &mut self,
        latest_by_source: &BTreeMap<SourceId, Snapshot>,
    ) -> Vec<Confirmation> {
        let mut confirmed = Vec::new();

        for mutation in self.pending.values() {
            let newest = latest_by_source
                .values()
                .filter(|snap| mutation.qualifies(snap))
                .max_by_key(|snap| snap.fetched_at);

            if let Some(snap) = newest {
                if mutation.is_confirmed_by(&snap.data) {
                    confirmed.push(Confirmation {
                        mutation: mutation.clone(),
                        source_id: snap.source_id.clone(),
                        fetched_at: snap.fetched_at,
                    });
                }
            }
        }

        for confirmation in &confirmed {
            self.pending.remove(&confirmation.mutation.id);
            info!(
                mutation_id = %confirmation.mutation.id,
                source_id = %confirmation.source_id,
                fetched_at = %confirmation.fetched_at,
                "Mutation confirmed"
            );
        }
        confirmed
    }

    /// Field values forced by pending mutations, with their owner and stamp
    pub fn overlay(&self) -> BTreeMap<FieldKey, (Option<Value>, MutationId, Timestamp)> {
        let mut overlay = BTreeMap::new();
        for mutation in self.pending.values() {
            for (key, value) in mutation.fields.iter() {
                overlay.insert(key.clone(), (value.clone(), mutation.id, mutation.applied_at));
            }
        }
        overlay
    }

    pub fn get(&self, id: &MutationId) -> Option<&Mutation> {
        self.pending.get(id)
    }

    pub fn pending_ids(&self) -> BTreeSet<MutationId> {
        self.pending.keys().copied().collect()
    }

    pub fn is_pending(&self, id: &MutationId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
