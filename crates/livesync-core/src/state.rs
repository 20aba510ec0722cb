//! The merged, authoritative view of one logical key.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{FieldKey, MutationId, Provenance, Record};

/// Result of reconciling every source and pending mutation for one key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MergedState {
    /// Present fields only; explicitly absent fields are omitted
    pub value: Record,
    /// Who set each known field, including explicitly absent ones
    pub field_provenance: BTreeMap<FieldKey, Provenance>,
    pub pending_mutations: BTreeSet<MutationId>,
}

impl MergedState {
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.value.get(key)
    }

    /// Deserialize a single field into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.value
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn provenance(&self, key: &str) -> Option<&Provenance> {
        self.field_provenance.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Keys whose value differs between `self` and `previous`.
    ///
    /// Provenance and pending-set changes alone do not count.
    pub fn changed_fields(&self, previous: &MergedState) -> Vec<FieldKey> {
        let mut changed: Vec<FieldKey> = self
            .value
            .iter()
            .filter(|(k, v)| previous.value.get(*k) != Some(*v))
            .map(|(k, _)| k.clone())
            .collect();
        changed.extend(
            previous
                .value
                .keys()
                .filter(|k| !self.value.contains_key(*k))
                .cloned(),
        );
        changed.sort();
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(pairs: &[(&str, Value)]) -> MergedState {
        MergedState {
            value: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_changed_fields_detects_edit_add_and_removal() {
        let before = state(&[("status", json!("ringing")), ("agent", json!("ana"))]);
        let after = state(&[("status", json!("connected")), ("duration", json!(4))]);

        assert_eq!(after.changed_fields(&before), vec!["agent", "duration", "status"]);
    }

    #[test]
    fn test_changed_fields_ignores_provenance_only_changes() {
        let before = state(&[("status", json!("ringing"))]);
        let mut after = before.clone();
        after.pending_mutations.insert(MutationId::new());

        assert!(after.changed_fields(&before).is_empty());
    }

    #[test]
    fn test_get_as() {
        let s = state(&[("alerts.1.read", json!(true)), ("count", json!(3))]);
        assert_eq!(s.get_as::<bool>("alerts.1.read"), Some(true));
        assert_eq!(s.get_as::<u32>("count"), Some(3));
        assert_eq!(s.get_as::<bool>("count"), None);
        assert_eq!(s.get_as::<bool>("missing"), None);
    }
}
