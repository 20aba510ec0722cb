//! Core types for livesync

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// Key of a single field inside a record.
///
/// Keys are opaque to the reconciler. Nested data is addressed with dotted
/// paths by convention (`alerts.42.read`).
pub type FieldKey = String;

/// A fully resolved record: every stored field holds a present value.
pub type Record = BTreeMap<FieldKey, Value>;

/// Identifier of a registered data source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Unique identifier for an optimistic mutation
///
/// Uses ULID so ids sort in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MutationId(pub Ulid);

impl MutationId {
    /// Create a new MutationId with current timestamp
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Get the underlying ULID
    pub fn as_ulid(&self) -> &Ulid {
        &self.0
    }

    /// Parse from string representation
    pub fn from_string(s: &str) -> Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for MutationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MutationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mut_{}", self.0)
    }
}

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    pub fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    /// Wall-clock now
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "t={}", self.0)
    }
}

/// Where a field's current value came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Origin {
    /// A fetched snapshot from a registered source
    Source(SourceId),
    /// A pending (or confirmed) optimistic mutation
    Mutation(MutationId),
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Source(id) => write!(f, "{}", id),
            Origin::Mutation(id) => write!(f, "{}", id),
        }
    }
}

/// Provenance of a single field: who set it, and how fresh that was.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub origin: Origin,
    pub fetched_at: Timestamp,
}

impl Provenance {
    pub fn from_source(source_id: SourceId, fetched_at: Timestamp) -> Self {
        Self {
            origin: Origin::Source(source_id),
            fetched_at,
        }
    }

    pub fn from_mutation(mutation_id: MutationId, applied_at: Timestamp) -> Self {
        Self {
            origin: Origin::Mutation(mutation_id),
            fetched_at: applied_at,
        }
    }

    /// The source that set the field, if it was not a local mutation
    pub fn source_id(&self) -> Option<&SourceId> {
        match &self.origin {
            Origin::Source(id) => Some(id),
            Origin::Mutation(_) => None,
        }
    }
}

/// A partially known record.
///
/// A key mapped to `Some(value)` asserts the value; a key mapped to `None`
/// asserts the field is absent. A key missing from the map means the producer
/// said nothing about that field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialRecord(BTreeMap<FieldKey, Option<Value>>);

impl PartialRecord {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Builder-style insert of a present value
    pub fn with(mut self, key: impl Into<FieldKey>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    /// Builder-style insert of an explicit absent assertion
    pub fn with_absent(mut self, key: impl Into<FieldKey>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    pub fn insert(&mut self, key: impl Into<FieldKey>, value: Option<Value>) {
        self.0.insert(key.into(), value);
    }

    /// `None` if the record is silent on `key`, `Some(None)` on explicit absence.
    pub fn get(&self, key: &str) -> Option<&Option<Value>> {
        self.0.get(key)
    }

    pub fn mentions(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &FieldKey> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FieldKey, &Option<Value>)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build from a JSON object. `null` members become explicit absent
    /// assertions; non-object input yields an empty record.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(map) => Self(
                map.iter()
                    .map(|(k, v)| {
                        let v = if v.is_null() { None } else { Some(v.clone()) };
                        (k.clone(), v)
                    })
                    .collect(),
            ),
            _ => Self::new(),
        }
    }
}

impl FromIterator<(FieldKey, Option<Value>)> for PartialRecord {
    fn from_iter<I: IntoIterator<Item = (FieldKey, Option<Value>)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PartialRecord {
    type Item = (FieldKey, Option<Value>);
    type IntoIter = std::collections::btree_map::IntoIter<FieldKey, Option<Value>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
