//! Snapshots: the unit of data a poller emits per tick.

use serde::{Deserialize, Serialize};

use crate::types::{PartialRecord, SourceId, Timestamp};

/// One source's fetched data, stamped with when the fetch was issued.
///
/// A failed fetch produces a snapshot with `ok == false` and no data. The
/// reconciler reads that as "this source is temporarily silent", never as
/// "every field is now unknown".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub source_id: SourceId,
    pub fetched_at: Timestamp,
    pub data: PartialRecord,
    pub ok: bool,
}

impl Snapshot {
    pub fn success(source_id: SourceId, fetched_at: Timestamp, data: PartialRecord) -> Self {
        Self {
            source_id,
            fetched_at,
            data,
            ok: true,
        }
    }

    pub fn failure(source_id: SourceId, fetched_at: Timestamp) -> Self {
        Self {
            source_id,
            fetched_at,
            data: PartialRecord::new(),
            ok: false,
        }
    }

    /// Whether this snapshot can contribute a value for `key`
    pub fn supplies(&self, key: &str) -> bool {
        self.ok && self.data.mentions(key)
    }
}
