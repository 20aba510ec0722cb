//! Alert list helpers: flattening fetched lists and read/unread mutations.
//!
//! An alert list is stored as one field per alert attribute,
//! `alerts.<id>.<attribute>`. Marking an alert read is then an ordinary
//! optimistic mutation of `alerts.<id>.read`, confirmed once a refetch issued
//! after the click reports the same value.

use serde_json::Value;
use tracing::debug;

use crate::error::LiveSyncResult;
use crate::mutation::Confirm;
use crate::session::LiveSession;
use crate::state::MergedState;
use crate::types::{FieldKey, MutationId, PartialRecord};

/// Field prefix for alert entries
pub const ALERTS_PREFIX: &str = "alerts";

/// Field holding an alert's read flag
pub fn read_field(alert_id: &str) -> FieldKey {
    format!("{}.{}.read", ALERTS_PREFIX, alert_id)
}

/// Flatten a list of JSON objects into `<prefix>.<id>.<member>` fields.
///
/// Items without a string or numeric `id_key` member are skipped. `null`
/// members become explicit absent assertions.
pub fn list_fields(prefix: &str, items: &[Value], id_key: &str) -> PartialRecord {
    let mut record = PartialRecord::new();
    for item in items {
        let Some(object) = item.as_object() else {
            continue;
        };
        let id = match object.get(id_key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                debug!(prefix, "List item without usable id skipped");
                continue;
            }
        };
        for (member, value) in object {
            if member == id_key {
                continue;
            }
            let value = if value.is_null() { None } else { Some(value.clone()) };
            record.insert(format!("{}.{}.{}", prefix, id, member), value);
        }
    }
    record
}

/// Flatten a fetched alert list (objects carrying an `id`)
pub fn alert_list_fields(alerts: &[Value]) -> PartialRecord {
    list_fields(ALERTS_PREFIX, alerts, "id")
}

/// Alert ids present in a merged state, in key order
pub fn alert_ids(state: &MergedState) -> Vec<String> {
    let prefix = format!("{}.", ALERTS_PREFIX);
    let mut ids: Vec<String> = state
        .value
        .keys()
        .filter_map(|k| k.strip_prefix(&prefix))
        .filter_map(|rest| rest.split_once('.').map(|(id, _)| id.to_string()))
        .collect();
    ids.dedup();
    ids
}

/// Whether the merged state shows the alert as read
pub fn is_read(state: &MergedState, alert_id: &str) -> bool {
    state.get_as::<bool>(&read_field(alert_id)).unwrap_or(false)
}

/// Number of alerts whose read flag is known and false
pub fn unread_count(state: &MergedState) -> usize {
    alert_ids(state)
        .iter()
        .filter(|id| state.get_as::<bool>(&read_field(id)) == Some(false))
        .count()
}

impl LiveSession {
    /// Optimistically mark one alert read
    pub async fn mark_read(&self, alert_id: &str) -> LiveSyncResult<MutationId> {
        self.set_read(std::iter::once(alert_id), true).await
    }

    /// Optimistically mark one alert unread
    pub async fn mark_unread(&self, alert_id: &str) -> LiveSyncResult<MutationId> {
        self.set_read(std::iter::once(alert_id), false).await
    }

    /// Optimistically mark several alerts read as one mutation.
    ///
    /// The mutation is confirmed only when a refetch shows every one of them
    /// read; rolling it back reverts all of them.
    pub async fn mark_all_read<'a>(
        &self,
        alert_ids: impl IntoIterator<Item = &'a str>,
    ) -> LiveSyncResult<MutationId> {
        self.set_read(alert_ids, true).await
    }

    async fn set_read<'a>(
        &self,
        alert_ids: impl IntoIterator<Item = &'a str>,
        read: bool,
    ) -> LiveSyncResult<MutationId> {
        let fields: PartialRecord = alert_ids
            .into_iter()
            .map(|id| (read_field(id), Some(Value::Bool(read))))
            .collect();
        self.apply(fields, Confirm::Reflected).await
    }
}
