//! Realtime change-feed events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Record;

/// Kind of change delivered by the realtime channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RealtimeEventType {
    Insert,
    Update,
    Delete,
}

/// Identity of the prior row version attached to update/delete events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStamp {
    pub id: String,
    /// Tombstone time for deletes, when the feed provides one
    pub updated_at: Option<DateTime<Utc>>,
}

/// A change pushed by the remote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeEvent {
    pub event_type: RealtimeEventType,
    /// Table name; remote name on the wire, local name once routed
    pub table: String,
    pub new: Option<Record>,
    pub old: Option<RecordStamp>,
}

impl RealtimeEvent {
    /// Id of the affected record, from whichever side carries it.
    pub fn record_id(&self) -> Option<&str> {
        self.new
            .as_ref()
            .map(|record| record.id.as_str())
            .or_else(|| self.old.as_ref().map(|stamp| stamp.id.as_str()))
    }
}

/// What a listener did to the local store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableChangeKind {
    Upserted,
    Deleted,
}

/// Table-scoped notification raised after a realtime change is applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableChange {
    pub table: String,
    pub record_id: String,
    pub kind: TableChangeKind,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_falls_back_to_old_stamp() {
        let delete = RealtimeEvent {
            event_type: RealtimeEventType::Delete,
            table: "orders".into(),
            new: None,
            old: Some(RecordStamp {
                id: "1001".into(),
                updated_at: None,
            }),
        };
        assert_eq!(delete.record_id(), Some("1001"));

        let insert = RealtimeEvent {
            event_type: RealtimeEventType::Insert,
            table: "orders".into(),
            new: Some(Record::new("1002", json!({}), Utc::now()).unwrap()),
            old: None,
        };
        assert_eq!(insert.record_id(), Some("1002"));
    }
}
