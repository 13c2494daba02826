//! Snapshots for persisting and restoring a replica.
//!
//! A snapshot is the bridge between the in-memory replica and whatever
//! storage the host application uses. It carries the clock so that writes
//! made after a restart still order after everything written before it, and
//! the outbox so that offline edits survive until they are pushed.

use crate::{error::Result, Error, MergeableContent, ReplicaId};
use serde::{Deserialize, Serialize};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    pub replica_id: ReplicaId,
    /// Clock counter at snapshot time
    pub clock_counter: u64,
    /// All stamped content, tombstones included
    pub content: MergeableContent,
    /// Local changes not yet pushed
    #[serde(default)]
    pub outbox: MergeableContent,
}

impl ReplicaSnapshot {
    /// Create an empty snapshot.
    pub fn new(replica_id: impl Into<ReplicaId>) -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            replica_id: replica_id.into(),
            clock_counter: 0,
            content: MergeableContent::new(),
            outbox: MergeableContent::new(),
        }
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LogicalTime;

    #[test]
    fn create_empty_snapshot() {
        let snapshot = ReplicaSnapshot::new("device-1");
        assert_eq!(snapshot.format_version, SNAPSHOT_FORMAT_VERSION);
        assert_eq!(snapshot.replica_id, "device-1");
        assert!(snapshot.content.is_empty());
    }

    #[test]
    fn deterministic_serialization() {
        let mut first = ReplicaSnapshot::new("device-1");
        let mut second = ReplicaSnapshot::new("device-1");

        first
            .content
            .row_mut("todos", "a")
            .set_cell("text", Some("x".into()), LogicalTime::new("device-1", 1));
        first
            .content
            .row_mut("todos", "b")
            .set_cell("text", Some("y".into()), LogicalTime::new("device-1", 2));

        // Same rows, inserted in reverse order
        second
            .content
            .row_mut("todos", "b")
            .set_cell("text", Some("y".into()), LogicalTime::new("device-1", 2));
        second
            .content
            .row_mut("todos", "a")
            .set_cell("text", Some("x".into()), LogicalTime::new("device-1", 1));

        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[test]
    fn missing_outbox_defaults_to_empty() {
        let json = r#"{
            "formatVersion": 1,
            "replicaId": "device-1",
            "clockCounter": 4,
            "content": {"tables": {}}
        }"#;
        let snapshot = ReplicaSnapshot::from_json(json).unwrap();
        assert_eq!(snapshot.clock_counter, 4);
        assert!(snapshot.outbox.is_empty());
    }

    #[test]
    fn reject_future_format_version() {
        let json = r#"{
            "formatVersion": 999,
            "replicaId": "device-1",
            "clockCounter": 0,
            "content": {"tables": {}}
        }"#;
        let result = ReplicaSnapshot::from_json(json);
        assert!(matches!(result, Err(Error::InvalidSnapshot(_))));
    }

    #[test]
    fn reject_garbage() {
        assert!(matches!(
            ReplicaSnapshot::from_json("not json"),
            Err(Error::InvalidSnapshot(_))
        ));
    }
}
