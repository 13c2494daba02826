//! Per-group server replicas.
//!
//! The server keeps one [`MergeableStore`] per sync group, created on first
//! use. It never writes content of its own; it only merges what clients push
//! and hands the merged content to clients that load.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use listsync_engine::{MergeReport, MergeableContent, MergeableStore, Schema};
use serde::Serialize;

use crate::error::{AppError, Result};

/// Replica id the server stamps its replicas with.
pub const SERVER_REPLICA_ID: &str = "server";

#[derive(Debug)]
struct GroupState {
    replica: MergeableStore,
    updated_at: Option<DateTime<Utc>>,
}

/// Content of one group, as served over HTTP.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSnapshot {
    pub group_id: String,
    pub content: MergeableContent,
    pub updated_at: Option<DateTime<Utc>>,
}

/// All groups known to this server.
#[derive(Debug)]
pub struct GroupRegistry {
    schema: Schema,
    groups: DashMap<String, Arc<Mutex<GroupState>>>,
}

impl GroupRegistry {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            groups: DashMap::new(),
        }
    }

    /// Create a registry for the todo schema wrapped in Arc for sharing.
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new(Schema::todo_app()))
    }

    /// Group ids are path segments: ASCII letters, digits, `-` and `_`.
    pub fn validate_group_id(group_id: &str) -> Result<()> {
        let valid = !group_id.is_empty()
            && group_id.len() <= 128
            && group_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(())
        } else {
            Err(AppError::InvalidGroup(group_id.to_string()))
        }
    }

    fn group(&self, group_id: &str) -> Arc<Mutex<GroupState>> {
        self.groups
            .entry(group_id.to_string())
            .or_insert_with(|| {
                tracing::info!(group_id = %group_id, "Created group");
                Arc::new(Mutex::new(GroupState {
                    replica: MergeableStore::new(SERVER_REPLICA_ID, self.schema.clone()),
                    updated_at: None,
                }))
            })
            .clone()
    }

    fn lock(group: &Mutex<GroupState>) -> MutexGuard<'_, GroupState> {
        group.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Full content of a group, creating it empty if needed.
    pub fn load(&self, group_id: &str) -> MergeableContent {
        let group = self.group(group_id);
        let state = Self::lock(&group);
        state.replica.content().clone()
    }

    /// Snapshot of a group that has been created already.
    pub fn snapshot(&self, group_id: &str) -> Option<GroupSnapshot> {
        let group = self.groups.get(group_id)?.clone();
        let state = Self::lock(&group);
        Some(GroupSnapshot {
            group_id: group_id.to_string(),
            content: state.replica.content().clone(),
            updated_at: state.updated_at,
        })
    }

    /// Merge pushed changes into a group.
    ///
    /// Invalid content is rejected as a whole and leaves the group untouched.
    pub fn merge(&self, group_id: &str, changes: &MergeableContent) -> Result<MergeReport> {
        let group = self.group(group_id);
        let mut state = Self::lock(&group);
        let report = state.replica.apply_merge(changes)?;
        if report.rows_merged > 0 {
            state.updated_at = Some(Utc::now());
        }
        Ok(report)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
