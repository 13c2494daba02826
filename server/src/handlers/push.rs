//! Push handler - merges client changes into a group and relays them.

use crate::error::Result;
use crate::groups::GroupRegistry;
use crate::websocket::ConnectionManager;
use listsync_engine::{MergeableContent, ServerMessage};
use serde::Serialize;

/// Response for push sync.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushResponse {
    /// Rows whose stamped content changed on the server
    pub rows_merged: usize,
    /// Other connections the changes were relayed to
    pub relayed: usize,
}

/// Merge pushed changes into a group.
///
/// Accepted changes that taught the server something new are relayed to
/// every other connection of the group. `sender` is the pushing WebSocket
/// connection, if any, which does not get its own changes back.
pub fn handle_push(
    groups: &GroupRegistry,
    connections: &ConnectionManager,
    group_id: &str,
    sender: Option<&str>,
    changes: MergeableContent,
) -> Result<PushResponse> {
    GroupRegistry::validate_group_id(group_id)?;

    if changes.is_empty() {
        return Ok(PushResponse {
            rows_merged: 0,
            relayed: 0,
        });
    }

    let report = groups.merge(group_id, &changes)?;
    let relayed = if report.rows_merged > 0 {
        connections.broadcast_except(
            group_id,
            sender.unwrap_or_default(),
            ServerMessage::Changes { changes },
        )
    } else {
        0
    };

    tracing::debug!(
        group_id = %group_id,
        rows_merged = report.rows_merged,
        rows_changed = report.rows_changed,
        relayed,
        "Processed push"
    );

    Ok(PushResponse {
        rows_merged: report.rows_merged,
        relayed,
    })
}
