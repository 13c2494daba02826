//! Pull handler - serves a group's merged content.

use crate::error::{AppError, Result};
use crate::groups::{GroupRegistry, GroupSnapshot};

/// Current content of a group that exists on this server.
pub fn handle_pull(groups: &GroupRegistry, group_id: &str) -> Result<GroupSnapshot> {
    GroupRegistry::validate_group_id(group_id)?;
    groups
        .snapshot(group_id)
        .ok_or_else(|| AppError::UnknownGroup(group_id.to_string()))
}
