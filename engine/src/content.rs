//! Mergeable content: every cell of a replica stamped with logical time.
//!
//! The same type carries full replica content, deltas and snapshots. Merging
//! is a per-cell maximum by [`LogicalTime`] plus a per-row maximum of the
//! tombstone, which makes it commutative, associative and idempotent.
//!
//! A cell is visible when it has a value and its time is later than the
//! row's tombstone. A row is live when at least one cell is visible, so a
//! delete hides every write it saw and loses to any write made after it.

use crate::{
    clock::MAX_COUNTER, error::Result, CellId, CellValue, Error, LogicalTime, Row, RowId, Schema,
    TableId,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A cell value (or deletion) with the time it was written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StampedCell {
    /// `None` records a deleted cell
    pub value: Option<CellValue>,
    pub time: LogicalTime,
}

/// Stamped cells and tombstone of one row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowContent {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub cells: BTreeMap<CellId, StampedCell>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tombstone: Option<LogicalTime>,
}

impl RowContent {
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty() && self.tombstone.is_none()
    }

    fn is_visible(&self, cell: &StampedCell) -> bool {
        cell.value.is_some() && self.tombstone.as_ref().map_or(true, |t| cell.time > *t)
    }

    /// The row as the store should show it, or `None` if it is not live.
    pub fn visible_row(&self) -> Option<Row> {
        let row: Row = self
            .cells
            .iter()
            .filter(|(_, c)| self.is_visible(c))
            .filter_map(|(id, c)| c.value.clone().map(|v| (id.clone(), v)))
            .collect();
        (!row.is_empty()).then_some(row)
    }

    pub fn set_cell(&mut self, cell: impl Into<CellId>, value: Option<CellValue>, time: LogicalTime) {
        self.cells.insert(cell.into(), StampedCell { value, time });
    }

    /// Merge another row's content into this one. Returns true if anything
    /// changed.
    pub fn merge_from(&mut self, other: &RowContent) -> bool {
        let mut changed = false;
        if let Some(theirs) = &other.tombstone {
            if self.tombstone.as_ref().map_or(true, |ours| theirs > ours) {
                self.tombstone = Some(theirs.clone());
                changed = true;
            }
        }
        for (id, theirs) in &other.cells {
            let newer = self
                .cells
                .get(id)
                .map_or(true, |ours| theirs.time > ours.time);
            if newer {
                self.cells.insert(id.clone(), theirs.clone());
                changed = true;
            }
        }
        changed
    }

    /// The parts of this row that `other` has not seen.
    pub fn changes_since(&self, other: Option<&RowContent>) -> RowContent {
        let Some(other) = other else {
            return self.clone();
        };
        let tombstone = self
            .tombstone
            .as_ref()
            .filter(|ours| other.tombstone.as_ref().map_or(true, |theirs| *ours > theirs))
            .cloned();
        let cells = self
            .cells
            .iter()
            .filter(|(id, ours)| {
                other
                    .cells
                    .get(*id)
                    .map_or(true, |theirs| ours.time > theirs.time)
            })
            .map(|(id, c)| (id.clone(), c.clone()))
            .collect();
        RowContent { cells, tombstone }
    }

    fn times(&self) -> impl Iterator<Item = &LogicalTime> {
        self.cells
            .values()
            .map(|c| &c.time)
            .chain(self.tombstone.iter())
    }
}

/// All stamped content of a replica, or a delta of it.
///
/// Uses BTreeMap so serialization is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeableContent {
    #[serde(default)]
    pub tables: BTreeMap<TableId, BTreeMap<RowId, RowContent>>,
}

impl MergeableContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|rows| rows.values().all(RowContent::is_empty))
    }

    pub fn row(&self, table: &str, row: &str) -> Option<&RowContent> {
        self.tables.get(table)?.get(row)
    }

    pub fn row_mut(&mut self, table: &str, row: &str) -> &mut RowContent {
        self.tables
            .entry(table.to_string())
            .or_default()
            .entry(row.to_string())
            .or_default()
    }

    /// Iterate `(table, row, content)` in deterministic order.
    pub fn rows(&self) -> impl Iterator<Item = (&TableId, &RowId, &RowContent)> {
        self.tables
            .iter()
            .flat_map(|(t, rows)| rows.iter().map(move |(r, c)| (t, r, c)))
    }

    /// Number of stamped cells, deleted ones included.
    pub fn cell_count(&self) -> usize {
        self.rows().map(|(_, _, c)| c.cells.len()).sum()
    }

    /// Latest time anywhere in the content.
    pub fn max_time(&self) -> Option<&LogicalTime> {
        self.rows().flat_map(|(_, _, c)| c.times()).max()
    }

    /// Merge `other` into this content in place. Returns true if anything
    /// changed.
    pub fn merge_from(&mut self, other: &MergeableContent) -> bool {
        let mut changed = false;
        for (table, row, theirs) in other.rows() {
            changed |= self.row_mut(table, row).merge_from(theirs);
        }
        changed
    }

    /// The minimal delta that brings `other` up to date with this content.
    pub fn changes_since(&self, other: &MergeableContent) -> MergeableContent {
        let mut delta = MergeableContent::new();
        for (table, row, ours) in self.rows() {
            let missing = ours.changes_since(other.row(table, row));
            if !missing.is_empty() {
                *delta.row_mut(table, row) = missing;
            }
        }
        delta
    }

    /// Check that content received from elsewhere can be merged safely.
    ///
    /// Validation is all-or-nothing: nothing is merged unless every cell
    /// passes.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        for (table, row, content) in self.rows() {
            if table.is_empty() || row.is_empty() {
                return Err(Error::MalformedContent(format!(
                    "empty id in '{table}/{row}'"
                )));
            }
            for time in content.times() {
                if time.counter == 0 || time.counter > MAX_COUNTER || time.replica.is_empty() {
                    return Err(Error::MalformedContent(format!(
                        "invalid logical time {}@{} in '{table}/{row}'",
                        time.counter, time.replica
                    )));
                }
            }
            for (cell, stamped) in &content.cells {
                if cell.is_empty() {
                    return Err(Error::MalformedContent(format!(
                        "empty cell id in '{table}/{row}'"
                    )));
                }
                if let Some(value) = &stamped.value {
                    schema.validate_cell(table, cell, value)?;
                }
            }
        }
        Ok(())
    }

    /// Reject content that reuses a logical time for a different value.
    ///
    /// Times are unique per write, so two different values under one time can
    /// only come from corruption, and merging them would not converge.
    pub fn check_consistent_with(&self, other: &MergeableContent) -> Result<()> {
        for (table, row, theirs) in other.rows() {
            let Some(ours) = self.row(table, row) else {
                continue;
            };
            for (cell, stamped) in &theirs.cells {
                if let Some(local) = ours.cells.get(cell) {
                    if local.time == stamped.time && local.value != stamped.value {
                        return Err(Error::MalformedContent(format!(
                            "conflicting values for '{table}/{row}/{cell}' at {}@{}",
                            stamped.time.counter, stamped.time.replica
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Merge two contents into a new one.
///
/// Pure: the result depends only on the stamped times in `a` and `b`, and
/// `merge(a, b) == merge(b, a)`.
pub fn merge(a: &MergeableContent, b: &MergeableContent) -> MergeableContent {
    let mut merged = a.clone();
    merged.merge_from(b);
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(replica: &str, counter: u64) -> LogicalTime {
        LogicalTime::new(replica, counter)
    }

    fn with_cell(value: &str, time: LogicalTime) -> MergeableContent {
        let mut content = MergeableContent::new();
        content
            .row_mut("todos", "t1")
            .set_cell("text", Some(value.into()), time);
        content
    }

    #[test]
    fn higher_time_wins() {
        let a = with_cell("old", t("a", 1));
        let b = with_cell("new", t("b", 2));
        let merged = merge(&a, &b);
        assert_eq!(merged, merge(&b, &a));
        let row = merged.row("todos", "t1").unwrap().visible_row().unwrap();
        assert_eq!(row["text"], "new".into());
    }

    #[test]
    fn equal_counters_break_ties_by_replica() {
        let a = with_cell("from-a", t("a", 3));
        let b = with_cell("from-b", t("b", 3));
        let merged = merge(&a, &b);
        assert_eq!(merged, merge(&b, &a));
        let row = merged.row("todos", "t1").unwrap().visible_row().unwrap();
        assert_eq!(row["text"], "from-b".into());
    }

    #[test]
    fn later_delete_beats_earlier_write() {
        let write = with_cell("x", t("a", 1));
        let mut delete = MergeableContent::new();
        delete.row_mut("todos", "t1").tombstone = Some(t("b", 2));

        let merged = merge(&write, &delete);
        assert!(merged.row("todos", "t1").unwrap().visible_row().is_none());
    }

    #[test]
    fn later_write_beats_earlier_delete() {
        let mut delete = MergeableContent::new();
        delete.row_mut("todos", "t1").tombstone = Some(t("b", 2));
        let write = with_cell("x", t("a", 3));

        let merged = merge(&delete, &write);
        let row = merged.row("todos", "t1").unwrap().visible_row().unwrap();
        assert_eq!(row["text"], "x".into());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = with_cell("x", t("a", 1));
        let b = with_cell("y", t("b", 2));
        assert!(a.merge_from(&b));
        let once = a.clone();
        assert!(!a.merge_from(&b));
        assert_eq!(a, once);
    }

    #[test]
    fn changes_since_is_minimal() {
        let mut local = with_cell("x", t("a", 5));
        local
            .row_mut("todos", "t1")
            .set_cell("done", Some(true.into()), t("a", 6));
        let mut remote = with_cell("x", t("a", 5));
        remote
            .row_mut("lists", "L1")
            .set_cell("title", Some("Home".into()), t("b", 1));

        let delta = local.changes_since(&remote);
        assert_eq!(delta.cell_count(), 1);
        assert!(delta.row("todos", "t1").unwrap().cells.contains_key("done"));
        assert!(delta.row("lists", "L1").is_none());

        remote.merge_from(&delta);
        assert!(local.changes_since(&remote).is_empty());
    }

    #[test]
    fn validate_rejects_bad_times_and_types() {
        let schema = Schema::todo_app();
        assert!(with_cell("x", t("a", 1)).validate(&schema).is_ok());

        let zero = with_cell("x", t("a", 0));
        assert!(matches!(
            zero.validate(&schema),
            Err(Error::MalformedContent(_))
        ));

        let mut wrong_type = MergeableContent::new();
        wrong_type
            .row_mut("todos", "t1")
            .set_cell("done", Some("yes".into()), t("a", 1));
        assert!(matches!(
            wrong_type.validate(&schema),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn detects_conflicting_values_under_one_time() {
        let a = with_cell("x", t("a", 1));
        let b = with_cell("y", t("a", 1));
        assert!(a.check_consistent_with(&b).is_err());
        assert!(a.check_consistent_with(&a.clone()).is_ok());
    }

    #[test]
    fn max_time_covers_tombstones() {
        let mut content = with_cell("x", t("a", 1));
        content.row_mut("todos", "t2").tombstone = Some(t("b", 9));
        assert_eq!(content.max_time(), Some(&t("b", 9)));
    }

    #[test]
    fn serialization_skips_empty_parts() {
        let mut content = MergeableContent::new();
        content.row_mut("todos", "t1").tombstone = Some(t("a", 2));
        let json = serde_json::to_string(&content).unwrap();
        assert_eq!(
            json,
            r#"{"tables":{"todos":{"t1":{"tombstone":{"counter":2,"replica":"a"}}}}}"#
        );
        let parsed: MergeableContent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, content);
    }
}
