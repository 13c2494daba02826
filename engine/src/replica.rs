//! MergeableStore - a [`Store`] whose every cell carries logical time.
//!
//! Local writes go through the same checks as the plain store, then get
//! stamped with the next tick of the replica clock. The stamps are recorded
//! both in the replica's full content and in an outbox of changes not yet
//! pushed to a peer. Remote content is validated, merged cell by cell, and
//! the rows it changed are written back to the store in a single commit.

use crate::{
    clock::MAX_COUNTER,
    content::{MergeableContent, RowContent},
    error::Result,
    snapshot::{ReplicaSnapshot, SNAPSHOT_FORMAT_VERSION},
    subscription::{Change, ListenerContext, Pattern, SubscriptionId},
    CellValue, Clock, Error, ReplicaId, Row, RowId, Schema, Store, TableId,
};
use serde::{Deserialize, Serialize};

/// Summary of one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeReport {
    /// Rows whose stamped content changed
    pub rows_merged: usize,
    /// Rows whose visible cells changed in the store
    pub rows_changed: usize,
}

/// A store replica that can merge with others.
#[derive(Debug)]
pub struct MergeableStore {
    store: Store,
    clock: Clock,
    content: MergeableContent,
    outbox: MergeableContent,
}

impl MergeableStore {
    pub fn new(replica_id: impl Into<ReplicaId>, schema: Schema) -> Self {
        Self {
            store: Store::new(schema),
            clock: Clock::new(replica_id),
            content: MergeableContent::new(),
            outbox: MergeableContent::new(),
        }
    }

    pub fn replica_id(&self) -> &ReplicaId {
        self.clock.replica_id()
    }

    /// Read access to the materialized rows, indexes and listeners.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Current clock counter. Survives reconnects and snapshots.
    pub fn clock_counter(&self) -> u64 {
        self.clock.counter()
    }

    pub fn set_cell(
        &mut self,
        table: &str,
        row: &str,
        cell: &str,
        value: impl Into<CellValue>,
    ) -> Result<()> {
        let value = value.into();
        self.store
            .transaction(|tx| tx.set_cell(table, row, cell, value.clone()))?;
        self.stamp(table, row, [(cell.to_string(), Some(value))]);
        Ok(())
    }

    pub fn set_partial_row(&mut self, table: &str, row: &str, patch: Row) -> Result<()> {
        self.store
            .transaction(|tx| tx.set_partial_row(table, row, patch.clone()))?;
        self.stamp(table, row, patch.into_iter().map(|(c, v)| (c, Some(v))));
        Ok(())
    }

    /// Replace all cells of a row; cells it no longer has are stamped deleted.
    pub fn set_row(&mut self, table: &str, row: &str, data: Row) -> Result<()> {
        let previous = self.store.get_row(table, row).cloned().unwrap_or_default();
        self.store
            .transaction(|tx| tx.set_row(table, row, data.clone()))?;

        let removed: Vec<(String, Option<CellValue>)> = previous
            .into_keys()
            .filter(|c| !data.contains_key(c))
            .map(|c| (c, None))
            .collect();
        let written = data.into_iter().map(|(c, v)| (c, Some(v)));
        self.stamp(table, row, written.chain(removed));
        Ok(())
    }

    pub fn add_row(&mut self, table: &str, data: Row) -> Result<RowId> {
        let id = self.store.transaction(|tx| tx.add_row(table, data.clone()))?;
        self.stamp(table, &id, data.into_iter().map(|(c, v)| (c, Some(v))));
        Ok(id)
    }

    /// Delete a row by tombstoning it. Deleting a missing row is a no-op.
    pub fn del_row(&mut self, table: &str, row: &str) {
        if !self.store.has_row(table, row) {
            return;
        }
        self.store.del_row(table, row);
        let time = self.clock.tick();
        self.content.row_mut(table, row).tombstone = Some(time.clone());
        self.outbox.row_mut(table, row).tombstone = Some(time);
    }

    pub fn del_cell(&mut self, table: &str, row: &str, cell: &str) {
        if self.store.get_cell(table, row, cell).is_none() {
            return;
        }
        self.store.del_cell(table, row, cell);
        self.stamp(table, row, [(cell.to_string(), None)]);
    }

    /// Stamp the cells of one local write with a single tick.
    fn stamp(
        &mut self,
        table: &str,
        row: &str,
        cells: impl IntoIterator<Item = (String, Option<CellValue>)>,
    ) {
        let cells: Vec<_> = cells.into_iter().collect();
        if cells.is_empty() {
            return;
        }
        let time = self.clock.tick();
        for (cell, value) in cells {
            self.content
                .row_mut(table, row)
                .set_cell(cell.clone(), value.clone(), time.clone());
            self.outbox
                .row_mut(table, row)
                .set_cell(cell, value, time.clone());
        }
    }

    pub fn set_index_definition(&mut self, index: &str, table: &str, cell: &str) -> Result<()> {
        self.store.set_index_definition(index, table, cell)
    }

    pub fn del_index_definition(&mut self, index: &str) -> Result<()> {
        self.store.del_index_definition(index)
    }

    pub fn subscribe<F>(&mut self, pattern: Pattern, listener: F) -> SubscriptionId
    where
        F: FnMut(&Store, &Change, &mut ListenerContext) + Send + 'static,
    {
        self.store.subscribe(pattern, listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.store.unsubscribe(id)
    }

    /// Full stamped content of this replica.
    pub fn content(&self) -> &MergeableContent {
        &self.content
    }

    /// What `remote` is missing from this replica.
    pub fn changes_since(&self, remote: &MergeableContent) -> MergeableContent {
        self.content.changes_since(remote)
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    /// Take the local changes made since the last call.
    pub fn take_outbox(&mut self) -> MergeableContent {
        std::mem::take(&mut self.outbox)
    }

    /// Forget unpushed changes, e.g. once a full diff has been sent instead.
    pub fn clear_outbox(&mut self) {
        self.outbox = MergeableContent::new();
    }

    /// Validate and merge remote content.
    ///
    /// Either everything is merged or, on error, nothing is: the store and
    /// its stamps are left untouched. Merged changes are not added to the
    /// outbox.
    pub fn apply_merge(&mut self, remote: &MergeableContent) -> Result<MergeReport> {
        if let Err(e) = remote
            .validate(self.store.schema())
            .and_then(|_| self.content.check_consistent_with(remote))
        {
            tracing::warn!(replica_id = %self.replica_id(), error = %e, "Rejected remote content");
            return Err(e);
        }

        let mut merged_rows: Vec<(TableId, RowId, RowContent)> = Vec::new();
        for (table, row, theirs) in remote.rows() {
            let mut merged = self.content.row(table, row).cloned().unwrap_or_default();
            if merged.merge_from(theirs) {
                merged_rows.push((table.clone(), row.clone(), merged));
            }
        }

        if let Some(latest) = remote.max_time() {
            self.clock.observe(latest);
        }

        let mut report = MergeReport {
            rows_merged: merged_rows.len(),
            rows_changed: 0,
        };
        let mut updates = Vec::new();
        for (table, row, merged) in merged_rows {
            let visible = merged.visible_row();
            if self.store.get_row(&table, &row) != visible.as_ref() {
                updates.push((table.clone(), row.clone(), visible));
            }
            *self.content.row_mut(&table, &row) = merged;
        }
        report.rows_changed = updates.len();
        self.store.replace_rows(updates);

        tracing::debug!(
            replica_id = %self.replica_id(),
            rows_merged = report.rows_merged,
            rows_changed = report.rows_changed,
            "Merged remote content"
        );
        Ok(report)
    }

    /// Export clock, content and outbox for persistence.
    pub fn export_state(&self) -> ReplicaSnapshot {
        ReplicaSnapshot {
            format_version: SNAPSHOT_FORMAT_VERSION,
            replica_id: self.replica_id().clone(),
            clock_counter: self.clock.counter(),
            content: self.content.clone(),
            outbox: self.outbox.clone(),
        }
    }

    /// Replace this replica's state with a snapshot of the same replica.
    ///
    /// Rows are rebuilt from the snapshot content in one commit, so indexes
    /// and listeners stay attached and see a single change pass.
    pub fn import_state(&mut self, snapshot: ReplicaSnapshot) -> Result<()> {
        if &snapshot.replica_id != self.replica_id() {
            return Err(Error::ReplicaMismatch {
                expected: self.replica_id().clone(),
                actual: snapshot.replica_id,
            });
        }
        if snapshot.clock_counter > MAX_COUNTER {
            return Err(Error::InvalidSnapshot(format!(
                "clock counter {} is out of range",
                snapshot.clock_counter
            )));
        }
        snapshot.content.validate(self.store.schema())?;
        snapshot.outbox.validate(self.store.schema())?;

        let mut updates: Vec<(TableId, RowId, Option<Row>)> = Vec::new();
        for table in self.store.get_table_ids() {
            for row in self.store.get_row_ids(table) {
                if snapshot.content.row(table, row).is_none() {
                    updates.push((table.clone(), row.clone(), None));
                }
            }
        }
        for (table, row, content) in snapshot.content.rows() {
            updates.push((table.clone(), row.clone(), content.visible_row()));
        }

        self.clock = Clock::with_counter(snapshot.replica_id, snapshot.clock_counter);
        if let Some(latest) = snapshot.content.max_time() {
            self.clock.observe(latest);
        }
        self.content = snapshot.content;
        self.outbox = snapshot.outbox;
        self.store.replace_rows(updates);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{row, schema};
    use std::sync::{Arc, Mutex};

    fn replica(id: &str) -> MergeableStore {
        let mut r = MergeableStore::new(id, Schema::todo_app());
        r.set_index_definition(schema::TODOS_BY_LIST, schema::TODOS, schema::LIST_CELL)
            .unwrap();
        r
    }

    fn todo(text: &str, list: &str) -> Row {
        row([
            ("text", text.into()),
            ("list", list.into()),
            ("done", false.into()),
        ])
    }

    fn rows_of(r: &MergeableStore, table: &str) -> Vec<(RowId, Row)> {
        let mut rows: Vec<_> = r
            .store()
            .get_row_ids(table)
            .iter()
            .map(|id| (id.clone(), r.store().get_row(table, id).cloned().unwrap()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    #[test]
    fn local_writes_are_stamped_and_queued() {
        let mut a = replica("a");
        a.set_row("lists", "L1", row([("title", "Home".into())]))
            .unwrap();
        a.set_cell("lists", "L1", "color", "red").unwrap();

        assert_eq!(a.clock_counter(), 2);
        assert!(a.has_pending());
        let outbox = a.take_outbox();
        assert_eq!(outbox.cell_count(), 2);
        assert!(!a.has_pending());
        assert_eq!(a.content().cell_count(), 2);
    }

    #[test]
    fn failed_local_write_leaves_no_stamp() {
        let mut a = replica("a");
        assert!(a.set_cell("todos", "t1", "done", "nope").is_err());
        assert_eq!(a.clock_counter(), 0);
        assert!(a.content().is_empty());
    }

    #[test]
    fn remote_rows_appear_in_store_and_index() {
        let mut a = replica("a");
        let mut b = replica("b");
        b.set_row("todos", "t1", todo("buy milk", "L1")).unwrap();

        let report = a.apply_merge(b.content()).unwrap();
        assert_eq!(report.rows_changed, 1);
        assert_eq!(a.store().get_slice_row_ids("todosByList", "L1"), ["t1"]);
        assert!(!a.has_pending());
    }

    #[test]
    fn convergence_after_disjoint_edits() {
        let mut a = replica("a");
        a.set_row("lists", "L1", row([("title", "Home".into())]))
            .unwrap();
        let mut b = replica("b");
        b.apply_merge(a.content()).unwrap();

        a.set_row("todos", "t1", todo("buy milk", "L1")).unwrap();
        a.set_cell("lists", "L1", "title", "House").unwrap();
        b.set_row("todos", "t2", todo("walk dog", "L1")).unwrap();
        b.del_row("lists", "L1");

        let a_content = a.content().clone();
        a.apply_merge(b.content()).unwrap();
        b.apply_merge(&a_content).unwrap();

        assert_eq!(rows_of(&a, "todos"), rows_of(&b, "todos"));
        assert_eq!(rows_of(&a, "lists"), rows_of(&b, "lists"));
        assert_eq!(a.content(), b.content());
    }

    #[test]
    fn merge_twice_is_merge_once() {
        let mut a = replica("a");
        let mut b = replica("b");
        b.set_row("todos", "t1", todo("x", "L1")).unwrap();

        a.apply_merge(b.content()).unwrap();
        let once = a.content().clone();
        let report = a.apply_merge(b.content()).unwrap();

        assert_eq!(report, MergeReport::default());
        assert_eq!(a.content(), &once);
    }

    #[test]
    fn write_after_merge_orders_after_remote() {
        let mut a = replica("a");
        let mut b = replica("b");
        for i in 0..5 {
            b.set_cell("lists", "L1", "title", format!("v{i}")).unwrap();
        }
        a.apply_merge(b.content()).unwrap();
        a.set_cell("lists", "L1", "title", "mine").unwrap();

        b.apply_merge(a.content()).unwrap();
        assert_eq!(
            b.store().get_cell("lists", "L1", "title"),
            Some(&"mine".into())
        );
    }

    #[test]
    fn malformed_merge_is_rejected_whole() {
        let mut a = replica("a");
        let mut bad = MergeableContent::new();
        bad.row_mut("todos", "t1")
            .set_cell("text", Some("ok".into()), crate::LogicalTime::new("b", 1));
        bad.row_mut("todos", "t2")
            .set_cell("done", Some("yes".into()), crate::LogicalTime::new("b", 2));

        assert!(a.apply_merge(&bad).is_err());
        assert!(a.store().get_row_ids("todos").is_empty());
        assert!(a.content().is_empty());
        assert_eq!(a.clock_counter(), 0);
    }

    #[test]
    fn merge_rejects_counter_past_limit() {
        let mut a = replica("a");
        a.set_cell("lists", "L1", "title", "mine").unwrap();

        let mut huge = MergeableContent::new();
        huge.row_mut("lists", "L1").set_cell(
            "title",
            Some("theirs".into()),
            crate::LogicalTime::new("evil", u64::MAX),
        );
        assert!(matches!(a.apply_merge(&huge), Err(Error::MalformedContent(_))));
        assert_eq!(a.clock_counter(), 1);

        a.set_cell("lists", "L2", "title", "local").unwrap();
        assert_eq!(a.clock_counter(), 2);
        assert_eq!(
            a.store().get_cell("lists", "L1", "title"),
            Some(&"mine".into())
        );
    }

    #[test]
    fn import_rejects_clock_past_limit() {
        let mut a = replica("a");
        let mut snapshot = a.export_state();
        snapshot.clock_counter = u64::MAX;
        assert!(matches!(
            a.import_state(snapshot),
            Err(Error::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn merge_fires_listeners_once() {
        let mut a = replica("a");
        let mut b = replica("b");
        b.set_row("todos", "t1", todo("x", "L1")).unwrap();
        b.set_row("todos", "t2", todo("y", "L1")).unwrap();

        let calls = Arc::new(Mutex::new(0));
        let c = Arc::clone(&calls);
        a.subscribe(Pattern::slice_row_ids("todosByList", "L1"), move |_, _, _| {
            *c.lock().unwrap() += 1
        });

        a.apply_merge(b.content()).unwrap();
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn deleted_row_can_be_recreated() {
        let mut a = replica("a");
        a.set_row("todos", "t1", todo("x", "L1")).unwrap();
        a.del_row("todos", "t1");
        assert!(!a.store().has_row("todos", "t1"));

        a.set_cell("todos", "t1", "text", "again").unwrap();
        assert_eq!(
            a.store().get_row("todos", "t1"),
            Some(&row([("text", "again".into())]))
        );
    }

    #[test]
    fn del_row_missing_is_noop() {
        let mut a = replica("a");
        a.del_row("todos", "ghost");
        assert_eq!(a.clock_counter(), 0);
        assert!(!a.has_pending());
    }

    #[test]
    fn set_row_stamps_removed_cells() {
        let mut a = replica("a");
        a.set_row("todos", "t1", todo("x", "L1")).unwrap();
        a.set_row("todos", "t1", row([("text", "y".into()), ("list", "L1".into())]))
            .unwrap();

        let mut b = replica("b");
        b.apply_merge(a.content()).unwrap();
        assert!(b.store().get_cell("todos", "t1", "done").is_none());
    }

    #[test]
    fn export_import_roundtrip() {
        let mut a = replica("a");
        a.set_row("todos", "t1", todo("x", "L1")).unwrap();
        a.set_row("todos", "t2", todo("y", "L1")).unwrap();
        a.del_row("todos", "t1");
        let json = a.export_state().to_json().unwrap();

        let mut restored = replica("a");
        restored.set_row("todos", "stale", todo("z", "L2")).unwrap();
        restored
            .import_state(ReplicaSnapshot::from_json(&json).unwrap())
            .unwrap();

        assert_eq!(rows_of(&restored, "todos"), rows_of(&a, "todos"));
        assert_eq!(restored.clock_counter(), a.clock_counter());
        assert_eq!(restored.store().get_slice_row_ids("todosByList", "L1"), ["t2"]);
        assert!(restored.store().get_slice_row_ids("todosByList", "L2").is_empty());
        assert!(restored.has_pending());
    }

    #[test]
    fn import_rejects_other_replica() {
        let a = replica("a");
        let mut b = replica("b");
        assert!(matches!(
            b.import_state(a.export_state()),
            Err(Error::ReplicaMismatch { .. })
        ));
    }
}
