//! Listener registration and dispatch.
//!
//! Listeners are registered against a [`Pattern`] and invoked after each
//! commit with a read-only view of the settled store. A listener fires at
//! most once per commit, however many cells that commit touched.

use crate::{CellId, CellValue, IndexId, RowId, SliceId, Store, TableId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// What a listener observes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Pattern {
    /// Any change to any row of the table.
    Table { table: TableId },
    /// Rows added to or removed from the table. Structural only.
    RowIds { table: TableId },
    /// Rows added to or removed from one index slice. Structural only.
    SliceRowIds { index: IndexId, slice: SliceId },
    /// Any change to the row's cells, including creation and deletion.
    Row { table: TableId, row: RowId },
    /// Any change to one cell, including creation and deletion.
    Cell {
        table: TableId,
        row: RowId,
        cell: CellId,
    },
}

impl Pattern {
    pub fn table(table: impl Into<TableId>) -> Self {
        Pattern::Table {
            table: table.into(),
        }
    }

    pub fn row_ids(table: impl Into<TableId>) -> Self {
        Pattern::RowIds {
            table: table.into(),
        }
    }

    pub fn slice_row_ids(index: impl Into<IndexId>, slice: impl Into<SliceId>) -> Self {
        Pattern::SliceRowIds {
            index: index.into(),
            slice: slice.into(),
        }
    }

    pub fn row(table: impl Into<TableId>, row: impl Into<RowId>) -> Self {
        Pattern::Row {
            table: table.into(),
            row: row.into(),
        }
    }

    pub fn cell(table: impl Into<TableId>, row: impl Into<RowId>, cell: impl Into<CellId>) -> Self {
        Pattern::Cell {
            table: table.into(),
            row: row.into(),
            cell: cell.into(),
        }
    }

    /// Whether a change is one this pattern observes.
    pub fn matches(&self, change: &Change) -> bool {
        match (self, change) {
            (Pattern::Table { table }, Change::Table { table: t }) => table == t,
            (Pattern::RowIds { table }, Change::RowIds { table: t }) => table == t,
            (
                Pattern::SliceRowIds { index, slice },
                Change::SliceRowIds {
                    index: i,
                    slice: s,
                },
            ) => index == i && slice == s,
            (Pattern::Row { table, row }, Change::Row { table: t, row: r }) => {
                table == t && row == r
            }
            (
                Pattern::Cell { table, row, cell },
                Change::Cell {
                    table: t,
                    row: r,
                    cell: c,
                    ..
                },
            ) => table == t && row == r && cell == c,
            _ => false,
        }
    }
}

/// One observable effect of a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Table {
        table: TableId,
    },
    RowIds {
        table: TableId,
    },
    SliceRowIds {
        index: IndexId,
        slice: SliceId,
    },
    Row {
        table: TableId,
        row: RowId,
    },
    Cell {
        table: TableId,
        row: RowId,
        cell: CellId,
        old: Option<CellValue>,
        new: Option<CellValue>,
    },
}

/// Passed to a running listener so it can unsubscribe itself or others.
///
/// Removals take effect immediately for the rest of the dispatch pass: a
/// removed listener is not invoked again, every other listener still runs.
#[derive(Debug, Default)]
pub struct ListenerContext {
    current: Option<SubscriptionId>,
    removed: HashSet<SubscriptionId>,
}

impl ListenerContext {
    /// Id of the listener currently running.
    pub fn subscription_id(&self) -> Option<SubscriptionId> {
        self.current
    }

    pub fn unsubscribe_self(&mut self) {
        if let Some(id) = self.current {
            self.removed.insert(id);
        }
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.removed.insert(id);
    }

    fn is_removed(&self, id: SubscriptionId) -> bool {
        self.removed.contains(&id)
    }
}

/// Listener callback.
pub type Listener = Box<dyn FnMut(&Store, &Change, &mut ListenerContext) + Send>;

struct Entry {
    id: SubscriptionId,
    pattern: Pattern,
    listener: Listener,
}

/// Registry of listeners, in subscription order.
#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: u64,
    entries: Vec<Entry>,
}

impl std::fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriptions")
            .field("next_id", &self.next_id)
            .field("listeners", &self.entries.len())
            .finish()
    }
}

impl Subscriptions {
    pub(crate) fn add(&mut self, pattern: Pattern, listener: Listener) -> SubscriptionId {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.entries.push(Entry {
            id,
            pattern,
            listener,
        });
        id
    }

    pub(crate) fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Run one notification pass over the settled store.
    ///
    /// The registry is moved out for the duration of the pass so listeners
    /// can borrow the store they are registered on.
    pub(crate) fn dispatch(store: &mut Store, changes: &[Change]) {
        if changes.is_empty() || store.subscriptions.entries.is_empty() {
            return;
        }
        let mut entries = std::mem::take(&mut store.subscriptions.entries);
        let mut ctx = ListenerContext::default();

        for entry in entries.iter_mut() {
            if ctx.is_removed(entry.id) {
                continue;
            }
            if let Some(change) = changes.iter().find(|c| entry.pattern.matches(c)) {
                ctx.current = Some(entry.id);
                (entry.listener)(store, change, &mut ctx);
            }
        }

        entries.retain(|e| !ctx.is_removed(e.id));
        store.subscriptions.entries = entries;
    }
}
