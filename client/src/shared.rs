//! A replica shared between the application and the synchronizer.

use listsync_engine::{
    error::Result, CellValue, Change, ListenerContext, MergeableStore, Pattern, Row, RowId, Store,
    SubscriptionId,
};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

/// Cloneable handle to one [`MergeableStore`].
///
/// Every write that leaves unpushed changes wakes the synchronizer, so local
/// edits are forwarded without polling. Writes keep working while the
/// synchronizer is offline or stopped.
#[derive(Clone)]
pub struct SharedStore {
    replica: Arc<Mutex<MergeableStore>>,
    pending: Arc<Notify>,
}

impl SharedStore {
    pub fn new(replica: MergeableStore) -> Self {
        Self {
            replica: Arc::new(Mutex::new(replica)),
            pending: Arc::new(Notify::new()),
        }
    }

    /// Lock the replica. A listener that panicked does not poison it for
    /// everyone else.
    pub fn lock(&self) -> MutexGuard<'_, MergeableStore> {
        self.replica.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn read<T>(&self, f: impl FnOnce(&Store) -> T) -> T {
        f(self.lock().store())
    }

    /// Run a write against the replica and wake the synchronizer if it
    /// produced changes to push.
    pub fn write<T>(&self, f: impl FnOnce(&mut MergeableStore) -> T) -> T {
        let (out, pending) = {
            let mut replica = self.lock();
            let out = f(&mut replica);
            (out, replica.has_pending())
        };
        if pending {
            self.pending.notify_one();
        }
        out
    }

    pub fn set_cell(
        &self,
        table: &str,
        row: &str,
        cell: &str,
        value: impl Into<CellValue>,
    ) -> Result<()> {
        self.write(|r| r.set_cell(table, row, cell, value))
    }

    pub fn set_partial_row(&self, table: &str, row: &str, patch: Row) -> Result<()> {
        self.write(|r| r.set_partial_row(table, row, patch))
    }

    pub fn set_row(&self, table: &str, row: &str, data: Row) -> Result<()> {
        self.write(|r| r.set_row(table, row, data))
    }

    pub fn add_row(&self, table: &str, data: Row) -> Result<RowId> {
        self.write(|r| r.add_row(table, data))
    }

    pub fn del_row(&self, table: &str, row: &str) {
        self.write(|r| r.del_row(table, row))
    }

    pub fn del_cell(&self, table: &str, row: &str, cell: &str) {
        self.write(|r| r.del_cell(table, row, cell))
    }

    /// Listeners run with the replica locked and must read through the
    /// `&Store` they are handed, not through this handle.
    pub fn subscribe<F>(&self, pattern: Pattern, listener: F) -> SubscriptionId
    where
        F: FnMut(&Store, &Change, &mut ListenerContext) + Send + 'static,
    {
        self.lock().subscribe(pattern, listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().unsubscribe(id)
    }

    pub(crate) fn pending(&self) -> Arc<Notify> {
        self.pending.clone()
    }
}

impl std::fmt::Debug for SharedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStore")
            .field("replica", &*self.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listsync_engine::{row, Schema};

    #[tokio::test]
    async fn local_write_wakes_waiter() {
        let shared = SharedStore::new(MergeableStore::new("a", Schema::todo_app()));
        let pending = shared.pending();

        shared
            .set_row("lists", "L1", row([("title", "Groceries".into())]))
            .unwrap();

        // The permit is stored even though nobody was waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), pending.notified())
            .await
            .unwrap();
        assert!(shared.read(|s| s.has_row("lists", "L1")));
    }

    #[test]
    fn clones_share_the_replica() {
        let shared = SharedStore::new(MergeableStore::new("a", Schema::todo_app()));
        let other = shared.clone();
        other
            .set_row("lists", "L1", row([("title", "Groceries".into())]))
            .unwrap();
        assert_eq!(
            shared.read(|s| s.get_cell("lists", "L1", "title").cloned()),
            Some("Groceries".into())
        );
    }
}
