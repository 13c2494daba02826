//! Store - the in-memory table of rows for one replica.
//!
//! Every write runs inside a [`Transaction`]. Cells are written to the tables
//! immediately while the transaction records each touched row's original
//! state; on commit the store diffs originals against the settled rows,
//! updates indexes, and then runs one listener pass. A failed transaction is
//! rolled back from the same record, so observers never see a partial patch.

use crate::{
    error::Result,
    index::{IndexDefinition, Indexes},
    subscription::{Change, ListenerContext, Pattern, SubscriptionId, Subscriptions},
    CellId, CellValue, Error, Row, RowId, Schema, SliceId, TableId,
};
use std::collections::{BTreeSet, HashMap, HashSet};

/// A table of rows, keeping insertion order of row ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    rows: HashMap<RowId, Row>,
    order: Vec<RowId>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Row> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    /// Row ids in insertion order.
    pub fn row_ids(&self) -> &[RowId] {
        &self.order
    }

    /// Rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&RowId, &Row)> {
        self.order
            .iter()
            .filter_map(|id| self.rows.get_key_value(id))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn row_mut(&mut self, id: &str) -> &mut Row {
        if !self.rows.contains_key(id) {
            self.order.push(id.to_string());
        }
        self.rows.entry(id.to_string()).or_default()
    }

    fn put(&mut self, id: &str, row: Row) {
        *self.row_mut(id) = row;
    }

    fn remove(&mut self, id: &str) -> Option<Row> {
        let removed = self.rows.remove(id);
        if removed.is_some() {
            self.order.retain(|r| r != id);
        }
        removed
    }

    /// Remove one cell; a row left without cells is removed too.
    fn remove_cell(&mut self, id: &str, cell: &str) {
        let now_empty = match self.rows.get_mut(id) {
            Some(row) => {
                row.remove(cell);
                row.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.remove(id);
        }
    }
}

/// The main store holding all rows of one replica.
#[derive(Debug, Default)]
pub struct Store {
    schema: Schema,
    tables: HashMap<TableId, Table>,
    /// Table ids in first-written order
    table_order: Vec<TableId>,
    indexes: Indexes,
    pub(crate) subscriptions: Subscriptions,
}

impl Store {
    /// Create a store validating writes against `schema`.
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            ..Self::default()
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn get_cell(&self, table: &str, row: &str, cell: &str) -> Option<&CellValue> {
        self.get_row(table, row).and_then(|r| r.get(cell))
    }

    pub fn get_row(&self, table: &str, row: &str) -> Option<&Row> {
        self.tables.get(table).and_then(|t| t.get(row))
    }

    pub fn has_row(&self, table: &str, row: &str) -> bool {
        self.get_row(table, row).is_some()
    }

    /// Row ids of a table in insertion order; empty for an unknown table.
    pub fn get_row_ids(&self, table: &str) -> &[RowId] {
        self.tables
            .get(table)
            .map(Table::row_ids)
            .unwrap_or(&[])
    }

    pub fn get_table(&self, table: &str) -> Option<&Table> {
        self.tables.get(table).filter(|t| !t.is_empty())
    }

    /// Ids of tables holding at least one row.
    pub fn get_table_ids(&self) -> Vec<&TableId> {
        self.table_order
            .iter()
            .filter(|t| self.tables.get(*t).is_some_and(|t| !t.is_empty()))
            .collect()
    }

    /// Run several writes as one atomic commit.
    ///
    /// If the closure returns an error every write it made is undone and no
    /// listener fires.
    pub fn transaction<T>(
        &mut self,
        f: impl FnOnce(&mut Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut tx = Transaction::new(self);
        match f(&mut tx) {
            Ok(value) => {
                tx.commit();
                Ok(value)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Set one cell, creating the table and row if absent.
    pub fn set_cell(
        &mut self,
        table: &str,
        row: &str,
        cell: &str,
        value: impl Into<CellValue>,
    ) -> Result<()> {
        let value = value.into();
        self.transaction(|tx| tx.set_cell(table, row, cell, value))
    }

    /// Merge `patch` into a row, leaving other cells untouched.
    pub fn set_partial_row(&mut self, table: &str, row: &str, patch: Row) -> Result<()> {
        self.transaction(|tx| tx.set_partial_row(table, row, patch))
    }

    /// Replace all cells of a row.
    pub fn set_row(&mut self, table: &str, row: &str, data: Row) -> Result<()> {
        self.transaction(|tx| tx.set_row(table, row, data))
    }

    /// Insert a row under a freshly generated id and return the id.
    pub fn add_row(&mut self, table: &str, data: Row) -> Result<RowId> {
        self.transaction(|tx| tx.add_row(table, data))
    }

    /// Delete a row. Deleting a missing row is a no-op.
    pub fn del_row(&mut self, table: &str, row: &str) {
        let _ = self.transaction(|tx| {
            tx.del_row(table, row);
            Ok(())
        });
    }

    /// Delete one cell. Deleting the last cell deletes the row.
    pub fn del_cell(&mut self, table: &str, row: &str, cell: &str) {
        let _ = self.transaction(|tx| {
            tx.del_cell(table, row, cell);
            Ok(())
        });
    }

    /// Replace or remove whole rows without schema checks, as one commit.
    ///
    /// Used to materialize already-validated merge results.
    pub(crate) fn replace_rows(&mut self, rows: Vec<(TableId, RowId, Option<Row>)>) {
        let _ = self.transaction(|tx| {
            for (table, row, data) in rows {
                match data {
                    Some(data) => tx.put_row(&table, &row, data),
                    None => tx.del_row(&table, &row),
                }
            }
            Ok(())
        });
    }

    /// Define an index bucketing `table` rows by the value of `cell`.
    ///
    /// The index is built from the current rows immediately.
    pub fn set_index_definition(&mut self, index: &str, table: &str, cell: &str) -> Result<()> {
        if index.is_empty() || table.is_empty() || cell.is_empty() {
            return Err(Error::InvalidId(format!(
                "index definition '{index}' on '{table}.{cell}'"
            )));
        }
        let definition = IndexDefinition {
            table: table.to_string(),
            cell: cell.to_string(),
        };
        let rows = self.tables.get(table).into_iter().flat_map(Table::iter);
        self.indexes.define(index, definition, rows);
        Ok(())
    }

    pub fn del_index_definition(&mut self, index: &str) -> Result<()> {
        if self.indexes.remove(index) {
            Ok(())
        } else {
            Err(Error::IndexNotFound(index.to_string()))
        }
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    /// Row ids in one index slice, in the order they joined it.
    pub fn get_slice_row_ids(&self, index: &str, slice: &str) -> &[RowId] {
        self.indexes.slice_row_ids(index, slice)
    }

    pub fn get_slice_ids(&self, index: &str) -> &[SliceId] {
        self.indexes.slice_ids(index)
    }

    pub fn subscribe<F>(&mut self, pattern: Pattern, listener: F) -> SubscriptionId
    where
        F: FnMut(&Store, &Change, &mut ListenerContext) + Send + 'static,
    {
        self.subscriptions.add(pattern, Box::new(listener))
    }

    /// Remove a listener. Returns false if it was already gone.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscriptions.remove(id)
    }

    pub fn listener_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Diff touched rows against their originals and update indexes.
    fn settle(&mut self, log: ChangeLog) -> Vec<Change> {
        let ChangeLog {
            order,
            mut originals,
            ..
        } = log;
        let mut cells = Vec::new();
        let mut rows = Vec::new();
        let mut row_ids = Vec::new();
        let mut slices = Vec::new();
        let mut tables = Vec::new();
        let mut seen_slices = HashSet::new();
        let empty = Row::new();

        for (table, row_id) in order {
            let before = originals.remove(&(table.clone(), row_id.clone())).flatten();
            let after = self.tables.get(&table).and_then(|t| t.get(&row_id));
            if before.as_ref() == after {
                continue;
            }

            let (b, a) = (before.as_ref().unwrap_or(&empty), after.unwrap_or(&empty));
            let names: BTreeSet<&CellId> = b.keys().chain(a.keys()).collect();
            for cell in names {
                let (old, new) = (b.get(cell), a.get(cell));
                if old != new {
                    cells.push(Change::Cell {
                        table: table.clone(),
                        row: row_id.clone(),
                        cell: cell.clone(),
                        old: old.cloned(),
                        new: new.cloned(),
                    });
                }
            }

            if before.is_some() != after.is_some() && !row_ids.contains(&table) {
                row_ids.push(table.clone());
            }
            for slice in self.indexes.update_row(&table, &row_id, after) {
                if seen_slices.insert(slice.clone()) {
                    slices.push(slice);
                }
            }
            if !tables.contains(&table) {
                tables.push(table.clone());
            }
            rows.push(Change::Row {
                table,
                row: row_id,
            });
        }

        cells
            .into_iter()
            .chain(rows)
            .chain(row_ids.into_iter().map(|table| Change::RowIds { table }))
            .chain(
                slices
                    .into_iter()
                    .map(|(index, slice)| Change::SliceRowIds { index, slice }),
            )
            .chain(tables.into_iter().map(|table| Change::Table { table }))
            .collect()
    }
}

/// Original state of every row touched by a transaction.
#[derive(Debug, Default)]
struct ChangeLog {
    order: Vec<(TableId, RowId)>,
    originals: HashMap<(TableId, RowId), Option<Row>>,
    /// Row order of tables that gained or lost rows, for rollback
    row_orders: HashMap<TableId, Vec<RowId>>,
}

/// A batch of writes committed atomically.
///
/// Reads through a transaction see its own writes. Index reads and listeners
/// only see the result once the transaction commits.
pub struct Transaction<'a> {
    store: &'a mut Store,
    log: ChangeLog,
}

impl<'a> Transaction<'a> {
    fn new(store: &'a mut Store) -> Self {
        Self {
            store,
            log: ChangeLog::default(),
        }
    }

    pub fn get_cell(&self, table: &str, row: &str, cell: &str) -> Option<&CellValue> {
        self.store.get_cell(table, row, cell)
    }

    pub fn get_row(&self, table: &str, row: &str) -> Option<&Row> {
        self.store.get_row(table, row)
    }

    pub fn set_cell(
        &mut self,
        table: &str,
        row: &str,
        cell: &str,
        value: impl Into<CellValue>,
    ) -> Result<()> {
        let value = value.into();
        check_ids(table, row)?;
        check_id(cell)?;
        self.store.schema.validate_cell(table, cell, &value)?;
        self.record(table, row, !self.store.has_row(table, row));
        self.table_mut(table)
            .row_mut(row)
            .insert(cell.to_string(), value);
        Ok(())
    }

    pub fn set_partial_row(&mut self, table: &str, row: &str, patch: Row) -> Result<()> {
        check_ids(table, row)?;
        for (cell, value) in &patch {
            check_id(cell)?;
            self.store.schema.validate_cell(table, cell, value)?;
        }
        if patch.is_empty() {
            return Ok(());
        }
        self.record(table, row, !self.store.has_row(table, row));
        self.table_mut(table).row_mut(row).extend(patch);
        Ok(())
    }

    /// Replace all cells of a row. An empty row deletes it.
    pub fn set_row(&mut self, table: &str, row: &str, data: Row) -> Result<()> {
        check_ids(table, row)?;
        for (cell, value) in &data {
            check_id(cell)?;
            self.store.schema.validate_cell(table, cell, value)?;
        }
        if data.is_empty() {
            self.del_row(table, row);
        } else {
            self.put_row(table, row, data);
        }
        Ok(())
    }

    /// Insert a row under a new UUID. Required cells are enforced here.
    pub fn add_row(&mut self, table: &str, data: Row) -> Result<RowId> {
        check_id(table)?;
        self.store.schema.validate_row(table, &data)?;
        if data.is_empty() {
            return Err(Error::InvalidId(format!("empty row for table '{table}'")));
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.put_row(table, &id, data);
        Ok(id)
    }

    pub fn del_row(&mut self, table: &str, row: &str) {
        if !self.store.has_row(table, row) {
            return;
        }
        self.record(table, row, true);
        if let Some(t) = self.store.tables.get_mut(table) {
            t.remove(row);
        }
    }

    pub fn del_cell(&mut self, table: &str, row: &str, cell: &str) {
        if self.store.get_cell(table, row, cell).is_none() {
            return;
        }
        self.record(table, row, true);
        if let Some(t) = self.store.tables.get_mut(table) {
            t.remove_cell(row, cell);
        }
    }

    pub(crate) fn put_row(&mut self, table: &str, row: &str, data: Row) {
        self.record(table, row, !self.store.has_row(table, row));
        self.table_mut(table).put(row, data);
    }

    fn table_mut(&mut self, table: &str) -> &mut Table {
        if !self.store.tables.contains_key(table) {
            self.store.table_order.push(table.to_string());
        }
        self.store.tables.entry(table.to_string()).or_default()
    }

    /// Remember a row's state before its first write in this transaction,
    /// and the table's row order before its first structural write.
    fn record(&mut self, table: &str, row: &str, structural: bool) {
        if structural && !self.log.row_orders.contains_key(table) {
            let order = self
                .store
                .tables
                .get(table)
                .map(|t| t.order.clone())
                .unwrap_or_default();
            self.log.row_orders.insert(table.to_string(), order);
        }
        let key = (table.to_string(), row.to_string());
        if self.log.originals.contains_key(&key) {
            return;
        }
        let original = self.store.get_row(table, row).cloned();
        self.log.order.push(key.clone());
        self.log.originals.insert(key, original);
    }

    fn commit(self) {
        let Transaction { store, log } = self;
        let changes = store.settle(log);
        Subscriptions::dispatch(store, &changes);
    }

    fn rollback(self) {
        let Transaction { store, log } = self;
        let ChangeLog {
            mut originals,
            row_orders,
            ..
        } = log;
        for ((table, row), original) in originals.drain() {
            let Some(t) = store.tables.get_mut(&table) else {
                continue;
            };
            match original {
                Some(original) => {
                    t.rows.insert(row, original);
                }
                None => {
                    t.rows.remove(&row);
                }
            }
        }
        for (table, order) in row_orders {
            if let Some(t) = store.tables.get_mut(&table) {
                t.order = order;
            }
        }
    }
}

fn check_id(id: &str) -> Result<()> {
    if id.is_empty() {
        Err(Error::InvalidId("id must not be empty".into()))
    } else {
        Ok(())
    }
}

fn check_ids(table: &str, row: &str) -> Result<()> {
    check_id(table)?;
    check_id(row)
}
