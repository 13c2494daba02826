//! Secondary indexes derived from table rows.
//!
//! An index buckets the rows of one table by the value of one of their cells.
//! Each bucket ("slice") lists row ids in the order the rows joined it; a row
//! keeps its position until its key cell changes or it is deleted.

use crate::{CellId, IndexId, Row, RowId, SliceId, TableId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What an index is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexDefinition {
    pub table: TableId,
    pub cell: CellId,
}

#[derive(Debug, Clone)]
struct Index {
    definition: IndexDefinition,
    slices: HashMap<SliceId, Vec<RowId>>,
    /// Non-empty slices in first-seen order
    slice_order: Vec<SliceId>,
    /// Reverse map used to find a row's current slice
    row_slice: HashMap<RowId, SliceId>,
}

impl Index {
    fn new(definition: IndexDefinition) -> Self {
        Self {
            definition,
            slices: HashMap::new(),
            slice_order: Vec::new(),
            row_slice: HashMap::new(),
        }
    }

    fn slice_of(&self, row: Option<&Row>) -> Option<SliceId> {
        row.and_then(|r| r.get(&self.definition.cell))
            .map(|v| v.slice_key())
    }

    /// Move a row to the slice its current state belongs to.
    ///
    /// Returns the slices whose membership changed.
    fn update(&mut self, row_id: &str, row: Option<&Row>) -> Vec<SliceId> {
        let new_slice = self.slice_of(row);
        let old_slice = self.row_slice.get(row_id).cloned();
        if new_slice == old_slice {
            return Vec::new();
        }

        let mut changed = Vec::with_capacity(2);
        if let Some(old) = old_slice {
            self.row_slice.remove(row_id);
            if let Some(ids) = self.slices.get_mut(&old) {
                ids.retain(|id| id != row_id);
                if ids.is_empty() {
                    self.slices.remove(&old);
                    self.slice_order.retain(|s| s != &old);
                }
            }
            changed.push(old);
        }
        if let Some(new) = new_slice {
            if !self.slices.contains_key(&new) {
                self.slice_order.push(new.clone());
            }
            self.slices
                .entry(new.clone())
                .or_default()
                .push(row_id.to_string());
            self.row_slice.insert(row_id.to_string(), new.clone());
            changed.push(new);
        }
        changed
    }
}

/// All indexes of one store.
#[derive(Debug, Clone, Default)]
pub struct Indexes {
    indexes: HashMap<IndexId, Index>,
}

impl Indexes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Define (or redefine) an index and build it from the given rows, which
    /// must be in table insertion order.
    pub(crate) fn define<'a>(
        &mut self,
        id: impl Into<IndexId>,
        definition: IndexDefinition,
        rows: impl Iterator<Item = (&'a RowId, &'a Row)>,
    ) {
        let mut index = Index::new(definition);
        for (row_id, row) in rows {
            index.update(row_id, Some(row));
        }
        self.indexes.insert(id.into(), index);
    }

    pub(crate) fn remove(&mut self, id: &str) -> bool {
        self.indexes.remove(id).is_some()
    }

    pub fn definition(&self, id: &str) -> Option<&IndexDefinition> {
        self.indexes.get(id).map(|i| &i.definition)
    }

    pub fn index_ids(&self) -> impl Iterator<Item = &IndexId> {
        self.indexes.keys()
    }

    /// Row ids in a slice. A missing index or slice yields an empty slice.
    pub fn slice_row_ids(&self, id: &str, slice: &str) -> &[RowId] {
        self.indexes
            .get(id)
            .and_then(|i| i.slices.get(slice))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Non-empty slices of an index, in first-seen order.
    pub fn slice_ids(&self, id: &str) -> &[SliceId] {
        self.indexes
            .get(id)
            .map(|i| i.slice_order.as_slice())
            .unwrap_or(&[])
    }

    /// Bring every index over `table` up to date with one row's state.
    ///
    /// `row` is `None` when the row no longer exists. Returns the
    /// `(index, slice)` pairs whose membership changed.
    pub(crate) fn update_row(
        &mut self,
        table: &str,
        row_id: &str,
        row: Option<&Row>,
    ) -> Vec<(IndexId, SliceId)> {
        let mut changed = Vec::new();
        for (id, index) in self
            .indexes
            .iter_mut()
            .filter(|(_, i)| i.definition.table == table)
        {
            for slice in index.update(row_id, row) {
                changed.push((id.clone(), slice));
            }
        }
        changed
    }
}
