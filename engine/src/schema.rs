//! Schema definition and validation.
//!
//! A schema declares the cells a table is expected to carry. Tables that are
//! not declared, and cells a declared table does not mention, stay open:
//! they are stored and merged without checks.

use crate::{error::Result, CellValue, Error, Row, TableId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Table holding todo lists.
pub const LISTS: &str = "lists";
/// Table holding todo items.
pub const TODOS: &str = "todos";
/// Cell on a todo naming the list it belongs to.
pub const LIST_CELL: &str = "list";
/// Index from list id to the todos in that list.
pub const TODOS_BY_LIST: &str = "todosByList";

/// Scalar kinds a declared cell may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    String,
    Number,
    Bool,
}

impl std::fmt::Display for CellType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CellType::String => write!(f, "String"),
            CellType::Number => write!(f, "Number"),
            CellType::Bool => write!(f, "Bool"),
        }
    }
}

impl CellType {
    fn accepts(&self, value: &CellValue) -> bool {
        matches!(
            (self, value),
            (CellType::String, CellValue::String(_))
                | (CellType::Number, CellValue::Number(_))
                | (CellType::Bool, CellValue::Bool(_))
        )
    }
}

/// Definition of a cell in a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellDef {
    pub name: String,
    pub cell_type: CellType,
    /// Checked when a row is created with `add_row`
    pub required: bool,
}

impl CellDef {
    pub fn required(name: impl Into<String>, cell_type: CellType) -> Self {
        Self {
            name: name.into(),
            cell_type,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, cell_type: CellType) -> Self {
        Self {
            name: name.into(),
            cell_type,
            required: false,
        }
    }
}

/// Schema for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSchema {
    pub name: TableId,
    pub cells: Vec<CellDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<TableId>, cells: Vec<CellDef>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    pub fn cell(&self, name: &str) -> Option<&CellDef> {
        self.cells.iter().find(|c| c.name == name)
    }

    /// Validate a single cell value against its declaration, if any.
    pub fn validate_cell(&self, cell: &str, value: &CellValue) -> Result<()> {
        match self.cell(cell) {
            Some(def) if !def.cell_type.accepts(value) => Err(Error::TypeMismatch {
                table: self.name.clone(),
                cell: cell.to_string(),
                expected: def.cell_type.to_string(),
                got: value.type_name().to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Validate a complete row: required cells present, declared types match.
    pub fn validate_row(&self, row: &Row) -> Result<()> {
        for def in self.cells.iter().filter(|c| c.required) {
            if !row.contains_key(&def.name) {
                return Err(Error::MissingRequiredCell {
                    table: self.name.clone(),
                    cell: def.name.clone(),
                });
            }
        }
        for (cell, value) in row {
            self.validate_cell(cell, value)?;
        }
        Ok(())
    }
}

/// Schema for the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    pub tables: HashMap<TableId, TableSchema>,
}

impl Schema {
    /// An empty, fully open schema.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableSchema) -> &mut Self {
        self.tables.insert(table.name.clone(), table);
        self
    }

    /// Builder-style method to add a table.
    pub fn with_table(mut self, table: TableSchema) -> Self {
        self.add_table(table);
        self
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// The lists-and-todos schema used by the application.
    pub fn todo_app() -> Self {
        Schema::new()
            .with_table(TableSchema::new(
                LISTS,
                vec![CellDef::required("title", CellType::String)],
            ))
            .with_table(TableSchema::new(
                TODOS,
                vec![
                    CellDef::required("text", CellType::String),
                    CellDef::required(LIST_CELL, CellType::String),
                    CellDef::optional("done", CellType::Bool),
                ],
            ))
    }

    pub fn validate_cell(&self, table: &str, cell: &str, value: &CellValue) -> Result<()> {
        value.validate(cell)?;
        match self.tables.get(table) {
            Some(schema) => schema.validate_cell(cell, value),
            None => Ok(()),
        }
    }

    pub fn validate_row(&self, table: &str, row: &Row) -> Result<()> {
        for (cell, value) in row {
            value.validate(cell)?;
        }
        match self.tables.get(table) {
            Some(schema) => schema.validate_row(row),
            None => Ok(()),
        }
    }
}
