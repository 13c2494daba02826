//! Cell values and rows.

use crate::{error::Result, CellId, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single scalar stored in a cell.
///
/// Serialized untagged, so JSON `true`, `1.5` and `"text"` map directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Bool(bool),
    Number(f64),
    String(String),
}

/// A row: cell id to value. The cell set is open; a schema only constrains
/// the cells it declares and every other cell rides along untouched.
pub type Row = BTreeMap<CellId, CellValue>;

/// Build a [`Row`] from `(cell, value)` pairs.
pub fn row<I, K>(cells: I) -> Row
where
    I: IntoIterator<Item = (K, CellValue)>,
    K: Into<CellId>,
{
    cells.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

impl CellValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Name of the scalar kind, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            CellValue::Bool(_) => "Bool",
            CellValue::Number(_) => "Number",
            CellValue::String(_) => "String",
        }
    }

    /// Reject values that cannot round-trip through JSON.
    pub fn validate(&self, cell: &str) -> Result<()> {
        match self {
            CellValue::Number(n) if !n.is_finite() => Err(Error::InvalidValue {
                cell: cell.to_string(),
                reason: format!("non-finite number {n}"),
            }),
            _ => Ok(()),
        }
    }

    /// Key under which this value is bucketed by an index.
    pub fn slice_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Bool(b) => write!(f, "{b}"),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                write!(f, "{}", *n as i64)
            }
            CellValue::Number(n) => write!(f, "{n}"),
            CellValue::String(s) => f.write_str(s),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::String(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::String(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Number(value as f64)
    }
}

impl From<i32> for CellValue {
    fn from(value: i32) -> Self {
        CellValue::Number(f64::from(value))
    }
}
