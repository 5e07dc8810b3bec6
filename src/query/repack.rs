//! Store responses and result repacking
//!
//! A [`Response`] is either the per-table record stream of a query result
//! or the same data merged into one wide [`Table`]. Repackers project it
//! into caller-facing [`Row`]s. The change and discontinuity filters are
//! single forward passes over time-ordered values.

use crate::query::error::{QueryError, QueryResult};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::borrow::Cow;

/// Columns the store adds to every table, dropped when merging
const ANNOTATION_COLUMNS: [&str; 2] = ["result", "table"];

/// Default closed band of acceptable step sizes
pub const DEFAULT_STEP_BAND: (f64, f64) = (0.0, 150.0);

/// A scalar cell value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
}

impl Value {
    /// Numeric view of the value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Time(v)
    }
}

/// Ordered tuple of values; column order is fixed by the producing query
pub type Row = Vec<Value>;

/// Named columns and their rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Builder method: append a row
    pub fn row(mut self, row: Row) -> Self {
        self.rows.push(row);
        self
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of one column, in row order
    pub fn column(&self, name: &str) -> QueryResult<Vec<Value>> {
        let idx = self
            .column_index(name)
            .ok_or_else(|| QueryError::MissingColumn(name.to_string()))?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(idx).cloned().unwrap_or(Value::Null))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of running one generated program
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// One table per result group, as returned by the store
    Records(Vec<Table>),
    /// All tables merged into one wide table
    Frame(Table),
}

impl Response {
    /// Wrap decoded tables in the shape the query asked for
    pub fn from_tables(tables: Vec<Table>, tabular: bool) -> Self {
        if tabular {
            Self::Frame(merge_tables(&tables))
        } else {
            Self::Records(tables)
        }
    }

    /// Values of the named columns for every record, in table order
    ///
    /// A column absent from some tables yields `Null` there; a column absent
    /// from every table is an error.
    pub fn to_values(&self, columns: &[&str]) -> QueryResult<Vec<Row>> {
        let tables: &[Table] = match self {
            Self::Records(tables) => tables,
            Self::Frame(table) => std::slice::from_ref(table),
        };

        if tables.iter().any(|t| !t.is_empty()) {
            for column in columns {
                if tables.iter().all(|t| t.column_index(column).is_none()) {
                    return Err(QueryError::MissingColumn(column.to_string()));
                }
            }
        }

        let mut rows = Vec::new();
        for table in tables {
            let indices: Vec<Option<usize>> =
                columns.iter().map(|c| table.column_index(c)).collect();
            for row in &table.rows {
                rows.push(
                    indices
                        .iter()
                        .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
        Ok(rows)
    }

    /// The response as a single wide table
    pub fn frame(&self) -> Cow<'_, Table> {
        match self {
            Self::Frame(table) => Cow::Borrowed(table),
            Self::Records(tables) => Cow::Owned(merge_tables(tables)),
        }
    }
}

/// Concatenate tables over the union of their columns
fn merge_tables(tables: &[Table]) -> Table {
    let mut columns: Vec<String> = Vec::new();
    for table in tables {
        for column in &table.columns {
            if !ANNOTATION_COLUMNS.contains(&column.as_str()) && !columns.contains(column) {
                columns.push(column.clone());
            }
        }
    }

    let mut merged = Table {
        columns,
        rows: Vec::new(),
    };
    for table in tables {
        let indices: Vec<Option<usize>> = merged
            .columns
            .iter()
            .map(|c| table.column_index(c))
            .collect();
        for row in &table.rows {
            merged.rows.push(
                indices
                    .iter()
                    .map(|idx| idx.and_then(|i| row.get(i).cloned()).unwrap_or(Value::Null))
                    .collect(),
            );
        }
    }
    merged
}

/// Indices of rows to keep when only changes are wanted
///
/// The first row is always kept, as is the last so the latest state is
/// always visible. Any other row is kept only if its value differs from the
/// immediately preceding row.
pub fn changed_indices(values: &[Value]) -> Vec<usize> {
    let Some(last) = values.len().checked_sub(1) else {
        return Vec::new();
    };

    let mut keep = Vec::new();
    for i in 0..values.len() {
        if i == 0 || i == last || values[i] != values[i - 1] {
            keep.push(i);
        }
    }
    keep
}

/// Indices of rows bordering a step outside `band`
///
/// `differences[i]` is the step into row `i`. A row is kept if its own step
/// or the step into the next row lies outside the closed band. The first
/// and last rows are always kept. Missing steps never violate the band.
pub fn discontinuity_indices(differences: &[Option<f64>], band: (f64, f64)) -> Vec<usize> {
    let Some(last) = differences.len().checked_sub(1) else {
        return Vec::new();
    };
    let (low, high) = band;
    let outside = |d: Option<f64>| d.is_some_and(|d| d < low || d > high);

    let mut keep = Vec::new();
    for i in 0..differences.len() {
        let next_difference = differences.get(i + 1).copied().flatten();
        if i == 0 || i == last || outside(differences[i]) || outside(next_difference) {
            keep.push(i);
        }
    }
    keep
}

/// Pick `columns` out of `table` for the given row indices
pub fn select_rows(table: &Table, columns: &[&str], indices: &[usize]) -> QueryResult<Vec<Row>> {
    let positions = columns
        .iter()
        .map(|c| {
            table
                .column_index(c)
                .ok_or_else(|| QueryError::MissingColumn(c.to_string()))
        })
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(indices
        .iter()
        .filter_map(|&i| table.rows.get(i))
        .map(|row| {
            positions
                .iter()
                .map(|&p| row.get(p).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect())
}
