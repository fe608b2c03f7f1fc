//! Tabular datasets that operations can take as arguments.
//!
//! Datasets are loaded from CSV files with a header line and registered in a
//! [`MeterContext`](crate::context::MeterContext) under names like `df_0`.
//! Cells are kept as strings; numeric views parse on demand and treat empty
//! cells, `NA`, `NaN`, and `null` as missing.
//!
//! # Example
//!
//! ```ignore
//! use joulemeter::data::load_csv;
//! use std::path::Path;
//!
//! let census = load_csv(Path::new("us_census.csv"))?;
//! let ages = census.numeric("age")?;
//! ```

mod csv;

pub use csv::{load_csv, parse_csv};

use std::fmt;
use std::path::{Path, PathBuf};

/// Errors that can occur loading or querying a dataset.
#[derive(Debug)]
pub enum DataError {
    /// IO error reading file.
    Io(std::io::Error),

    /// CSV parse error at a specific line.
    Parse {
        /// Line number where the error occurred (1-indexed).
        line: usize,
        /// Description of the parse error.
        message: String,
    },

    /// A column that does not exist was requested.
    MissingColumn {
        /// Requested column.
        expected: String,
        /// Columns the dataset has.
        found: Vec<String>,
    },

    /// A cell that should be numeric is not.
    InvalidValue {
        /// Column name.
        column: String,
        /// Row index (0-based, excluding the header).
        row: usize,
        /// The offending cell.
        value: String,
    },

    /// The input had no header line.
    Empty,
}

impl fmt::Display for DataError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataError::Io(e) => write!(f, "IO error: {}", e),
            DataError::Parse { line, message } => {
                write!(f, "Parse error at line {}: {}", line, message)
            }
            DataError::MissingColumn { expected, found } => {
                write!(f, "No column '{}' (columns: {})", expected, found.join(", "))
            }
            DataError::InvalidValue { column, row, value } => {
                write!(f, "Non-numeric value '{}' in column '{}' at row {}", value, column, row)
            }
            DataError::Empty => write!(f, "Dataset has no header line"),
        }
    }
}

impl std::error::Error for DataError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DataError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DataError {
    fn from(e: std::io::Error) -> Self {
        DataError::Io(e)
    }
}

/// Whether a cell counts as missing.
pub fn is_missing(cell: &str) -> bool {
    matches!(cell.trim(), "" | "NA" | "NaN" | "nan" | "null" | "None")
}

/// A table of string cells with named columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    source: Option<PathBuf>,
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Build a dataset; every row must have one cell per column.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, DataError> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DataError::Parse {
                    line: idx + 2,
                    message: format!("expected {} fields, got {}", columns.len(), row.len()),
                });
            }
        }
        Ok(Self {
            source: None,
            columns,
            rows,
        })
    }

    /// Record the file this dataset came from.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source = Some(path.into());
        self
    }

    /// File this dataset was loaded from, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows in file order.
    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Number of columns.
    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// Index of column `name`.
    pub fn column_index(&self, name: &str) -> Result<usize, DataError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DataError::MissingColumn {
                expected: name.to_string(),
                found: self.columns.clone(),
            })
    }

    /// Every cell of column `name`.
    pub fn column(&self, name: &str) -> Result<Vec<&str>, DataError> {
        let idx = self.column_index(name)?;
        Ok(self.rows.iter().map(|row| row[idx].as_str()).collect())
    }

    /// Non-missing cells of column `name`, parsed as numbers.
    pub fn numeric(&self, name: &str) -> Result<Vec<f64>, DataError> {
        let idx = self.column_index(name)?;
        let mut values = Vec::with_capacity(self.rows.len());
        for (row_idx, row) in self.rows.iter().enumerate() {
            let cell = row[idx].trim();
            if is_missing(cell) {
                continue;
            }
            let value = cell.parse::<f64>().map_err(|_| DataError::InvalidValue {
                column: name.to_string(),
                row: row_idx,
                value: cell.to_string(),
            })?;
            values.push(value);
        }
        Ok(values)
    }
}
