//! Dataset operations under the `table` module.
//!
//! These mirror a typical data-cleaning workload: counting, aggregating,
//! sorting and dropping rows or columns of a CSV dataset bound as `df_<n>`.
//! Transformations return a new dataset and leave the bound one untouched.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write;
use std::sync::Arc;

use joulemeter::data::{is_missing, Dataset};
use joulemeter::harness::{Arguments, OperationError, OperationRegistry, Value};

/// Module name.
pub const MODULE: &str = "table";

/// Register the table operations.
pub fn register(ops: &mut OperationRegistry) {
    ops.register(MODULE, "count", &["df", "column"], |args, out| {
        let df = args.dataset("df")?;
        let count = match optional_str(args, "column")? {
            Some(column) => df.column(column)?.iter().filter(|c| !is_missing(c)).count(),
            None => df.n_rows(),
        };
        writeln!(out, "{count}")?;
        Ok(Value::Int(count as i64))
    });

    for (name, agg) in [
        ("sum", Aggregate::Sum),
        ("mean", Aggregate::Mean),
        ("min", Aggregate::Min),
        ("max", Aggregate::Max),
    ] {
        ops.register(MODULE, name, &["df", "column"], move |args, out| {
            let column = args.str("column")?;
            let values = args.dataset("df")?.numeric(column)?;
            let result = agg.apply(&values).ok_or_else(|| {
                OperationError::new(format!("column '{column}' has no numeric values"))
            })?;
            writeln!(out, "{result}")?;
            Ok(Value::Float(result))
        });
    }

    ops.register(MODULE, "unique", &["df", "column"], |args, out| {
        let cells = args.dataset("df")?.column(args.str("column")?)?;
        let mut seen = HashSet::new();
        let unique: Vec<Value> = cells
            .into_iter()
            .filter(|c| seen.insert(*c))
            .map(|c| Value::Str(c.to_string()))
            .collect();
        writeln!(out, "{} unique values", unique.len())?;
        Ok(Value::List(unique))
    })
    .register(MODULE, "sort", &["df", "by", "ascending"], |args, out| {
        let df = args.dataset("df")?;
        let idx = df.column_index(args.str("by")?)?;
        let ascending = match args.get("ascending") {
            None => true,
            Some(v) => v
                .as_bool()
                .ok_or_else(|| OperationError::wrong_type("ascending", "bool", v))?,
        };

        let mut rows = df.rows().to_vec();
        rows.sort_by(|a, b| {
            let ord = compare_cells(&a[idx], &b[idx]);
            // Missing cells sort last either way.
            match (is_missing(&a[idx]), is_missing(&b[idx]), ascending) {
                (false, false, false) => ord.reverse(),
                _ => ord,
            }
        });
        finish(out, df, rows, df.columns().to_vec())
    })
    .register(MODULE, "dropna", &["df", "column"], |args, out| {
        let df = args.dataset("df")?;
        let rows = match optional_str(args, "column")? {
            Some(column) => {
                let idx = df.column_index(column)?;
                df.rows().iter().filter(|r| !is_missing(&r[idx])).cloned().collect()
            }
            None => df
                .rows()
                .iter()
                .filter(|r| !r.iter().any(|c| is_missing(c)))
                .cloned()
                .collect(),
        };
        finish(out, df, rows, df.columns().to_vec())
    })
    .register(MODULE, "fillna", &["df", "value"], |args, out| {
        let df = args.dataset("df")?;
        let fill = args.require("value")?.to_string();
        let rows = df
            .rows()
            .iter()
            .map(|r| {
                r.iter()
                    .map(|c| if is_missing(c) { fill.clone() } else { c.clone() })
                    .collect()
            })
            .collect();
        finish(out, df, rows, df.columns().to_vec())
    })
    .register(MODULE, "drop", &["df", "columns"], |args, out| {
        let df = args.dataset("df")?;
        let names = string_list(args, "columns")?;
        let mut dropped = Vec::with_capacity(names.len());
        for name in &names {
            dropped.push(df.column_index(name)?);
        }

        let keep: Vec<usize> = (0..df.n_cols()).filter(|i| !dropped.contains(i)).collect();
        let columns = keep.iter().map(|&i| df.columns()[i].clone()).collect();
        let rows = df
            .rows()
            .iter()
            .map(|r| keep.iter().map(|&i| r[i].clone()).collect())
            .collect();
        finish(out, df, rows, columns)
    });
}

#[derive(Debug, Clone, Copy)]
enum Aggregate {
    Sum,
    Mean,
    Min,
    Max,
}

impl Aggregate {
    fn apply(self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return match self {
                Aggregate::Sum => Some(0.0),
                _ => None,
            };
        }
        let sum: f64 = values.iter().sum();
        Some(match self {
            Aggregate::Sum => sum,
            Aggregate::Mean => sum / values.len() as f64,
            Aggregate::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Aggregate::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }
}

fn optional_str<'a>(args: &'a Arguments, name: &str) -> Result<Option<&'a str>, OperationError> {
    match args.get(name) {
        None | Some(Value::None) => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(OperationError::wrong_type(name, "str", other)),
    }
}

fn string_list(args: &Arguments, name: &str) -> Result<Vec<String>, OperationError> {
    let value = args.require(name)?;
    match value {
        Value::Str(s) => Ok(vec![s.clone()]),
        Value::List(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| OperationError::wrong_type(name, "list of str", item))
            })
            .collect(),
        other => Err(OperationError::wrong_type(name, "str or list of str", other)),
    }
}

/// Numbers first (numerically), then other text (lexically), missing last.
fn compare_cells(a: &str, b: &str) -> Ordering {
    match (is_missing(a), is_missing(b)) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Greater,
        (false, true) => return Ordering::Less,
        (false, false) => {}
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn as_number(cell: &str) -> Option<f64> {
    cell.trim().parse::<f64>().ok().filter(|x| !x.is_nan())
}

fn finish(
    out: &mut String,
    source: &Dataset,
    rows: Vec<Vec<String>>,
    columns: Vec<String>,
) -> Result<Value, OperationError> {
    let mut result = Dataset::new(columns, rows)?;
    if let Some(path) = source.source() {
        result = result.with_source(path);
    }
    writeln!(out, "<dataset {}x{}>", result.n_rows(), result.n_cols())?;
    Ok(Value::Dataset(Arc::new(result)))
}
