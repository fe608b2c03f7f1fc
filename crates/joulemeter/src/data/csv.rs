//! CSV parsing for datasets.
//!
//! Handles the subset of RFC 4180 that exported tables use: a header line,
//! comma separators, double-quoted fields with `""` escapes. Quoted fields may
//! not span lines.

use std::fs;
use std::path::Path;

use super::{DataError, Dataset};

/// Load a dataset from a CSV file with a header line.
pub fn load_csv(path: &Path) -> Result<Dataset, DataError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_csv(&text)?.with_source(path))
}

/// Parse CSV text with a header line.
pub fn parse_csv(text: &str) -> Result<Dataset, DataError> {
    let mut lines = text
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.strip_suffix('\r').unwrap_or(line)))
        .filter(|(_, line)| !line.trim().is_empty());

    let (header_line, header) = lines.next().ok_or(DataError::Empty)?;
    let columns = split_line(header, header_line)?;

    let mut rows = Vec::new();
    for (line_num, line) in lines {
        let row = split_line(line, line_num)?;
        if row.len() != columns.len() {
            return Err(DataError::Parse {
                line: line_num,
                message: format!("expected {} fields, got {}", columns.len(), row.len()),
            });
        }
        rows.push(row);
    }

    Dataset::new(columns, rows)
}

fn split_line(line: &str, line_num: usize) -> Result<Vec<String>, DataError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(DataError::Parse {
            line: line_num,
            message: "unterminated quoted field".to_string(),
        });
    }
    fields.push(field);
    Ok(fields)
}
