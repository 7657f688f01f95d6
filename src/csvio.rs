//! Delimited text ingestion.
//!
//! `read_csv` understands an optional leading comment line of the form
//! `#key=value, other="text", imls=[0.1, 0.2]` whose items are parsed by a
//! relaxed literal grammar into attributes, followed by a header row of
//! column names and typed data rows. The result feeds `create_df` directly.

use std::path::Path;

use ahash::AHashMap;

use crate::data::{AttrMap, AttrValue, Dtype};
use crate::dframe::{ColumnData, DataFrame};
use crate::{Result, StoreError};

/// Read a delimited text file into a typed table plus its comment-line
/// attributes.
///
/// Columns named in `dtypes` use the given dtype; the others are sniffed
/// from the first data row (int, then float, else string). Fields may be
/// double-quoted to embed the separator.
pub fn read_csv(
    path: impl AsRef<Path>,
    dtypes: &AHashMap<String, Dtype>,
    sep: char,
) -> Result<(DataFrame, AttrMap)> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let mut lines = text.lines().enumerate().peekable();

    let attrs = match lines.peek() {
        Some((_, line)) if line.starts_with('#') => {
            let (_, line) = lines.next().ok_or_else(|| StoreError::Csv("empty file".into()))?;
            parse_comment(line.trim_start_matches('#'))?
        }
        _ => AttrMap::new(),
    };

    let names: Vec<String> = match lines.next() {
        Some((_, header)) => split_row(header, sep),
        None => return Err(StoreError::Csv("missing header row".to_string())),
    };
    if names.is_empty() {
        return Err(StoreError::Csv("missing header row".to_string()));
    }

    let rows: Vec<(usize, Vec<String>)> = lines
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(lineno, line)| (lineno + 1, split_row(line, sep)))
        .collect();

    let col_dtypes: Vec<Dtype> = names
        .iter()
        .enumerate()
        .map(|(i, name)| match dtypes.get(name) {
            Some(dt) => *dt,
            None => rows
                .first()
                .and_then(|(_, cells)| cells.get(i))
                .map(|cell| sniff(cell))
                .unwrap_or(Dtype::Str),
        })
        .collect();

    let mut columns: Vec<ColumnData> = col_dtypes.iter().map(empty_column).collect();
    for (lineno, cells) in &rows {
        if cells.len() != names.len() {
            return Err(StoreError::Csv(format!(
                "line {}: expected {} fields, got {}",
                lineno,
                names.len(),
                cells.len()
            )));
        }
        for (i, cell) in cells.iter().enumerate() {
            push_cell(&mut columns[i], cell).map_err(|e| {
                StoreError::Csv(format!("line {}, column {}: {}", lineno, names[i], e))
            })?;
        }
    }

    let mut df = DataFrame::new();
    for (name, col) in names.into_iter().zip(columns) {
        df.push_column(name, col)?;
    }
    Ok((df, attrs))
}

fn sniff(cell: &str) -> Dtype {
    if cell.parse::<i64>().is_ok() {
        Dtype::Int64
    } else if cell.parse::<f64>().is_ok() {
        Dtype::Float64
    } else if matches!(cell, "true" | "false") {
        Dtype::Bool
    } else {
        Dtype::Str
    }
}

fn empty_column(dtype: &Dtype) -> ColumnData {
    match dtype {
        Dtype::Bool => ColumnData::Bool(Vec::new()),
        Dtype::Int64 => ColumnData::Int64(Vec::new()),
        Dtype::Float64 => ColumnData::Float64(Vec::new()),
        _ => ColumnData::Str(Vec::new()),
    }
}

fn push_cell(col: &mut ColumnData, cell: &str) -> std::result::Result<(), String> {
    match col {
        ColumnData::Bool(v) => {
            v.push(cell.parse().map_err(|_| format!("{:?} is not a bool", cell))?)
        }
        ColumnData::Int64(v) => {
            v.push(cell.parse().map_err(|_| format!("{:?} is not an integer", cell))?)
        }
        ColumnData::Float64(v) => {
            v.push(cell.parse().map_err(|_| format!("{:?} is not a float", cell))?)
        }
        ColumnData::Str(v) => v.push(cell.to_string()),
    }
    Ok(())
}

/// Split one line at the separator, honoring double-quoted fields.
fn split_row(line: &str, sep: char) -> Vec<String> {
    let mut out = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => quoted = !quoted,
            c if c == sep && !quoted => {
                out.push(field.trim().to_string());
                field.clear();
            }
            c => field.push(c),
        }
    }
    out.push(field.trim().to_string());
    out
}

/// Parse the comment line: comma-separated `key=value` items where a value
/// is an integer, a float, a double-quoted string, a bare word, or a flat
/// bracketed list of those.
pub fn parse_comment(line: &str) -> Result<AttrMap> {
    let mut attrs = AttrMap::new();
    for item in split_items(line) {
        let item = item.trim();
        if item.is_empty() {
            continue;
        }
        let (key, raw) = item.split_once('=').ok_or_else(|| {
            StoreError::Csv(format!("malformed comment item {:?}", item))
        })?;
        attrs.insert(key.trim().to_string(), parse_literal(raw.trim())?);
    }
    Ok(attrs)
}

/// Split the comment line at top-level commas only (not inside quotes or
/// brackets).
fn split_items(line: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut item = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for c in line.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                item.push(c);
            }
            '[' if !quoted => {
                depth += 1;
                item.push(c);
            }
            ']' if !quoted => {
                depth = depth.saturating_sub(1);
                item.push(c);
            }
            ',' if !quoted && depth == 0 => {
                out.push(std::mem::take(&mut item));
            }
            c => item.push(c),
        }
    }
    if !item.trim().is_empty() {
        out.push(item);
    }
    out
}

fn parse_literal(raw: &str) -> Result<AttrValue> {
    if let Some(inner) = raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        return Ok(AttrValue::Str(inner.to_string()));
    }
    if let Some(inner) = raw.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
        return parse_list(inner);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(AttrValue::Int(n));
    }
    if let Ok(n) = raw.parse::<i128>() {
        return Ok(AttrValue::BigInt(n));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(AttrValue::Float(f));
    }
    match raw {
        "true" => Ok(AttrValue::Bool(true)),
        "false" => Ok(AttrValue::Bool(false)),
        "" => Err(StoreError::Csv("empty literal in comment line".to_string())),
        word => Ok(AttrValue::Str(word.to_string())),
    }
}

fn parse_list(inner: &str) -> Result<AttrValue> {
    let parts: Vec<&str> = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return Ok(AttrValue::FloatList(Vec::new()));
    }
    if parts.iter().all(|p| p.parse::<i64>().is_ok()) {
        return Ok(AttrValue::IntList(
            parts.iter().map(|p| p.parse().unwrap_or(0)).collect(),
        ));
    }
    if parts.iter().all(|p| p.parse::<f64>().is_ok()) {
        return Ok(AttrValue::FloatList(
            parts.iter().map(|p| p.parse().unwrap_or(0.0)).collect(),
        ));
    }
    Ok(AttrValue::StrList(
        parts
            .iter()
            .map(|p| p.trim_matches('"').to_string())
            .collect(),
    ))
}
