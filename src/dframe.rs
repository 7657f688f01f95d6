//! Column-oriented data-frame codec.
//!
//! A table is stored as a group of equal-length growable column datasets
//! plus an ordered column-name attribute (`__pdcolumns__`); that order is
//! authoritative on reconstruction. Reads are chunked by an explicit row
//! budget so peak memory stays bounded, and may be narrowed by per-column
//! predicates before the remaining columns are materialized.

use ahash::AHashMap;
use ndarray::{ArrayD, IxDyn};

use crate::attrs;
use crate::data::{ArrayData, AttrMap, AttrValue, Dtype};
use crate::dataset::{self, DsetSpec};
use crate::file::{quote, StoreFile};
use crate::{shape, Result, StoreError, DEFAULT_ROW_BUDGET, JSON_ATTR, PDCOLUMNS_ATTR};

/// One column of values.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Bool(Vec<bool>),
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Str(Vec<String>),
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Bool(v) => v.len(),
            ColumnData::Int64(v) => v.len(),
            ColumnData::Float64(v) => v.len(),
            ColumnData::Str(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            ColumnData::Bool(_) => Dtype::Bool,
            ColumnData::Int64(_) => Dtype::Int64,
            ColumnData::Float64(_) => Dtype::Float64,
            ColumnData::Str(_) => Dtype::Str,
        }
    }

    /// 1-d array projection for dataset storage.
    pub fn to_array(&self) -> ArrayData {
        fn arr1<T: Clone>(v: &[T]) -> ArrayD<T> {
            ArrayD::from_shape_vec(IxDyn(&[v.len()]), v.to_vec()).unwrap()
        }
        match self {
            ColumnData::Bool(v) => ArrayData::Bool(arr1(v)),
            ColumnData::Int64(v) => ArrayData::Int64(arr1(v)),
            ColumnData::Float64(v) => ArrayData::Float64(arr1(v)),
            ColumnData::Str(v) => ArrayData::Str(arr1(v)),
        }
    }

    /// Build from a 1-d array read back from a dataset.
    pub fn from_array(array: &ArrayData) -> Result<ColumnData> {
        if array.ndim() != 1 {
            return Err(StoreError::ShapeMismatch(format!(
                "a table column must be 1-d, got shape {:?}",
                array.shape()
            )));
        }
        Ok(match array {
            ArrayData::Bool(a) => ColumnData::Bool(a.iter().cloned().collect()),
            ArrayData::Int64(a) => ColumnData::Int64(a.iter().cloned().collect()),
            ArrayData::Float64(a) => ColumnData::Float64(a.iter().cloned().collect()),
            ArrayData::Str(a) => ColumnData::Str(a.iter().cloned().collect()),
        })
    }

    pub fn value_at(&self, i: usize) -> AttrValue {
        match self {
            ColumnData::Bool(v) => AttrValue::Bool(v[i]),
            ColumnData::Int64(v) => AttrValue::Int(v[i]),
            ColumnData::Float64(v) => AttrValue::Float(v[i]),
            ColumnData::Str(v) => AttrValue::Str(v[i].clone()),
        }
    }

    /// Values at the given indices, in order.
    pub fn select(&self, indices: &[usize]) -> ColumnData {
        match self {
            ColumnData::Bool(v) => ColumnData::Bool(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Int64(v) => ColumnData::Int64(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Float64(v) => ColumnData::Float64(indices.iter().map(|&i| v[i]).collect()),
            ColumnData::Str(v) => {
                ColumnData::Str(indices.iter().map(|&i| v[i].clone()).collect())
            }
        }
    }

    /// Append another column of the same dtype.
    pub fn append(&mut self, other: ColumnData) -> Result<()> {
        match (self, other) {
            (ColumnData::Bool(a), ColumnData::Bool(b)) => a.extend(b),
            (ColumnData::Int64(a), ColumnData::Int64(b)) => a.extend(b),
            (ColumnData::Float64(a), ColumnData::Float64(b)) => a.extend(b),
            (ColumnData::Str(a), ColumnData::Str(b)) => a.extend(b),
            (a, b) => {
                return Err(StoreError::DtypeMismatch {
                    expected: a.dtype(),
                    actual: b.dtype(),
                })
            }
        }
        Ok(())
    }
}

/// An ordered collection of equal-length named columns.
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    columns: Vec<(String, ColumnData)>,
    name_to_idx: AHashMap<String, usize>,
    index: Option<String>,
}

impl DataFrame {
    pub fn new() -> Self {
        DataFrame::default()
    }

    /// Append a column; all columns must share one length.
    pub fn push_column(&mut self, name: impl Into<String>, data: ColumnData) -> Result<()> {
        let name = name.into();
        if let Some((_, first)) = self.columns.first() {
            if first.len() != data.len() {
                return Err(StoreError::ShapeMismatch(format!(
                    "column {} has {} rows, table has {}",
                    name,
                    data.len(),
                    first.len()
                )));
            }
        }
        if self.name_to_idx.contains_key(&name) {
            return Err(StoreError::NodeExists(name));
        }
        self.name_to_idx.insert(name.clone(), self.columns.len());
        self.columns.push((name, data));
        Ok(())
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    /// Column names in insertion order.
    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn column(&self, name: &str) -> Option<&ColumnData> {
        self.name_to_idx.get(name).map(|&i| &self.columns[i].1)
    }

    pub fn columns(&self) -> &[(String, ColumnData)] {
        &self.columns
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    /// Designate a column as the row index.
    pub fn set_index(&mut self, name: &str) -> Result<()> {
        if !self.name_to_idx.contains_key(name) {
            return Err(StoreError::KeyNotFound(name.to_string()));
        }
        self.index = Some(name.to_string());
        Ok(())
    }

    /// Append the rows of another frame with the same schema.
    pub fn append(&mut self, other: DataFrame) -> Result<()> {
        if self.columns.is_empty() {
            *self = other;
            return Ok(());
        }
        for ((name, col), (oname, ocol)) in self.columns.iter_mut().zip(other.columns) {
            if *name != oname {
                return Err(StoreError::KeyNotFound(oname));
            }
            col.append(ocol)?;
        }
        Ok(())
    }
}

impl PartialEq for DataFrame {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns && self.index == other.index
    }
}

/// Row predicate on a single column.
#[derive(Debug, Clone)]
pub enum Pred {
    Eq(AttrValue),
    /// Membership test.
    In(Vec<AttrValue>),
}

impl Pred {
    fn matches(&self, col: &ColumnData, i: usize) -> bool {
        let v = col.value_at(i);
        match self {
            Pred::Eq(want) => scalar_eq(&v, want),
            Pred::In(wants) => wants.iter().any(|w| scalar_eq(&v, w)),
        }
    }
}

fn scalar_eq(a: &AttrValue, b: &AttrValue) -> bool {
    match (a, b) {
        (AttrValue::Int(x), AttrValue::Float(y)) | (AttrValue::Float(y), AttrValue::Int(x)) => {
            *x as f64 == *y
        }
        _ => a == b,
    }
}

/// Options for [`read_df`]. The row budget bounding chunked reads is an
/// explicit parameter, not module-global state.
#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// Column to designate as the row index.
    pub index: Option<String>,
    /// Per-column predicates, ANDed together.
    pub sel: Vec<(String, Pred)>,
    /// A single explicit row range.
    pub slc: Option<std::ops::Range<usize>>,
    /// Explicit row ranges; takes precedence over `slc` and the budget.
    pub slices: Vec<std::ops::Range<usize>>,
    /// Maximum rows materialized per chunk when no explicit range is given.
    pub row_budget: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            index: None,
            sel: Vec::new(),
            slc: None,
            slices: Vec::new(),
            row_budget: DEFAULT_ROW_BUDGET,
        }
    }
}

impl ReadOptions {
    pub fn with_index(mut self, name: &str) -> Self {
        self.index = Some(name.to_string());
        self
    }

    pub fn with_sel(mut self, name: &str, pred: Pred) -> Self {
        self.sel.push((name.to_string(), pred));
        self
    }

    pub fn with_slc(mut self, slc: std::ops::Range<usize>) -> Self {
        self.slc = Some(slc);
        self
    }

    pub fn with_row_budget(mut self, budget: usize) -> Self {
        self.row_budget = budget;
        self
    }
}

/// Store a table at `path`: one growable dataset per column plus the ordered
/// `__pdcolumns__` attribute; `extra_attrs` are sanitized and attached.
pub fn create_df(
    file: &StoreFile,
    path: &str,
    df: &DataFrame,
    extra_attrs: &AttrMap,
) -> Result<()> {
    for (name, col) in df.columns() {
        let cpath = format!("{}/{}", path, quote(name));
        dataset::create(file, &cpath, &DsetSpec::growable(col.dtype(), &[]))?;
        dataset::extend(file, &cpath, &col.to_array())?;
    }
    let joined = df.names().join(" ");
    file.set_attr(path, PDCOLUMNS_ATTR, AttrValue::Str(joined))?;
    if !extra_attrs.is_empty() {
        file.set_attrs(path, &attrs::sanitize_all(extra_attrs.clone()))?;
    }
    Ok(())
}

/// Read a table back.
///
/// A zero-length table is an error (`EmptyDataset`). A node carrying a
/// shape-descriptor `json` attribute is expanded to long format via
/// [`shape::dset2df`]; a node carrying `__pdcolumns__` is read column-wise
/// in chunks; anything else is not a data frame (this engine has no
/// structured record dtype).
pub fn read_df(file: &StoreFile, path: &str, opts: &ReadOptions) -> Result<DataFrame> {
    let node_attrs = file.get_attrs(path)?;

    if matches!(node_attrs.get(JSON_ATTR), Some(AttrValue::Str(_))) {
        if file.dataset_len(path)? == 0 {
            return Err(StoreError::EmptyDataset(path.to_string()));
        }
        let filters = eq_filters(&opts.sel)?;
        return shape::dset2df(file, path, opts.index.as_deref(), &filters);
    }

    let names: Vec<String> = match node_attrs.get(PDCOLUMNS_ATTR) {
        Some(AttrValue::Str(joined)) => {
            joined.split_whitespace().map(str::to_string).collect()
        }
        _ => return Err(StoreError::NotADataFrame(path.to_string())),
    };
    let length = match names.first() {
        Some(first) => file.dataset_len(&format!("{}/{}", path, quote(first)))?,
        None => 0,
    };
    if length == 0 {
        return Err(StoreError::EmptyDataset(path.to_string()));
    }

    let ranges: Vec<std::ops::Range<usize>> = if !opts.slices.is_empty() {
        opts.slices.clone()
    } else if let Some(slc) = &opts.slc {
        vec![slc.start..slc.end.min(length)]
    } else {
        // chunks of at most `row_budget` rows bound peak memory
        let budget = opts.row_budget.max(1);
        (0..length)
            .step_by(budget)
            .map(|start| start..(start + budget).min(length))
            .collect()
    };

    let mut out = DataFrame::new();
    for range in ranges {
        out.append(read_chunk(file, path, &names, &opts.sel, range)?)?;
    }
    if let Some(index) = &opts.index {
        out.set_index(index)?;
    }
    Ok(out)
}

fn read_chunk(
    file: &StoreFile,
    path: &str,
    names: &[String],
    sel: &[(String, Pred)],
    range: std::ops::Range<usize>,
) -> Result<DataFrame> {
    let read_col = |name: &str| -> Result<ColumnData> {
        let arr = file.read_rows(&format!("{}/{}", path, quote(name)), range.start, range.end)?;
        ColumnData::from_array(&arr)
    };

    let mut df = DataFrame::new();
    if sel.is_empty() {
        for name in names {
            df.push_column(name.clone(), read_col(name)?)?;
        }
        return Ok(df);
    }

    // read the predicate columns first and narrow before touching the rest
    let mut pred_cols: Vec<(&String, &Pred, ColumnData)> = Vec::with_capacity(sel.len());
    for (name, pred) in sel {
        if !names.contains(name) {
            return Err(StoreError::KeyNotFound(name.clone()));
        }
        pred_cols.push((name, pred, read_col(name)?));
    }
    let nrows = pred_cols.first().map_or(0, |(_, _, c)| c.len());
    let keep: Vec<usize> = (0..nrows)
        .filter(|&i| pred_cols.iter().all(|(_, pred, col)| pred.matches(col, i)))
        .collect();

    for name in names {
        let col = match pred_cols.iter().find(|(n, _, _)| *n == name) {
            Some((_, _, col)) => col.select(&keep),
            None => read_col(name)?.select(&keep),
        };
        df.push_column(name.clone(), col)?;
    }
    Ok(df)
}

fn eq_filters(sel: &[(String, Pred)]) -> Result<Vec<(String, AttrValue)>> {
    sel.iter()
        .map(|(name, pred)| match pred {
            Pred::Eq(v) => Ok((name.clone(), v.clone())),
            Pred::In(_) => Err(StoreError::InvalidSelector(format!(
                "membership predicates are not supported on named-axis datasets ({})",
                name
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Mode;
    use tempfile::tempdir;

    fn rup_table() -> DataFrame {
        let mut df = DataFrame::new();
        df.push_column("rup_id", ColumnData::Int64(vec![0, 1, 2])).unwrap();
        df.push_column("mag", ColumnData::Float64(vec![4.5, 5.5, 6.5])).unwrap();
        df
    }

    fn open_tmp(dir: &tempfile::TempDir) -> StoreFile {
        StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        create_df(&file, "rup", &rup_table(), &AttrMap::new()).unwrap();

        let attr = file.get_attr("rup", PDCOLUMNS_ATTR).unwrap().unwrap();
        assert_eq!(attr, AttrValue::Str("rup_id mag".into()));

        let df = read_df(&file, "rup", &ReadOptions::default()).unwrap();
        assert_eq!(df.len(), 3);
        assert_eq!(df.names(), vec!["rup_id", "mag"]);
        assert_eq!(df, rup_table());
    }

    #[test]
    fn test_empty_table_read_fails() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let mut df = DataFrame::new();
        df.push_column("eid", ColumnData::Int64(vec![])).unwrap();
        df.push_column("gmv", ColumnData::Float64(vec![])).unwrap();
        create_df(&file, "gmf", &df, &AttrMap::new()).unwrap();
        assert!(matches!(
            read_df(&file, "gmf", &ReadOptions::default()),
            Err(StoreError::EmptyDataset(_))
        ));
    }

    #[test]
    fn test_chunked_read_equals_whole_read() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let mut df = DataFrame::new();
        df.push_column("eid", ColumnData::Int64((0..10).collect())).unwrap();
        df.push_column("gmv", ColumnData::Float64((0..10).map(|i| i as f64 / 10.0).collect()))
            .unwrap();
        create_df(&file, "gmf", &df, &AttrMap::new()).unwrap();

        let whole = read_df(&file, "gmf", &ReadOptions::default()).unwrap();
        let chunked = read_df(&file, "gmf", &ReadOptions::default().with_row_budget(3)).unwrap();
        assert_eq!(whole, chunked);
        assert_eq!(chunked.len(), 10);
    }

    #[test]
    fn test_predicate_filtering() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let mut df = DataFrame::new();
        df.push_column("sid", ColumnData::Int64(vec![0, 0, 1, 1, 2])).unwrap();
        df.push_column("imt", ColumnData::Str(
            vec!["PGA", "SA", "PGA", "SA", "PGA"].into_iter().map(String::from).collect(),
        )).unwrap();
        df.push_column("poe", ColumnData::Float64(vec![0.1, 0.2, 0.3, 0.4, 0.5])).unwrap();
        create_df(&file, "hcurves", &df, &AttrMap::new()).unwrap();

        let opts = ReadOptions::default()
            .with_sel("imt", Pred::Eq(AttrValue::Str("PGA".into())))
            .with_sel("sid", Pred::In(vec![AttrValue::Int(0), AttrValue::Int(2)]));
        let out = read_df(&file, "hcurves", &opts).unwrap();
        assert_eq!(out.column("poe"), Some(&ColumnData::Float64(vec![0.1, 0.5])));
        assert_eq!(out.column("sid"), Some(&ColumnData::Int64(vec![0, 2])));
    }

    #[test]
    fn test_explicit_slice() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        create_df(&file, "rup", &rup_table(), &AttrMap::new()).unwrap();
        let out = read_df(&file, "rup", &ReadOptions::default().with_slc(1..3)).unwrap();
        assert_eq!(out.column("rup_id"), Some(&ColumnData::Int64(vec![1, 2])));
    }

    #[test]
    fn test_index_column() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        create_df(&file, "rup", &rup_table(), &AttrMap::new()).unwrap();
        let out = read_df(&file, "rup", &ReadOptions::default().with_index("rup_id")).unwrap();
        assert_eq!(out.index(), Some("rup_id"));
        assert!(read_df(&file, "rup", &ReadOptions::default().with_index("nope")).is_err());
    }

    #[test]
    fn test_not_a_dataframe() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        file.create_group("plain").unwrap();
        assert!(matches!(
            read_df(&file, "plain", &ReadOptions::default()),
            Err(StoreError::NotADataFrame(_))
        ));
    }
}
