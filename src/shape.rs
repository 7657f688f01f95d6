//! Named-axis ("shape descriptor") array codec.
//!
//! A shape descriptor names a dataset's axes and the ordered tag values
//! along each axis. It is stored as one compact JSON attribute (`json`) on
//! the dataset, built with [`crate::attrs::dumps`]. An axis whose stored
//! value is a bare integer N stands for the implicit tag list `0..N` and is
//! expanded lazily on decode.

use serde_json::{json, Value as Json};

use crate::attrs;
use crate::data::{ArrayData, AttrMap, AttrValue};
use crate::dframe::{ColumnData, DataFrame};
use crate::file::StoreFile;
use crate::{Result, StoreError, JSON_ATTR};

/// Ordered tag values along one axis.
#[derive(Debug, Clone, PartialEq)]
pub enum AxisTags {
    /// Implicit `0..n`.
    Range(usize),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    Strs(Vec<String>),
}

impl AxisTags {
    pub fn len(&self) -> usize {
        match self {
            AxisTags::Range(n) => *n,
            AxisTags::Ints(v) => v.len(),
            AxisTags::Floats(v) => v.len(),
            AxisTags::Strs(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tag_at(&self, i: usize) -> AttrValue {
        match self {
            AxisTags::Range(_) => AttrValue::Int(i as i64),
            AxisTags::Ints(v) => AttrValue::Int(v[i]),
            AxisTags::Floats(v) => AttrValue::Float(v[i]),
            AxisTags::Strs(v) => AttrValue::Str(v[i].clone()),
        }
    }

    /// Resolve a filter value to an index: negative integers count from the
    /// end of the tag list, anything else is a linear lookup.
    pub fn index_of(&self, value: &AttrValue) -> Result<usize> {
        if let AttrValue::Int(k) = value {
            if *k < 0 {
                let idx = self.len() as i64 + k;
                if idx < 0 {
                    return Err(StoreError::InvalidSelector(format!(
                        "index {} out of range for {} tags",
                        k,
                        self.len()
                    )));
                }
                return Ok(idx as usize);
            }
        }
        let found = match (self, value) {
            (AxisTags::Range(n), AttrValue::Int(k)) => {
                let k = *k as usize;
                if k < *n {
                    Some(k)
                } else {
                    None
                }
            }
            (AxisTags::Ints(v), AttrValue::Int(k)) => v.iter().position(|x| x == k),
            (AxisTags::Floats(v), AttrValue::Float(f)) => v.iter().position(|x| x == f),
            (AxisTags::Floats(v), AttrValue::Int(k)) => {
                v.iter().position(|x| *x == *k as f64)
            }
            (AxisTags::Strs(v), AttrValue::Str(s)) => v.iter().position(|x| x == s),
            _ => None,
        };
        found.ok_or_else(|| {
            StoreError::InvalidSelector(format!("tag {:?} not found", value))
        })
    }

    fn to_json(&self) -> Json {
        match self {
            // a bare integer stands for range(n)
            AxisTags::Range(n) => json!(n),
            AxisTags::Ints(v) => json!(v),
            AxisTags::Floats(v) => json!(v),
            AxisTags::Strs(v) => json!(v),
        }
    }

    fn from_json(v: &Json) -> Result<AxisTags> {
        if let Some(n) = v.as_u64() {
            return Ok(AxisTags::Range(n as usize));
        }
        match AttrValue::from_json(v) {
            Some(AttrValue::IntList(v)) => Ok(AxisTags::Ints(v)),
            Some(AttrValue::FloatList(v)) => Ok(AxisTags::Floats(v)),
            Some(AttrValue::StrList(v)) => Ok(AxisTags::Strs(v)),
            _ => Err(StoreError::Serialization(format!(
                "cannot decode axis tags from {}",
                v
            ))),
        }
    }
}

/// Ordered list of named axes with their tag values.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDescr {
    pub axes: Vec<(String, AxisTags)>,
}

impl ShapeDescr {
    pub fn new(axes: Vec<(String, AxisTags)>) -> Self {
        ShapeDescr { axes }
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.axes.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&AxisTags> {
        self.axes.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }
}

/// Attach a shape descriptor to the dataset at `path`.
///
/// `axes` must name every dimension of the dataset, in order; `extra`
/// entries become ordinary attributes. The descriptor itself is encoded as
/// the single `json` attribute.
pub fn set_shape_descr(
    file: &StoreFile,
    path: &str,
    axes: Vec<(String, AxisTags)>,
    extra: &AttrMap,
) -> Result<()> {
    let ndim = file.dataset_shape(path)?.len();
    if axes.len() < ndim {
        return Err(StoreError::ShapeMismatch(format!(
            "the dataset {} has {} dimensions but only {} axes were passed",
            path,
            ndim,
            axes.len()
        )));
    }
    let mut dic = std::collections::BTreeMap::new();
    dic.insert(
        "shape_descr".to_string(),
        json!(axes.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>()),
    );
    for (name, tags) in &axes {
        dic.insert(name.clone(), tags.to_json());
    }
    file.set_attr(path, JSON_ATTR, AttrValue::Str(attrs::dumps(&dic)))?;
    if !extra.is_empty() {
        file.set_attrs(path, &attrs::sanitize_all(extra.clone()))?;
    }
    Ok(())
}

/// Decode a shape descriptor from its JSON payload.
pub fn get_shape_descr(s: &str) -> Result<ShapeDescr> {
    let map = attrs::loads(s)?;
    let names = match map.get("shape_descr") {
        Some(Json::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str().map(str::to_string).ok_or_else(|| {
                    StoreError::Serialization("shape_descr must hold axis names".to_string())
                })
            })
            .collect::<Result<Vec<_>>>()?,
        _ => {
            return Err(StoreError::Serialization(
                "missing shape_descr in json attribute".to_string(),
            ))
        }
    };
    let mut axes = Vec::with_capacity(names.len());
    for name in names {
        let tags = map
            .get(&name)
            .ok_or_else(|| StoreError::KeyNotFound(name.clone()))
            .and_then(AxisTags::from_json)?;
        axes.push((name, tags));
    }
    Ok(ShapeDescr::new(axes))
}

fn descr_of(file: &StoreFile, path: &str) -> Result<ShapeDescr> {
    match file.get_attr(path, JSON_ATTR)? {
        Some(AttrValue::Str(s)) => get_shape_descr(&s),
        _ => Err(StoreError::KeyNotFound(format!(
            "{} has no shape descriptor",
            path
        ))),
    }
}

/// Select from a named-axis dataset: every filtered axis is narrowed to a
/// length-1 slice, unfiltered axes keep their full extent; rank is
/// preserved.
pub fn sel(file: &StoreFile, path: &str, filters: &[(String, AttrValue)]) -> Result<ArrayData> {
    let descr = descr_of(file, path)?;
    let arr = file.read_array(path)?;
    let mut cuts = Vec::new();
    for (axis, (name, tags)) in descr.axes.iter().enumerate() {
        if let Some((_, value)) = filters.iter().find(|(n, _)| n == name) {
            cuts.push((axis, tags.index_of(value)?));
        }
    }
    Ok(arr.narrow_axes(&cuts))
}

/// Long-format conversion: one output row per combination of tags over the
/// axes not fixed by `filters` (cartesian product, axis order preserved),
/// carrying every axis's tag values plus the scalar at that multi-index.
pub fn dset2df(
    file: &StoreFile,
    path: &str,
    index: Option<&str>,
    filters: &[(String, AttrValue)],
) -> Result<DataFrame> {
    let descr = descr_of(file, path)?;
    let arr = file.read_array(path)?;
    if descr.len() != arr.ndim() {
        return Err(StoreError::ShapeMismatch(format!(
            "{}: descriptor names {} axes but the array has {} dimensions",
            path,
            descr.len(),
            arr.ndim()
        )));
    }

    let mut idx_lists: Vec<Vec<usize>> = Vec::with_capacity(descr.len());
    for (name, tags) in &descr.axes {
        match filters.iter().find(|(n, _)| n == name) {
            Some((_, value)) => idx_lists.push(vec![tags.index_of(value)?]),
            None => idx_lists.push((0..tags.len()).collect()),
        }
    }
    let combos = cartesian(&idx_lists);

    let mut df = DataFrame::new();
    for (axis, (name, tags)) in descr.axes.iter().enumerate() {
        let col = column_from_tags(tags, combos.iter().map(|c| c[axis]));
        df.push_column(name.clone(), col)?;
    }
    let values: Vec<AttrValue> = combos.iter().map(|c| arr.scalar_at(c)).collect();
    df.push_column("value", column_from_values(&arr, values))?;
    if let Some(index) = index {
        df.set_index(index)?;
    }
    Ok(df)
}

fn cartesian(lists: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut out: Vec<Vec<usize>> = vec![Vec::new()];
    for list in lists {
        let mut next = Vec::with_capacity(out.len() * list.len());
        for prefix in &out {
            for &i in list {
                let mut combo = prefix.clone();
                combo.push(i);
                next.push(combo);
            }
        }
        out = next;
    }
    out
}

pub(crate) fn column_from_tags(tags: &AxisTags, idxs: impl Iterator<Item = usize>) -> ColumnData {
    match tags {
        AxisTags::Range(_) => ColumnData::Int64(idxs.map(|i| i as i64).collect()),
        AxisTags::Ints(v) => ColumnData::Int64(idxs.map(|i| v[i]).collect()),
        AxisTags::Floats(v) => ColumnData::Float64(idxs.map(|i| v[i]).collect()),
        AxisTags::Strs(v) => ColumnData::Str(idxs.map(|i| v[i].clone()).collect()),
    }
}

fn column_from_values(arr: &ArrayData, values: Vec<AttrValue>) -> ColumnData {
    match arr {
        ArrayData::Bool(_) => ColumnData::Bool(
            values.iter().filter_map(|v| match v {
                AttrValue::Bool(b) => Some(*b),
                _ => None,
            }).collect(),
        ),
        ArrayData::Int64(_) => ColumnData::Int64(
            values.iter().filter_map(AttrValue::as_i64).collect(),
        ),
        ArrayData::Float64(_) => ColumnData::Float64(
            values.iter().filter_map(AttrValue::as_f64).collect(),
        ),
        ArrayData::Str(_) => ColumnData::Str(
            values.into_iter().filter_map(|v| match v {
                AttrValue::Str(s) => Some(s),
                _ => None,
            }).collect(),
        ),
    }
}
