//! In-memory value type unifying "raw array + named-axis metadata" and
//! "pure metadata, no array".
//!
//! An `ArrayWrapper` carries an optional backing array, an ordered list of
//! "extra" field names (the value columns of its long-format projection;
//! when there is more than one, they share the array's last dimension) and
//! arbitrary scalar/array attributes, including an optional shape
//! descriptor. Construction enforces the dimensional invariants; a wrapper
//! persists through the polymorphic record protocol.

use std::collections::BTreeMap;

use crate::data::{ArrayData, AttrMap, AttrValue};
use crate::dframe::{ColumnData, DataFrame};
use crate::file::StoreFile;
use crate::object::{self, Payload, Persistent, StorableValue};
use crate::shape::{column_from_tags, get_shape_descr, AxisTags};
use crate::{Result, StoreError, JSON_ATTR};

const SHAPE_DESCR: &str = "shape_descr";
const ARRAY_KEY: &str = "array";
const EXTRA_KEY: &str = "extra";

#[derive(Debug, Clone, PartialEq)]
pub struct ArrayWrapper {
    array: Option<ArrayData>,
    extra: Vec<String>,
    attrs: AttrMap,
}

impl ArrayWrapper {
    /// Build a wrapper, enforcing the dimensional invariants:
    /// - with N>1 extra fields, the array's last dimension must equal N;
    /// - with a shape descriptor attached, each axis's tag count must equal
    ///   the matching array dimension.
    pub fn new(array: Option<ArrayData>, extra: Vec<String>, attrs: AttrMap) -> Result<Self> {
        let extra = if extra.is_empty() {
            vec!["value".to_string()]
        } else {
            extra
        };
        let wrapper = ArrayWrapper { array, extra, attrs };
        wrapper.check_invariants()?;
        Ok(wrapper)
    }

    /// Attribute-only wrapper from key/value pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, AttrValue)>) -> Self {
        ArrayWrapper {
            array: None,
            extra: vec!["value".to_string()],
            attrs: pairs.into_iter().collect(),
        }
    }

    /// Read a dataset into a wrapper, lifting an embedded `json` shape
    /// descriptor into discrete attributes.
    pub fn from_dataset(file: &StoreFile, path: &str) -> Result<Self> {
        let array = file.read_array(path)?;
        let mut attrs = file.get_attrs(path)?;
        if let Some(AttrValue::Str(js)) = attrs.remove(JSON_ATTR) {
            let descr = get_shape_descr(&js)?;
            attrs.insert(
                SHAPE_DESCR.to_string(),
                AttrValue::StrList(descr.names().iter().map(|s| s.to_string()).collect()),
            );
            for (name, tags) in descr.axes {
                attrs.insert(name, tags_to_attr(&tags));
            }
        }
        ArrayWrapper::new(Some(array), Vec::new(), attrs)
    }

    fn check_invariants(&self) -> Result<()> {
        let array = match &self.array {
            Some(a) => a,
            None => return Ok(()),
        };
        if self.extra.len() > 1 {
            let last = array.shape().last().copied().unwrap_or(0);
            if last != self.extra.len() {
                return Err(StoreError::ShapeMismatch(format!(
                    "the last dimension is {} but there are {} extra fields",
                    last,
                    self.extra.len()
                )));
            }
        }
        if let Some(names) = self.shape_descr() {
            let expected = self.described_ndim();
            if names.len() != expected {
                return Err(StoreError::ShapeMismatch(format!(
                    "shape_descr names {} axes but the array has {} described dimensions",
                    names.len(),
                    expected
                )));
            }
            for (axis, name) in names.iter().enumerate() {
                let dim = array.shape()[axis];
                let tags = self.axis_tags(name, dim);
                if tags.len() != dim {
                    return Err(StoreError::ShapeMismatch(format!(
                        "axis {} has {} tags but dimension {} is {}",
                        name,
                        tags.len(),
                        axis,
                        dim
                    )));
                }
            }
        }
        Ok(())
    }

    /// Number of dimensions covered by the shape descriptor (the trailing
    /// extra-field dimension is excluded when there is more than one).
    fn described_ndim(&self) -> usize {
        let ndim = self.array.as_ref().map_or(0, ArrayData::ndim);
        if self.extra.len() > 1 {
            ndim.saturating_sub(1)
        } else {
            ndim
        }
    }

    pub fn array(&self) -> Option<&ArrayData> {
        self.array.as_ref()
    }

    pub fn extra(&self) -> &[String] {
        &self.extra
    }

    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    pub fn shape_descr(&self) -> Option<Vec<String>> {
        match self.attrs.get(SHAPE_DESCR) {
            Some(AttrValue::StrList(names)) => Some(names.clone()),
            _ => None,
        }
    }

    fn axis_tags(&self, name: &str, dim: usize) -> AxisTags {
        match self.attrs.get(name) {
            Some(AttrValue::Int(n)) => AxisTags::Range(*n as usize),
            Some(AttrValue::IntList(v)) => AxisTags::Ints(v.clone()),
            Some(AttrValue::FloatList(v)) => AxisTags::Floats(v.clone()),
            Some(AttrValue::StrList(v)) => AxisTags::Strs(v.clone()),
            _ => AxisTags::Range(dim),
        }
    }

    /// Flat dict projection of the attribute set.
    pub fn to_dict(&self) -> BTreeMap<String, serde_json::Value> {
        crate::attrs::json_of_attrs(&self.attrs)
    }

    /// Compact JSON projection (the flat-config form).
    pub fn to_json(&self) -> String {
        crate::attrs::dumps(&self.to_dict())
    }

    /// Long-format projection: one row per tag combination, carrying each
    /// axis's tag plus one column per extra field. Rows whose values sum to
    /// zero are dropped when `skip_zeros`.
    pub fn to_dframe(&self, skip_zeros: bool) -> Result<DataFrame> {
        let array = self.array.as_ref().ok_or_else(|| {
            StoreError::ShapeMismatch("cannot tabulate a wrapper without an array".to_string())
        })?;
        if !matches!(array, ArrayData::Int64(_) | ArrayData::Float64(_)) {
            return Err(StoreError::ShapeMismatch(
                "only numeric arrays can be tabulated".to_string(),
            ));
        }
        let names = self.shape_descr().ok_or_else(|| {
            StoreError::ShapeMismatch("cannot tabulate a wrapper without a shape_descr".to_string())
        })?;
        let shape = array.shape().to_vec();
        let axes: Vec<AxisTags> = names
            .iter()
            .enumerate()
            .map(|(i, name)| self.axis_tags(name, shape[i]))
            .collect();

        // odometer over the described dimensions
        let mut combos: Vec<Vec<usize>> = vec![Vec::new()];
        for tags in &axes {
            let mut next = Vec::with_capacity(combos.len() * tags.len());
            for prefix in &combos {
                for i in 0..tags.len() {
                    let mut combo = prefix.clone();
                    combo.push(i);
                    next.push(combo);
                }
            }
            combos = next;
        }

        let values_of = |combo: &[usize]| -> Vec<f64> {
            if self.extra.len() > 1 {
                (0..self.extra.len())
                    .map(|j| {
                        let mut idx = combo.to_vec();
                        idx.push(j);
                        array.scalar_at(&idx).as_f64().unwrap_or(0.0)
                    })
                    .collect()
            } else {
                vec![array.scalar_at(combo).as_f64().unwrap_or(0.0)]
            }
        };

        let keep: Vec<Vec<usize>> = combos
            .into_iter()
            .filter(|combo| {
                !skip_zeros || values_of(combo).iter().sum::<f64>() != 0.0
            })
            .collect();

        let mut df = DataFrame::new();
        for (axis, name) in names.iter().enumerate() {
            let col = column_from_tags(&axes[axis], keep.iter().map(|c| c[axis]));
            df.push_column(name.clone(), col)?;
        }
        for (j, field) in self.extra.iter().enumerate() {
            let col = match array {
                ArrayData::Int64(_) => ColumnData::Int64(
                    keep.iter().map(|c| values_of(c)[j] as i64).collect(),
                ),
                _ => ColumnData::Float64(keep.iter().map(|c| values_of(c)[j]).collect()),
            };
            df.push_column(field.clone(), col)?;
        }
        Ok(df)
    }

    /// Persist under `path` and flush.
    pub fn save(&self, file: &StoreFile, path: &str) -> Result<()> {
        object::set_obj(file, path, self)?;
        file.flush()
    }
}

fn tags_to_attr(tags: &AxisTags) -> AttrValue {
    match tags {
        AxisTags::Range(n) => AttrValue::Int(*n as i64),
        AxisTags::Ints(v) => AttrValue::IntList(v.clone()),
        AxisTags::Floats(v) => AttrValue::FloatList(v.clone()),
        AxisTags::Strs(v) => AttrValue::StrList(v.clone()),
    }
}

impl Persistent for ArrayWrapper {
    const TAG: &'static str = "seistore.wrapper.ArrayWrapper";

    fn decompose(&self) -> Result<(StorableValue, AttrMap)> {
        let mut fields = BTreeMap::new();
        let mut attrs = AttrMap::new();
        if let Some(names) = self.shape_descr() {
            fields.insert(SHAPE_DESCR.to_string(), StorableValue::Text(names.clone()));
            for (axis, name) in names.iter().enumerate() {
                let dim = self.array.as_ref().map_or(0, |a| a.shape()[axis]);
                let tags = self.axis_tags(name, dim);
                fields.insert(name.clone(), tags_value(&tags));
            }
        }
        if let Some(array) = &self.array {
            fields.insert(ARRAY_KEY.to_string(), StorableValue::Array(array.clone()));
        }
        fields.insert(EXTRA_KEY.to_string(), StorableValue::Text(self.extra.clone()));
        // scalar attributes that are not axis metadata travel as attrs
        let descr_names = self.shape_descr().unwrap_or_default();
        for (key, value) in &self.attrs {
            if key != SHAPE_DESCR && !descr_names.iter().any(|n| n == key) {
                attrs.insert(key.clone(), value.clone());
            }
        }
        Ok((StorableValue::Group(fields), attrs))
    }

    fn restore(payload: Payload, attrs: AttrMap) -> Result<Self> {
        let mut children = payload.tree()?;
        let mut all_attrs = attrs;
        let extra = match children.remove(EXTRA_KEY) {
            Some(child) => child.into_text()?,
            None => vec!["value".to_string()],
        };
        let array = match children.remove(ARRAY_KEY) {
            Some(child) => Some(child.into_array()?),
            None => None,
        };
        if let Some(child) = children.remove(SHAPE_DESCR) {
            let names = child.into_text()?;
            for name in &names {
                if let Some(tags) = children.remove(name) {
                    all_attrs.insert(name.clone(), array_to_attr(tags.into_array()?)?);
                }
            }
            all_attrs.insert(SHAPE_DESCR.to_string(), AttrValue::StrList(names));
        }
        ArrayWrapper::new(array, extra, all_attrs)
    }
}

fn tags_value(tags: &AxisTags) -> StorableValue {
    match tags {
        AxisTags::Range(n) => StorableValue::Array(ArrayData::Int64(
            ndarray::Array1::from_iter(0..*n as i64).into_dyn(),
        )),
        AxisTags::Ints(v) => StorableValue::Array(ArrayData::Int64(
            ndarray::Array1::from_vec(v.clone()).into_dyn(),
        )),
        AxisTags::Floats(v) => StorableValue::Array(ArrayData::Float64(
            ndarray::Array1::from_vec(v.clone()).into_dyn(),
        )),
        AxisTags::Strs(v) => StorableValue::Text(v.clone()),
    }
}

fn array_to_attr(array: ArrayData) -> Result<AttrValue> {
    match array {
        ArrayData::Int64(a) => Ok(AttrValue::IntList(a.iter().cloned().collect())),
        ArrayData::Float64(a) => Ok(AttrValue::FloatList(a.iter().cloned().collect())),
        ArrayData::Str(a) => Ok(AttrValue::StrList(a.iter().cloned().collect())),
        other => Err(StoreError::ShapeMismatch(format!(
            "axis tags cannot be {:?}",
            other.dtype()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Mode;
    use ndarray::{arr2, Array3};
    use tempfile::tempdir;

    fn haz_attrs() -> AttrMap {
        let mut attrs = AttrMap::new();
        attrs.insert(
            "shape_descr".to_string(),
            AttrValue::StrList(vec!["sid".into(), "imt".into()]),
        );
        attrs.insert("sid".to_string(), AttrValue::IntList(vec![0, 1]));
        attrs.insert(
            "imt".to_string(),
            AttrValue::StrList(vec!["PGA".into(), "SA".into()]),
        );
        attrs
    }

    #[test]
    fn test_invariant_enforced() {
        let arr = ArrayData::Float64(arr2(&[[0.1, 0.0], [0.3, 0.4], [0.0, 0.6]]).into_dyn());
        // three rows but only two sid tags
        let err = ArrayWrapper::new(Some(arr), Vec::new(), haz_attrs()).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch(_)));
    }

    #[test]
    fn test_matched_construction() {
        let arr = ArrayData::Float64(arr2(&[[0.1, 0.0], [0.3, 0.4]]).into_dyn());
        assert!(ArrayWrapper::new(Some(arr), Vec::new(), haz_attrs()).is_ok());
    }

    #[test]
    fn test_extra_field_dimension_check() {
        let arr = ArrayData::Float64(arr2(&[[0.1, 0.2], [0.3, 0.4]]).into_dyn());
        let extra = vec!["mean".to_string(), "std".to_string(), "max".to_string()];
        let err = ArrayWrapper::new(Some(arr), extra, AttrMap::new()).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch(_)));

        let arr = ArrayData::Float64(arr2(&[[0.1, 0.2], [0.3, 0.4]]).into_dyn());
        let extra = vec!["mean".to_string(), "std".to_string()];
        assert!(ArrayWrapper::new(Some(arr), extra, AttrMap::new()).is_ok());
    }

    #[test]
    fn test_to_dframe_skips_zero_rows() {
        let arr = ArrayData::Float64(arr2(&[[0.1, 0.0], [0.3, 0.4]]).into_dyn());
        let aw = ArrayWrapper::new(Some(arr), Vec::new(), haz_attrs()).unwrap();
        let df = aw.to_dframe(true).unwrap();
        assert_eq!(df.len(), 3); // the (0, 'SA') zero cell is dropped
        assert_eq!(df.names(), vec!["sid", "imt", "value"]);

        let full = aw.to_dframe(false).unwrap();
        assert_eq!(full.len(), 4);
        assert_eq!(
            full.column("value"),
            Some(&ColumnData::Float64(vec![0.1, 0.0, 0.3, 0.4]))
        );
    }

    #[test]
    fn test_to_dframe_multiple_extra_fields() {
        let arr = ArrayData::Float64(
            Array3::from_shape_fn((2, 1, 2), |(s, _, j)| (s * 10 + j) as f64 + 1.0).into_dyn(),
        );
        let mut attrs = AttrMap::new();
        attrs.insert(
            "shape_descr".to_string(),
            AttrValue::StrList(vec!["sid".into(), "rlz".into()]),
        );
        attrs.insert("sid".to_string(), AttrValue::IntList(vec![7, 8]));
        attrs.insert("rlz".to_string(), AttrValue::Int(1));
        let aw = ArrayWrapper::new(
            Some(arr),
            vec!["mean".to_string(), "std".to_string()],
            attrs,
        )
        .unwrap();
        let df = aw.to_dframe(false).unwrap();
        assert_eq!(df.names(), vec!["sid", "rlz", "mean", "std"]);
        assert_eq!(df.column("mean"), Some(&ColumnData::Float64(vec![1.0, 11.0])));
        assert_eq!(df.column("std"), Some(&ColumnData::Float64(vec![2.0, 12.0])));
    }

    #[test]
    fn test_save_and_restore() {
        crate::object::register::<ArrayWrapper>();
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        let arr = ArrayData::Float64(arr2(&[[0.1, 0.0], [0.3, 0.4]]).into_dyn());
        let mut attrs = haz_attrs();
        attrs.insert("investigation_time".to_string(), AttrValue::Float(50.0));
        let aw = ArrayWrapper::new(Some(arr), Vec::new(), attrs).unwrap();
        aw.save(&file, "hcurves").unwrap();

        let back: ArrayWrapper = crate::object::get_obj(&file, "hcurves").unwrap();
        assert_eq!(back, aw);
    }

    #[test]
    fn test_from_dataset_lifts_json_descr() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        file.write_array(
            "gmv",
            ArrayData::Float64(arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn()),
        )
        .unwrap();
        crate::shape::set_shape_descr(
            &file,
            "gmv",
            vec![
                ("eid".to_string(), AxisTags::Ints(vec![10, 11])),
                ("imt".to_string(), AxisTags::Strs(vec!["PGA".into(), "SA".into()])),
            ],
            &AttrMap::new(),
        )
        .unwrap();
        let aw = ArrayWrapper::from_dataset(&file, "gmv").unwrap();
        assert_eq!(aw.shape_descr(), Some(vec!["eid".to_string(), "imt".to_string()]));
        assert_eq!(aw.attrs().get("eid"), Some(&AttrValue::IntList(vec![10, 11])));
    }

    #[test]
    fn test_from_pairs_is_attrs_only() {
        let aw = ArrayWrapper::from_pairs(vec![
            ("calculation_mode".to_string(), AttrValue::Str("classical".into())),
        ]);
        assert!(aw.array().is_none());
        assert_eq!(aw.extra(), &["value".to_string()]);
        assert!(aw.to_dframe(true).is_err());
    }
}
