//! Value model: dataset dtypes, attribute values and N-dimensional payloads.

use std::collections::BTreeMap;

use ndarray::{concatenate, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

use crate::{Result, StoreError};

/// Dataset element type.
///
/// Integer widths collapse to `Int64` and float widths to `Float64`; the
/// engine stores the widest representation and callers narrow on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Dtype {
    Bool,
    Int64,
    Float64,
    /// Variable-length UTF-8 text.
    Str,
    /// Opaque binary scalar.
    Bytes,
    /// Ragged rows of float64 (variable-length elements).
    VlenFloat64,
}

impl Dtype {
    pub fn is_variable_length(&self) -> bool {
        matches!(self, Dtype::Str | Dtype::VlenFloat64)
    }
}

/// An attribute value attachable to any node.
///
/// `BigInt` is constructible (so oversized integers can flow into
/// [`crate::attrs::sanitize`]) but is not storage-safe: the container layer
/// rejects it at attribute-write time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    BigInt(i128),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
    StrList(Vec<String>),
}

pub type AttrMap = BTreeMap<String, AttrValue>;

impl AttrValue {
    /// Build from an arbitrary-width integer, widening to `BigInt` when the
    /// value does not fit the exact i64 range.
    pub fn from_int(v: i128) -> Self {
        if v >= i64::MIN as i128 && v <= i64::MAX as i128 {
            AttrValue::Int(v as i64)
        } else {
            AttrValue::BigInt(v)
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttrValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttrValue::Float(v) => Some(*v),
            AttrValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// JSON projection used by the compact attribute dialect.
    /// Byte strings are decoded to text first.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{json, Value};
        match self {
            AttrValue::Bool(b) => json!(b),
            AttrValue::Int(v) => json!(v),
            AttrValue::BigInt(v) => json!(*v as f64),
            AttrValue::Float(v) => json!(v),
            AttrValue::Str(s) => json!(s),
            AttrValue::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            AttrValue::IntList(v) => json!(v),
            AttrValue::FloatList(v) => json!(v),
            AttrValue::StrList(v) => json!(v),
        }
    }

    /// Inverse of [`AttrValue::to_json`] for the value shapes the dialect
    /// produces. Returns `None` for nested objects.
    pub fn from_json(v: &serde_json::Value) -> Option<AttrValue> {
        use serde_json::Value;
        match v {
            Value::Bool(b) => Some(AttrValue::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(AttrValue::Int(i))
                } else {
                    n.as_f64().map(AttrValue::Float)
                }
            }
            Value::String(s) => Some(AttrValue::Str(s.clone())),
            Value::Array(items) => {
                if items.iter().all(|x| x.as_i64().is_some()) {
                    Some(AttrValue::IntList(
                        items.iter().map(|x| x.as_i64().unwrap()).collect(),
                    ))
                } else if items.iter().all(|x| x.as_f64().is_some()) {
                    Some(AttrValue::FloatList(
                        items.iter().map(|x| x.as_f64().unwrap()).collect(),
                    ))
                } else if items.iter().all(|x| x.is_string()) {
                    Some(AttrValue::StrList(
                        items.iter().map(|x| x.as_str().unwrap().to_string()).collect(),
                    ))
                } else {
                    None
                }
            }
            _ => None,
        }
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        AttrValue::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        AttrValue::Int(v)
    }
}

impl From<u64> for AttrValue {
    fn from(v: u64) -> Self {
        AttrValue::from_int(v as i128)
    }
}

impl From<i128> for AttrValue {
    fn from(v: i128) -> Self {
        AttrValue::from_int(v)
    }
}

impl From<u128> for AttrValue {
    fn from(v: u128) -> Self {
        // values above i128::MAX lose exactness immediately
        if v <= i128::MAX as u128 {
            AttrValue::from_int(v as i128)
        } else {
            AttrValue::Float(v as f64)
        }
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        AttrValue::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        AttrValue::Str(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        AttrValue::Str(v)
    }
}

/// A typed N-dimensional array payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayData {
    Bool(ArrayD<bool>),
    Int64(ArrayD<i64>),
    Float64(ArrayD<f64>),
    Str(ArrayD<String>),
}

macro_rules! for_each_variant {
    ($self:expr, $arr:ident => $body:expr) => {
        match $self {
            ArrayData::Bool($arr) => $body,
            ArrayData::Int64($arr) => $body,
            ArrayData::Float64($arr) => $body,
            ArrayData::Str($arr) => $body,
        }
    };
}

impl ArrayData {
    pub fn dtype(&self) -> Dtype {
        match self {
            ArrayData::Bool(_) => Dtype::Bool,
            ArrayData::Int64(_) => Dtype::Int64,
            ArrayData::Float64(_) => Dtype::Float64,
            ArrayData::Str(_) => Dtype::Str,
        }
    }

    pub fn shape(&self) -> &[usize] {
        for_each_variant!(self, a => a.shape())
    }

    pub fn ndim(&self) -> usize {
        for_each_variant!(self, a => a.ndim())
    }

    /// Length along the leading (growable) dimension; 0 for a 0-d array.
    pub fn len(&self) -> usize {
        let shape = self.shape();
        if shape.is_empty() {
            0
        } else {
            shape[0]
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shape without the leading dimension.
    pub fn trailing(&self) -> Vec<usize> {
        let shape = self.shape();
        if shape.is_empty() {
            Vec::new()
        } else {
            shape[1..].to_vec()
        }
    }

    /// Zero-length array of the given dtype with the given trailing shape.
    pub fn empty(dtype: Dtype, trailing: &[usize]) -> Result<ArrayData> {
        let mut shape = vec![0];
        shape.extend_from_slice(trailing);
        let ix = IxDyn(&shape);
        Ok(match dtype {
            Dtype::Bool => ArrayData::Bool(ArrayD::from_elem(ix, false)),
            Dtype::Int64 => ArrayData::Int64(ArrayD::from_elem(ix, 0)),
            Dtype::Float64 => ArrayData::Float64(ArrayD::from_elem(ix, 0.0)),
            Dtype::Str => ArrayData::Str(ArrayD::from_elem(ix, String::new())),
            other => {
                return Err(StoreError::DtypeMismatch {
                    expected: Dtype::Float64,
                    actual: other,
                })
            }
        })
    }

    /// Fixed array filled with `fill` (or the dtype's zero value).
    pub fn filled(dtype: Dtype, shape: &[usize], fill: Option<f64>) -> Result<ArrayData> {
        let ix = IxDyn(shape);
        Ok(match dtype {
            Dtype::Bool => ArrayData::Bool(ArrayD::from_elem(ix, fill.map_or(false, |f| f != 0.0))),
            Dtype::Int64 => ArrayData::Int64(ArrayD::from_elem(ix, fill.unwrap_or(0.0) as i64)),
            Dtype::Float64 => ArrayData::Float64(ArrayD::from_elem(ix, fill.unwrap_or(0.0))),
            Dtype::Str => ArrayData::Str(ArrayD::from_elem(ix, String::new())),
            other => {
                return Err(StoreError::DtypeMismatch {
                    expected: Dtype::Float64,
                    actual: other,
                })
            }
        })
    }

    /// 1-d array from a vector of strings.
    pub fn from_strings(values: Vec<String>) -> ArrayData {
        let n = values.len();
        ArrayData::Str(ArrayD::from_shape_vec(IxDyn(&[n]), values).unwrap())
    }

    /// Concatenate `other` onto `self` along the leading axis.
    pub fn concat(&self, other: &ArrayData) -> Result<ArrayData> {
        if self.dtype() != other.dtype() {
            return Err(StoreError::DtypeMismatch {
                expected: self.dtype(),
                actual: other.dtype(),
            });
        }
        if self.trailing() != other.trailing() {
            return Err(StoreError::ShapeMismatch(format!(
                "trailing shape {:?} != {:?}",
                self.trailing(),
                other.trailing()
            )));
        }
        fn cat<T: Clone>(a: &ArrayD<T>, b: &ArrayD<T>) -> Result<ArrayD<T>> {
            concatenate(Axis(0), &[a.view(), b.view()])
                .map_err(|e| StoreError::ShapeMismatch(e.to_string()))
        }
        Ok(match (self, other) {
            (ArrayData::Bool(a), ArrayData::Bool(b)) => ArrayData::Bool(cat(a, b)?),
            (ArrayData::Int64(a), ArrayData::Int64(b)) => ArrayData::Int64(cat(a, b)?),
            (ArrayData::Float64(a), ArrayData::Float64(b)) => ArrayData::Float64(cat(a, b)?),
            (ArrayData::Str(a), ArrayData::Str(b)) => ArrayData::Str(cat(a, b)?),
            _ => unreachable!("dtype checked above"),
        })
    }

    /// Rows `start..end` along the leading axis, as an owned array.
    pub fn slice_rows(&self, start: usize, end: usize) -> ArrayData {
        let slc = Slice::new(start as isize, Some(end as isize), 1);
        match self {
            ArrayData::Bool(a) => ArrayData::Bool(a.slice_axis(Axis(0), slc).to_owned()),
            ArrayData::Int64(a) => ArrayData::Int64(a.slice_axis(Axis(0), slc).to_owned()),
            ArrayData::Float64(a) => ArrayData::Float64(a.slice_axis(Axis(0), slc).to_owned()),
            ArrayData::Str(a) => ArrayData::Str(a.slice_axis(Axis(0), slc).to_owned()),
        }
    }

    /// Narrow each `(axis, index)` pair to a length-1 slice, preserving rank.
    pub fn narrow_axes(&self, cuts: &[(usize, usize)]) -> ArrayData {
        fn narrow<T: Clone>(a: &ArrayD<T>, cuts: &[(usize, usize)]) -> ArrayD<T> {
            let mut v = a.view();
            for &(ax, idx) in cuts {
                v = v.slice_axis_move(
                    Axis(ax),
                    Slice::new(idx as isize, Some(idx as isize + 1), 1),
                );
            }
            v.to_owned()
        }
        match self {
            ArrayData::Bool(a) => ArrayData::Bool(narrow(a, cuts)),
            ArrayData::Int64(a) => ArrayData::Int64(narrow(a, cuts)),
            ArrayData::Float64(a) => ArrayData::Float64(narrow(a, cuts)),
            ArrayData::Str(a) => ArrayData::Str(narrow(a, cuts)),
        }
    }

    /// The scalar at a full multi-index.
    pub fn scalar_at(&self, idx: &[usize]) -> AttrValue {
        match self {
            ArrayData::Bool(a) => AttrValue::Bool(a[IxDyn(idx)]),
            ArrayData::Int64(a) => AttrValue::Int(a[IxDyn(idx)]),
            ArrayData::Float64(a) => AttrValue::Float(a[IxDyn(idx)]),
            ArrayData::Str(a) => AttrValue::Str(a[IxDyn(idx)].clone()),
        }
    }

    /// Rows at the given leading-axis indices, in order.
    pub fn select_rows(&self, indices: &[usize]) -> ArrayData {
        match self {
            ArrayData::Bool(a) => ArrayData::Bool(a.select(Axis(0), indices)),
            ArrayData::Int64(a) => ArrayData::Int64(a.select(Axis(0), indices)),
            ArrayData::Float64(a) => ArrayData::Float64(a.select(Axis(0), indices)),
            ArrayData::Str(a) => ArrayData::Str(a.select(Axis(0), indices)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn test_attr_from_int_widening() {
        assert_eq!(AttrValue::from_int(42), AttrValue::Int(42));
        assert_eq!(AttrValue::from_int(1_i128 << 70), AttrValue::BigInt(1 << 70));
        assert_eq!(AttrValue::from(u64::MAX), AttrValue::BigInt(u64::MAX as i128));
    }

    #[test]
    fn test_attr_json_round_trip() {
        let vals = vec![
            AttrValue::Int(3),
            AttrValue::Float(2.5),
            AttrValue::Str("PGA".into()),
            AttrValue::IntList(vec![1, 2, 3]),
            AttrValue::StrList(vec!["a".into(), "b".into()]),
        ];
        for v in vals {
            let back = AttrValue::from_json(&v.to_json()).unwrap();
            assert_eq!(back, v);
        }
    }

    #[test]
    fn test_concat_and_slice() {
        let a = ArrayData::Int64(arr1(&[1_i64, 2]).into_dyn());
        let b = ArrayData::Int64(arr1(&[3_i64]).into_dyn());
        let c = a.concat(&b).unwrap();
        assert_eq!(c.len(), 3);
        assert_eq!(c.slice_rows(1, 3), ArrayData::Int64(arr1(&[2_i64, 3]).into_dyn()));
        assert_eq!(c.select_rows(&[2, 0]), ArrayData::Int64(arr1(&[3_i64, 1]).into_dyn()));
    }

    #[test]
    fn test_concat_dtype_mismatch() {
        let a = ArrayData::Int64(arr1(&[1_i64]).into_dyn());
        let b = ArrayData::Float64(arr1(&[1.0]).into_dyn());
        assert!(matches!(a.concat(&b), Err(StoreError::DtypeMismatch { .. })));
    }

    #[test]
    fn test_empty_has_trailing_shape() {
        let e = ArrayData::empty(Dtype::Float64, &[3, 2]).unwrap();
        assert_eq!(e.shape(), &[0, 3, 2]);
        assert!(e.is_empty());
        assert_eq!(e.trailing(), vec![3, 2]);
    }
}
