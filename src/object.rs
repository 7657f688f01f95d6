//! Polymorphic record protocol: the store's `set`/`get` entry points.
//!
//! A value is written as one of a closed set of storable shapes
//! ([`StorableValue`]); a custom type participates by implementing
//! [`Persistent`], which pairs a stable reconstruction tag with a
//! `decompose`/`restore` hook pair. On read, the tag stored in the
//! `__pyclass__` attribute is resolved through an explicit registry; an
//! unknown tag is an error, never a silent fallback to raw bytes.
//!
//! Write ordering for tagged records: the payload is flushed before the
//! attributes and the tag are attached, so the reconstruction tag only
//! becomes "live" once the payload is durable.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::Debug;

use ahash::AHashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::attrs;
use crate::data::{ArrayData, AttrMap, AttrValue};
use crate::file::{quote, unquote, DsetPayload, StoreFile};
use crate::{Result, StoreError, PYCLASS_ATTR};

/// The closed set of storable shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum StorableValue {
    /// Nested mapping; one child node per key.
    Group(BTreeMap<String, StorableValue>),
    /// Flat sequence of text (variable-length string array).
    Text(Vec<String>),
    /// Typed N-d array.
    Array(ArrayData),
    /// Numeric rows of differing lengths.
    Ragged(Vec<Vec<f64>>),
    /// Opaque binary scalar.
    Bytes(Vec<u8>),
    /// A bare scalar or small list.
    Attr(AttrValue),
}

impl StorableValue {
    /// Short description used in error messages.
    pub fn repr(&self) -> String {
        match self {
            StorableValue::Group(m) => format!("a group with {} members", m.len()),
            StorableValue::Text(v) => format!("{} strings", v.len()),
            StorableValue::Array(a) => format!("{:?} array of shape {:?}", a.dtype(), a.shape()),
            StorableValue::Ragged(r) => format!("{} ragged rows", r.len()),
            StorableValue::Bytes(b) => format!("{} raw bytes", b.len()),
            StorableValue::Attr(a) => format!("{:?}", a),
        }
    }
}

/// What `get` materializes below a node.
#[derive(Debug)]
pub enum Payload {
    /// Group children, each possibly restored to a typed object.
    Tree(BTreeMap<String, Retrieved>),
    /// Dataset value.
    Leaf(StorableValue),
}

impl Payload {
    pub fn tree(self) -> Result<BTreeMap<String, Retrieved>> {
        match self {
            Payload::Tree(children) => Ok(children),
            Payload::Leaf(v) => Err(StoreError::NotAGroup(v.repr())),
        }
    }

    pub fn leaf(self) -> Result<StorableValue> {
        match self {
            Payload::Leaf(v) => Ok(v),
            Payload::Tree(_) => Err(StoreError::NotADataset("a group".to_string())),
        }
    }
}

/// Result of a `get`: either the raw stored shape or a restored object.
#[derive(Debug)]
pub enum Retrieved {
    Raw { payload: Payload, attrs: AttrMap },
    Object(Box<dyn DynRecord>),
}

impl Retrieved {
    /// Flatten back into a storable shape; fails on restored objects.
    pub fn into_value(self) -> Result<StorableValue> {
        match self {
            Retrieved::Raw { payload: Payload::Leaf(v), .. } => Ok(v),
            Retrieved::Raw { payload: Payload::Tree(children), .. } => {
                let mut map = BTreeMap::new();
                for (k, child) in children {
                    map.insert(k, child.into_value()?);
                }
                Ok(StorableValue::Group(map))
            }
            Retrieved::Object(obj) => Err(StoreError::Serialization(format!(
                "cannot flatten an object restored as {}",
                obj.type_tag()
            ))),
        }
    }

    pub fn into_array(self) -> Result<ArrayData> {
        match self.into_value()? {
            StorableValue::Array(a) => Ok(a),
            other => Err(StoreError::NotADataset(other.repr())),
        }
    }

    pub fn into_text(self) -> Result<Vec<String>> {
        match self.into_value()? {
            StorableValue::Array(ArrayData::Str(a)) => Ok(a.iter().cloned().collect()),
            other => Err(StoreError::NotADataset(other.repr())),
        }
    }

    pub fn attrs(&self) -> Option<&AttrMap> {
        match self {
            Retrieved::Raw { attrs, .. } => Some(attrs),
            Retrieved::Object(_) => None,
        }
    }

    /// Downcast a restored object to its concrete type.
    pub fn downcast_ref<T: Persistent + Debug + Send>(&self) -> Option<&T> {
        match self {
            Retrieved::Object(obj) => obj.as_any().downcast_ref(),
            Retrieved::Raw { .. } => None,
        }
    }
}

/// A type that can round-trip through the store with a stable tag.
pub trait Persistent: Sized + 'static {
    /// Stable reconstruction tag, dotted-name-shaped for format
    /// compatibility.
    const TAG: &'static str;

    /// Split into a storable shape plus attributes.
    fn decompose(&self) -> Result<(StorableValue, AttrMap)>;

    /// Rebuild from the materialized node.
    fn restore(payload: Payload, attrs: AttrMap) -> Result<Self>;
}

/// Object-safe view of a restored record.
pub trait DynRecord: Any + Debug + Send {
    fn as_any(&self) -> &dyn Any;
    fn type_tag(&self) -> &'static str;
}

impl<T: Persistent + Debug + Send> DynRecord for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_tag(&self) -> &'static str {
        T::TAG
    }
}

type RestoreFn = fn(Payload, AttrMap) -> Result<Box<dyn DynRecord>>;

/// Closed registry mapping a reconstruction tag to its restore hook.
static REGISTRY: Lazy<RwLock<AHashMap<&'static str, RestoreFn>>> =
    Lazy::new(|| RwLock::new(AHashMap::new()));

/// Make `T` reconstructible by tag. Idempotent.
pub fn register<T: Persistent + Debug + Send>() {
    REGISTRY.write().insert(T::TAG, |payload, attrs| {
        Ok(Box::new(T::restore(payload, attrs)?) as Box<dyn DynRecord>)
    });
}

/// Write a storable value at `path`, recursing into groups.
pub fn set_value(file: &StoreFile, path: &str, value: &StorableValue) -> Result<()> {
    let wrap = |e: StoreError| StoreError::NodeWrite {
        path: path.to_string(),
        value: value.repr(),
        source: Box::new(e),
    };
    match value {
        StorableValue::Group(map) if map.is_empty() => {
            file.create_group(path).map_err(wrap)
        }
        StorableValue::Group(map) => {
            for (key, child) in map {
                set_value(file, &format!("{}/{}", path, quote(key)), child)?;
            }
            Ok(())
        }
        StorableValue::Text(strings) => file
            .write_array(path, ArrayData::from_strings(strings.clone()))
            .map_err(wrap),
        StorableValue::Array(array) => file.write_array(path, array.clone()).map_err(wrap),
        StorableValue::Ragged(rows) => {
            (|| {
                if !file.exists(path) {
                    crate::dataset::create(
                        file,
                        path,
                        &crate::dataset::DsetSpec::growable(crate::data::Dtype::VlenFloat64, &[]),
                    )?;
                }
                file.append_ragged(path, rows)?;
                Ok(())
            })()
            .map_err(wrap)
        }
        StorableValue::Bytes(data) => file.write_bytes(path, data.clone()).map_err(wrap),
        StorableValue::Attr(scalar) => write_scalar(file, path, scalar).map_err(wrap),
    }
}

/// Native item assignment of a bare scalar or small list.
fn write_scalar(file: &StoreFile, path: &str, value: &AttrValue) -> Result<()> {
    match value {
        AttrValue::Bool(b) => file.write_array(path, ArrayData::Bool(ndarray::arr0(*b).into_dyn())),
        AttrValue::Int(v) => file.write_array(path, ArrayData::Int64(ndarray::arr0(*v).into_dyn())),
        AttrValue::Float(v) => {
            file.write_array(path, ArrayData::Float64(ndarray::arr0(*v).into_dyn()))
        }
        AttrValue::Str(s) => {
            file.write_array(path, ArrayData::Str(ndarray::arr0(s.clone()).into_dyn()))
        }
        AttrValue::Bytes(b) => file.write_bytes(path, b.clone()),
        AttrValue::IntList(v) => file.write_array(
            path,
            ArrayData::Int64(ndarray::ArrayD::from_shape_vec(
                ndarray::IxDyn(&[v.len()]),
                v.clone(),
            ).map_err(|e| StoreError::ShapeMismatch(e.to_string()))?),
        ),
        AttrValue::FloatList(v) => file.write_array(
            path,
            ArrayData::Float64(ndarray::ArrayD::from_shape_vec(
                ndarray::IxDyn(&[v.len()]),
                v.clone(),
            ).map_err(|e| StoreError::ShapeMismatch(e.to_string()))?),
        ),
        AttrValue::StrList(v) => file.write_array(path, ArrayData::from_strings(v.clone())),
        AttrValue::BigInt(_) => Err(StoreError::Serialization(
            "oversized integers must be sanitized before storage".to_string(),
        )),
    }
}

/// Write a tagged record: payload first, durability barrier, then the
/// sanitized attributes plus the reconstruction tag.
pub fn set_obj<T: Persistent>(file: &StoreFile, path: &str, obj: &T) -> Result<()> {
    let (value, obj_attrs) = obj.decompose()?;
    set_value(file, path, &value)?;
    file.flush()?;
    file.set_attrs(path, &attrs::sanitize_all(obj_attrs))?;
    file.set_attr(path, PYCLASS_ATTR, AttrValue::Str(T::TAG.to_string()))
}

fn materialize(file: &StoreFile, path: &str) -> Result<Payload> {
    if file.is_group(path)? {
        let mut children = BTreeMap::new();
        for key in file.children(path)? {
            let child = get(file, &format!("{}/{}", path, key))?;
            children.insert(unquote(&key), child);
        }
        Ok(Payload::Tree(children))
    } else {
        Ok(Payload::Leaf(match file.read_payload(path)? {
            DsetPayload::Array(a) => StorableValue::Array(a),
            DsetPayload::Ragged(r) => StorableValue::Ragged(r),
            DsetPayload::Bytes(b) => StorableValue::Bytes(b),
        }))
    }
}

/// Read the node at `path`, restoring tagged records through the registry.
pub fn get(file: &StoreFile, path: &str) -> Result<Retrieved> {
    let mut node_attrs = file.get_attrs(path)?;
    let tag = match node_attrs.remove(PYCLASS_ATTR) {
        Some(AttrValue::Str(tag)) => Some(tag),
        _ => None,
    };
    let payload = materialize(file, path)?;
    match tag {
        Some(tag) => {
            let restore = REGISTRY
                .read()
                .get(tag.as_str())
                .copied()
                .ok_or(StoreError::UnknownTypeTag(tag))?;
            Ok(Retrieved::Object(restore(payload, node_attrs)?))
        }
        None => Ok(Retrieved::Raw {
            payload,
            attrs: node_attrs,
        }),
    }
}

/// Typed read: the stored tag must match `T::TAG`.
pub fn get_obj<T: Persistent>(file: &StoreFile, path: &str) -> Result<T> {
    let mut node_attrs = file.get_attrs(path)?;
    match node_attrs.remove(PYCLASS_ATTR) {
        Some(AttrValue::Str(tag)) if tag == T::TAG => {}
        Some(AttrValue::Str(tag)) => {
            return Err(StoreError::TagMismatch {
                expected: T::TAG.to_string(),
                actual: tag,
            })
        }
        _ => {
            return Err(StoreError::TagMismatch {
                expected: T::TAG.to_string(),
                actual: "<untagged>".to_string(),
            })
        }
    }
    T::restore(materialize(file, path)?, node_attrs)
}

/// Generic record for mappings that carry their own attributes without a
/// dedicated type.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroupRecord {
    pub fields: BTreeMap<String, StorableValue>,
    pub attrs: AttrMap,
}

impl Persistent for GroupRecord {
    const TAG: &'static str = "seistore.object.GroupRecord";

    fn decompose(&self) -> Result<(StorableValue, AttrMap)> {
        Ok((StorableValue::Group(self.fields.clone()), self.attrs.clone()))
    }

    fn restore(payload: Payload, attrs: AttrMap) -> Result<Self> {
        let mut fields = BTreeMap::new();
        for (key, child) in payload.tree()? {
            fields.insert(key, child.into_value()?);
        }
        Ok(GroupRecord { fields, attrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Mode;
    use ndarray::arr1;
    use tempfile::tempdir;

    fn open_tmp(dir: &tempfile::TempDir) -> StoreFile {
        StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap()
    }

    fn group(entries: Vec<(&str, StorableValue)>) -> StorableValue {
        StorableValue::Group(
            entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        )
    }

    #[test]
    fn test_plain_mapping_round_trip() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let value = group(vec![
            ("mag", StorableValue::Attr(AttrValue::Float(6.5))),
            ("trt", StorableValue::Attr(AttrValue::Str("Active Shallow Crust".into()))),
        ]);
        set_value(&file, "source", &value).unwrap();
        let back = get(&file, "source").unwrap().into_value().unwrap();
        match back {
            StorableValue::Group(map) => {
                assert_eq!(map.len(), 2);
                // scalars come back as 0-d arrays
                assert!(matches!(map["mag"], StorableValue::Array(_)));
            }
            other => panic!("expected group, got {:?}", other),
        }
    }

    #[test]
    fn test_nested_mapping_round_trip() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let inner = group(vec![(
            "gmvs",
            StorableValue::Array(ArrayData::Float64(arr1(&[0.1, 0.2]).into_dyn())),
        )]);
        let value = group(vec![("site_0", inner.clone())]);
        set_value(&file, "gmf", &value).unwrap();
        let back = get(&file, "gmf").unwrap().into_value().unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_quoted_keys_round_trip() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let value = group(vec![(
            "BooreAtkinson2008/PGA",
            StorableValue::Array(ArrayData::Float64(arr1(&[1.0]).into_dyn())),
        )]);
        set_value(&file, "curves", &value).unwrap();
        let back = get(&file, "curves").unwrap().into_value().unwrap();
        assert_eq!(back, value);
    }

    #[derive(Debug, Clone, PartialEq)]
    struct OqParam {
        description: String,
        maximum_distance: f64,
        imtls: Vec<f64>,
    }

    impl Persistent for OqParam {
        const TAG: &'static str = "seistore.tests.OqParam";

        fn decompose(&self) -> Result<(StorableValue, AttrMap)> {
            let mut attrs = AttrMap::new();
            attrs.insert("description".into(), AttrValue::Str(self.description.clone()));
            attrs.insert("maximum_distance".into(), AttrValue::Float(self.maximum_distance));
            let value = StorableValue::Array(ArrayData::Float64(
                arr1(&self.imtls).into_dyn(),
            ));
            Ok((value, attrs))
        }

        fn restore(payload: Payload, attrs: AttrMap) -> Result<Self> {
            let arr = match payload.leaf()? {
                StorableValue::Array(ArrayData::Float64(a)) => a.iter().cloned().collect(),
                other => return Err(StoreError::NotADataset(other.repr())),
            };
            Ok(OqParam {
                description: attrs["description"].as_str().unwrap_or_default().to_string(),
                maximum_distance: attrs["maximum_distance"].as_f64().unwrap_or(0.0),
                imtls: arr,
            })
        }
    }

    #[test]
    fn test_custom_type_round_trip() {
        register::<OqParam>();
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let param = OqParam {
            description: "classical PSHA".to_string(),
            maximum_distance: 200.0,
            imtls: vec![0.01, 0.02, 0.04],
        };
        set_obj(&file, "oqparam", &param).unwrap();

        // typed read
        let back: OqParam = get_obj(&file, "oqparam").unwrap();
        assert_eq!(back, param);

        // dynamic read through the registry
        let dynamic = get(&file, "oqparam").unwrap();
        assert_eq!(dynamic.downcast_ref::<OqParam>(), Some(&param));
    }

    #[test]
    fn test_group_record_round_trip() {
        register::<GroupRecord>();
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let mut rec = GroupRecord::default();
        rec.fields.insert(
            "weights".to_string(),
            StorableValue::Array(ArrayData::Float64(arr1(&[0.3, 0.7]).into_dyn())),
        );
        rec.attrs.insert("seed".to_string(), AttrValue::Int(42));
        set_obj(&file, "lt", &rec).unwrap();
        let back: GroupRecord = get_obj(&file, "lt").unwrap();
        assert_eq!(back, rec);
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        file.write_bytes("mystery", vec![1, 2, 3]).unwrap();
        file.set_attr(
            "mystery",
            PYCLASS_ATTR,
            AttrValue::Str("no.such.module.Type".into()),
        )
        .unwrap();
        match get(&file, "mystery") {
            Err(StoreError::UnknownTypeTag(tag)) => assert_eq!(tag, "no.such.module.Type"),
            other => panic!("expected UnknownTypeTag, got {:?}", other),
        }
    }

    #[test]
    fn test_tag_mismatch_on_typed_read() {
        register::<GroupRecord>();
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let rec = GroupRecord::default();
        set_obj(&file, "lt", &rec).unwrap();
        assert!(matches!(
            get_obj::<OqParam>(&file, "lt"),
            Err(StoreError::TagMismatch { .. })
        ));
    }

    #[test]
    fn test_write_failure_is_wrapped_with_path() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        let bad = StorableValue::Attr(AttrValue::BigInt(1 << 70));
        match set_value(&file, "bad/leaf", &bad) {
            Err(StoreError::NodeWrite { path, source, .. }) => {
                assert_eq!(path, "bad/leaf");
                // the original error class is preserved for inspection
                assert!(matches!(*source, StoreError::Serialization(_)));
            }
            other => panic!("expected NodeWrite, got {:?}", other),
        }
    }

    #[test]
    fn test_bytes_round_trip() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        set_value(&file, "blob", &StorableValue::Bytes(b"seismic".to_vec())).unwrap();
        let back = get(&file, "blob").unwrap().into_value().unwrap();
        assert_eq!(back, StorableValue::Bytes(b"seismic".to_vec()));
    }

    #[test]
    fn test_empty_group_round_trip() {
        let dir = tempdir().unwrap();
        let file = open_tmp(&dir);
        set_value(&file, "empty", &StorableValue::Group(BTreeMap::new())).unwrap();
        match get(&file, "empty").unwrap() {
            Retrieved::Raw { payload: Payload::Tree(children), .. } => {
                assert!(children.is_empty())
            }
            other => panic!("expected empty tree, got {:?}", other),
        }
    }
}
