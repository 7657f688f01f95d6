//! Attribute sanitization and the compact JSON attribute dialect.
//!
//! `sanitize` converts arbitrary attribute values into container-safe forms;
//! `dumps` encodes a nested mapping as the single-attribute JSON payload used
//! by the shape-descriptor codec. Both are pure; the container layer wraps
//! any failure at the write site with the field name and value.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use crate::data::{AttrMap, AttrValue};
use crate::{Result, StoreError};

/// Convert a value into a container-attribute-safe form.
///
/// Rules, in order:
/// - raw bytes stay an opaque binary scalar;
/// - a text list stays a fixed string array;
/// - an integer exceeding the exact i64 range is downcast to float
///   (a documented lossy behavior, preserved for format compatibility);
/// - everything else passes through unchanged.
pub fn sanitize(value: AttrValue) -> AttrValue {
    match value {
        AttrValue::BigInt(v) => AttrValue::Float(v as f64),
        other => other,
    }
}

/// Sanitize every entry of a map.
pub fn sanitize_all(attrs: AttrMap) -> AttrMap {
    attrs.into_iter().map(|(k, v)| (k, sanitize(v))).collect()
}

/// Encode a mapping as the compact JSON dialect: one `"key": value` pair per
/// line, skipping `Null` values and keys starting with an underscore.
/// Byte strings must be pre-decoded by the caller ([`AttrValue::to_json`]
/// does this); tagged custom values are pre-encoded as `{"<tag>": fields}`
/// objects and pass through the generic encoder.
pub fn dumps(dic: &BTreeMap<String, Json>) -> String {
    let mut lines = Vec::with_capacity(dic.len());
    for (key, val) in dic {
        if key.starts_with('_') || val.is_null() {
            continue;
        }
        lines.push(format!("\"{}\": {}", key, val));
    }
    format!("{{\n{}\n}}", lines.join(",\n"))
}

/// Decode a compact-dialect payload back into a JSON object.
pub fn loads(s: &str) -> Result<serde_json::Map<String, Json>> {
    match serde_json::from_str::<Json>(s) {
        Ok(Json::Object(map)) => Ok(map),
        Ok(other) => Err(StoreError::Serialization(format!(
            "expected a JSON object, got {}",
            other
        ))),
        Err(e) => Err(StoreError::Serialization(e.to_string())),
    }
}

/// Project an attribute map into the JSON dialect's value space.
pub fn json_of_attrs(attrs: &AttrMap) -> BTreeMap<String, Json> {
    attrs.iter().map(|(k, v)| (k.clone(), v.to_json())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sanitize_bytes_opaque() {
        let v = sanitize(AttrValue::Bytes(b"abc".to_vec()));
        assert_eq!(v, AttrValue::Bytes(b"abc".to_vec()));
    }

    #[test]
    fn test_sanitize_text_list() {
        let v = sanitize(AttrValue::StrList(vec!["a".into(), "b".into()]));
        assert_eq!(v, AttrValue::StrList(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_sanitize_oversized_int() {
        let big = AttrValue::from_int(1_i128 << 70);
        match sanitize(big) {
            AttrValue::Float(f) => assert_eq!(f, (1_i128 << 70) as f64),
            other => panic!("expected float, got {:?}", other),
        }
        // in-range integers are untouched
        assert_eq!(sanitize(AttrValue::Int(7)), AttrValue::Int(7));
    }

    #[test]
    fn test_dumps_skips_null_and_private() {
        let mut dic = BTreeMap::new();
        dic.insert("imt".to_string(), json!("PGA"));
        dic.insert("weight".to_string(), Json::Null);
        dic.insert("_internal".to_string(), json!(1));
        dic.insert("sids".to_string(), json!([0, 1, 2]));
        let s = dumps(&dic);
        assert!(s.contains("\"imt\": \"PGA\""));
        assert!(s.contains("\"sids\": [0,1,2]"));
        assert!(!s.contains("weight"));
        assert!(!s.contains("_internal"));
        // one pair per line
        assert_eq!(s.lines().count(), 4);
    }

    #[test]
    fn test_dumps_loads_round_trip() {
        let mut dic = BTreeMap::new();
        dic.insert("shape_descr".to_string(), json!(["sid", "imt"]));
        dic.insert("sid".to_string(), json!(3));
        dic.insert("imt".to_string(), json!(["PGA", "SA"]));
        let map = loads(&dumps(&dic)).unwrap();
        assert_eq!(map["shape_descr"], json!(["sid", "imt"]));
        assert_eq!(map["sid"], json!(3));
        assert_eq!(map["imt"], json!(["PGA", "SA"]));
    }

    #[test]
    fn test_loads_rejects_non_object() {
        assert!(loads("[1, 2]").is_err());
    }
}
