//! Path-indexed container primitive.
//!
//! The on-disk container engine proper is a trusted external concern; this
//! module is the minimal stand-in providing its contract: open/close a
//! path-indexed container, create fixed or growable typed arrays, read/write
//! attributes on any node, enumerate children of a node.
//!
//! File framing:
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Header (64 bytes)                            │
//! │   - Magic: "SEISTOR1" (8 bytes)              │
//! │   - Version: u32                             │
//! │   - Flags: u32 (bit 0 = concurrent-read)     │
//! │   - Payload length: u64                      │
//! │   - Created / modified timestamps: i64       │
//! │   - Checksum: u32 (crc32 of payload)         │
//! ├──────────────────────────────────────────────┤
//! │ Payload: bincode-encoded node tree           │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The writer flushes the whole tree atomically (write-then-rename), so a
//! concurrent reader never observes a torn file; readers call [`StoreFile::refresh`]
//! to pick up the writer's latest flush.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{LittleEndian, ReadBytesExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::data::{ArrayData, AttrMap, AttrValue, Dtype};
use crate::{Result, StoreError};

pub const MAGIC: &[u8; 8] = b"SEISTOR1";
pub const FORMAT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;

const FLAG_CONCURRENT_READ: u32 = 1;

/// Open mode of a container handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read-only; the backing file must exist.
    Read,
    /// Create or truncate.
    Write,
    /// Create if missing, otherwise load and extend.
    Append,
}

impl Mode {
    pub fn is_writable(&self) -> bool {
        matches!(self, Mode::Write | Mode::Append)
    }
}

/// Dataset payload: a typed array, ragged float rows, or an opaque scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DsetPayload {
    Array(ArrayData),
    Ragged(Vec<Vec<f64>>),
    Bytes(Vec<u8>),
}

/// A dataset node: dtype, growability, fixed trailing shape and payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DsetNode {
    pub dtype: Dtype,
    pub growable: bool,
    pub trailing: Vec<usize>,
    pub payload: DsetPayload,
}

impl DsetNode {
    /// Length along the leading dimension.
    pub fn len(&self) -> usize {
        match &self.payload {
            DsetPayload::Array(a) => a.len(),
            DsetPayload::Ragged(rows) => rows.len(),
            DsetPayload::Bytes(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeBody {
    Group(BTreeMap<String, Node>),
    Dataset(DsetNode),
}

/// A node of the container tree; any node owns an attribute set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub body: NodeBody,
    pub attrs: AttrMap,
}

impl Node {
    pub fn group() -> Self {
        Node {
            body: NodeBody::Group(BTreeMap::new()),
            attrs: AttrMap::new(),
        }
    }

    pub fn dataset(dset: DsetNode) -> Self {
        Node {
            body: NodeBody::Dataset(dset),
            attrs: AttrMap::new(),
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.body, NodeBody::Group(_))
    }
}

/// Percent-encode a group key so it can live in a slash-separated path.
pub fn quote(key: &str) -> String {
    if key.contains('/') || key.contains('%') {
        urlencoding::encode(key).into_owned()
    } else {
        key.to_string()
    }
}

/// Inverse of [`quote`].
pub fn unquote(key: &str) -> String {
    if key.contains('%') {
        urlencoding::decode(key)
            .map(|c| c.into_owned())
            .unwrap_or_else(|_| key.to_string())
    } else {
        key.to_string()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// File header structure
#[derive(Debug, Clone)]
struct FileHeader {
    version: u32,
    flags: u32,
    payload_len: u64,
    created_at: i64,
    modified_at: i64,
    checksum: u32,
}

impl FileHeader {
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&self.version.to_le_bytes());
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.payload_len.to_le_bytes());
        buf.extend_from_slice(&self.created_at.to_le_bytes());
        buf.extend_from_slice(&self.modified_at.to_le_bytes());
        buf.extend_from_slice(&self.checksum.to_le_bytes());
        buf.resize(HEADER_SIZE, 0);
        buf
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE || &bytes[0..8] != MAGIC {
            return Err(StoreError::InvalidFormat);
        }
        let mut cur = Cursor::new(&bytes[8..]);
        let version = cur.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(StoreError::VersionMismatch {
                expected: FORMAT_VERSION,
                actual: version,
            });
        }
        let flags = cur.read_u32::<LittleEndian>()?;
        let payload_len = cur.read_u64::<LittleEndian>()?;
        let created_at = cur.read_i64::<LittleEndian>()?;
        let modified_at = cur.read_i64::<LittleEndian>()?;
        let checksum = cur.read_u32::<LittleEndian>()?;
        Ok(FileHeader {
            version,
            flags,
            payload_len,
            created_at,
            modified_at,
            checksum,
        })
    }
}

/// A path-indexed container backed by a single file.
///
/// Interior mutability via `RwLock` keeps the handle shareable behind an
/// `Arc`; the single-writer contract is the caller's responsibility.
pub struct StoreFile {
    path: PathBuf,
    mode: Mode,
    root: RwLock<Node>,
    created_at: i64,
    concurrent_read: AtomicBool,
}

impl StoreFile {
    /// Open a container at `path` in the given mode.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = match mode {
            Mode::Read => {
                let (header, root) = Self::load(&path)?;
                StoreFile {
                    path,
                    mode,
                    root: RwLock::new(root),
                    created_at: header.created_at,
                    concurrent_read: AtomicBool::new(header.flags & FLAG_CONCURRENT_READ != 0),
                }
            }
            Mode::Write => {
                let file = StoreFile {
                    path,
                    mode,
                    root: RwLock::new(Node::group()),
                    created_at: chrono::Utc::now().timestamp(),
                    concurrent_read: AtomicBool::new(false),
                };
                file.flush()?;
                file
            }
            Mode::Append => {
                if path.exists() {
                    let (header, root) = Self::load(&path)?;
                    StoreFile {
                        path,
                        mode,
                        root: RwLock::new(root),
                        created_at: header.created_at,
                        concurrent_read: AtomicBool::new(false),
                    }
                } else {
                    let file = StoreFile {
                        path,
                        mode,
                        root: RwLock::new(Node::group()),
                        created_at: chrono::Utc::now().timestamp(),
                        concurrent_read: AtomicBool::new(false),
                    };
                    file.flush()?;
                    file
                }
            }
        };
        log::debug!("opened {} in {:?} mode", file.path.display(), file.mode);
        Ok(file)
    }

    fn load(path: &Path) -> Result<(FileHeader, Node)> {
        let bytes = fs::read(path)?;
        let header = FileHeader::from_bytes(&bytes)?;
        let end = HEADER_SIZE + header.payload_len as usize;
        if bytes.len() < end {
            return Err(StoreError::InvalidFormat);
        }
        let payload = &bytes[HEADER_SIZE..end];
        if crc32fast::hash(payload) != header.checksum {
            return Err(StoreError::ChecksumMismatch);
        }
        let root: Node =
            bincode::deserialize(payload).map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok((header, root))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn concurrent_read(&self) -> bool {
        self.concurrent_read.load(Ordering::Acquire)
    }

    /// Persist the whole tree. Write-then-rename keeps concurrent readers
    /// away from torn files.
    pub fn flush(&self) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(StoreError::ModeError(format!(
                "cannot flush {} opened read-only",
                self.path.display()
            )));
        }
        let payload = {
            let root = self.root.read();
            bincode::serialize(&*root).map_err(|e| StoreError::Serialization(e.to_string()))?
        };
        let mut flags = 0;
        if self.concurrent_read() {
            flags |= FLAG_CONCURRENT_READ;
        }
        let header = FileHeader {
            version: FORMAT_VERSION,
            flags,
            payload_len: payload.len() as u64,
            created_at: self.created_at,
            modified_at: chrono::Utc::now().timestamp(),
            checksum: crc32fast::hash(&payload),
        };
        let tmp = self.path.with_extension("tmp");
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&header.to_bytes())?;
            f.write_all(&payload)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        log::debug!("flushed {} ({} payload bytes)", self.path.display(), payload.len());
        Ok(())
    }

    /// Re-read the backing file, picking up a writer's latest flush.
    /// Only meaningful on read-only handles.
    pub fn refresh(&self) -> Result<()> {
        if self.mode != Mode::Read {
            return Err(StoreError::ModeError(
                "refresh is only valid on a read-only handle".to_string(),
            ));
        }
        let (header, root) = Self::load(&self.path)?;
        self.concurrent_read
            .store(header.flags & FLAG_CONCURRENT_READ != 0, Ordering::Release);
        *self.root.write() = root;
        Ok(())
    }

    /// Switch an append-mode handle into concurrent-read mode.
    ///
    /// Only valid once every dataset that will ever exist in the file has
    /// been created; creating a brand-new dataset afterwards is unsupported
    /// (an operational contract, not enforced here).
    pub fn enable_concurrent_read(&self) -> Result<()> {
        if self.mode != Mode::Append {
            return Err(StoreError::ModeError(format!(
                "concurrent-read mode requires Append, handle is {:?}",
                self.mode
            )));
        }
        self.concurrent_read.store(true, Ordering::Release);
        self.flush()?;
        log::info!("{}: concurrent-read mode enabled", self.path.display());
        Ok(())
    }

    /// Flush (when writable) and drop the handle.
    pub fn close(self) -> Result<()> {
        if self.mode.is_writable() {
            self.flush()?;
        }
        log::debug!("closed {}", self.path.display());
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        if self.mode.is_writable() {
            Ok(())
        } else {
            Err(StoreError::ModeError(format!(
                "{} is opened read-only",
                self.path.display()
            )))
        }
    }

    // ------------------------------------------------------------------
    // Node navigation
    // ------------------------------------------------------------------

    fn with_node<R>(&self, path: &str, f: impl FnOnce(&Node) -> Result<R>) -> Result<R> {
        let root = self.root.read();
        let mut node = &*root;
        for seg in segments(path) {
            match &node.body {
                NodeBody::Group(children) => {
                    node = children
                        .get(seg)
                        .ok_or_else(|| StoreError::KeyNotFound(path.to_string()))?;
                }
                NodeBody::Dataset(_) => return Err(StoreError::NotAGroup(path.to_string())),
            }
        }
        f(node)
    }

    fn with_node_mut<R>(&self, path: &str, f: impl FnOnce(&mut Node) -> Result<R>) -> Result<R> {
        let mut root = self.root.write();
        let mut node = &mut *root;
        for seg in segments(path) {
            match &mut node.body {
                NodeBody::Group(children) => {
                    node = children
                        .get_mut(seg)
                        .ok_or_else(|| StoreError::KeyNotFound(path.to_string()))?;
                }
                NodeBody::Dataset(_) => return Err(StoreError::NotAGroup(path.to_string())),
            }
        }
        f(node)
    }

    /// Create intermediate groups and run `f` on the final node, inserting a
    /// group there if nothing exists yet.
    fn with_created_node<R>(&self, path: &str, f: impl FnOnce(&mut Node) -> Result<R>) -> Result<R> {
        self.check_writable()?;
        let mut root = self.root.write();
        let mut node = &mut *root;
        for seg in segments(path) {
            match &mut node.body {
                NodeBody::Group(children) => {
                    node = children.entry(seg.to_string()).or_insert_with(Node::group);
                }
                NodeBody::Dataset(_) => return Err(StoreError::NotAGroup(path.to_string())),
            }
        }
        f(node)
    }

    pub fn exists(&self, path: &str) -> bool {
        self.with_node(path, |_| Ok(())).is_ok()
    }

    pub fn is_group(&self, path: &str) -> Result<bool> {
        self.with_node(path, |n| Ok(n.is_group()))
    }

    /// Child keys of a group, in stored (quoted) form, sorted.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        self.with_node(path, |n| match &n.body {
            NodeBody::Group(children) => Ok(children.keys().cloned().collect()),
            NodeBody::Dataset(_) => Err(StoreError::NotAGroup(path.to_string())),
        })
    }

    /// Create an (empty) group at `path`, along with any missing parents.
    pub fn create_group(&self, path: &str) -> Result<()> {
        self.with_created_node(path, |n| {
            if n.is_group() {
                Ok(())
            } else {
                Err(StoreError::NodeExists(path.to_string()))
            }
        })
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    /// Attach one attribute, wrapping any encoding failure with the field
    /// name and value.
    pub fn set_attr(&self, path: &str, name: &str, value: AttrValue) -> Result<()> {
        self.check_writable()?;
        if let AttrValue::BigInt(v) = &value {
            return Err(StoreError::AttributeEncoding {
                field: name.to_string(),
                value: v.to_string(),
                source: Box::new(StoreError::Serialization(
                    "integer exceeds the exact i64 range; sanitize first".to_string(),
                )),
            });
        }
        self.with_node_mut(path, |n| {
            n.attrs.insert(name.to_string(), value);
            Ok(())
        })
    }

    pub fn set_attrs(&self, path: &str, attrs: &AttrMap) -> Result<()> {
        for (name, value) in attrs {
            self.set_attr(path, name, value.clone())?;
        }
        Ok(())
    }

    pub fn get_attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>> {
        self.with_node(path, |n| Ok(n.attrs.get(name).cloned()))
    }

    pub fn get_attrs(&self, path: &str) -> Result<AttrMap> {
        self.with_node(path, |n| Ok(n.attrs.clone()))
    }

    // ------------------------------------------------------------------
    // Datasets
    // ------------------------------------------------------------------

    /// Create a dataset node; fails if anything already lives at `path`.
    pub fn create_dset(&self, path: &str, dset: DsetNode) -> Result<()> {
        let (parent, name) = split_parent(path);
        self.with_created_node(parent, |n| match &mut n.body {
            NodeBody::Group(children) => {
                if children.contains_key(name) {
                    return Err(StoreError::NodeExists(path.to_string()));
                }
                children.insert(name.to_string(), Node::dataset(dset));
                Ok(())
            }
            NodeBody::Dataset(_) => Err(StoreError::NotAGroup(parent.to_string())),
        })
    }

    /// Whole-value write: create or overwrite a fixed dataset at `path`.
    pub fn write_array(&self, path: &str, array: ArrayData) -> Result<()> {
        let dset = DsetNode {
            dtype: array.dtype(),
            growable: false,
            trailing: array.trailing(),
            payload: DsetPayload::Array(array),
        };
        self.put_dset(path, dset)
    }

    /// Whole-value write of an opaque binary scalar.
    pub fn write_bytes(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let dset = DsetNode {
            dtype: Dtype::Bytes,
            growable: false,
            trailing: Vec::new(),
            payload: DsetPayload::Bytes(data),
        };
        self.put_dset(path, dset)
    }

    fn put_dset(&self, path: &str, dset: DsetNode) -> Result<()> {
        let (parent, name) = split_parent(path);
        self.with_created_node(parent, |n| match &mut n.body {
            NodeBody::Group(children) => {
                if let Some(existing) = children.get(name) {
                    if existing.is_group() {
                        return Err(StoreError::NodeExists(path.to_string()));
                    }
                }
                // overwrite keeps any attributes already attached
                let attrs = children
                    .remove(name)
                    .map(|old| old.attrs)
                    .unwrap_or_default();
                children.insert(name.to_string(), Node { body: NodeBody::Dataset(dset), attrs });
                Ok(())
            }
            NodeBody::Dataset(_) => Err(StoreError::NotAGroup(parent.to_string())),
        })
    }

    /// Append rows to a growable dataset; returns the new length.
    pub fn append_rows(&self, path: &str, array: &ArrayData) -> Result<usize> {
        self.check_writable()?;
        self.with_node_mut(path, |n| match &mut n.body {
            NodeBody::Dataset(dset) => {
                if !dset.growable {
                    return Err(StoreError::ShapeMismatch(format!(
                        "{} is not growable",
                        path
                    )));
                }
                if array.dtype() != dset.dtype {
                    return Err(StoreError::DtypeMismatch {
                        expected: dset.dtype,
                        actual: array.dtype(),
                    });
                }
                if array.trailing() != dset.trailing {
                    return Err(StoreError::ShapeMismatch(format!(
                        "{}: appended trailing shape {:?} != declared {:?}",
                        path,
                        array.trailing(),
                        dset.trailing
                    )));
                }
                match &mut dset.payload {
                    DsetPayload::Array(existing) => {
                        *existing = existing.concat(array)?;
                        Ok(existing.len())
                    }
                    _ => Err(StoreError::DtypeMismatch {
                        expected: dset.dtype,
                        actual: array.dtype(),
                    }),
                }
            }
            NodeBody::Group(_) => Err(StoreError::NotADataset(path.to_string())),
        })
    }

    /// Append variable-length float rows to a ragged dataset.
    pub fn append_ragged(&self, path: &str, rows: &[Vec<f64>]) -> Result<usize> {
        self.check_writable()?;
        self.with_node_mut(path, |n| match &mut n.body {
            NodeBody::Dataset(dset) => match &mut dset.payload {
                DsetPayload::Ragged(existing) => {
                    existing.extend(rows.iter().cloned());
                    Ok(existing.len())
                }
                _ => Err(StoreError::DtypeMismatch {
                    expected: Dtype::VlenFloat64,
                    actual: dset.dtype,
                }),
            },
            NodeBody::Group(_) => Err(StoreError::NotADataset(path.to_string())),
        })
    }

    pub fn dataset_len(&self, path: &str) -> Result<usize> {
        self.with_node(path, |n| match &n.body {
            NodeBody::Dataset(dset) => Ok(dset.len()),
            NodeBody::Group(_) => Err(StoreError::NotADataset(path.to_string())),
        })
    }

    pub fn dataset_shape(&self, path: &str) -> Result<Vec<usize>> {
        self.with_node(path, |n| match &n.body {
            NodeBody::Dataset(dset) => match &dset.payload {
                DsetPayload::Array(a) => Ok(a.shape().to_vec()),
                DsetPayload::Ragged(rows) => Ok(vec![rows.len()]),
                DsetPayload::Bytes(_) => Ok(Vec::new()),
            },
            NodeBody::Group(_) => Err(StoreError::NotADataset(path.to_string())),
        })
    }

    pub fn read_payload(&self, path: &str) -> Result<DsetPayload> {
        self.with_node(path, |n| match &n.body {
            NodeBody::Dataset(dset) => Ok(dset.payload.clone()),
            NodeBody::Group(_) => Err(StoreError::NotADataset(path.to_string())),
        })
    }

    pub fn read_array(&self, path: &str) -> Result<ArrayData> {
        match self.read_payload(path)? {
            DsetPayload::Array(a) => Ok(a),
            _ => Err(StoreError::NotADataset(format!(
                "{} does not hold a typed array",
                path
            ))),
        }
    }

    /// Rows `start..end` of a dataset along the leading axis.
    pub fn read_rows(&self, path: &str, start: usize, end: usize) -> Result<ArrayData> {
        self.with_node(path, |n| match &n.body {
            NodeBody::Dataset(dset) => match &dset.payload {
                DsetPayload::Array(a) => {
                    let end = end.min(a.len());
                    let start = start.min(end);
                    Ok(a.slice_rows(start, end))
                }
                _ => Err(StoreError::NotADataset(format!(
                    "{} does not hold a typed array",
                    path
                ))),
            },
            NodeBody::Group(_) => Err(StoreError::NotADataset(path.to_string())),
        })
    }
}

/// Split a path into parent and final segment.
fn split_parent(path: &str) -> (&str, &str) {
    let trimmed = path.trim_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => (&trimmed[..pos], &trimmed[pos + 1..]),
        None => ("", trimmed),
    }
}

impl Drop for StoreFile {
    fn drop(&mut self) {
        // Try to flush on drop
        if self.mode.is_writable() {
            let _ = self.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;
    use tempfile::tempdir;

    #[test]
    fn test_create_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.seistore");

        {
            let file = StoreFile::open(&path, Mode::Write).unwrap();
            file.write_array("calc/mags", ArrayData::Float64(arr1(&[4.5, 5.5]).into_dyn()))
                .unwrap();
            file.close().unwrap();
        }
        {
            let file = StoreFile::open(&path, Mode::Read).unwrap();
            let a = file.read_array("calc/mags").unwrap();
            assert_eq!(a, ArrayData::Float64(arr1(&[4.5, 5.5]).into_dyn()));
        }
    }

    #[test]
    fn test_read_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(StoreFile::open(dir.path().join("nope.seistore"), Mode::Read).is_err());
    }

    #[test]
    fn test_attrs_round_trip() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        file.create_group("job").unwrap();
        file.set_attr("job", "description", AttrValue::Str("event based".into()))
            .unwrap();
        file.set_attr("job", "ses_seed", AttrValue::Int(42)).unwrap();
        let attrs = file.get_attrs("job").unwrap();
        assert_eq!(attrs["description"], AttrValue::Str("event based".into()));
        assert_eq!(attrs["ses_seed"], AttrValue::Int(42));
    }

    #[test]
    fn test_set_attr_rejects_unsanitized_bigint() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        file.create_group("job").unwrap();
        let err = file
            .set_attr("job", "huge", AttrValue::BigInt(1 << 70))
            .unwrap_err();
        match err {
            StoreError::AttributeEncoding { field, .. } => assert_eq!(field, "huge"),
            other => panic!("expected AttributeEncoding, got {:?}", other),
        }
    }

    #[test]
    fn test_children_enumeration() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        file.create_group("hazard/rlzs").unwrap();
        file.write_array("hazard/gsims", ArrayData::Int64(arr1(&[1_i64]).into_dyn()))
            .unwrap();
        assert_eq!(file.children("hazard").unwrap(), vec!["gsims", "rlzs"]);
        assert!(file.children("hazard/gsims").is_err());
    }

    #[test]
    fn test_append_rows_checks_shape() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        file.create_dset(
            "gmvs",
            DsetNode {
                dtype: Dtype::Float64,
                growable: true,
                trailing: vec![2],
                payload: DsetPayload::Array(ArrayData::empty(Dtype::Float64, &[2]).unwrap()),
            },
        )
        .unwrap();
        let ok = ArrayData::Float64(ndarray::arr2(&[[0.1, 0.2]]).into_dyn());
        assert_eq!(file.append_rows("gmvs", &ok).unwrap(), 1);
        let bad = ArrayData::Float64(ndarray::arr2(&[[0.1, 0.2, 0.3]]).into_dyn());
        assert!(matches!(
            file.append_rows("gmvs", &bad),
            Err(StoreError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_checksum_rejection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.seistore");
        {
            let file = StoreFile::open(&path, Mode::Write).unwrap();
            file.write_array("x", ArrayData::Int64(arr1(&[1_i64, 2, 3]).into_dyn()))
                .unwrap();
            file.close().unwrap();
        }
        // corrupt one payload byte
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            StoreFile::open(&path, Mode::Read),
            Err(StoreError::ChecksumMismatch)
        ));
    }

    #[test]
    fn test_concurrent_read_toggle_and_refresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.seistore");

        let writer = StoreFile::open(&path, Mode::Append).unwrap();
        writer
            .create_dset(
                "events",
                DsetNode {
                    dtype: Dtype::Int64,
                    growable: true,
                    trailing: vec![],
                    payload: DsetPayload::Array(ArrayData::empty(Dtype::Int64, &[]).unwrap()),
                },
            )
            .unwrap();
        writer.enable_concurrent_read().unwrap();

        let reader = StoreFile::open(&path, Mode::Read).unwrap();
        assert!(reader.concurrent_read());
        assert_eq!(reader.dataset_len("events").unwrap(), 0);

        writer
            .append_rows("events", &ArrayData::Int64(arr1(&[7_i64, 8]).into_dyn()))
            .unwrap();
        writer.flush().unwrap();

        // reader observes monotonically grown data after refresh
        reader.refresh().unwrap();
        assert_eq!(reader.dataset_len("events").unwrap(), 2);
    }

    #[test]
    fn test_concurrent_read_requires_append() {
        let dir = tempdir().unwrap();
        let file = StoreFile::open(dir.path().join("t.seistore"), Mode::Write).unwrap();
        assert!(matches!(
            file.enable_concurrent_read(),
            Err(StoreError::ModeError(_))
        ));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.seistore");
        StoreFile::open(&path, Mode::Write).unwrap().close().unwrap();
        let reader = StoreFile::open(&path, Mode::Read).unwrap();
        assert!(matches!(
            reader.write_bytes("blob", vec![1, 2, 3]),
            Err(StoreError::ModeError(_))
        ));
    }

    #[test]
    fn test_quote_unquote() {
        assert_eq!(quote("simple"), "simple");
        let q = quote("a/b");
        assert!(!q.contains('/'));
        assert_eq!(unquote(&q), "a/b");
    }
}
