//! Outward store handle: one path-indexed container per backing file.
//!
//! `DataStore` composes the file primitive, the dataset/table codecs and the
//! record protocol behind a single handle that is cheap to clone-share via
//! `Arc`. The concurrency contract is single-writer/multiple-readers across
//! processes: one Append-mode writer may coexist with Read-mode handles once
//! `enable_concurrent_read` has been called; readers observe a writer's
//! flushes through `refresh`. The contract is documented, not type-enforced,
//! and violations surface as `ModeError`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use crate::data::{ArrayData, AttrMap, AttrValue};
use crate::dataset::{self, DsetSpec};
use crate::dframe::{self, DataFrame, ReadOptions};
use crate::file::{unquote, Mode, StoreFile};
use crate::object::{self, Persistent, Retrieved, StorableValue};
use crate::shape::{self, AxisTags, ShapeDescr};
use crate::wrapper::ArrayWrapper;
use crate::Result;

static BUILTIN_TYPES: Once = Once::new();

fn register_builtins() {
    BUILTIN_TYPES.call_once(|| {
        object::register::<object::GroupRecord>();
        object::register::<ArrayWrapper>();
    });
}

/// A path-indexed container over one backing file.
pub struct DataStore {
    file: Arc<StoreFile>,
    temp_path: Option<PathBuf>,
}

impl DataStore {
    /// Open an existing container or create a fresh one, per `mode`.
    pub fn open(path: impl AsRef<Path>, mode: Mode) -> Result<DataStore> {
        register_builtins();
        let file = StoreFile::open(path.as_ref(), mode)?;
        log::info!("opened {} in {:?} mode", path.as_ref().display(), mode);
        Ok(DataStore {
            file: Arc::new(file),
            temp_path: None,
        })
    }

    /// Create a fresh container, truncating any previous content.
    pub fn create(path: impl AsRef<Path>) -> Result<DataStore> {
        DataStore::open(path, Mode::Write)
    }

    /// Open for appending, creating the file if missing.
    pub fn append(path: impl AsRef<Path>) -> Result<DataStore> {
        DataStore::open(path, Mode::Append)
    }

    /// Open an existing container read-only.
    pub fn read(path: impl AsRef<Path>) -> Result<DataStore> {
        DataStore::open(path, Mode::Read)
    }

    /// Writable container backed by a fresh temporary file. The backing
    /// path stays on disk after `close`; the caller owns and deletes it.
    pub fn temporary() -> Result<DataStore> {
        let tmp = tempfile::Builder::new()
            .prefix("seistore-")
            .suffix(".seistore")
            .tempfile()?;
        let path = tmp.into_temp_path().keep().map_err(std::io::Error::from)?;
        let mut store = DataStore::open(&path, Mode::Write)?;
        store.temp_path = Some(path);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn mode(&self) -> Mode {
        self.file.mode()
    }

    /// Backing path of a temporary store, if this is one.
    pub fn temp_path(&self) -> Option<&Path> {
        self.temp_path.as_deref()
    }

    /// Shared handle to the underlying file primitive, for the lower-level
    /// codec entry points.
    pub fn file(&self) -> &Arc<StoreFile> {
        &self.file
    }

    pub fn flush(&self) -> Result<()> {
        self.file.flush()
    }

    /// Re-read the backing file to observe another process's flushes.
    /// Read-mode handles only.
    pub fn refresh(&self) -> Result<()> {
        self.file.refresh()
    }

    /// Allow Read-mode handles on this file while this writer stays open.
    pub fn enable_concurrent_read(&self) -> Result<()> {
        self.file.enable_concurrent_read()
    }

    /// Flush (when writable) and drop the handle.
    pub fn close(self) -> Result<()> {
        let path = self.file.path().to_path_buf();
        match Arc::try_unwrap(self.file) {
            Ok(file) => file.close()?,
            // another clone still holds the file; it flushes on final drop
            Err(shared) => {
                if shared.mode() != Mode::Read {
                    shared.flush()?;
                }
            }
        }
        log::info!("closed {}", path.display());
        Ok(())
    }

    // ==================== nodes and attributes ====================

    pub fn exists(&self, path: &str) -> bool {
        self.file.exists(path)
    }

    pub fn create_group(&self, path: &str) -> Result<()> {
        self.file.create_group(path)
    }

    /// Child names under a group, unquoted back to their original keys.
    pub fn children(&self, path: &str) -> Result<Vec<String>> {
        Ok(self
            .file
            .children(path)?
            .iter()
            .map(|k| unquote(k))
            .collect())
    }

    pub fn set_attr(&self, path: &str, name: &str, value: AttrValue) -> Result<()> {
        self.file.set_attr(path, name, value)
    }

    pub fn get_attr(&self, path: &str, name: &str) -> Result<Option<AttrValue>> {
        self.file.get_attr(path, name)
    }

    pub fn get_attrs(&self, path: &str) -> Result<AttrMap> {
        self.file.get_attrs(path)
    }

    // ==================== values and records ====================

    /// Item assignment: write a storable value at `path`.
    pub fn set(&self, path: &str, value: &StorableValue) -> Result<()> {
        object::set_value(&self.file, path, value)
    }

    /// Write a tagged record (payload, flush, then attrs and tag).
    pub fn set_obj<T: Persistent>(&self, path: &str, obj: &T) -> Result<()> {
        object::set_obj(&self.file, path, obj)
    }

    /// Item access: raw value or registry-restored object.
    pub fn get(&self, path: &str) -> Result<Retrieved> {
        object::get(&self.file, path)
    }

    /// Typed read, checking the stored tag.
    pub fn get_obj<T: Persistent>(&self, path: &str) -> Result<T> {
        object::get_obj(&self.file, path)
    }

    // ==================== datasets ====================

    pub fn create_dset(&self, path: &str, spec: &DsetSpec) -> Result<()> {
        dataset::create(&self.file, path, spec)
    }

    /// Grow a dataset along its leading axis; returns the new length.
    pub fn extend(&self, path: &str, array: &ArrayData) -> Result<usize> {
        dataset::extend(&self.file, path, array)
    }

    /// Handle for repeated appends to one growable dataset.
    pub fn extendable(&self, path: &str, spec: &DsetSpec) -> Result<dataset::ExtDset> {
        if self.file.exists(path) {
            dataset::ExtDset::open(Arc::clone(&self.file), path)
        } else {
            dataset::ExtDset::create(Arc::clone(&self.file), path, spec)
        }
    }

    pub fn read_array(&self, path: &str) -> Result<ArrayData> {
        self.file.read_array(path)
    }

    pub fn dataset_len(&self, path: &str) -> Result<usize> {
        self.file.dataset_len(path)
    }

    // ==================== tables ====================

    pub fn create_df(&self, path: &str, df: &DataFrame, attrs: &AttrMap) -> Result<()> {
        dframe::create_df(&self.file, path, df, attrs)
    }

    pub fn read_df(&self, path: &str, opts: &ReadOptions) -> Result<DataFrame> {
        dframe::read_df(&self.file, path, opts)
    }

    // ==================== named axes ====================

    pub fn set_shape_descr(
        &self,
        path: &str,
        axes: Vec<(String, AxisTags)>,
        extra: &AttrMap,
    ) -> Result<()> {
        shape::set_shape_descr(&self.file, path, axes, extra)
    }

    pub fn shape_descr(&self, path: &str) -> Result<ShapeDescr> {
        match self.file.get_attr(path, crate::JSON_ATTR)? {
            Some(AttrValue::Str(js)) => shape::get_shape_descr(&js),
            _ => Err(crate::StoreError::KeyNotFound(format!(
                "{} has no shape descriptor",
                path
            ))),
        }
    }

    /// Select from a named-axis dataset, preserving rank.
    pub fn sel(&self, path: &str, filters: &[(String, AttrValue)]) -> Result<ArrayData> {
        shape::sel(&self.file, path, filters)
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("path", &self.file.path())
            .field("mode", &self.file.mode())
            .finish()
    }
}
