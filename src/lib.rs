//! seistore - hierarchical typed persistence engine
//!
//! A path-indexed, typed, resizable storage abstraction for seismic hazard
//! calculation artifacts. Provides:
//! - growable typed datasets addressed by slash-separated paths
//! - a polymorphic record protocol that round-trips nested mappings, arrays
//!   and tagged custom types through the store
//! - a column-oriented data-frame codec with chunked, predicate-filtered reads
//! - a named-axis array codec with selection and long-format conversion
//!
//! The store follows a single-writer/multiple-reader contract: one handle
//! opened in `Append` mode populates the file, then toggles concurrent-read
//! mode; other processes open the same file read-only and observe
//! monotonically growing datasets via `refresh`.

pub mod attrs;
pub mod csvio;
pub mod data;
pub mod dataset;
pub mod dframe;
pub mod file;
pub mod object;
pub mod shape;
pub mod store;
pub mod wrapper;

// Re-export main types
pub use data::{ArrayData, AttrMap, AttrValue, Dtype};
pub use dataset::{DsetSpec, ExtDset};
pub use dframe::{ColumnData, DataFrame, Pred, ReadOptions};
pub use file::{Mode, StoreFile};
pub use object::{GroupRecord, Payload, Persistent, Retrieved, StorableValue};
pub use shape::{AxisTags, ShapeDescr};
pub use store::DataStore;
pub use wrapper::ArrayWrapper;

/// Attribute carrying the reconstruction type tag of a polymorphic record.
pub const PYCLASS_ATTR: &str = "__pyclass__";
/// Attribute carrying the space-joined, ordered column names of a table.
pub const PDCOLUMNS_ATTR: &str = "__pdcolumns__";
/// Attribute carrying the JSON-encoded shape descriptor of a dataset.
pub const JSON_ATTR: &str = "json";

/// Default maximum number of table rows materialized per read chunk.
pub const DEFAULT_ROW_BUDGET: usize = 10_000_000;

/// Storage engine error type
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format")]
    InvalidFormat,

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Checksum mismatch")]
    ChecksumMismatch,

    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Node already exists: {0}")]
    NodeExists(String),

    #[error("Not a group: {0}")]
    NotAGroup(String),

    #[error("Not a dataset: {0}")]
    NotADataset(String),

    #[error("Not a data frame: {0}")]
    NotADataFrame(String),

    #[error("Empty dataset: {0}")]
    EmptyDataset(String),

    #[error("Cannot encode attribute {field}={value}: {source}")]
    AttributeEncoding {
        field: String,
        value: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Could not write {value} at {path}: {source}")]
    NodeWrite {
        path: String,
        value: String,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Unknown type tag: {0}")]
    UnknownTypeTag(String),

    #[error("Type tag mismatch: expected {expected}, got {actual}")]
    TagMismatch { expected: String, actual: String },

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Dtype mismatch: expected {expected:?}, got {actual:?}")]
    DtypeMismatch { expected: Dtype, actual: Dtype },

    #[error("Invalid mode: {0}")]
    ModeError(String),

    #[error("Invalid selector: {0}")]
    InvalidSelector(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("CSV error: {0}")]
    Csv(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
