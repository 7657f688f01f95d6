//! Extendable dataset creation and appends.
//!
//! Datasets are either fixed-shape or growable along the leading axis.
//! [`ExtDset`] unifies a real append target with a null sink for disabled
//! output (a calculation that does not want a given artifact still runs the
//! same code path).

use std::sync::Arc;

use crate::attrs;
use crate::data::{ArrayData, AttrMap, Dtype};
use crate::file::{DsetNode, DsetPayload, StoreFile};
use crate::Result;

/// Configuration for dataset creation.
///
/// `leading == None` declares a growable dataset starting at length 0 with
/// the trailing shape fixed; `Some(n)` declares a fixed dataset of `n` rows.
#[derive(Debug, Clone)]
pub struct DsetSpec {
    pub dtype: Dtype,
    pub leading: Option<usize>,
    pub trailing: Vec<usize>,
    pub fillvalue: Option<f64>,
    /// Compression request, recorded for the underlying container; the
    /// stand-in container stores uncompressed.
    pub compression: bool,
    pub attrs: AttrMap,
}

impl DsetSpec {
    /// A growable dataset of the given dtype and fixed trailing shape.
    pub fn growable(dtype: Dtype, trailing: &[usize]) -> Self {
        DsetSpec {
            dtype,
            leading: None,
            trailing: trailing.to_vec(),
            fillvalue: None,
            compression: false,
            attrs: AttrMap::new(),
        }
    }

    /// A fixed-shape dataset.
    pub fn fixed(dtype: Dtype, shape: &[usize]) -> Self {
        let (leading, trailing) = match shape.split_first() {
            Some((n, rest)) => (Some(*n), rest.to_vec()),
            None => (Some(0), Vec::new()),
        };
        DsetSpec {
            dtype,
            leading,
            trailing,
            fillvalue: None,
            compression: false,
            attrs: AttrMap::new(),
        }
    }

    pub fn with_fillvalue(mut self, fill: f64) -> Self {
        self.fillvalue = Some(fill);
        self
    }

    pub fn compressed(mut self) -> Self {
        self.compression = true;
        self
    }

    pub fn with_attrs(mut self, attrs: AttrMap) -> Self {
        self.attrs = attrs;
        self
    }
}

/// Create a dataset per `spec`; sanitized attrs are attached immediately.
pub fn create(file: &StoreFile, path: &str, spec: &DsetSpec) -> Result<()> {
    let payload = match (spec.dtype, spec.leading) {
        (Dtype::VlenFloat64, _) => DsetPayload::Ragged(Vec::new()),
        (dtype, None) => DsetPayload::Array(ArrayData::empty(dtype, &spec.trailing)?),
        (dtype, Some(n)) => {
            let mut shape = vec![n];
            shape.extend_from_slice(&spec.trailing);
            DsetPayload::Array(ArrayData::filled(dtype, &shape, spec.fillvalue)?)
        }
    };
    file.create_dset(
        path,
        DsetNode {
            dtype: spec.dtype,
            growable: spec.leading.is_none(),
            trailing: spec.trailing.clone(),
            payload,
        },
    )?;
    if !spec.attrs.is_empty() {
        file.set_attrs(path, &attrs::sanitize_all(spec.attrs.clone()))?;
    }
    Ok(())
}

/// Append rows to a growable dataset; returns the new length.
///
/// An empty input is a no-op returning the current length. Shape or dtype
/// mismatches surface as container errors; this layer adds no recovery.
pub fn extend(file: &StoreFile, path: &str, array: &ArrayData) -> Result<usize> {
    if array.is_empty() {
        return file.dataset_len(path);
    }
    file.append_rows(path, array)
}

/// Handle to an extendable dataset, or a null sink when output is disabled.
#[derive(Clone)]
pub struct ExtDset {
    target: Option<(Arc<StoreFile>, String)>,
}

impl ExtDset {
    /// A sink that accepts and discards every append.
    pub fn null() -> Self {
        ExtDset { target: None }
    }

    /// Create the dataset per `spec` and return a handle to it.
    pub fn create(file: Arc<StoreFile>, path: &str, spec: &DsetSpec) -> Result<Self> {
        create(&file, path, spec)?;
        Ok(ExtDset {
            target: Some((file, path.to_string())),
        })
    }

    /// Wrap an already existing dataset.
    pub fn open(file: Arc<StoreFile>, path: &str) -> Result<Self> {
        file.dataset_len(path)?;
        Ok(ExtDset {
            target: Some((file, path.to_string())),
        })
    }

    pub fn is_null(&self) -> bool {
        self.target.is_none()
    }

    pub fn len(&self) -> Result<usize> {
        match &self.target {
            Some((file, path)) => file.dataset_len(path),
            None => Ok(0),
        }
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Append rows; a null sink or an empty input returns the current
    /// length unchanged.
    pub fn extend(&self, array: &ArrayData) -> Result<usize> {
        match &self.target {
            Some((file, path)) => extend(file, path, array),
            None => Ok(0),
        }
    }

    /// Append variable-length float rows (ragged dataset).
    pub fn extend_ragged(&self, rows: &[Vec<f64>]) -> Result<usize> {
        match &self.target {
            Some((file, path)) => {
                if rows.is_empty() {
                    file.dataset_len(path)
                } else {
                    file.append_ragged(path, rows)
                }
            }
            None => Ok(0),
        }
    }

    /// Attach attributes to the target; silently ignored on a null sink.
    pub fn set_attrs(&self, attrs: &AttrMap) -> Result<()> {
        match &self.target {
            Some((file, path)) => file.set_attrs(path, &crate::attrs::sanitize_all(attrs.clone())),
            None => Ok(()),
        }
    }
}
