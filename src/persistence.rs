//! Model persistence.
//!
//! Trained models are stored as opaque binary blobs: a tagged
//! [`ModelBlob`] serialized with bincode. The tag makes loads type-safe;
//! asking for a GMM from a blob that holds SPLICE parameters (or the
//! reverse) fails with [`CompensationError::InvalidModelType`] instead of
//! misinterpreting bytes.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{io_error, CompensationError, CompensationResult};
use crate::gmm::GaussianMixtureModel;
use crate::splice::SpliceParameters;

/// Tagged on-disk model container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ModelBlob {
    /// A trained Gaussian mixture model.
    Gmm(GaussianMixtureModel),
    /// Estimated SPLICE transform parameters.
    Splice(SpliceParameters),
}

impl ModelBlob {
    fn kind(&self) -> &'static str {
        match self {
            Self::Gmm(_) => "gmm",
            Self::Splice(_) => "splice",
        }
    }
}

fn write_blob(blob: &ModelBlob, path: &Path) -> CompensationResult<()> {
    let bytes = bincode::serialize(blob).map_err(|e| CompensationError::Serialization {
        reason: e.to_string(),
    })?;
    fs::write(path, bytes).map_err(|e| io_error("writing", path, e))
}

fn read_blob(path: &Path) -> CompensationResult<ModelBlob> {
    let bytes = fs::read(path).map_err(|e| io_error("reading", path, e))?;
    bincode::deserialize(&bytes).map_err(|e| CompensationError::Serialization {
        reason: e.to_string(),
    })
}

/// Saves a mixture model to `path`.
pub fn save_gmm(model: &GaussianMixtureModel, path: &Path) -> CompensationResult<()> {
    write_blob(&ModelBlob::Gmm(model.clone()), path)
}

/// Loads a mixture model from `path`.
///
/// Fails with [`CompensationError::InvalidModelType`] when the blob holds
/// anything other than a GMM, in particular when a SPLICE transform's
/// dependency is pointed at the wrong file.
pub fn load_gmm(path: &Path) -> CompensationResult<GaussianMixtureModel> {
    match read_blob(path)? {
        ModelBlob::Gmm(model) => Ok(model),
        other => Err(CompensationError::InvalidModelType {
            expected: "gmm",
            found: other.kind(),
        }),
    }
}

/// Saves SPLICE transform parameters to `path`.
pub fn save_splice(params: &SpliceParameters, path: &Path) -> CompensationResult<()> {
    write_blob(&ModelBlob::Splice(params.clone()), path)
}

/// Loads SPLICE transform parameters from `path`.
///
/// Fails with [`CompensationError::InvalidModelType`] when the blob holds
/// anything other than SPLICE parameters.
pub fn load_splice(path: &Path) -> CompensationResult<SpliceParameters> {
    match read_blob(path)? {
        ModelBlob::Splice(params) => Ok(params),
        other => Err(CompensationError::InvalidModelType {
            expected: "splice",
            found: other.kind(),
        }),
    }
}
