//! # GMM Training and SPLICE Noise Compensation
//!
//! Parallel estimation of diagonal-covariance Gaussian mixture models from
//! large collections of speech feature vectors, and stereo-based piecewise
//! linear compensation (SPLICE) of noisy features using the trained model.
//!
//! ## Key Features
//!
//! - **Mixture-splitting EM**: models grow from one mixture by repeated
//!   doubling along the maximum-variance axis, with a fixed round schedule
//!   and a variance floor for numerical stability
//! - **Parallel statistics**: sufficient statistics for each EM round are
//!   accumulated over the training file list by a bounded worker pool with
//!   deterministic round-robin partitioning and an exactly-one-message-per-
//!   worker completion protocol
//! - **SPLICE estimation**: posterior-weighted cross statistics reduce to
//!   one closed-form linear solve per mixture; compensation mixes the
//!   per-mixture affine transforms by posterior weight
//! - **Format-agnostic I/O**: the core consumes feature vectors through
//!   the [`FeatureSource`] trait; text, HTK and Sphinx codecs are provided
//! - **Typed failures**: degenerate mixtures, singular systems, underflow
//!   and worker errors all surface as [`CompensationError`] variants, never
//!   as partial results
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use gmm_splice::{
//!     read_file_list, read_pair_list, FeatureCodec, GaussianMixtureModel,
//!     SpliceTransform, TrainingConfig,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let codec = FeatureCodec::Htk;
//!
//!     // Train a 64-mixture GMM on noisy features
//!     let files = read_file_list(Path::new("train.lst"))?;
//!     let mut gmm = GaussianMixtureModel::new(13)?;
//!     let report = gmm.train(
//!         &codec,
//!         &files,
//!         &TrainingConfig {
//!             target_mixtures: 64,
//!             ..TrainingConfig::default()
//!         },
//!     )?;
//!     println!("trained {} mixtures", report.effective_mixtures);
//!
//!     // Estimate SPLICE transforms from stereo (noisy, clean) pairs
//!     let stereo = read_pair_list(Path::new("stereo.lst"))?;
//!     let mut splice = SpliceTransform::new(&gmm);
//!     splice.estimate(&codec, &stereo, None)?;
//!
//!     // Compensate test features file by file
//!     let test = read_pair_list(Path::new("test.lst"))?;
//!     splice.apply_to_files(&codec, &test, None)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! [`GaussianMixtureModel`] owns the mixture parameters and the EM update;
//! [`accumulate_parallel`] is the generic map-reduce both trainers share;
//! [`SpliceTransform`] borrows a trained model and owns the per-mixture
//! affine transforms. File parsing and model storage stay at the edges in
//! [`featio`] and [`persistence`].

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accumulator;
pub mod errors;
pub mod featio;
pub mod gmm;
pub mod persistence;
pub mod splice;
pub mod worklist;

pub use accumulator::{accumulate_parallel, default_workers, resolve_workers, ShardStats};
pub use errors::{CompensationError, CompensationResult};
pub use featio::{FeatureCodec, FeatureSource};
pub use gmm::{
    GaussianMixtureModel, SufficientStatistics, TrainingConfig, TrainingReport, VARIANCE_FLOOR,
};
pub use persistence::{load_gmm, load_splice, save_gmm, save_splice, ModelBlob};
pub use splice::{SpliceParameters, SpliceStatistics, SpliceTransform};
pub use worklist::{read_file_list, read_pair_list};
