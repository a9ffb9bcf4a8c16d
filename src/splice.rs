//! SPLICE noise compensation: per-mixture affine transforms estimated
//! from stereo (noisy, clean) feature data.
//!
//! Estimation accumulates posterior-weighted cross statistics per frame
//! pair and solves one linear system per mixture in closed form;
//! application maps each noisy frame through the posterior-weighted sum of
//! the per-mixture transforms. Both the statistics gathering and the
//! file-level application run through the parallel accumulator.

use std::path::{Path, PathBuf};

use nalgebra::{Cholesky, DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::accumulator::{accumulate_parallel, resolve_workers, ShardStats};
use crate::errors::{validate_dimension, CompensationError, CompensationResult};
use crate::featio::FeatureSource;
use crate::gmm::GaussianMixtureModel;

/// Transient per-mixture accumulation matrices for SPLICE estimation.
///
/// `numerator[m]` is D×(D+1), `denominator[m]` is (D+1)×(D+1); both are
/// zeroed at the start of estimation, filled by the parallel reduction and
/// consumed once by the per-mixture solve.
#[derive(Debug, Clone)]
pub struct SpliceStatistics {
    numerator: Vec<DMatrix<f64>>,
    denominator: Vec<DMatrix<f64>>,
}

impl SpliceStatistics {
    /// Zero statistics for `mixtures` components over `dimensionality`
    /// features.
    pub fn zeros(mixtures: usize, dimensionality: usize) -> Self {
        Self {
            numerator: (0..mixtures)
                .map(|_| DMatrix::zeros(dimensionality, dimensionality + 1))
                .collect(),
            denominator: (0..mixtures)
                .map(|_| DMatrix::zeros(dimensionality + 1, dimensionality + 1))
                .collect(),
        }
    }
}

impl ShardStats for SpliceStatistics {
    fn merge(&mut self, other: Self) {
        for (acc, part) in self.numerator.iter_mut().zip(other.numerator) {
            *acc += part;
        }
        for (acc, part) in self.denominator.iter_mut().zip(other.denominator) {
            *acc += part;
        }
    }
}

/// Persistable SPLICE parameters: the raw transform matrices plus the
/// model shape they were estimated against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpliceParameters {
    /// Feature dimensionality D of the backing GMM.
    pub dimensionality: usize,
    /// Mixture count M of the backing GMM.
    pub mixtures: usize,
    /// Row-major D×(D+1) transform per mixture.
    pub transforms: Vec<Vec<f64>>,
}

/// Per-mixture affine noise-compensation transform.
///
/// Borrows the Gaussian mixture model used for posterior computation; the
/// model must outlive the transform. Each of the M transforms is a
/// D×(D+1) affine matrix over the bias-augmented noisy frame `[1, x]`.
#[derive(Debug, Clone)]
pub struct SpliceTransform<'g> {
    gmm: &'g GaussianMixtureModel,
    transforms: Vec<DMatrix<f64>>,
}

impl<'g> SpliceTransform<'g> {
    /// Creates an untrained transform (all matrices zero) over a trained
    /// mixture model.
    pub fn new(gmm: &'g GaussianMixtureModel) -> Self {
        let dim = gmm.dimensionality();
        let transforms = (0..gmm.mixture_count())
            .map(|_| DMatrix::zeros(dim, dim + 1))
            .collect();
        Self { gmm, transforms }
    }

    /// Reattaches persisted parameters to a mixture model, validating that
    /// the shapes agree.
    pub fn from_params(
        gmm: &'g GaussianMixtureModel,
        params: &SpliceParameters,
    ) -> CompensationResult<Self> {
        let dim = gmm.dimensionality();
        if params.dimensionality != dim || params.mixtures != gmm.mixture_count() {
            return Err(CompensationError::DimensionMismatch {
                expected: dim * gmm.mixture_count(),
                actual: params.dimensionality * params.mixtures,
                context: "splice parameters vs mixture model shape".to_string(),
            });
        }
        let mut transforms = Vec::with_capacity(params.transforms.len());
        for (m, rows) in params.transforms.iter().enumerate() {
            if rows.len() != dim * (dim + 1) {
                return Err(CompensationError::DimensionMismatch {
                    expected: dim * (dim + 1),
                    actual: rows.len(),
                    context: format!("transform matrix for mixture {m}"),
                });
            }
            transforms.push(DMatrix::from_row_slice(dim, dim + 1, rows));
        }
        Ok(Self { gmm, transforms })
    }

    /// Extracts the current parameters for persistence.
    pub fn params(&self) -> SpliceParameters {
        let dim = self.gmm.dimensionality();
        let transforms = self
            .transforms
            .iter()
            .map(|w| {
                let mut rows = Vec::with_capacity(dim * (dim + 1));
                for r in 0..dim {
                    for c in 0..dim + 1 {
                        rows.push(w[(r, c)]);
                    }
                }
                rows
            })
            .collect();
        SpliceParameters {
            dimensionality: dim,
            mixtures: self.gmm.mixture_count(),
            transforms,
        }
    }

    /// The mixture model backing this transform.
    pub fn gmm(&self) -> &GaussianMixtureModel {
        self.gmm
    }

    /// Adds one stereo frame pair's posterior-weighted contribution to
    /// `stats`.
    pub fn accumulate(
        &self,
        noisy: &[f64],
        clean: &[f64],
        stats: &mut SpliceStatistics,
    ) -> CompensationResult<()> {
        let dim = self.gmm.dimensionality();
        validate_dimension(noisy, dim, "noisy frame")?;
        validate_dimension(clean, dim, "clean frame")?;

        let gamma = self.gmm.posterior(noisy)?;
        let augmented = augment(noisy);
        let clean = DVector::from_column_slice(clean);
        for (m, &g) in gamma.iter().enumerate() {
            stats.numerator[m].ger(g, &clean, &augmented, 1.0);
            stats.denominator[m].ger(g, &augmented, &augmented, 1.0);
        }
        Ok(())
    }

    /// Accumulates statistics from one stereo file pair.
    fn accumulate_stereo_file<S>(
        &self,
        source: &S,
        noisy_path: &Path,
        clean_path: &Path,
        stats: &mut SpliceStatistics,
    ) -> CompensationResult<()>
    where
        S: FeatureSource + ?Sized,
    {
        let noisy = source.read_frames(noisy_path)?;
        let clean = source.read_frames(clean_path)?;
        if noisy.len() != clean.len() {
            return Err(CompensationError::DimensionMismatch {
                expected: clean.len(),
                actual: noisy.len(),
                context: format!(
                    "frame counts of stereo pair {} / {}",
                    noisy_path.display(),
                    clean_path.display()
                ),
            });
        }
        for (n, c) in noisy.iter().zip(&clean) {
            self.accumulate(n, c, stats)?;
        }
        Ok(())
    }

    /// Solves the per-mixture linear systems from accumulated statistics.
    fn solve_transforms(
        &self,
        stats: &SpliceStatistics,
    ) -> CompensationResult<Vec<DMatrix<f64>>> {
        let mut solved = Vec::with_capacity(self.transforms.len());
        for m in 0..self.transforms.len() {
            // the denominator is symmetric positive definite whenever the
            // mixture saw enough independent frames
            let chol = Cholesky::new(stats.denominator[m].clone()).ok_or(
                CompensationError::SingularSystem { mixture: m },
            )?;
            solved.push(chol.solve(&stats.numerator[m].transpose()).transpose());
        }
        Ok(solved)
    }

    /// Estimates the transforms from a list of stereo (noisy, clean) file
    /// pairs.
    ///
    /// Statistics accumulate in parallel over the pair list; a pair whose
    /// files disagree on frame count fails the whole estimation. Each
    /// mixture's transform is the closed-form solve
    /// `numerator · denominator⁻¹`; a non-invertible denominator fails
    /// with [`CompensationError::SingularSystem`]. The live transforms are
    /// only replaced after every mixture has been solved.
    pub fn estimate<S>(
        &mut self,
        source: &S,
        stereo_pairs: &[(PathBuf, PathBuf)],
        workers: Option<usize>,
    ) -> CompensationResult<()>
    where
        S: FeatureSource + Sync + ?Sized,
    {
        let workers = resolve_workers(workers)?;
        let this = &*self;
        let stats = accumulate_parallel(
            stereo_pairs,
            workers,
            || SpliceStatistics::zeros(this.gmm.mixture_count(), this.gmm.dimensionality()),
            |pair: &(PathBuf, PathBuf), local: &mut SpliceStatistics| {
                this.accumulate_stereo_file(source, &pair.0, &pair.1, local)
            },
        )?;
        self.transforms = self.solve_transforms(&stats)?;
        Ok(())
    }

    /// Compensates a sequence of noisy frames.
    ///
    /// Each output frame is `Σ_m γ_m · (W_m · [1, x])` with `γ` the
    /// posterior of the noisy frame under the backing model; frame count
    /// and dimensionality are preserved.
    pub fn apply(&self, frames: &[Vec<f64>]) -> CompensationResult<Vec<Vec<f64>>> {
        let dim = self.gmm.dimensionality();
        let mut compensated = Vec::with_capacity(frames.len());
        for frame in frames {
            validate_dimension(frame, dim, "compensation input frame")?;
            let gamma = self.gmm.posterior(frame)?;
            let augmented = augment(frame);
            let mut output = DVector::zeros(dim);
            for (m, &g) in gamma.iter().enumerate() {
                output.gemv(g, &self.transforms[m], &augmented, 1.0);
            }
            compensated.push(output.iter().copied().collect());
        }
        Ok(compensated)
    }

    /// Compensates a list of (noisy path, output path) file pairs.
    ///
    /// Runs through the same parallel accumulator with the written output
    /// file as the side effect and a unit completion token per pair; the
    /// call blocks until every output has been written or fails as a whole.
    pub fn apply_to_files<S>(
        &self,
        source: &S,
        pairs: &[(PathBuf, PathBuf)],
        workers: Option<usize>,
    ) -> CompensationResult<()>
    where
        S: FeatureSource + Sync + ?Sized,
    {
        let workers = resolve_workers(workers)?;
        accumulate_parallel(
            pairs,
            workers,
            || (),
            |pair: &(PathBuf, PathBuf), _token: &mut ()| {
                let noisy = source.read_frames(&pair.0)?;
                let compensated = self.apply(&noisy)?;
                source.write_frames(&pair.1, &compensated)
            },
        )
    }
}

/// Bias-augmented frame `[1, x_0, …, x_{D-1}]`.
fn augment(frame: &[f64]) -> DVector<f64> {
    let mut augmented = DVector::zeros(frame.len() + 1);
    augmented[0] = 1.0;
    for (d, &x) in frame.iter().enumerate() {
        augmented[d + 1] = x;
    }
    augmented
}
