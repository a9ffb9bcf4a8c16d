//! Diagonal-covariance Gaussian mixture model and its EM training loop.
//!
//! The model owns weights, means and variances for a fixed dimensionality
//! and computes per-mixture likelihoods and posteriors. Training follows a
//! mixture-splitting growth schedule: one EM round at a single mixture,
//! then repeated {double mixtures, three EM rounds} until the target count
//! is reached, then three final rounds. Sufficient statistics for each
//! round are gathered in parallel over the training file list and the
//! parameter update never touches the live model until the complete new
//! parameter set has been computed and validated.

use std::path::PathBuf;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use crate::accumulator::{accumulate_parallel, resolve_workers, ShardStats};
use crate::errors::{
    validate_dimension, validate_nonzero, CompensationError, CompensationResult,
};
use crate::featio::FeatureSource;

/// Lower bound applied to every variance entry after each M-step.
pub const VARIANCE_FLOOR: f64 = 0.01;

/// EM rounds run after each mixture doubling and again once the target
/// mixture count has been reached.
const EM_ROUNDS_PER_STAGE: usize = 3;

/// Per-mixture sufficient statistics for one EM round.
///
/// Zero-initialized at the start of a round, populated by the parallel
/// reduction across workers, consumed once by the M-step and discarded.
#[derive(Debug, Clone)]
pub struct SufficientStatistics {
    /// Posterior mass assigned to each mixture.
    count: Vec<f64>,
    /// Posterior-weighted sum of feature vectors, per mixture.
    weighted_sum: Vec<Vec<f64>>,
    /// Posterior-weighted sum of squared feature vectors, per mixture.
    weighted_sum_squares: Vec<Vec<f64>>,
}

impl SufficientStatistics {
    /// Zero statistics for a model of `mixtures` components over
    /// `dimensionality`-length features.
    pub fn zeros(mixtures: usize, dimensionality: usize) -> Self {
        Self {
            count: vec![0.0; mixtures],
            weighted_sum: vec![vec![0.0; dimensionality]; mixtures],
            weighted_sum_squares: vec![vec![0.0; dimensionality]; mixtures],
        }
    }

    /// Total posterior mass across all mixtures.
    pub fn total_mass(&self) -> f64 {
        self.count.iter().sum()
    }
}

impl ShardStats for SufficientStatistics {
    fn merge(&mut self, other: Self) {
        for (acc, part) in self.count.iter_mut().zip(&other.count) {
            *acc += part;
        }
        for (acc, part) in self.weighted_sum.iter_mut().zip(&other.weighted_sum) {
            for (a, p) in acc.iter_mut().zip(part) {
                *a += p;
            }
        }
        for (acc, part) in self
            .weighted_sum_squares
            .iter_mut()
            .zip(&other.weighted_sum_squares)
        {
            for (a, p) in acc.iter_mut().zip(part) {
                *a += p;
            }
        }
    }
}

/// Configuration for [`GaussianMixtureModel::train`].
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// Requested mixture count. Rounded up to the next power of two when
    /// necessary (the adjustment is logged and returned in the report).
    pub target_mixtures: usize,
    /// Worker count for parallel accumulation. `None` uses the host core
    /// count.
    pub workers: Option<usize>,
    /// Seed for the fresh random means drawn when training resets the
    /// model. `None` uses OS entropy.
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            target_mixtures: 1,
            workers: None,
            seed: None,
        }
    }
}

/// Summary of a completed training run.
#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// Mixture count the caller asked for.
    pub requested_mixtures: usize,
    /// Mixture count actually trained (next power of two at or above the
    /// request).
    pub effective_mixtures: usize,
    /// Total EM rounds executed.
    pub em_rounds: usize,
    /// Number of feature files in the training list.
    pub files: usize,
}

/// Diagonal-covariance Gaussian mixture model.
///
/// Created with a single mixture and random means; mutated only through
/// the M-step parameter update and the mixture-doubling operation.
/// Weights always sum to one and every variance entry stays at or above
/// [`VARIANCE_FLOOR`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianMixtureModel {
    dim: usize,
    mix: usize,
    weights: Vec<f64>,
    means: Vec<Vec<f64>>,
    vars: Vec<Vec<f64>>,
}

fn make_rng(seed: Option<u64>) -> ChaCha20Rng {
    match seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    }
}

fn random_mean(dimensionality: usize, rng: &mut ChaCha20Rng) -> Vec<f64> {
    (0..dimensionality)
        .map(|_| StandardNormal.sample(rng))
        .collect()
}

impl GaussianMixtureModel {
    /// Creates a single-mixture model with entropy-seeded random means,
    /// unit variances and unit weight.
    pub fn new(dimensionality: usize) -> CompensationResult<Self> {
        Self::init(dimensionality, None)
    }

    /// Creates a single-mixture model with a deterministic seed for the
    /// random mean initialization.
    pub fn with_seed(dimensionality: usize, seed: u64) -> CompensationResult<Self> {
        Self::init(dimensionality, Some(seed))
    }

    fn init(dimensionality: usize, seed: Option<u64>) -> CompensationResult<Self> {
        validate_nonzero(dimensionality, "dimensionality")?;
        let mut rng = make_rng(seed);
        Ok(Self {
            dim: dimensionality,
            mix: 1,
            weights: vec![1.0],
            means: vec![random_mean(dimensionality, &mut rng)],
            vars: vec![vec![1.0; dimensionality]],
        })
    }

    /// Feature dimensionality D.
    pub fn dimensionality(&self) -> usize {
        self.dim
    }

    /// Current mixture count M.
    pub fn mixture_count(&self) -> usize {
        self.mix
    }

    /// Mixture weights, summing to one.
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Per-mixture mean vectors.
    pub fn means(&self) -> &[Vec<f64>] {
        &self.means
    }

    /// Per-mixture diagonal variances.
    pub fn variances(&self) -> &[Vec<f64>] {
        &self.vars
    }

    /// Unnormalized diagonal-Gaussian density of `frame` under each
    /// mixture, scaled by the mixture weight.
    pub fn likelihood(&self, frame: &[f64]) -> CompensationResult<Vec<f64>> {
        validate_dimension(frame, self.dim, "likelihood")?;
        let norm = (2.0 * std::f64::consts::PI).powf(-0.5 * self.dim as f64);
        let mut likelihoods = Vec::with_capacity(self.mix);
        for i in 0..self.mix {
            let mut exponent = 0.0;
            let mut det = 1.0;
            for d in 0..self.dim {
                let diff = frame[d] - self.means[i][d];
                exponent += diff * diff / self.vars[i][d];
                det *= self.vars[i][d];
            }
            likelihoods.push(self.weights[i] * norm * det.powf(-0.5) * (-0.5 * exponent).exp());
        }
        Ok(likelihoods)
    }

    /// Posterior (responsibility) of `frame` under each mixture.
    ///
    /// Returns the constant `[1]` for a single-mixture model. Fails with
    /// [`CompensationError::NumericalUnderflow`] when every mixture
    /// likelihood underflows to zero.
    pub fn posterior(&self, frame: &[f64]) -> CompensationResult<Vec<f64>> {
        if self.mix == 1 {
            validate_dimension(frame, self.dim, "posterior")?;
            return Ok(vec![1.0]);
        }
        let likelihoods = self.likelihood(frame)?;
        let sum: f64 = likelihoods.iter().sum();
        if !(sum > 0.0) {
            return Err(CompensationError::NumericalUnderflow { mixtures: self.mix });
        }
        Ok(likelihoods.into_iter().map(|l| l / sum).collect())
    }

    /// Adds one frame's posterior-weighted contribution to `stats`.
    pub fn accumulate(
        &self,
        frame: &[f64],
        stats: &mut SufficientStatistics,
    ) -> CompensationResult<()> {
        let gamma = self.posterior(frame)?;
        for i in 0..self.mix {
            stats.count[i] += gamma[i];
            for d in 0..self.dim {
                stats.weighted_sum[i][d] += gamma[i] * frame[d];
                stats.weighted_sum_squares[i][d] += gamma[i] * frame[d] * frame[d];
            }
        }
        Ok(())
    }

    /// M-step: recomputes weights, means and variances from accumulated
    /// statistics.
    ///
    /// Fails with [`CompensationError::DegenerateMixture`] when a mixture
    /// received zero posterior mass; the model is left untouched on any
    /// error.
    pub fn update_parameters(&mut self, stats: &SufficientStatistics) -> CompensationResult<()> {
        if stats.count.len() != self.mix {
            return Err(CompensationError::DimensionMismatch {
                expected: self.mix,
                actual: stats.count.len(),
                context: "sufficient statistics".to_string(),
            });
        }
        if let Some(starved) = stats.count.iter().position(|&mass| !(mass > 0.0)) {
            return Err(CompensationError::DegenerateMixture { mixture: starved });
        }

        let total = stats.total_mass();
        let mut weights = Vec::with_capacity(self.mix);
        let mut means = Vec::with_capacity(self.mix);
        let mut vars = Vec::with_capacity(self.mix);
        for i in 0..self.mix {
            weights.push(stats.count[i] / total);
            let mean: Vec<f64> = (0..self.dim)
                .map(|d| stats.weighted_sum[i][d] / stats.count[i])
                .collect();
            // cancellation can push the raw second moment below the mean
            // square; the floor absorbs it
            let var: Vec<f64> = (0..self.dim)
                .map(|d| {
                    let raw = stats.weighted_sum_squares[i][d] / stats.count[i]
                        - mean[d] * mean[d];
                    raw.max(VARIANCE_FLOOR)
                })
                .collect();
            means.push(mean);
            vars.push(var);
        }

        self.weights = weights;
        self.means = means;
        self.vars = vars;
        Ok(())
    }

    /// Splits every mixture along its maximum-variance axis.
    ///
    /// Each parent produces two children at `mean ± 0.2·var` on that axis
    /// (ties broken toward the lowest dimension index), inheriting the
    /// parent's variance row and half its weight. All "+" children are
    /// stacked before all "−" children, so total weight mass is preserved
    /// and the mixture count exactly doubles.
    pub fn double_mixtures(&mut self) {
        let mut minus = Vec::with_capacity(self.mix);
        for i in 0..self.mix {
            let mut axis = 0;
            for d in 1..self.dim {
                if self.vars[i][d] > self.vars[i][axis] {
                    axis = d;
                }
            }
            let offset = 0.2 * self.vars[i][axis];
            let mut child = self.means[i].clone();
            child[axis] -= offset;
            minus.push(child);
            self.means[i][axis] += offset;
        }
        self.means.append(&mut minus);
        for weight in &mut self.weights {
            *weight *= 0.5;
        }
        self.weights.extend_from_within(..);
        self.vars.extend_from_within(..);
        self.mix *= 2;
    }

    /// Discards all fitted state and returns to a single mixture with
    /// fresh random means.
    fn reset(&mut self, seed: Option<u64>) {
        let mut rng = make_rng(seed);
        self.mix = 1;
        self.weights = vec![1.0];
        self.means = vec![random_mean(self.dim, &mut rng)];
        self.vars = vec![vec![1.0; self.dim]];
    }

    /// One EM round: zeroed statistics, parallel accumulation over the
    /// full file list, parameter update.
    fn em_round<S>(
        &mut self,
        source: &S,
        files: &[PathBuf],
        workers: usize,
    ) -> CompensationResult<()>
    where
        S: FeatureSource + Sync + ?Sized,
    {
        log::debug!(
            "EM round: {} mixtures over {} feature files",
            self.mix,
            files.len()
        );
        let model = &*self;
        let stats = accumulate_parallel(
            files,
            workers,
            || SufficientStatistics::zeros(model.mix, model.dim),
            |path: &PathBuf, local: &mut SufficientStatistics| {
                let frames = source.read_frames(path)?;
                for frame in &frames {
                    model.accumulate(frame, local)?;
                }
                Ok(())
            },
        )?;
        self.update_parameters(&stats)
    }

    /// Trains the model on a list of feature files with the doubling
    /// growth schedule.
    ///
    /// A non-power-of-two `target_mixtures` is rounded up to the next
    /// power of two; the adjustment is logged and visible in the returned
    /// report. If the current mixture count already meets or exceeds the
    /// target, the model is deliberately reset to a single mixture with
    /// fresh random means before training.
    pub fn train<S>(
        &mut self,
        source: &S,
        files: &[PathBuf],
        config: &TrainingConfig,
    ) -> CompensationResult<TrainingReport>
    where
        S: FeatureSource + Sync + ?Sized,
    {
        validate_nonzero(config.target_mixtures, "target_mixtures")?;
        let workers = resolve_workers(config.workers)?;
        let requested = config.target_mixtures;
        let target = requested.next_power_of_two();
        if target != requested {
            log::warn!(
                "mixture target {} is not a power of two; training {} mixtures instead",
                requested,
                target
            );
        }
        log::debug!("training with {} workers", workers);

        if self.mix >= target {
            self.reset(config.seed);
        }

        let mut em_rounds = 0;
        self.em_round(source, files, workers)?;
        em_rounds += 1;

        if target > 1 {
            while self.mix < target {
                self.double_mixtures();
                for _ in 0..EM_ROUNDS_PER_STAGE {
                    self.em_round(source, files, workers)?;
                    em_rounds += 1;
                }
            }
            for _ in 0..EM_ROUNDS_PER_STAGE {
                self.em_round(source, files, workers)?;
                em_rounds += 1;
            }
        }

        Ok(TrainingReport {
            requested_mixtures: requested,
            effective_mixtures: self.mix,
            em_rounds,
            files: files.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use std::collections::HashMap;

    /// In-memory feature source for schedule tests.
    struct MemorySource(HashMap<PathBuf, Vec<Vec<f64>>>);

    impl FeatureSource for MemorySource {
        fn read_frames(&self, path: &std::path::Path) -> CompensationResult<Vec<Vec<f64>>> {
            self.0.get(path).cloned().ok_or_else(|| {
                CompensationError::MalformedFeatureFile {
                    path: path.to_path_buf(),
                    reason: "no such entry".to_string(),
                }
            })
        }

        fn write_frames(
            &self,
            path: &std::path::Path,
            _frames: &[Vec<f64>],
        ) -> CompensationResult<()> {
            Err(CompensationError::MalformedFeatureFile {
                path: path.to_path_buf(),
                reason: "read-only source".to_string(),
            })
        }
    }

    fn two_mixture_model() -> GaussianMixtureModel {
        GaussianMixtureModel {
            dim: 2,
            mix: 2,
            weights: vec![0.5, 0.5],
            means: vec![vec![0.0, 0.0], vec![4.0, 4.0]],
            vars: vec![vec![1.0, 1.0], vec![1.0, 1.0]],
        }
    }

    #[test]
    fn zero_dimensionality_is_rejected() {
        assert!(matches!(
            GaussianMixtureModel::new(0),
            Err(CompensationError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn single_mixture_posterior_is_unit() {
        let model = GaussianMixtureModel::with_seed(3, 11).unwrap();
        assert_eq!(model.posterior(&[0.0, 0.0, 0.0]).unwrap(), vec![1.0]);
    }

    #[test]
    fn posterior_is_a_distribution() {
        let model = two_mixture_model();
        let gamma = model.posterior(&[1.0, 1.0]).unwrap();
        assert_eq!(gamma.len(), 2);
        assert!(gamma.iter().all(|&g| g >= 0.0));
        assert_approx_eq!(gamma.iter().sum::<f64>(), 1.0, 1e-12);
        // the frame sits much closer to the first mixture
        assert!(gamma[0] > gamma[1]);
    }

    #[test]
    fn posterior_underflow_is_reported() {
        let mut model = two_mixture_model();
        model.means = vec![vec![1e6, 1e6], vec![-1e6, -1e6]];
        let err = model.posterior(&[0.0, 0.0]).unwrap_err();
        assert!(matches!(
            err,
            CompensationError::NumericalUnderflow { mixtures: 2 }
        ));
    }

    #[test]
    fn wrong_frame_length_is_rejected() {
        let model = two_mixture_model();
        assert!(matches!(
            model.likelihood(&[1.0]),
            Err(CompensationError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn m_step_matches_sample_moments() {
        let mut model = GaussianMixtureModel::with_seed(2, 3).unwrap();
        let mut stats = SufficientStatistics::zeros(1, 2);
        // sample mean (1, 1); sample variance (4, 1)
        for frame in [[-1.0, 0.0], [3.0, 2.0]] {
            model.accumulate(&frame, &mut stats).unwrap();
        }
        model.update_parameters(&stats).unwrap();

        assert_eq!(model.weights(), &[1.0]);
        assert_approx_eq!(model.means()[0][0], 1.0, 1e-12);
        assert_approx_eq!(model.means()[0][1], 1.0, 1e-12);
        assert_approx_eq!(model.variances()[0][0], 4.0, 1e-12);
        assert_approx_eq!(model.variances()[0][1], 1.0, 1e-12);
    }

    #[test]
    fn m_step_applies_variance_floor() {
        let mut model = GaussianMixtureModel::with_seed(2, 3).unwrap();
        let mut stats = SufficientStatistics::zeros(1, 2);
        for _ in 0..4 {
            model.accumulate(&[2.0, 2.0], &mut stats).unwrap();
        }
        model.update_parameters(&stats).unwrap();
        assert_eq!(model.variances()[0], vec![VARIANCE_FLOOR, VARIANCE_FLOOR]);
    }

    #[test]
    fn starved_mixture_leaves_model_untouched() {
        let mut model = two_mixture_model();
        let before = model.clone();
        let mut stats = SufficientStatistics::zeros(2, 2);
        // mass lands only on the first mixture
        stats.count[0] = 5.0;
        stats.weighted_sum[0] = vec![5.0, 5.0];
        stats.weighted_sum_squares[0] = vec![10.0, 10.0];

        let err = model.update_parameters(&stats).unwrap_err();
        assert!(matches!(
            err,
            CompensationError::DegenerateMixture { mixture: 1 }
        ));
        assert_eq!(model.weights(), before.weights());
        assert_eq!(model.means(), before.means());
        assert_eq!(model.variances(), before.variances());
    }

    #[test]
    fn doubling_splits_along_max_variance_axis() {
        let mut model = GaussianMixtureModel {
            dim: 2,
            mix: 1,
            weights: vec![1.0],
            means: vec![vec![1.0, 2.0]],
            vars: vec![vec![0.5, 2.0]],
        };
        model.double_mixtures();

        assert_eq!(model.mixture_count(), 2);
        // "+" child first, then the "−" child; axis 1 has the larger variance
        assert_eq!(model.means()[0], vec![1.0, 2.4]);
        assert_eq!(model.means()[1], vec![1.0, 1.6]);
        assert_eq!(model.weights(), &[0.5, 0.5]);
        assert_eq!(model.variances()[0], model.variances()[1]);
    }

    #[test]
    fn doubling_breaks_ties_toward_lowest_axis() {
        let mut model = GaussianMixtureModel {
            dim: 3,
            mix: 1,
            weights: vec![1.0],
            means: vec![vec![0.0, 0.0, 0.0]],
            vars: vec![vec![1.0, 1.0, 1.0]],
        };
        model.double_mixtures();
        assert_eq!(model.means()[0], vec![0.2, 0.0, 0.0]);
        assert_eq!(model.means()[1], vec![-0.2, 0.0, 0.0]);
    }

    #[test]
    fn doubling_preserves_weight_mass() {
        let mut model = two_mixture_model();
        let before: f64 = model.weights().iter().sum();
        model.double_mixtures();
        let after: f64 = model.weights().iter().sum();
        assert_eq!(model.mixture_count(), 4);
        assert_approx_eq!(before, after, 1e-12);
    }

    fn synthetic_source(files: usize, frames_per_file: usize) -> (MemorySource, Vec<PathBuf>) {
        // two well-separated clusters so every mixture keeps mass
        let mut store = HashMap::new();
        let mut paths = Vec::new();
        for f in 0..files {
            let frames: Vec<Vec<f64>> = (0..frames_per_file)
                .map(|t| {
                    let k = (f * frames_per_file + t) as f64;
                    let center = if (f + t) % 2 == 0 { 0.0 } else { 8.0 };
                    vec![center + (k * 0.37).sin(), center + (k * 0.53).cos()]
                })
                .collect();
            let path = PathBuf::from(format!("mem://{f}.mfc"));
            store.insert(path.clone(), frames);
            paths.push(path);
        }
        (MemorySource(store), paths)
    }

    #[test]
    fn training_to_one_mixture_runs_one_round() {
        let (source, files) = synthetic_source(3, 20);
        let mut model = GaussianMixtureModel::with_seed(2, 17).unwrap();
        let config = TrainingConfig {
            target_mixtures: 1,
            workers: Some(2),
            seed: Some(17),
        };
        let report = model.train(&source, &files, &config).unwrap();
        assert_eq!(report.em_rounds, 1);
        assert_eq!(report.effective_mixtures, 1);
        assert_eq!(model.mixture_count(), 1);
    }

    #[test]
    fn training_rounds_non_power_of_two_targets_up() {
        let (source, files) = synthetic_source(4, 25);
        let mut model = GaussianMixtureModel::with_seed(2, 29).unwrap();
        let config = TrainingConfig {
            target_mixtures: 3,
            workers: Some(2),
            seed: Some(29),
        };
        let report = model.train(&source, &files, &config).unwrap();

        assert_eq!(report.requested_mixtures, 3);
        assert_eq!(report.effective_mixtures, 4);
        assert_eq!(model.mixture_count(), 4);
        // 1 round at one mixture, 3 after each of two doublings, 3 final
        assert_eq!(report.em_rounds, 10);
        assert_approx_eq!(model.weights().iter().sum::<f64>(), 1.0, 1e-9);
        for row in model.variances() {
            for &v in row {
                assert!(v >= VARIANCE_FLOOR);
            }
        }
    }

    #[test]
    fn training_is_reproducible_with_seed() {
        let (source, files) = synthetic_source(4, 25);
        let config = TrainingConfig {
            target_mixtures: 2,
            workers: Some(3),
            seed: Some(99),
        };
        let mut a = GaussianMixtureModel::with_seed(2, 7).unwrap();
        let mut b = GaussianMixtureModel::with_seed(2, 7).unwrap();
        a.train(&source, &files, &config).unwrap();
        b.train(&source, &files, &config).unwrap();
        assert_eq!(a.means(), b.means());
        assert_eq!(a.weights(), b.weights());
    }
}
