//! Gaussian Mixture Model clustering.
//!
//! # The Probabilistic Model
//!
//! Data is modelled as generated from K Gaussian distributions with diagonal
//! covariance:
//!
//! ```text
//! P(x) = Σₖ πₖ × N(x | μₖ, diag(σ²ₖ))
//! ```
//!
//! # The EM Algorithm
//!
//! **E-step**: Compute "responsibilities" (soft assignments):
//! ```text
//! γₙₖ = πₖ × N(xₙ | μₖ, σ²ₖ) / Σⱼ πⱼ × N(xₙ | μⱼ, σ²ⱼ)
//! ```
//!
//! **M-step**: Update parameters using responsibilities:
//! - μₖ = Σₙ γₙₖ xₙ / Σₙ γₙₖ
//! - σ²ₖ = Σₙ γₙₖ (xₙ - μₖ)² / Σₙ γₙₖ + reg_covar
//! - πₖ = (1/N) Σₙ γₙₖ
//!
//! Iteration stops once the mean log-likelihood improves by less than `tol`.
//! The parameters with the best likelihood seen are kept, so a numerically
//! unstable step never makes the result worse.
//!
//! # Failure Modes
//!
//! - **Local optima**: means are seeded with k-means++ over distinct records
//! - **Singular covariance**: collapsing components are floored at `reg_covar`

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::kmeans::kmeans_plus_plus;
use super::traits::{ClusterModel, Clustering, SoftClustering};
use super::{check_data, check_features, check_stored};
use crate::error::{Error, Result};
use crate::labeling::Labeling;

/// Gaussian Mixture Model clustering.
#[derive(Debug, Clone)]
pub struct Gmm {
    /// Number of components (clusters).
    n_components: usize,
    /// Maximum EM iterations.
    max_iter: usize,
    /// Convergence tolerance on the mean log-likelihood.
    tol: f64,
    /// Random seed.
    seed: u64,
    /// Regularization for covariance.
    reg_covar: f64,
}

impl Gmm {
    /// Create a new GMM with `n_components` components.
    pub fn new(n_components: usize) -> Self {
        Self {
            n_components,
            max_iter: 100,
            tol: 1e-3,
            seed: 0,
            reg_covar: 1e-6,
        }
    }

    /// Set maximum iterations.
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set convergence tolerance.
    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    /// Set covariance regularization.
    pub fn with_reg_covar(mut self, reg_covar: f64) -> Self {
        self.reg_covar = reg_covar;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of components requested.
    pub fn n_components(&self) -> usize {
        self.n_components
    }
}

/// Log density of `point` under a diagonal Gaussian.
fn log_gaussian(point: ArrayView1<'_, f64>, mean: ArrayView1<'_, f64>, var: ArrayView1<'_, f64>) -> f64 {
    let d = point.len() as f64;
    let mut log_prob = -0.5 * d * (2.0 * std::f64::consts::PI).ln();
    for ((x, m), v) in point.iter().zip(mean.iter()).zip(var.iter()) {
        let diff = x - m;
        log_prob -= 0.5 * v.ln();
        log_prob -= 0.5 * diff * diff / v;
    }
    log_prob
}

/// Log-sum-exp for numerical stability.
fn logsumexp(values: &[f64]) -> f64 {
    let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max_val.is_infinite() {
        return max_val;
    }
    max_val + values.iter().map(|&v| (v - max_val).exp()).sum::<f64>().ln()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Params {
    weights: Array1<f64>,
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl Params {
    /// Per-row log joint `ln πₖ + ln N(x | k)`.
    fn log_joint(&self, point: ArrayView1<'_, f64>) -> Vec<f64> {
        (0..self.weights.len())
            .map(|c| {
                self.weights[c].ln()
                    + log_gaussian(point, self.means.row(c), self.variances.row(c))
            })
            .collect()
    }

    /// Responsibilities and mean log-likelihood.
    fn e_step(&self, data: ArrayView2<'_, f64>) -> (Array2<f64>, f64) {
        let n = data.nrows();
        let k = self.weights.len();
        let mut resp = Array2::zeros((n, k));
        let mut total = 0.0;
        for (i, point) in data.outer_iter().enumerate() {
            let log_probs = self.log_joint(point);
            let log_sum = logsumexp(&log_probs);
            total += log_sum;
            for c in 0..k {
                resp[[i, c]] = (log_probs[c] - log_sum).exp();
            }
        }
        (resp, total / n as f64)
    }

    fn m_step(&mut self, data: ArrayView2<'_, f64>, resp: &Array2<f64>, reg_covar: f64) {
        let n = data.nrows() as f64;
        let resp_sum = resp.sum_axis(Axis(0));

        for c in 0..self.weights.len() {
            let rc = resp_sum[c];
            if rc <= 1e-10 {
                // Starved component: keep its location, shrink its weight.
                self.weights[c] = rc / n;
                continue;
            }
            let gamma = resp.column(c);
            let mean = gamma.dot(&data) / rc;
            let mut var = Array1::from_elem(data.ncols(), reg_covar);
            for (g, row) in gamma.iter().zip(data.outer_iter()) {
                let diff = &row - &mean;
                var.scaled_add(*g / rc, &(&diff * &diff));
            }
            self.weights[c] = rc / n;
            self.means.row_mut(c).assign(&mean);
            self.variances.row_mut(c).assign(&var);
        }
        // Keep log-weights finite.
        self.weights.mapv_inplace(|w| w.max(f64::MIN_POSITIVE));
        let norm = self.weights.sum();
        self.weights /= norm;
    }

    fn argmax(&self, data: ArrayView2<'_, f64>) -> Vec<usize> {
        data.outer_iter()
            .map(|point| {
                self.log_joint(point)
                    .iter()
                    .enumerate()
                    .fold((0, f64::NEG_INFINITY), |best, (c, &lp)| {
                        if lp > best.1 {
                            (c, lp)
                        } else {
                            best
                        }
                    })
                    .0
            })
            .collect()
    }
}

impl Clustering for Gmm {
    type Model = GmmModel;

    fn fit(&self, data: ArrayView2<'_, f64>) -> Result<GmmModel> {
        check_data(data)?;
        let n = data.nrows();
        let d = data.ncols();
        let k = self.n_components;

        if k == 0 {
            return Err(Error::invalid_parameter("n_groups", "must be at least 1"));
        }
        if k > n {
            return Err(Error::InvalidClusterCount {
                requested: k,
                n_items: n,
            });
        }
        if !(self.reg_covar > 0.0 && self.reg_covar.is_finite()) {
            return Err(Error::invalid_parameter("reg_covar", "must be positive and finite"));
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let seeds = kmeans_plus_plus(data, k, &mut rng);

        let data_var = data.var_axis(Axis(0), 0.0).mapv(|v| v + self.reg_covar);
        let mut variances = Array2::<f64>::zeros((k, d));
        for mut row in variances.outer_iter_mut() {
            row.assign(&data_var);
        }

        let mut params = Params {
            weights: Array1::from_elem(k, 1.0 / k as f64),
            means: data.select(Axis(0), &seeds),
            variances,
        };

        let mut best: Option<(f64, Params)> = None;
        let mut prev_ll = f64::NEG_INFINITY;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_iter {
            iterations += 1;
            let (resp, ll) = params.e_step(data);

            if best.as_ref().map_or(true, |(b, _)| ll > *b) {
                best = Some((ll, params.clone()));
            }
            if (ll - prev_ll).abs() < self.tol {
                converged = true;
                break;
            }
            prev_ll = ll;
            params.m_step(data, &resp, self.reg_covar);
        }

        if !converged {
            // The last M-step has not been scored yet.
            let (_, ll) = params.e_step(data);
            if best.as_ref().map_or(true, |(b, _)| ll > *b) {
                best = Some((ll, params.clone()));
            }
        }

        let (log_likelihood, params) = best.unwrap_or((f64::NEG_INFINITY, params));

        // Drop components that win no training row; the remaining weights are
        // renormalised, which leaves every argmax unchanged.
        let (labels, kept) = Labeling::compact_with_mapping(params.argmax(data));
        let mut weights = params.weights.select(Axis(0), &kept);
        let total = weights.sum();
        weights /= total;
        let params = Params {
            weights,
            means: params.means.select(Axis(0), &kept),
            variances: params.variances.select(Axis(0), &kept),
        };

        if converged {
            debug!(k, iterations, log_likelihood, "gmm converged");
        } else {
            warn!(k, iterations, "gmm reached its iteration cap before converging");
        }

        Ok(GmmModel {
            params,
            labels,
            log_likelihood,
            iterations,
            converged,
        })
    }
}

/// Fitted mixture state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmmModel {
    params: Params,
    labels: Labeling,
    log_likelihood: f64,
    iterations: usize,
    converged: bool,
}

impl GmmModel {
    /// Mixing weights.
    pub fn weights(&self) -> &Array1<f64> {
        &self.params.weights
    }

    /// Component means, one row per group.
    pub fn means(&self) -> &Array2<f64> {
        &self.params.means
    }

    /// Diagonal variances, one row per group.
    pub fn variances(&self) -> &Array2<f64> {
        &self.params.variances
    }

    /// Best mean log-likelihood per record reached during EM.
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }

    /// EM iterations run.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Whether the likelihood settled before the iteration cap.
    pub fn converged(&self) -> bool {
        self.converged
    }

    pub(crate) fn validate(&self) -> Result<()> {
        let Params {
            weights,
            means,
            variances,
        } = &self.params;
        if weights.is_empty() {
            return Err(Error::invalid_parameter("weights", "at least one component is required"));
        }
        for found in [means.nrows(), variances.nrows()] {
            if found != weights.len() {
                return Err(Error::DimensionMismatch {
                    expected: weights.len(),
                    found,
                });
            }
        }
        if variances.ncols() != means.ncols() {
            return Err(Error::DimensionMismatch {
                expected: means.ncols(),
                found: variances.ncols(),
            });
        }
        check_stored("means", means)?;
        if weights.iter().any(|&w| !(w > 0.0 && w.is_finite())) {
            return Err(Error::invalid_parameter("weights", "must be positive and finite"));
        }
        if variances.iter().any(|&v| !(v > 0.0 && v.is_finite())) {
            return Err(Error::invalid_parameter("variances", "must be positive and finite"));
        }
        Ok(())
    }
}

impl ClusterModel for GmmModel {
    fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Labeling> {
        check_data(data)?;
        check_features(self.n_features(), data)?;
        Ok(Labeling::from_raw(self.params.argmax(data)))
    }

    fn labels(&self) -> &Labeling {
        &self.labels
    }

    fn n_groups(&self) -> usize {
        self.params.weights.len()
    }

    fn n_features(&self) -> usize {
        self.params.means.ncols()
    }

    fn convergence_warning(&self) -> Option<Error> {
        (!self.converged).then_some(Error::ConvergenceNotReached {
            iterations: self.iterations,
        })
    }
}

impl SoftClustering for GmmModel {
    fn predict_proba(&self, data: ArrayView2<'_, f64>) -> Result<Vec<Vec<f64>>> {
        check_data(data)?;
        check_features(self.n_features(), data)?;
        let (resp, _) = self.params.e_step(data);
        Ok(resp.outer_iter().map(|row| row.to_vec()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> Array2<f64> {
        Array2::from_shape_fn((40, 2), |(i, j)| {
            let centre = if i < 20 { 0.0 } else { 8.0 };
            centre + ((i * 7 + j * 3) % 5) as f64 * 0.1
        })
    }

    #[test]
    fn test_gmm_basic() {
        let data = blobs();
        let labels = Gmm::new(2).with_seed(42).fit_predict(data.view()).unwrap();
        let l = labels.as_slice();
        assert!(l[..20].iter().all(|&x| x == l[0]));
        assert!(l[20..].iter().all(|&x| x == l[20]));
        assert_ne!(l[0], l[20]);
    }

    #[test]
    fn test_gmm_soft_assignments_sum_to_one() {
        let data = blobs();
        let model = Gmm::new(2).with_seed(42).fit(data.view()).unwrap();
        let probs = model.predict_proba(array![[4.0, 4.0], [0.1, 0.2]].view()).unwrap();
        for row in &probs {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
        assert!((model.weights().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_gmm_deterministic_with_seed() {
        let data = blobs();
        let a = Gmm::new(3).with_seed(5).fit(data.view()).unwrap();
        let b = Gmm::new(3).with_seed(5).fit(data.view()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_reproduces_training_labels() {
        let data = blobs();
        let model = Gmm::new(3).with_seed(11).fit(data.view()).unwrap();
        assert_eq!(&model.predict(data.view()).unwrap(), model.labels());
        assert_eq!(model.labels().n_groups(), model.n_groups());
    }

    #[test]
    fn test_iteration_cap_returns_best_state() {
        let data = blobs();
        let model = Gmm::new(2)
            .with_seed(1)
            .with_max_iter(1)
            .with_tol(0.0)
            .fit(data.view())
            .unwrap();
        assert!(!model.converged());
        assert!(model.convergence_warning().is_some());
        assert!(model.log_likelihood().is_finite());
        assert_eq!(model.labels().len(), 40);
    }

    #[test]
    fn test_gmm_invalid_inputs() {
        let data = array![[0.0, 0.0], [1.0, 1.0]];
        assert!(Gmm::new(0).fit(data.view()).is_err());
        assert!(matches!(
            Gmm::new(3).fit(data.view()),
            Err(Error::InvalidClusterCount { .. })
        ));
        assert!(Gmm::new(1).with_reg_covar(0.0).fit(data.view()).is_err());
    }
}
