//! K-means clustering.
//!
//! Partitions data into k groups by minimizing **within-cluster sum of squares**
//! (WCSS):
//!
//! ```text
//! WCSS = Σₖ Σᵢ∈Cₖ ||xᵢ - μₖ||²
//! ```
//!
//! # Lloyd's Algorithm
//!
//! 1. Seed k centroids with k-means++ over distinct records
//! 2. **Assign**: Each point → nearest centroid
//! 3. **Update**: Each centroid → mean of assigned points
//! 4. Repeat until the squared centroid shift drops below `tol`
//!
//! WCSS decreases monotonically, so the loop settles; `max_iter` bounds it
//! regardless. Hitting the cap is reported through
//! [`ClusterModel::convergence_warning`], never as a failure.
//!
//! ## K-means++ Initialization
//!
//! 1. Choose the first centroid uniformly at random
//! 2. Choose each next centroid with probability proportional to D(x)²
//!    (squared distance to the nearest chosen centroid)
//!
//! Already-chosen records have D(x)² = 0, so seeds are always distinct
//! records. The generator is a `StdRng` seeded explicitly: identical data and
//! seed give identical labels.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use super::traits::{ClusterModel, Clustering};
use super::{check_data, check_features, check_stored, squared_distance};
use crate::error::{Error, Result};
use crate::labeling::Labeling;

/// K-means clustering algorithm.
#[derive(Debug, Clone)]
pub struct Kmeans {
    /// Number of clusters.
    k: usize,
    /// Maximum iterations.
    max_iter: usize,
    /// Convergence tolerance on the squared centroid shift.
    tol: f64,
    /// Random seed.
    seed: u64,
}

impl Kmeans {
    /// Create a new K-means clusterer.
    pub fn new(k: usize) -> Self {
        Self {
            k,
            max_iter: 300,
            tol: 1e-4,
            seed: 0,
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

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Number of clusters requested.
    pub fn k(&self) -> usize {
        self.k
    }
}

/// Pick `k` distinct row indices with k-means++ weighting.
pub(crate) fn kmeans_plus_plus(data: ArrayView2<'_, f64>, k: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = data.nrows();
    let mut chosen = Vec::with_capacity(k);
    let mut taken = vec![false; n];

    let first = rng.random_range(0..n);
    chosen.push(first);
    taken[first] = true;

    let mut min_dist: Vec<f64> = (0..n)
        .map(|j| squared_distance(data.row(j), data.row(first)))
        .collect();

    while chosen.len() < k {
        let total: f64 = min_dist.iter().sum();

        let next = if total > 0.0 {
            let threshold = rng.random::<f64>() * total;
            let mut cumsum = 0.0;
            let mut selected = None;
            for (j, &d) in min_dist.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                cumsum += d;
                selected = Some(j);
                if cumsum >= threshold {
                    break;
                }
            }
            selected
        } else {
            None
        };

        // Every remaining record duplicates a chosen one: fall back to a
        // uniform pick among unused indices.
        let next = next.unwrap_or_else(|| {
            let free: Vec<usize> = (0..n).filter(|&j| !taken[j]).collect();
            free[rng.random_range(0..free.len())]
        });

        chosen.push(next);
        taken[next] = true;
        for (j, d) in min_dist.iter_mut().enumerate() {
            *d = d.min(squared_distance(data.row(j), data.row(next)));
        }
    }

    chosen
}

fn nearest(point: ArrayView1<'_, f64>, centroids: &Array2<f64>) -> (usize, f64) {
    let mut best = (0, f64::MAX);
    for (k, centroid) in centroids.outer_iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best.1 {
            best = (k, dist);
        }
    }
    best
}

fn assign(data: ArrayView2<'_, f64>, centroids: &Array2<f64>, labels: &mut [usize]) {
    #[cfg(feature = "parallel")]
    labels.par_iter_mut().enumerate().for_each(|(i, label)| {
        *label = nearest(data.row(i), centroids).0;
    });

    #[cfg(not(feature = "parallel"))]
    for (i, label) in labels.iter_mut().enumerate() {
        *label = nearest(data.row(i), centroids).0;
    }
}

impl Clustering for Kmeans {
    type Model = KmeansModel;

    fn fit(&self, data: ArrayView2<'_, f64>) -> Result<KmeansModel> {
        check_data(data)?;
        let n = data.nrows();
        let d = data.ncols();

        if self.k == 0 {
            return Err(Error::invalid_parameter("n_groups", "must be at least 1"));
        }
        if self.k > n {
            return Err(Error::InvalidClusterCount {
                requested: self.k,
                n_items: n,
            });
        }

        let mut rng = StdRng::seed_from_u64(self.seed);
        let seeds = kmeans_plus_plus(data, self.k, &mut rng);
        let mut centroids = data.select(Axis(0), &seeds);
        let mut labels = vec![0usize; n];
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.max_iter {
            iterations += 1;
            assign(data, &centroids, &mut labels);

            // Update step
            let mut new_centroids = Array2::zeros((self.k, d));
            let mut counts = vec![0usize; self.k];
            for (i, &k) in labels.iter().enumerate() {
                let mut row = new_centroids.row_mut(k);
                row += &data.row(i);
                counts[k] += 1;
            }

            for k in 0..self.k {
                if counts[k] > 0 {
                    new_centroids
                        .row_mut(k)
                        .mapv_inplace(|v| v / counts[k] as f64);
                } else {
                    // Empty cluster: reseed from the point farthest from its centroid.
                    let far = (0..n)
                        .max_by(|&a, &b| {
                            let da = squared_distance(data.row(a), centroids.row(labels[a]));
                            let db = squared_distance(data.row(b), centroids.row(labels[b]));
                            da.total_cmp(&db).then(b.cmp(&a))
                        })
                        .unwrap_or(0);
                    new_centroids.row_mut(k).assign(&data.row(far));
                }
            }

            let shift: f64 = centroids
                .iter()
                .zip(new_centroids.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum();

            centroids = new_centroids;

            if shift < self.tol {
                converged = true;
                break;
            }
        }

        assign(data, &centroids, &mut labels);

        // Drop centroids that ended up with no members so ids stay contiguous
        // and `predict` on the training rows reproduces `labels`.
        let (labels, kept) = Labeling::compact_with_mapping(labels);
        let centroids = centroids.select(Axis(0), &kept);

        let inertia = (0..n)
            .map(|i| squared_distance(data.row(i), centroids.row(labels.as_slice()[i])))
            .sum();

        if converged {
            debug!(k = self.k, iterations, inertia, "k-means converged");
        } else {
            warn!(
                k = self.k,
                iterations, "k-means reached its iteration cap before converging"
            );
        }

        Ok(KmeansModel {
            centroids,
            labels,
            inertia,
            iterations,
            converged,
        })
    }
}

/// Fitted k-means state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmeansModel {
    centroids: Array2<f64>,
    labels: Labeling,
    inertia: f64,
    iterations: usize,
    converged: bool,
}

impl KmeansModel {
    /// Centroids, one row per group.
    pub fn centroids(&self) -> &Array2<f64> {
        &self.centroids
    }

    /// Within-cluster sum of squares of the training rows.
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    /// Lloyd iterations run.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    /// Whether the centroid shift fell below tolerance.
    pub fn converged(&self) -> bool {
        self.converged
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.centroids.nrows() == 0 || self.centroids.ncols() == 0 {
            return Err(Error::invalid_parameter("centroids", "at least one centroid is required"));
        }
        check_stored("centroids", &self.centroids)
    }
}

impl ClusterModel for KmeansModel {
    fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Labeling> {
        check_data(data)?;
        check_features(self.n_features(), data)?;
        let mut labels = vec![0usize; data.nrows()];
        assign(data, &self.centroids, &mut labels);
        Ok(Labeling::from_raw(labels))
    }

    fn labels(&self) -> &Labeling {
        &self.labels
    }

    fn n_groups(&self) -> usize {
        self.centroids.nrows()
    }

    fn n_features(&self) -> usize {
        self.centroids.ncols()
    }

    fn convergence_warning(&self) -> Option<Error> {
        (!self.converged).then_some(Error::ConvergenceNotReached {
            iterations: self.iterations,
        })
    }
}
