//! DBSCAN: Density-Based Spatial Clustering of Applications with Noise.
//!
//! # The Algorithm (Ester et al., 1996)
//!
//! Groups points by neighbourhood density. Unlike k-means, it:
//!
//! - Discovers groups of arbitrary shape
//! - Determines the number of groups itself
//! - Labels outliers as [`NOISE`]
//!
//! ## Core Concepts
//!
//! - **Epsilon (ε)**: Maximum distance between two points to be neighbors.
//! - **MinPts**: Minimum points within ε (the point itself included) for a
//!   point to be "core".
//! - **Border point**: Within ε of a core point but not core itself.
//! - **Noise point**: Neither core nor border.
//!
//! ## Complexity
//!
//! O(n²) distance evaluations; fine for workforce-sized inputs.
//!
//! ## Inference
//!
//! A fitted [`DbscanModel`] keeps its core points. A new point joins the group
//! of its nearest core point when that point lies within ε, else it is noise.
//! Training border points follow the same rule, so predicting the training
//! rows reproduces the fit labels.

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::traits::{ClusterModel, Clustering};
use super::{check_data, check_features, check_stored, squared_distance};
use crate::error::{Error, Result};
use crate::labeling::{Labeling, NOISE};

/// DBSCAN clustering algorithm.
#[derive(Debug, Clone)]
pub struct Dbscan {
    /// Epsilon: maximum distance for neighborhood.
    epsilon: f64,
    /// Minimum points for core point classification.
    min_pts: usize,
}

impl Dbscan {
    /// Create a new DBSCAN clusterer.
    ///
    /// # Arguments
    ///
    /// * `epsilon` - Maximum distance between two points to be neighbors.
    /// * `min_pts` - Minimum number of points to form a dense region.
    pub fn new(epsilon: f64, min_pts: usize) -> Self {
        Self { epsilon, min_pts }
    }

    /// Estimate `(epsilon, min_pts)` from the data: epsilon is the 90th
    /// percentile of nearest-neighbour distances, `min_pts` is 1% of the
    /// records but at least 3.
    pub fn estimate_params(data: ArrayView2<'_, f64>) -> Result<(f64, usize)> {
        check_data(data)?;
        let n = data.nrows();
        if n < 2 {
            return Err(Error::invalid_parameter(
                "data",
                "need at least two records to estimate a radius",
            ));
        }

        let mut nn: Vec<f64> = (0..n)
            .map(|i| {
                (0..n)
                    .filter(|&j| j != i)
                    .map(|j| squared_distance(data.row(i), data.row(j)))
                    .fold(f64::MAX, f64::min)
                    .sqrt()
            })
            .collect();
        nn.sort_by(|a, b| a.total_cmp(b));

        // Linear interpolation between closest ranks.
        let rank = 0.9 * (n - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        let epsilon = nn[lo] + (nn[hi] - nn[lo]) * (rank - lo as f64);

        if epsilon <= 0.0 {
            return Err(Error::invalid_parameter(
                "epsilon",
                "estimated radius is zero; records are mostly identical",
            ));
        }

        let min_pts = ((n as f64 * 0.01) as usize).max(3);
        Ok((epsilon, min_pts))
    }

    /// Find all neighbors within epsilon, excluding the point itself.
    fn region_query(&self, data: ArrayView2<'_, f64>, point_idx: usize) -> Vec<usize> {
        let point = data.row(point_idx);
        let eps2 = self.epsilon * self.epsilon;
        (0..data.nrows())
            .filter(|&idx| idx != point_idx && squared_distance(point, data.row(idx)) <= eps2)
            .collect()
    }

    /// Expand a group from a core point.
    fn expand_cluster(
        &self,
        data: ArrayView2<'_, f64>,
        neighbors: Vec<usize>,
        labels: &mut [usize],
        core: &mut [bool],
        visited: &mut [bool],
        cluster_id: usize,
    ) {
        // Iterative expansion avoids deep recursion.
        let mut to_process = neighbors;

        while let Some(idx) = to_process.pop() {
            // Noise reached from a core point becomes a border point.
            if labels[idx] == NOISE {
                labels[idx] = cluster_id;
            }
            if visited[idx] {
                continue;
            }
            visited[idx] = true;

            let next = self.region_query(data, idx);
            if next.len() + 1 >= self.min_pts {
                core[idx] = true;
                to_process.extend(next.into_iter().filter(|&nn| !visited[nn]));
            }
        }
    }
}

impl Default for Dbscan {
    fn default() -> Self {
        Self::new(0.5, 5)
    }
}

impl Clustering for Dbscan {
    type Model = DbscanModel;

    fn fit(&self, data: ArrayView2<'_, f64>) -> Result<DbscanModel> {
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(Error::invalid_parameter(
                "epsilon",
                format!("must be positive and finite, got {}", self.epsilon),
            ));
        }
        if self.min_pts == 0 {
            return Err(Error::invalid_parameter("min_points", "must be at least 1"));
        }
        check_data(data)?;

        let n = data.nrows();
        let mut labels = vec![NOISE; n];
        let mut core = vec![false; n];
        let mut visited = vec![false; n];
        let mut cluster_id = 0;

        for point_idx in 0..n {
            if visited[point_idx] {
                continue;
            }
            visited[point_idx] = true;

            let neighbors = self.region_query(data, point_idx);
            if neighbors.len() + 1 < self.min_pts {
                // May still become a border point of a later group.
                continue;
            }

            labels[point_idx] = cluster_id;
            core[point_idx] = true;
            self.expand_cluster(
                data,
                neighbors,
                &mut labels,
                &mut core,
                &mut visited,
                cluster_id,
            );
            cluster_id += 1;
        }

        let core_idx: Vec<usize> = (0..n).filter(|&i| core[i]).collect();
        let core_points = data.select(Axis(0), &core_idx);
        let core_labels: Vec<usize> = core_idx.iter().map(|&i| labels[i]).collect();

        // A border point reachable from several groups follows its nearest
        // core point, as `predict` does.
        for i in 0..n {
            if !core[i] && labels[i] != NOISE {
                labels[i] = nearest_core(data.row(i), &core_points, &core_labels, self.epsilon);
            }
        }
        let labels = Labeling::from_raw(labels);

        debug!(
            groups = cluster_id,
            noise = labels.noise_count(),
            core = core_idx.len(),
            "dbscan fitted"
        );

        Ok(DbscanModel {
            epsilon: self.epsilon,
            core_points,
            core_labels,
            labels,
            n_groups: cluster_id,
        })
    }
}

/// Fitted DBSCAN state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbscanModel {
    epsilon: f64,
    core_points: Array2<f64>,
    core_labels: Vec<usize>,
    labels: Labeling,
    n_groups: usize,
}

impl DbscanModel {
    /// Neighbourhood radius used for the fit.
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Number of core points retained for inference.
    pub fn n_core_points(&self) -> usize {
        self.core_points.nrows()
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(Error::invalid_parameter("epsilon", "must be positive and finite"));
        }
        if self.core_labels.len() != self.core_points.nrows() {
            return Err(Error::DimensionMismatch {
                expected: self.core_points.nrows(),
                found: self.core_labels.len(),
            });
        }
        if self.core_labels.iter().any(|&l| l >= self.n_groups) {
            return Err(Error::invalid_parameter("core_labels", "label outside the fitted groups"));
        }
        check_stored("core_points", &self.core_points)
    }
}

/// Label of the nearest core point within `epsilon`, else [`NOISE`].
fn nearest_core(
    point: ArrayView1<'_, f64>,
    core_points: &Array2<f64>,
    core_labels: &[usize],
    epsilon: f64,
) -> usize {
    let eps2 = epsilon * epsilon;
    core_points
        .outer_iter()
        .zip(core_labels)
        .map(|(core, &label)| (squared_distance(point, core), label))
        .filter(|(dist, _)| *dist <= eps2)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map_or(NOISE, |(_, label)| label)
}

impl ClusterModel for DbscanModel {
    fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Labeling> {
        check_data(data)?;
        check_features(self.n_features(), data)?;
        Ok(Labeling::from_raw(
            data.outer_iter()
                .map(|row| nearest_core(row, &self.core_points, &self.core_labels, self.epsilon))
                .collect(),
        ))
    }

    fn labels(&self) -> &Labeling {
        &self.labels
    }

    fn n_groups(&self) -> usize {
        self.n_groups
    }

    fn n_features(&self) -> usize {
        self.core_points.ncols()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn two_clusters_and_outlier() -> Array2<f64> {
        array![
            [0.0, 0.0],
            [0.1, 0.0],
            [0.0, 0.1],
            [0.1, 0.1],
            [100.0, 100.0],
            [5.0, 5.0],
            [5.1, 5.0],
            [5.0, 5.1],
            [5.1, 5.1],
        ]
    }

    #[test]
    fn test_dbscan_two_clusters_with_noise() {
        let data = two_clusters_and_outlier();
        let labels = Dbscan::new(0.3, 3).fit_predict(data.view()).unwrap();
        let l = labels.as_slice();

        assert_eq!(labels.len(), 9);
        assert_eq!(l[4], NOISE);
        assert!(l[..4].iter().all(|&x| x == 0));
        assert!(l[5..].iter().all(|&x| x == 1));
        assert_eq!(labels.n_groups(), 2);
    }

    #[test]
    fn test_dbscan_all_noise() {
        let data = array![[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
        let labels = Dbscan::new(0.5, 3).fit_predict(data.view()).unwrap();
        assert!(labels.as_slice().iter().all(|&l| l == NOISE));
        assert_eq!(labels.n_groups(), 0);
    }

    #[test]
    fn test_dbscan_chain() {
        let data = Array2::from_shape_fn((10, 2), |(i, j)| if j == 0 { i as f64 * 0.3 } else { 0.0 });
        let labels = Dbscan::new(0.5, 2).fit_predict(data.view()).unwrap();
        assert!(labels.as_slice().iter().all(|&l| l == 0));
    }

    #[test]
    fn test_border_point_joins_group() {
        // The last point has one neighbour only, but that neighbour is core.
        let data = array![[0.0], [0.1], [0.2], [0.3], [0.75]];
        let labels = Dbscan::new(0.5, 4).fit_predict(data.view()).unwrap();
        assert_eq!(labels.as_slice(), &[0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_predict_uses_core_points() {
        let data = two_clusters_and_outlier();
        let model = Dbscan::new(0.3, 3).fit(data.view()).unwrap();
        let new = array![[0.05, 0.02], [5.02, 5.05], [50.0, 50.0]];
        let labels = model.predict(new.view()).unwrap();
        assert_eq!(labels.as_slice(), &[0, 1, NOISE]);
    }

    #[test]
    fn test_dbscan_invalid_params() {
        let data = array![[0.0, 0.0]];
        assert!(matches!(
            Dbscan::new(0.0, 3).fit(data.view()),
            Err(Error::InvalidParameter { name: "epsilon", .. })
        ));
        assert!(Dbscan::new(-1.0, 3).fit(data.view()).is_err());
        assert!(Dbscan::new(0.5, 0).fit(data.view()).is_err());
    }

    #[test]
    fn test_estimate_params() {
        let data = Array2::from_shape_fn((20, 1), |(i, _)| i as f64);
        let (eps, min_pts) = Dbscan::estimate_params(data.view()).unwrap();
        assert!((eps - 1.0).abs() < 1e-12);
        assert_eq!(min_pts, 3);

        let single = array![[1.0, 2.0]];
        assert!(Dbscan::estimate_params(single.view()).is_err());
    }
}
