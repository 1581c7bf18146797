//! Clustering backends.
//!
//! Three families sit behind one fit/predict contract:
//!
//! | Variant | Algorithm | Needs k | Noise |
//! |---------|-----------|---------|-------|
//! | Centroid | [`Kmeans`] | yes | no |
//! | Density | [`Dbscan`] | no | [`NOISE`](crate::NOISE) |
//! | Distribution | [`Gmm`] (diagonal) | yes | no |
//!
//! [`Backend`] is the closed set of configured algorithms and
//! [`FittedBackend`] the closed set of fitted states; both dispatch by
//! `match`, so there is no open-ended algorithm lookup.
//!
//! ## Hard vs Soft Clustering
//!
//! K-means and DBSCAN give hard assignments only. The mixture additionally
//! gives each record a probability per group through [`SoftClustering`],
//! useful for employees that sit between two profiles.
//!
//! ## Usage
//!
//! ```rust
//! use cohort::cluster::{Clustering, Kmeans};
//! use ndarray::array;
//!
//! let data = array![[0.0, 0.0], [0.1, 0.1], [10.0, 10.0], [10.1, 10.1]];
//! let labels = Kmeans::new(2).with_seed(42).fit_predict(data.view()).unwrap();
//! assert_eq!(labels.as_slice(), &[0, 0, 1, 1]);
//! ```

mod dbscan;
mod gmm;
mod kmeans;
mod traits;

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

pub use dbscan::{Dbscan, DbscanModel};
pub use gmm::{Gmm, GmmModel};
pub use kmeans::{Kmeans, KmeansModel};
pub use traits::{ClusterModel, Clustering, SoftClustering};

use crate::config::{Algorithm, AlgorithmParams};
use crate::error::{Error, Result};
use crate::labeling::Labeling;

/// Squared Euclidean distance.
#[inline]
pub(crate) fn squared_distance(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

/// Reject empty or non-finite input.
pub(crate) fn check_data(data: ArrayView2<'_, f64>) -> Result<()> {
    if data.nrows() == 0 || data.ncols() == 0 {
        return Err(Error::EmptyInput);
    }
    if data.iter().any(|v| !v.is_finite()) {
        return Err(Error::invalid_parameter("data", "contains non-finite values"));
    }
    Ok(())
}

pub(crate) fn check_features(expected: usize, data: ArrayView2<'_, f64>) -> Result<()> {
    if data.ncols() != expected {
        return Err(Error::DimensionMismatch {
            expected,
            found: data.ncols(),
        });
    }
    Ok(())
}

/// Reject a stored parameter array holding non-finite values.
pub(crate) fn check_stored<'a>(
    name: &'static str,
    values: impl IntoIterator<Item = &'a f64>,
) -> Result<()> {
    if values.into_iter().any(|v| !v.is_finite()) {
        return Err(Error::invalid_parameter(name, "contains non-finite values"));
    }
    Ok(())
}

/// A configured clustering algorithm.
#[derive(Debug, Clone)]
pub enum Backend {
    /// K-means.
    Centroid(Kmeans),
    /// DBSCAN.
    Density(Dbscan),
    /// Gaussian mixture.
    Distribution(Gmm),
}

impl Backend {
    /// Build the backend for `params`. `n_groups` is required by the centroid
    /// and distribution variants and ignored by the density variant.
    pub fn new(params: &AlgorithmParams, n_groups: Option<usize>, seed: u64) -> Result<Self> {
        let require_k = || {
            n_groups.ok_or_else(|| {
                Error::invalid_parameter("n_groups", "a group count is required for this algorithm")
            })
        };
        Ok(match *params {
            AlgorithmParams::Centroid(p) => Backend::Centroid(
                Kmeans::new(require_k()?)
                    .with_max_iter(p.max_iter)
                    .with_tol(p.tol)
                    .with_seed(seed),
            ),
            AlgorithmParams::Density(p) => Backend::Density(Dbscan::new(p.epsilon, p.min_points)),
            AlgorithmParams::Distribution(p) => Backend::Distribution(
                Gmm::new(require_k()?)
                    .with_max_iter(p.max_iter)
                    .with_tol(p.tol)
                    .with_reg_covar(p.reg_covar)
                    .with_seed(seed),
            ),
        })
    }

    /// Family of this backend.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            Backend::Centroid(_) => Algorithm::Centroid,
            Backend::Density(_) => Algorithm::Density,
            Backend::Distribution(_) => Algorithm::Distribution,
        }
    }
}

impl Clustering for Backend {
    type Model = FittedBackend;

    fn fit(&self, data: ArrayView2<'_, f64>) -> Result<FittedBackend> {
        Ok(match self {
            Backend::Centroid(b) => FittedBackend::Centroid(b.fit(data)?),
            Backend::Density(b) => FittedBackend::Density(b.fit(data)?),
            Backend::Distribution(b) => FittedBackend::Distribution(b.fit(data)?),
        })
    }
}

/// Fitted state of any backend; serializable for save/reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum FittedBackend {
    /// K-means centroids.
    Centroid(KmeansModel),
    /// DBSCAN core points.
    Density(DbscanModel),
    /// Mixture parameters.
    Distribution(GmmModel),
}

impl FittedBackend {
    /// Family of the fitted model.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            FittedBackend::Centroid(_) => Algorithm::Centroid,
            FittedBackend::Density(_) => Algorithm::Density,
            FittedBackend::Distribution(_) => Algorithm::Distribution,
        }
    }

    /// The mixture model, when this is the distribution variant.
    pub fn as_mixture(&self) -> Option<&GmmModel> {
        match self {
            FittedBackend::Distribution(m) => Some(m),
            _ => None,
        }
    }

    /// Check that deserialized state is usable for inference.
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            FittedBackend::Centroid(m) => m.validate(),
            FittedBackend::Density(m) => m.validate(),
            FittedBackend::Distribution(m) => m.validate(),
        }
    }

    fn model(&self) -> &dyn ClusterModel {
        match self {
            FittedBackend::Centroid(m) => m,
            FittedBackend::Density(m) => m,
            FittedBackend::Distribution(m) => m,
        }
    }
}

impl ClusterModel for FittedBackend {
    fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Labeling> {
        self.model().predict(data)
    }

    fn labels(&self) -> &Labeling {
        self.model().labels()
    }

    fn n_groups(&self) -> usize {
        self.model().n_groups()
    }

    fn n_features(&self) -> usize {
        self.model().n_features()
    }

    fn convergence_warning(&self) -> Option<Error> {
        self.model().convergence_warning()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CentroidParams, DensityParams, DistributionParams};
    use crate::labeling::NOISE;
    use ndarray::Array2;

    fn data() -> Array2<f64> {
        Array2::from_shape_fn((30, 2), |(i, j)| {
            let centre = (i / 10) as f64 * 6.0;
            centre + ((i * 3 + j) % 4) as f64 * 0.1
        })
    }

    fn assert_contiguous(labels: &Labeling) {
        let n = labels.n_groups();
        for g in 0..n {
            assert!(labels.as_slice().contains(&g), "group {g} missing");
        }
        assert!(labels.as_slice().iter().all(|&l| l < n || l == NOISE));
    }

    #[test]
    fn test_every_variant_labels_every_row() {
        let data = data();
        let variants = [
            AlgorithmParams::Centroid(CentroidParams::default()),
            AlgorithmParams::Density(DensityParams {
                epsilon: 0.5,
                min_points: 3,
            }),
            AlgorithmParams::Distribution(DistributionParams::default()),
        ];
        for params in &variants {
            let backend = Backend::new(params, Some(3), 42).unwrap();
            let fitted = backend.fit(data.view()).unwrap();
            assert_eq!(fitted.algorithm(), params.algorithm());
            assert_eq!(fitted.labels().len(), 30);
            assert_contiguous(fitted.labels());
            assert_eq!(fitted.n_features(), 2);
        }
    }

    #[test]
    fn test_group_count_required() {
        let params = AlgorithmParams::Centroid(CentroidParams::default());
        assert!(Backend::new(&params, None, 0).is_err());

        let density = AlgorithmParams::Density(DensityParams {
            epsilon: 1.0,
            min_points: 2,
        });
        assert!(Backend::new(&density, None, 0).is_ok());
    }

    #[test]
    fn test_fitted_backend_serde_round_trip() {
        let data = data();
        let params = AlgorithmParams::Centroid(CentroidParams::default());
        let fitted = Backend::new(&params, Some(3), 1)
            .unwrap()
            .fit(data.view())
            .unwrap();
        let json = serde_json::to_string(&fitted).unwrap();
        let back: FittedBackend = serde_json::from_str(&json).unwrap();
        back.validate().unwrap();
        assert_eq!(back.predict(data.view()).unwrap(), *fitted.labels());
    }

    #[test]
    fn test_validate_rejects_inconsistent_state() {
        let data = data();
        let fit = |params: AlgorithmParams| {
            let fitted = Backend::new(&params, Some(3), 42)
                .unwrap()
                .fit(data.view())
                .unwrap();
            fitted.validate().unwrap();
            serde_json::to_value(&fitted).unwrap()
        };
        let reject = |value: serde_json::Value| {
            let broken: FittedBackend = serde_json::from_value(value).unwrap();
            assert!(matches!(
                broken.validate(),
                Err(Error::InvalidParameter { .. }) | Err(Error::DimensionMismatch { .. })
            ));
        };

        let mut centroid = fit(AlgorithmParams::Centroid(CentroidParams::default()));
        centroid["centroids"]["dim"] = serde_json::json!([0, 2]);
        centroid["centroids"]["data"] = serde_json::json!([]);
        reject(centroid);

        let mut density = fit(AlgorithmParams::Density(DensityParams {
            epsilon: 0.5,
            min_points: 3,
        }));
        density["core_labels"] = serde_json::json!([0]);
        reject(density);

        let mut mixture = fit(AlgorithmParams::Distribution(DistributionParams::default()));
        mixture["params"]["weights"]["dim"] = serde_json::json!([4]);
        mixture["params"]["weights"]["data"] = serde_json::json!([0.25, 0.25, 0.25, 0.25]);
        reject(mixture);
    }
}
