//! Clustering traits.

use ndarray::ArrayView2;

use crate::error::{Error, Result};
use crate::labeling::Labeling;

/// A configured clustering algorithm.
pub trait Clustering {
    /// Fitted state returned by [`Clustering::fit`].
    type Model: ClusterModel;

    /// Fit the algorithm to `data` (one row per record).
    fn fit(&self, data: ArrayView2<'_, f64>) -> Result<Self::Model>;

    /// Fit and return the training assignments.
    fn fit_predict(&self, data: ArrayView2<'_, f64>) -> Result<Labeling> {
        Ok(self.fit(data)?.labels().clone())
    }
}

/// Fitted clustering state, reusable for inference on new rows.
pub trait ClusterModel {
    /// Assign each row of `data` to a fitted group.
    fn predict(&self, data: ArrayView2<'_, f64>) -> Result<Labeling>;

    /// Assignments of the training rows.
    fn labels(&self) -> &Labeling;

    /// Number of groups found (noise excluded).
    fn n_groups(&self) -> usize;

    /// Feature dimension the model was fitted on.
    fn n_features(&self) -> usize;

    /// `Some(ConvergenceNotReached)` when the fit hit its iteration cap.
    fn convergence_warning(&self) -> Option<Error> {
        None
    }
}

/// Clustering models that give per-group membership probabilities.
pub trait SoftClustering: ClusterModel {
    /// Entry `[i][k]` is the probability that row `i` belongs to group `k`.
    fn predict_proba(&self, data: ArrayView2<'_, f64>) -> Result<Vec<Vec<f64>>>;
}
