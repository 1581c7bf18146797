//! Per-group summaries.
//!
//! Every distinct id in a labeling gets one [`GroupProfile`], noise included,
//! in ascending id order (noise last). Statistics are over the prepared
//! matrix columns, so numeric features read in standard-score units and
//! one-hot columns read as the share of the group holding that value (times
//! the feature weight).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::labeling::{Labeling, NOISE};
use crate::metrics::check_lengths;
use crate::prepare::{FeatureMatrix, FeatureSpec};

/// Number of dominant columns reported per group.
pub const DOMINANT_FEATURES: usize = 3;

/// Mean and dispersion of one column within a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    /// Column name.
    pub column: String,
    /// Spec feature the column came from.
    pub feature: String,
    /// Group mean.
    pub mean: f64,
    /// Sample standard deviation; 0 for groups of fewer than two records.
    pub std: f64,
}

/// A column that sets a group apart from the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominantFeature {
    /// Column name.
    pub column: String,
    /// `(group mean - overall mean) / overall std`; the sign gives direction.
    pub deviation: f64,
}

/// Summary of one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupProfile {
    /// Group id ([`NOISE`] for unassigned records).
    pub group: usize,
    /// True for the noise pseudo-group.
    pub is_noise: bool,
    /// Records in the group.
    pub size: usize,
    /// Share of all records.
    pub share: f64,
    /// One entry per matrix column, in column order.
    pub stats: Vec<FeatureStat>,
    /// Up to three columns with the largest absolute deviation.
    pub dominant: Vec<DominantFeature>,
}

impl GroupProfile {
    /// Statistics for `column`.
    pub fn stat(&self, column: &str) -> Option<&FeatureStat> {
        self.stats.iter().find(|s| s.column == column)
    }
}

/// Profile every distinct group of `labeling`.
pub fn summarize(
    matrix: &FeatureMatrix,
    labeling: &Labeling,
    spec: &FeatureSpec,
) -> Result<Vec<GroupProfile>> {
    check_lengths(matrix.view(), labeling)?;
    matrix.check_spec(spec)?;

    let data = matrix.view();
    let n = data.nrows();
    let labels = labeling.as_slice();
    let overall_mean = data.mean_axis(ndarray::Axis(0)).unwrap_or_default();
    let overall_std = data.std_axis(ndarray::Axis(0), 0.0);

    let profiles = labeling
        .distinct()
        .into_iter()
        .map(|group| {
            let rows: Vec<usize> = (0..n).filter(|&i| labels[i] == group).collect();
            let size = rows.len();

            let stats: Vec<FeatureStat> = matrix
                .columns()
                .iter()
                .enumerate()
                .map(|(j, column)| {
                    let values: Vec<f64> = rows.iter().map(|&i| data[[i, j]]).collect();
                    let mean = values.iter().sum::<f64>() / size as f64;
                    let std = if size < 2 {
                        0.0
                    } else {
                        let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
                        (ss / (size - 1) as f64).sqrt()
                    };
                    FeatureStat {
                        column: column.name.clone(),
                        feature: spec.features()[column.feature].name.clone(),
                        mean,
                        std,
                    }
                })
                .collect();

            let mut dominant: Vec<DominantFeature> = stats
                .iter()
                .enumerate()
                .filter(|&(j, _)| overall_std[j] > f64::EPSILON)
                .map(|(j, stat)| DominantFeature {
                    column: stat.column.clone(),
                    deviation: (stat.mean - overall_mean[j]) / overall_std[j],
                })
                .collect();
            dominant.sort_by(|a, b| b.deviation.abs().total_cmp(&a.deviation.abs()));
            dominant.truncate(DOMINANT_FEATURES);

            GroupProfile {
                group,
                is_noise: group == NOISE,
                size,
                share: size as f64 / n as f64,
                stats,
                dominant,
            }
        })
        .collect();

    Ok(profiles)
}
