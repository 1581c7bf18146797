//! Feature importance: how strongly each input feature separates the groups.
//!
//! For every matrix column the total sum of squares splits into a within-group
//! and a between-group part. A feature's score is the between-group share of
//! its columns' total (an eta-squared ratio, the quantity behind the one-way
//! ANOVA F statistic):
//!
//! ```text
//! score(f) = Σ_{c ∈ f} SS_between(c) / Σ_{c ∈ f} SS_total(c)
//! ```
//!
//! One-hot columns of a categorical feature are pooled, so a categorical
//! feature gets a single score. A feature with no variance scores 0. Scores
//! are normalised to sum to 1 when their total is positive and finite.
//! Records labelled [`NOISE`](crate::NOISE) do not take part.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::labeling::{Labeling, NOISE};
use crate::metrics::check_lengths;
use crate::prepare::{FeatureMatrix, FeatureSpec};

/// Importance of one declared feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScore {
    /// Feature name from the spec.
    pub feature: String,
    /// Non-negative score.
    pub score: f64,
}

/// Feature scores, highest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImportanceReport {
    scores: Vec<FeatureScore>,
}

impl ImportanceReport {
    /// Scores in descending order; ties keep spec order.
    pub fn scores(&self) -> &[FeatureScore] {
        &self.scores
    }

    /// Score of `feature`, if it was analysed.
    pub fn get(&self, feature: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|s| s.feature == feature)
            .map(|s| s.score)
    }

    /// The `n` most important features.
    pub fn top(&self, n: usize) -> &[FeatureScore] {
        &self.scores[..n.min(self.scores.len())]
    }

    /// Sum of all scores.
    pub fn total(&self) -> f64 {
        self.scores.iter().map(|s| s.score).sum()
    }

    /// Number of features.
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// True when no feature was analysed.
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Score each feature of `spec` by its between-group variance share.
pub fn analyze(
    matrix: &FeatureMatrix,
    labeling: &Labeling,
    spec: &FeatureSpec,
) -> Result<ImportanceReport> {
    check_lengths(matrix.view(), labeling)?;
    matrix.check_spec(spec)?;
    let labeling = labeling.dense();

    let data = matrix.view();
    let labels = labeling.as_slice();
    let sizes = labeling.group_sizes();
    let n: usize = sizes.iter().sum();

    let mut between = vec![0.0; spec.len()];
    let mut total = vec![0.0; spec.len()];

    if n > 0 {
        for (j, column) in matrix.columns().iter().enumerate() {
            let values = data.column(j);
            let mut group_sums = vec![0.0; sizes.len()];
            let mut sum = 0.0;
            for (&v, &label) in values.iter().zip(labels) {
                if label != NOISE {
                    group_sums[label] += v;
                    sum += v;
                }
            }
            let mean = sum / n as f64;

            let ss_total: f64 = values
                .iter()
                .zip(labels)
                .filter(|&(_, &label)| label != NOISE)
                .map(|(&v, _)| (v - mean).powi(2))
                .sum();
            let ss_between: f64 = group_sums
                .iter()
                .zip(&sizes)
                .filter(|&(_, &size)| size > 0)
                .map(|(&s, &size)| size as f64 * (s / size as f64 - mean).powi(2))
                .sum();

            between[column.feature] += ss_between;
            total[column.feature] += ss_total;
        }
    }

    let mut scores: Vec<FeatureScore> = spec
        .features()
        .iter()
        .enumerate()
        .map(|(f, def)| {
            let score = if total[f] > f64::EPSILON {
                (between[f] / total[f]).clamp(0.0, 1.0)
            } else {
                0.0
            };
            FeatureScore {
                feature: def.name.clone(),
                score,
            }
        })
        .collect();

    let sum: f64 = scores.iter().map(|s| s.score).sum();
    if sum > 0.0 && sum.is_finite() {
        for s in &mut scores {
            s.score /= sum;
        }
    }
    // Stable sort keeps spec order among equal scores.
    scores.sort_by(|a, b| b.score.total_cmp(&a.score));

    Ok(ImportanceReport { scores })
}
