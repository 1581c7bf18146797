//! Grouping quality metrics.
//!
//! Internal metrics need only the feature matrix and a labeling:
//!
//! | Metric | Range | Best | Needs ≥ 2 groups |
//! |--------|-------|------|------------------|
//! | silhouette | [-1, 1] | 1 | yes |
//! | cohesion | (0, 1] | 1 | no |
//! | separation | [0, ∞) | high | yes |
//! | Calinski-Harabasz | [0, ∞) | high | yes |
//! | Davies-Bouldin | [0, ∞) | 0 | yes |
//! | size balance | [1, ∞) | 1 | no |
//!
//! Metrics that need two groups are `None` for a single-group labeling; plain
//! evaluation never fails on that path. [`Evaluator::require_separation`]
//! turns it into [`Error::DegenerateLabeling`].
//!
//! Rows labelled [`NOISE`] are left out of every geometric metric.
//!
//! [`agreement`] compares two labelings of the same records with the
//! adjusted Rand index, e.g. to check how stable groups are between runs.
//!
//! # References
//!
//! - Rousseeuw (1987). "Silhouettes: a graphical aid to the interpretation
//!   and validation of cluster analysis"
//! - Caliński & Harabasz (1974). "A dendrite method for cluster analysis"
//! - Davies & Bouldin (1979). "A cluster separation measure"
//! - Hubert & Arabie (1985). "Comparing partitions" (ARI)

use std::collections::{BTreeMap, HashMap};

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cluster::squared_distance;
use crate::error::{Error, Result};
use crate::labeling::{Labeling, NOISE};
use crate::prepare::FeatureMatrix;

/// Quality metrics for one (matrix, labeling) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Records evaluated, noise included.
    pub n_records: usize,
    /// Non-noise groups.
    pub n_groups: usize,
    /// Records labelled noise.
    pub n_noise: usize,
    /// Mean silhouette coefficient.
    pub silhouette: Option<f64>,
    /// `1 / (1 + mean distance to own centroid)`.
    pub cohesion: Option<f64>,
    /// Mean pairwise distance between group centroids.
    pub separation: Option<f64>,
    /// Between/within dispersion ratio.
    pub calinski_harabasz: Option<f64>,
    /// Mean worst-case similarity between groups (lower is better).
    pub davies_bouldin: Option<f64>,
    /// Within-group sum of squared distances to centroids.
    pub inertia: f64,
    /// Largest group size over smallest group size.
    pub size_balance: Option<f64>,
}

impl EvaluationReport {
    /// Metric name to score; undefined metrics map to `None`.
    pub fn metrics(&self) -> BTreeMap<&'static str, Option<f64>> {
        BTreeMap::from([
            ("silhouette", self.silhouette),
            ("cohesion", self.cohesion),
            ("separation", self.separation),
            ("calinski_harabasz", self.calinski_harabasz),
            ("davies_bouldin", self.davies_bouldin),
            ("inertia", Some(self.inertia)),
            ("size_balance", self.size_balance),
        ])
    }

    /// Look up a metric by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.metrics().get(name).copied().flatten()
    }
}

/// Computes [`EvaluationReport`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    require_separation: bool,
}

impl Evaluator {
    /// Evaluator that tolerates single-group labelings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with [`Error::DegenerateLabeling`] when fewer than two groups exist.
    pub fn require_separation(mut self, required: bool) -> Self {
        self.require_separation = required;
        self
    }

    /// Evaluate `labeling` against `matrix`.
    pub fn evaluate(&self, matrix: &FeatureMatrix, labeling: &Labeling) -> Result<EvaluationReport> {
        self.evaluate_view(matrix.view(), labeling)
    }

    pub(crate) fn evaluate_view(
        &self,
        data: ArrayView2<'_, f64>,
        labeling: &Labeling,
    ) -> Result<EvaluationReport> {
        check_lengths(data, labeling)?;
        let labeling = labeling.dense();

        let sizes = labeling.group_sizes();
        let k = sizes.len();
        if self.require_separation && k < 2 {
            return Err(Error::DegenerateLabeling { n_groups: k });
        }

        let labels = labeling.as_slice();
        let centroids = centroids(data, labels, &sizes);
        let n_assigned: usize = sizes.iter().sum();

        let mut inertia = 0.0;
        let mut dist_sum = 0.0;
        let mut spread = vec![0.0; k];
        for (row, &label) in data.outer_iter().zip(labels) {
            if label == NOISE {
                continue;
            }
            let sq = squared_distance(row, centroids.row(label));
            inertia += sq;
            dist_sum += sq.sqrt();
            spread[label] += sq.sqrt();
        }
        for (s, &size) in spread.iter_mut().zip(&sizes) {
            *s /= size.max(1) as f64;
        }

        let cohesion = (n_assigned > 0).then(|| 1.0 / (1.0 + dist_sum / n_assigned as f64));
        let separation = (k >= 2).then(|| {
            let mut total = 0.0;
            let mut pairs = 0usize;
            for a in 0..k {
                for b in (a + 1)..k {
                    total += squared_distance(centroids.row(a), centroids.row(b)).sqrt();
                    pairs += 1;
                }
            }
            total / pairs as f64
        });

        let size_balance = match (sizes.iter().max(), sizes.iter().min()) {
            (Some(&max), Some(&min)) if min > 0 => Some(max as f64 / min as f64),
            _ => None,
        };

        Ok(EvaluationReport {
            n_records: labeling.len(),
            n_groups: k,
            n_noise: labeling.noise_count(),
            silhouette: silhouette_view(data, &labeling),
            cohesion,
            separation,
            calinski_harabasz: calinski_harabasz(data, labels, &sizes, &centroids, inertia),
            davies_bouldin: davies_bouldin(&centroids, &spread),
            inertia,
            size_balance,
        })
    }
}

/// Evaluate with default settings (never fails on single-group labelings).
pub fn evaluate(matrix: &FeatureMatrix, labeling: &Labeling) -> Result<EvaluationReport> {
    Evaluator::new().evaluate(matrix, labeling)
}

pub(crate) fn check_lengths(data: ArrayView2<'_, f64>, labeling: &Labeling) -> Result<()> {
    if data.nrows() == 0 {
        return Err(Error::EmptyInput);
    }
    if labeling.len() != data.nrows() {
        return Err(Error::DimensionMismatch {
            expected: data.nrows(),
            found: labeling.len(),
        });
    }
    Ok(())
}

fn centroids(data: ArrayView2<'_, f64>, labels: &[usize], sizes: &[usize]) -> Array2<f64> {
    let mut centroids = Array2::zeros((sizes.len(), data.ncols()));
    for (row, &label) in data.outer_iter().zip(labels) {
        if label != NOISE {
            let mut c = centroids.row_mut(label);
            c += &row;
        }
    }
    for (mut c, &size) in centroids.outer_iter_mut().zip(sizes) {
        c /= size.max(1) as f64;
    }
    centroids
}

/// Mean silhouette coefficient of the non-noise rows.
///
/// ```text
/// s(i) = (b(i) - a(i)) / max(a(i), b(i))
/// ```
///
/// where a(i) is the mean distance to the rest of i's group and b(i) the
/// lowest mean distance to another group. Members of singleton groups score 0.
/// `None` with fewer than two groups.
pub fn silhouette_score(matrix: &FeatureMatrix, labeling: &Labeling) -> Result<Option<f64>> {
    check_lengths(matrix.view(), labeling)?;
    Ok(silhouette_view(matrix.view(), labeling))
}

pub(crate) fn silhouette_view(data: ArrayView2<'_, f64>, labeling: &Labeling) -> Option<f64> {
    let labeling = labeling.dense();
    let sizes = labeling.group_sizes();
    let k = sizes.len();
    if k < 2 {
        return None;
    }
    let labels = labeling.as_slice();
    let members: Vec<usize> = (0..labels.len()).filter(|&i| labels[i] != NOISE).collect();

    let score = |&i: &usize| -> f64 {
        let own = labels[i];
        if sizes[own] < 2 {
            return 0.0;
        }
        let mut sums = vec![0.0; k];
        for &j in &members {
            if j != i {
                sums[labels[j]] += squared_distance(data.row(i), data.row(j)).sqrt();
            }
        }
        let a = sums[own] / (sizes[own] - 1) as f64;
        let b = (0..k)
            .filter(|&g| g != own && sizes[g] > 0)
            .map(|g| sums[g] / sizes[g] as f64)
            .fold(f64::INFINITY, f64::min);
        let denom = a.max(b);
        if denom > 0.0 && denom.is_finite() {
            (b - a) / denom
        } else {
            0.0
        }
    };

    // Summed in record order so the score is reproducible across thread counts.
    #[cfg(feature = "parallel")]
    let scores: Vec<f64> = members.par_iter().map(score).collect();
    #[cfg(not(feature = "parallel"))]
    let scores: Vec<f64> = members.iter().map(score).collect();

    Some(scores.iter().sum::<f64>() / scores.len() as f64)
}

fn calinski_harabasz(
    data: ArrayView2<'_, f64>,
    labels: &[usize],
    sizes: &[usize],
    centroids: &Array2<f64>,
    within: f64,
) -> Option<f64> {
    let k = sizes.len();
    let n: usize = sizes.iter().sum();
    if k < 2 || n <= k || within <= 0.0 {
        return None;
    }
    let mut overall = ndarray::Array1::<f64>::zeros(data.ncols());
    for (row, &label) in data.outer_iter().zip(labels) {
        if label != NOISE {
            overall += &row;
        }
    }
    overall /= n as f64;

    let between: f64 = centroids
        .outer_iter()
        .zip(sizes)
        .map(|(c, &size)| size as f64 * squared_distance(c, overall.view()))
        .sum();

    Some((between / (k - 1) as f64) / (within / (n - k) as f64))
}

fn davies_bouldin(centroids: &Array2<f64>, spread: &[f64]) -> Option<f64> {
    let k = spread.len();
    if k < 2 {
        return None;
    }
    let mut total = 0.0;
    for a in 0..k {
        let worst = (0..k)
            .filter(|&b| b != a)
            .map(|b| {
                let d = squared_distance(centroids.row(a), centroids.row(b)).sqrt();
                (spread[a] + spread[b]) / d
            })
            .fold(0.0, f64::max);
        total += worst;
    }
    let score = total / k as f64;
    score.is_finite().then_some(score)
}

/// Adjusted Rand index between two labelings of the same records.
///
/// 1 means identical partitions (up to renaming), around 0 means chance
/// agreement. Noise counts as one more label.
pub fn agreement(a: &Labeling, b: &Labeling) -> Result<f64> {
    if a.len() != b.len() {
        return Err(Error::DimensionMismatch {
            expected: a.len(),
            found: b.len(),
        });
    }
    if a.is_empty() {
        return Err(Error::EmptyInput);
    }
    Ok(adjusted_rand_index(a.as_slice(), b.as_slice()))
}

fn adjusted_rand_index(pred: &[usize], truth: &[usize]) -> f64 {
    let (joint, n) = build_contingency_table(pred, truth);
    if n < 2 {
        return 1.0;
    }

    // Row sums (a_i) and column sums (b_j)
    let mut row_sums = HashMap::new();
    let mut col_sums = HashMap::new();
    for (&(p, t), &count) in &joint {
        *row_sums.entry(p).or_insert(0usize) += count;
        *col_sums.entry(t).or_insert(0usize) += count;
    }

    let sum_comb_ij: f64 = joint.values().map(|&c| comb2(c) as f64).sum();
    let sum_comb_a: f64 = row_sums.values().map(|&a| comb2(a) as f64).sum();
    let sum_comb_b: f64 = col_sums.values().map(|&b| comb2(b) as f64).sum();

    let expected = sum_comb_a * sum_comb_b / comb2(n) as f64;
    let max_index = (sum_comb_a + sum_comb_b) / 2.0;

    let denom = max_index - expected;
    if denom.abs() < 1e-10 {
        return 1.0;
    }
    (sum_comb_ij - expected) / denom
}

fn build_contingency_table(
    pred: &[usize],
    truth: &[usize],
) -> (HashMap<(usize, usize), usize>, usize) {
    let mut table = HashMap::new();
    for (&p, &t) in pred.iter().zip(truth.iter()) {
        *table.entry((p, t)).or_insert(0) += 1;
    }
    (table, pred.len())
}

fn comb2(n: usize) -> usize {
    if n < 2 {
        0
    } else {
        n * (n - 1) / 2
    }
}
