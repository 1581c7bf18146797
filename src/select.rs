//! Group-count selection.
//!
//! Each candidate count is fitted independently and scored with the mean
//! silhouette of its training labels. The highest score wins; on a tie the
//! smaller count wins. A candidate whose fit ends with a single group has no
//! silhouette and scores negative infinity.
//!
//! Candidate fits run in parallel under the `parallel` feature. Each fit owns
//! an RNG seeded with `seed.wrapping_add(k)`, so the outcome does not depend on
//! thread scheduling.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::cluster::{Backend, ClusterModel, Clustering};
use crate::config::AlgorithmParams;
use crate::error::{Error, Result};
use crate::metrics::silhouette_view;
use crate::prepare::FeatureMatrix;

/// Silhouette score of one candidate count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateScore {
    /// Requested group count.
    pub n_groups: usize,
    /// Mean silhouette, or negative infinity when undefined.
    pub score: f64,
}

/// Recommend a group count from `candidates`.
pub fn suggest(
    matrix: &FeatureMatrix,
    candidates: &[usize],
    algorithm: &AlgorithmParams,
    seed: u64,
) -> Result<usize> {
    let scores = suggest_scored(matrix, candidates, algorithm, seed)?;
    let best = best_candidate(&scores).ok_or_else(|| Error::EmptyCandidateRange {
        reason: "no candidate could be evaluated".to_string(),
    })?;
    info!(
        n_groups = best.n_groups,
        silhouette = best.score,
        evaluated = scores.len(),
        "selected group count"
    );
    Ok(best.n_groups)
}

/// Score every usable candidate, in ascending count order.
///
/// Candidates larger than the number of records are skipped.
pub fn suggest_scored(
    matrix: &FeatureMatrix,
    candidates: &[usize],
    algorithm: &AlgorithmParams,
    seed: u64,
) -> Result<Vec<CandidateScore>> {
    if !algorithm.takes_group_count() {
        return Err(Error::invalid_parameter(
            "algorithm",
            format!("{} does not take a group count", algorithm.algorithm()),
        ));
    }
    let mut candidates = candidates.to_vec();
    candidates.sort_unstable();
    candidates.dedup();

    let Some(&smallest) = candidates.first() else {
        return Err(Error::EmptyCandidateRange {
            reason: "candidate range is empty".to_string(),
        });
    };
    let n = matrix.nrows();
    if smallest == 0 {
        return Err(Error::invalid_parameter(
            "candidate_range",
            "group counts must be at least 1",
        ));
    }
    if n < smallest {
        return Err(Error::EmptyCandidateRange {
            reason: format!("{n} records cannot form {smallest} groups"),
        });
    }
    candidates.retain(|&k| k <= n);

    let score = |&k: &usize| -> Result<CandidateScore> {
        let backend = Backend::new(algorithm, Some(k), seed.wrapping_add(k as u64))?;
        let fitted = backend.fit(matrix.view())?;
        let score = silhouette_view(matrix.view(), fitted.labels()).unwrap_or(f64::NEG_INFINITY);
        debug!(k, score, "scored candidate");
        Ok(CandidateScore { n_groups: k, score })
    };

    #[cfg(feature = "parallel")]
    let scores: Result<Vec<CandidateScore>> = candidates.par_iter().map(score).collect();
    #[cfg(not(feature = "parallel"))]
    let scores: Result<Vec<CandidateScore>> = candidates.iter().map(score).collect();

    scores
}

/// Highest score, smaller count on ties. Expects ascending counts.
fn best_candidate(scores: &[CandidateScore]) -> Option<CandidateScore> {
    scores.iter().copied().fold(None, |best, c| match best {
        Some(b) if c.score <= b.score => Some(b),
        _ => Some(c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CentroidParams, DensityParams, DistributionParams};
    use proptest::prelude::*;

    fn blobs(centres: &[(f64, f64)], per: usize) -> FeatureMatrix {
        let mut rows = Vec::new();
        for &(cx, cy) in centres {
            for i in 0..per {
                let dx = (i % 3) as f64 * 0.1;
                let dy = (i / 3 % 3) as f64 * 0.1;
                rows.push(vec![cx + dx, cy + dy]);
            }
        }
        FeatureMatrix::from_rows(&rows).unwrap()
    }

    fn centroid() -> AlgorithmParams {
        AlgorithmParams::Centroid(CentroidParams::default())
    }

    #[test]
    fn test_recovers_three_blobs() {
        let m = blobs(&[(0.0, 0.0), (8.0, 0.0), (0.0, 8.0)], 9);
        let k = suggest(&m, &(2..=6).collect::<Vec<_>>(), &centroid(), 42).unwrap();
        assert_eq!(k, 3);

        let mixture = AlgorithmParams::Distribution(DistributionParams::default());
        assert_eq!(suggest(&m, &[2, 3, 4], &mixture, 42).unwrap(), 3);
    }

    #[test]
    fn test_scored_is_ascending_and_skips_oversized() {
        let m = blobs(&[(0.0, 0.0), (8.0, 0.0)], 3);
        let scores = suggest_scored(&m, &[10, 3, 2, 3], &centroid(), 1).unwrap();
        let ks: Vec<usize> = scores.iter().map(|s| s.n_groups).collect();
        assert_eq!(ks, vec![2, 3]);
    }

    #[test]
    fn test_tie_prefers_smaller_count() {
        let scores = [
            CandidateScore { n_groups: 2, score: 0.5 },
            CandidateScore { n_groups: 3, score: 0.5 },
            CandidateScore { n_groups: 4, score: 0.4 },
        ];
        assert_eq!(best_candidate(&scores).unwrap().n_groups, 2);

        let undefined = [
            CandidateScore { n_groups: 1, score: f64::NEG_INFINITY },
            CandidateScore { n_groups: 2, score: f64::NEG_INFINITY },
        ];
        assert_eq!(best_candidate(&undefined).unwrap().n_groups, 1);
    }

    #[test]
    fn test_single_group_candidate_scores_negative_infinity() {
        let m = blobs(&[(0.0, 0.0), (8.0, 0.0)], 4);
        let scores = suggest_scored(&m, &[1, 2], &centroid(), 0).unwrap();
        assert_eq!(scores[0].score, f64::NEG_INFINITY);
        assert!(scores[1].score > 0.9);
        assert_eq!(suggest(&m, &[1, 2], &centroid(), 0).unwrap(), 2);
    }

    #[test]
    fn test_empty_range() {
        let m = blobs(&[(0.0, 0.0)], 5);
        assert!(matches!(
            suggest(&m, &[], &centroid(), 42),
            Err(Error::EmptyCandidateRange { .. })
        ));
    }

    #[test]
    fn test_too_few_rows_for_smallest_candidate() {
        let m = blobs(&[(0.0, 0.0)], 3);
        assert!(matches!(
            suggest(&m, &[4, 5], &centroid(), 42),
            Err(Error::EmptyCandidateRange { .. })
        ));
    }

    #[test]
    fn test_invalid_candidates_and_algorithm() {
        let m = blobs(&[(0.0, 0.0)], 5);
        assert!(matches!(
            suggest(&m, &[0, 2], &centroid(), 42),
            Err(Error::InvalidParameter { .. })
        ));
        let density = AlgorithmParams::Density(DensityParams {
            epsilon: 1.0,
            min_points: 2,
        });
        assert!(matches!(
            suggest(&m, &[2, 3], &density, 42),
            Err(Error::InvalidParameter { name: "algorithm", .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn suggestion_stays_within_candidates(
            rows in proptest::collection::vec(proptest::collection::vec(-50.0f64..50.0, 2), 6..30),
            candidates in proptest::collection::btree_set(2usize..8, 1..5),
            seed in any::<u64>(),
        ) {
            let candidates: Vec<usize> = candidates.into_iter().collect();
            let m = FeatureMatrix::from_rows(&rows).unwrap();
            match suggest(&m, &candidates, &centroid(), seed) {
                Ok(k) => prop_assert!(candidates.contains(&k)),
                Err(Error::EmptyCandidateRange { .. }) => {
                    prop_assert!(candidates[0] > rows.len())
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
    }
}
