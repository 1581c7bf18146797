//! Grouping orchestration.
//!
//! [`Grouper`] owns a [`GroupingConfig`]. On `fit_predict` it resolves the
//! group count (running the selector for [`NGroups::Auto`]), fits the
//! configured backend once and keeps the fitted state for later `predict`
//! calls and for the evaluation, importance and profile pass-throughs.
//!
//! [`GroupingPipeline`] runs the whole flow from raw records: preparation,
//! grouping, evaluation, importance, profiles, and a reusable
//! [`GroupingModel`].
//!
//! ```rust
//! use cohort::{FeatureMatrix, Grouper, GroupingConfig};
//!
//! let matrix = FeatureMatrix::from_rows(&[
//!     vec![0.0, 0.0], vec![0.1, 0.0], vec![9.0, 9.0], vec![9.1, 9.0],
//! ]).unwrap();
//! let config = GroupingConfig::builder().fixed_groups(2).build().unwrap();
//! let mut grouper = Grouper::new(config);
//! let (labels, _) = grouper.fit_predict(&matrix).unwrap();
//! assert_eq!(labels.as_slice(), &[0, 0, 1, 1]);
//! assert!(grouper.evaluate().unwrap().silhouette.unwrap() > 0.9);
//! ```

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cluster::{Backend, ClusterModel, Clustering, FittedBackend};
use crate::config::{GroupingConfig, NGroups};
use crate::error::{Error, Result};
use crate::importance::{analyze, ImportanceReport};
use crate::labeling::Labeling;
use crate::metrics::{evaluate, EvaluationReport};
use crate::model::GroupingModel;
use crate::prepare::{FeatureMatrix, FeaturePreparer, FeatureSpec, RawRecord};
use crate::profile::{summarize, GroupProfile};
use crate::select::suggest;

/// Everything produced by one fit.
#[derive(Debug, Clone)]
struct FitState {
    matrix: FeatureMatrix,
    labeling: Labeling,
    fitted: FittedBackend,
}

fn fit_state(config: &GroupingConfig, matrix: &FeatureMatrix) -> Result<FitState> {
    let params = config.algorithm();
    let seed = config.random_seed();

    let n_groups = if !params.takes_group_count() {
        None
    } else {
        match config.n_groups() {
            NGroups::Fixed(k) => Some(k),
            NGroups::Auto => Some(suggest(matrix, config.candidate_range(), params, seed)?),
        }
    };

    let fitted = Backend::new(params, n_groups, seed)?.fit(matrix.view())?;
    if let Some(warning) = fitted.convergence_warning() {
        warn!(%warning, "returning best state found");
    }
    let labeling = fitted.labels().clone();
    info!(
        algorithm = %params.algorithm(),
        requested = ?n_groups,
        groups = labeling.n_groups(),
        noise = labeling.noise_count(),
        records = labeling.len(),
        "grouping fitted"
    );

    Ok(FitState {
        matrix: matrix.clone(),
        labeling,
        fitted,
    })
}

/// Fits a configured backend and serves inference from the fitted state.
#[derive(Debug, Clone)]
pub struct Grouper {
    config: GroupingConfig,
    state: Option<FitState>,
}

impl Grouper {
    /// Grouper for a validated configuration.
    pub fn new(config: GroupingConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// The configuration.
    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Fit on `matrix` and return its labeling with the fitted state.
    ///
    /// Replaces any previous fit.
    pub fn fit_predict(&mut self, matrix: &FeatureMatrix) -> Result<(Labeling, FittedBackend)> {
        let state = fit_state(&self.config, matrix)?;
        let out = (state.labeling.clone(), state.fitted.clone());
        self.state = Some(state);
        Ok(out)
    }

    /// Like [`Grouper::fit_predict`], but gives up after `deadline`.
    ///
    /// The fit runs on a worker thread. On expiry the in-progress result is
    /// discarded, the previous fit (if any) is kept and
    /// [`Error::Timeout`] is returned.
    pub fn fit_predict_with_deadline(
        &mut self,
        matrix: &FeatureMatrix,
        deadline: Duration,
    ) -> Result<(Labeling, FittedBackend)> {
        let (tx, rx) = mpsc::channel();
        let config = self.config.clone();
        let matrix = matrix.clone();
        thread::spawn(move || {
            // The receiver is gone when the deadline has already passed.
            let _ = tx.send(fit_state(&config, &matrix));
        });

        match rx.recv_timeout(deadline) {
            Ok(result) => {
                let state = result?;
                let out = (state.labeling.clone(), state.fitted.clone());
                self.state = Some(state);
                Ok(out)
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?deadline, "grouping fit exceeded its deadline");
                Err(Error::Timeout(deadline))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::WorkerFailed),
        }
    }

    fn state(&self) -> Result<&FitState> {
        self.state.as_ref().ok_or(Error::NotFitted)
    }

    /// Assign new rows (same columns as the fitted matrix) to fitted groups.
    pub fn predict(&self, matrix: &FeatureMatrix) -> Result<Labeling> {
        let state = self.state()?;
        if matrix.ncols() != state.matrix.ncols() {
            return Err(Error::DimensionMismatch {
                expected: state.matrix.ncols(),
                found: matrix.ncols(),
            });
        }
        state.fitted.predict(matrix.view())
    }

    /// Labeling from the last fit.
    pub fn labels(&self) -> Result<&Labeling> {
        Ok(&self.state()?.labeling)
    }

    /// Fitted state from the last fit.
    pub fn fitted(&self) -> Result<&FittedBackend> {
        Ok(&self.state()?.fitted)
    }

    /// Quality metrics of the last fit.
    pub fn evaluate(&self) -> Result<EvaluationReport> {
        let state = self.state()?;
        evaluate(&state.matrix, &state.labeling)
    }

    /// Feature importance of the last fit.
    pub fn feature_importance(&self, spec: &FeatureSpec) -> Result<ImportanceReport> {
        let state = self.state()?;
        analyze(&state.matrix, &state.labeling, spec)
    }

    /// Group profiles of the last fit.
    pub fn profiles(&self, spec: &FeatureSpec) -> Result<Vec<GroupProfile>> {
        let state = self.state()?;
        summarize(&state.matrix, &state.labeling, spec)
    }
}

/// Output of [`GroupingPipeline::run`].
#[derive(Debug, Clone, Serialize)]
pub struct GroupingReport {
    /// One group id per input record.
    pub labeling: Labeling,
    /// Quality metrics.
    pub evaluation: EvaluationReport,
    /// Feature importance.
    pub importance: ImportanceReport,
    /// Per-group summaries.
    pub profiles: Vec<GroupProfile>,
    /// Reusable model for new records.
    pub model: GroupingModel,
}

/// Raw records in, grouped and analysed records out.
#[derive(Debug, Clone)]
pub struct GroupingPipeline {
    spec: FeatureSpec,
    config: GroupingConfig,
}

impl GroupingPipeline {
    /// Pipeline for records described by `spec`.
    pub fn new(spec: FeatureSpec, config: GroupingConfig) -> Self {
        Self { spec, config }
    }

    /// Prepare, group and analyse `records`.
    pub fn run(&self, records: &[RawRecord]) -> Result<GroupingReport> {
        let preparer = FeaturePreparer::fit(records, &self.spec)?;
        let matrix = preparer.transform(records)?;
        debug!(rows = matrix.nrows(), columns = matrix.ncols(), "prepared records");

        let mut grouper = Grouper::new(self.config.clone());
        let (labeling, fitted) = grouper.fit_predict(&matrix)?;

        let importance = grouper.feature_importance(&self.spec)?;
        let model = GroupingModel::new(self.config.clone(), preparer, fitted)
            .with_importance(importance.clone());

        Ok(GroupingReport {
            evaluation: grouper.evaluate()?,
            profiles: grouper.profiles(&self.spec)?,
            importance,
            model,
            labeling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labeling::NOISE;

    fn blobs() -> FeatureMatrix {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| {
                let centre = (i % 3) as f64 * 10.0;
                vec![centre + (i % 4) as f64 * 0.1, centre - (i % 5) as f64 * 0.1]
            })
            .collect();
        FeatureMatrix::from_rows(&rows).unwrap()
    }

    #[test]
    fn test_auto_picks_three_groups() {
        let config = GroupingConfig::builder().candidate_range(2..=6).build().unwrap();
        let mut grouper = Grouper::new(config);
        let (labels, fitted) = grouper.fit_predict(&blobs()).unwrap();
        assert_eq!(labels.n_groups(), 3);
        assert_eq!(fitted.n_groups(), 3);
        assert_eq!(labels.len(), 30);
    }

    #[test]
    fn test_fixed_count_is_deterministic() {
        let config = GroupingConfig::builder().fixed_groups(4).random_seed(7).build().unwrap();
        let (a, _) = Grouper::new(config.clone()).fit_predict(&blobs()).unwrap();
        let (b, _) = Grouper::new(config).fit_predict(&blobs()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_before_fit() {
        let grouper = Grouper::new(GroupingConfig::builder().build().unwrap());
        assert!(matches!(grouper.predict(&blobs()), Err(Error::NotFitted)));
        assert!(matches!(grouper.evaluate(), Err(Error::NotFitted)));
    }

    #[test]
    fn test_predict_reuses_fitted_state() {
        let config = GroupingConfig::builder().fixed_groups(3).build().unwrap();
        let mut grouper = Grouper::new(config);
        let matrix = blobs();
        let (labels, _) = grouper.fit_predict(&matrix).unwrap();
        assert_eq!(grouper.predict(&matrix).unwrap(), labels);

        let narrow = FeatureMatrix::from_rows(&[vec![1.0]]).unwrap();
        assert!(matches!(
            grouper.predict(&narrow),
            Err(Error::DimensionMismatch { expected: 2, found: 1 })
        ));
    }

    #[test]
    fn test_evaluate_predicted_batch_missing_a_group() {
        let config = GroupingConfig::builder().fixed_groups(3).build().unwrap();
        let mut grouper = Grouper::new(config);
        grouper.fit_predict(&blobs()).unwrap();

        let batch = FeatureMatrix::from_rows(&[
            vec![0.0, 0.0],
            vec![0.1, 0.0],
            vec![20.0, 20.0],
            vec![20.1, 20.0],
        ])
        .unwrap();
        let predicted = grouper.predict(&batch).unwrap();
        assert_eq!(predicted.as_slice(), &[0, 0, 2, 2]);

        let report = evaluate(&batch, &predicted).unwrap();
        assert_eq!(report.n_groups, 2);
        assert_eq!(report.size_balance, Some(1.0));
        assert!((report.separation.unwrap() - 800.0_f64.sqrt()).abs() < 1e-9);
        assert!(report.davies_bouldin.unwrap() < 0.01);

        let spec = FeatureSpec::all_numeric(["a", "b"]);
        assert_eq!(summarize(&batch, &predicted, &spec).unwrap().len(), 2);
        let importance = analyze(&batch, &predicted, &spec).unwrap();
        assert!((importance.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_density_ignores_group_count() {
        let config = GroupingConfig::builder()
            .density(1.0, 3)
            .fixed_groups(8)
            .build()
            .unwrap();
        let mut grouper = Grouper::new(config);
        let (labels, _) = grouper.fit_predict(&blobs()).unwrap();
        assert_eq!(labels.n_groups(), 3);
        assert!(!labels.as_slice().contains(&NOISE));
    }

    #[test]
    fn test_pass_throughs() {
        let config = GroupingConfig::builder().fixed_groups(3).build().unwrap();
        let mut grouper = Grouper::new(config);
        grouper.fit_predict(&blobs()).unwrap();
        let spec = FeatureSpec::all_numeric(["a", "b"]);

        let report = grouper.evaluate().unwrap();
        assert_eq!(report.n_groups, 3);
        let importance = grouper.feature_importance(&spec).unwrap();
        assert!((importance.total() - 1.0).abs() < 1e-9);
        assert_eq!(grouper.profiles(&spec).unwrap().len(), 3);
    }

    #[test]
    fn test_deadline() {
        let config = GroupingConfig::builder().fixed_groups(3).build().unwrap();
        let mut grouper = Grouper::new(config);
        let (labels, _) = grouper
            .fit_predict_with_deadline(&blobs(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(labels.len(), 30);

        let big: Vec<Vec<f64>> = (0..2000).map(|i| vec![(i % 97) as f64, (i % 89) as f64]).collect();
        let big = FeatureMatrix::from_rows(&big).unwrap();
        let auto = GroupingConfig::builder().build().unwrap();
        let mut slow = Grouper::new(auto);
        assert!(matches!(
            slow.fit_predict_with_deadline(&big, Duration::from_nanos(1)),
            Err(Error::Timeout(_))
        ));
        assert!(matches!(slow.labels(), Err(Error::NotFitted)));
    }
}
