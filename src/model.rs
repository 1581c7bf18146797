//! Saved grouping models.
//!
//! A [`GroupingModel`] bundles the configuration, the fitted preparer and the
//! fitted backend, so new raw records can be grouped without refitting.
//! Models are written as JSON to any [`io::Write`] and read back from any
//! [`io::Read`]; choosing files or other storage is up to the caller.

use std::io;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cluster::{ClusterModel, FittedBackend};
use crate::config::GroupingConfig;
use crate::error::{Error, Result};
use crate::importance::ImportanceReport;
use crate::labeling::Labeling;
use crate::prepare::{FeatureMatrix, FeaturePreparer, RawRecord};

const FORMAT_VERSION: u32 = 1;

/// Fitted preparation and grouping, ready for inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingModel {
    version: u32,
    config: GroupingConfig,
    preparer: FeaturePreparer,
    backend: FittedBackend,
    n_groups: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    importance: Option<ImportanceReport>,
}

impl GroupingModel {
    /// Bundle a fit.
    pub fn new(config: GroupingConfig, preparer: FeaturePreparer, backend: FittedBackend) -> Self {
        Self {
            version: FORMAT_VERSION,
            n_groups: backend.n_groups(),
            config,
            preparer,
            backend,
            importance: None,
        }
    }

    /// Attach the importance report computed at fit time.
    pub fn with_importance(mut self, importance: ImportanceReport) -> Self {
        self.importance = Some(importance);
        self
    }

    /// Configuration the model was fitted with.
    pub fn config(&self) -> &GroupingConfig {
        &self.config
    }

    /// Fitted preparer.
    pub fn preparer(&self) -> &FeaturePreparer {
        &self.preparer
    }

    /// Fitted backend state.
    pub fn backend(&self) -> &FittedBackend {
        &self.backend
    }

    /// Number of groups the fit produced (noise excluded).
    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    /// Importance report saved with the model, if any.
    pub fn importance(&self) -> Option<&ImportanceReport> {
        self.importance.as_ref()
    }

    /// Encode `records` with the fitted preparer and assign them to groups.
    pub fn predict(&self, records: &[RawRecord]) -> Result<Labeling> {
        let matrix = self.preparer.transform(records)?;
        self.predict_matrix(&matrix)
    }

    /// Assign already-prepared rows to groups.
    pub fn predict_matrix(&self, matrix: &FeatureMatrix) -> Result<Labeling> {
        self.backend.predict(matrix.view())
    }

    /// Write the model as JSON.
    pub fn save<W: io::Write>(&self, mut writer: W) -> Result<()> {
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        info!(
            algorithm = %self.backend.algorithm(),
            groups = self.n_groups,
            "saved grouping model"
        );
        Ok(())
    }

    /// Read a model written by [`GroupingModel::save`].
    pub fn load<R: io::Read>(reader: R) -> Result<Self> {
        let model: Self = serde_json::from_reader(reader)?;
        if model.version != FORMAT_VERSION {
            return Err(Error::invalid_parameter(
                "version",
                format!(
                    "unsupported model format {} (expected {FORMAT_VERSION})",
                    model.version
                ),
            ));
        }
        model.backend.validate()?;
        if model.n_groups != model.backend.n_groups() {
            return Err(Error::invalid_parameter(
                "n_groups",
                format!(
                    "model records {} groups but its fitted state has {}",
                    model.n_groups,
                    model.backend.n_groups()
                ),
            ));
        }
        if model.backend.n_features() != model.preparer.columns().len() {
            return Err(Error::DimensionMismatch {
                expected: model.preparer.columns().len(),
                found: model.backend.n_features(),
            });
        }
        info!(
            algorithm = %model.backend.algorithm(),
            groups = model.n_groups,
            "loaded grouping model"
        );
        Ok(model)
    }
}
