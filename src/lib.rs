//! # cohort
//!
//! Unsupervised employee segmentation: turn raw employee attributes into a
//! numeric matrix, group the records, pick the number of groups, and explain
//! the result with quality metrics, feature importance and group profiles.
//!
//! ```text
//! raw records ─► prepare ─► FeatureMatrix ─► select (auto) ─► grouping ─► Labeling
//!                                                                  │
//!                                  metrics · importance · profile ◄┘
//! ```
//!
//! Three clustering families are available (see [`cluster`]): k-means,
//! DBSCAN and a diagonal Gaussian mixture. Every randomised step takes an
//! explicit seed, so a configuration run twice on the same input yields the
//! same labels.
//!
//! The library emits `tracing` events but installs no subscriber.
//!
//! ```rust
//! use cohort::{FeatureSpec, GroupingConfig, GroupingPipeline, RawRecord};
//!
//! let rows = [("3.1", "IT"), ("3.3", "IT"), ("4.8", "HR"), ("4.9", "HR")];
//! let records: Vec<RawRecord> = rows
//!     .iter()
//!     .map(|(rating, dept)| {
//!         [("rating", *rating), ("department", *dept)]
//!             .into_iter()
//!             .map(|(k, v)| (k.to_string(), v.to_string()))
//!             .collect()
//!     })
//!     .collect();
//!
//! let spec = FeatureSpec::new().numeric("rating").categorical("department");
//! let config = GroupingConfig::builder().fixed_groups(2).build().unwrap();
//! let report = GroupingPipeline::new(spec, config).run(&records).unwrap();
//!
//! assert_eq!(report.labeling.as_slice(), &[0, 0, 1, 1]);
//! assert_eq!(report.profiles.len(), 2);
//! ```

pub mod cluster;
pub mod config;
/// Error types used across `cohort`.
pub mod error;
pub mod grouping;
pub mod importance;
pub mod labeling;
pub mod metrics;
pub mod model;
pub mod prepare;
pub mod profile;
pub mod select;

pub use cluster::{Backend, ClusterModel, Clustering, FittedBackend, SoftClustering};
pub use config::{
    Algorithm, AlgorithmParams, CentroidParams, DensityParams, DistributionParams, GroupingConfig,
    GroupingConfigBuilder, NGroups,
};
pub use error::{Error, Result};
pub use grouping::{Grouper, GroupingPipeline, GroupingReport};
pub use importance::{analyze, FeatureScore, ImportanceReport};
pub use labeling::{Labeling, NOISE};
pub use metrics::{agreement, evaluate, silhouette_score, EvaluationReport, Evaluator};
pub use model::GroupingModel;
pub use prepare::{
    prepare, Column, FeatureDef, FeatureKind, FeatureMatrix, FeaturePreparer, FeatureSpec,
    RawRecord,
};
pub use profile::{summarize, DominantFeature, FeatureStat, GroupProfile};
pub use select::{suggest, suggest_scored, CandidateScore};
