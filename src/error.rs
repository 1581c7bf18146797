use std::time::Duration;

use thiserror::Error;

/// Result alias for `cohort`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by preparation, clustering and analysis.
#[derive(Debug, Error)]
pub enum Error {
    /// Input was empty.
    #[error("empty input provided")]
    EmptyInput,

    /// A record is missing a field declared in the feature spec.
    #[error("record {record} is missing field '{field}'")]
    SchemaMismatch {
        /// Index of the offending record.
        record: usize,
        /// Name of the missing field.
        field: String,
    },

    /// A raw value could not be turned into a usable number.
    #[error("invalid value for '{field}' in record {record}: {message}")]
    InvalidValue {
        /// Index of the offending record.
        record: usize,
        /// Field name.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// Matrix dimension mismatch.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Found dimension.
        found: usize,
    },

    /// Invalid number of groups requested.
    #[error("cannot create {requested} groups from {n_items} records")]
    InvalidClusterCount {
        /// Requested count.
        requested: usize,
        /// Number of records.
        n_items: usize,
    },

    /// Invalid parameter value.
    #[error("invalid parameter '{name}': {message}")]
    InvalidParameter {
        /// Parameter name.
        name: &'static str,
        /// Error message.
        message: String,
    },

    /// No group count can be evaluated.
    #[error("no usable group-count candidate: {reason}")]
    EmptyCandidateRange {
        /// Why the range is unusable.
        reason: String,
    },

    /// Fewer than two groups, so separation is undefined.
    #[error("labeling has {n_groups} group(s); separation is undefined")]
    DegenerateLabeling {
        /// Number of non-noise groups found.
        n_groups: usize,
    },

    /// Iterative fit stopped at its cap. Warning-level: the fitted state is
    /// still usable and carries this as a flag.
    #[error("did not converge after {iterations} iterations")]
    ConvergenceNotReached {
        /// Number of iterations attempted.
        iterations: usize,
    },

    /// A caller-imposed deadline expired before the fit finished.
    #[error("fit did not finish within {0:?}")]
    Timeout(Duration),

    /// The worker running a deadline-bounded fit stopped without a result.
    #[error("fit worker stopped without producing a result")]
    WorkerFailed,

    /// `predict` or a pass-through was called before any fit.
    #[error("grouper has not been fitted")]
    NotFitted,

    /// Model (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Reading or writing a saved model failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_parameter(name: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            message: message.into(),
        }
    }

    pub(crate) fn invalid_value(
        record: usize,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            record,
            field: field.into(),
            message: message.into(),
        }
    }
}
