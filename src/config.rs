//! Grouping configuration.
//!
//! A [`GroupingConfig`] is validated when it is built (by
//! [`GroupingConfigBuilder::build`] or by deserialization) and is immutable
//! afterwards. Each algorithm accepts a fixed set of parameters; unknown
//! parameter names are rejected.
//!
//! JSON form:
//!
//! ```json
//! {
//!   "algorithm": "centroid",
//!   "n_groups": "auto",
//!   "random_seed": 42,
//!   "algorithm_params": { "max_iter": 300, "tol": 0.0001 },
//!   "candidate_range": [2, 3, 4, 5, 6]
//! }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Clustering family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    /// K-means.
    Centroid,
    /// DBSCAN.
    Density,
    /// Gaussian mixture.
    Distribution,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Algorithm::Centroid => "centroid",
            Algorithm::Density => "density",
            Algorithm::Distribution => "distribution",
        };
        f.write_str(name)
    }
}

/// K-means tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CentroidParams {
    /// Iteration cap.
    pub max_iter: usize,
    /// Squared centroid shift below which the fit has converged.
    pub tol: f64,
}

impl Default for CentroidParams {
    fn default() -> Self {
        Self {
            max_iter: 300,
            tol: 1e-4,
        }
    }
}

/// DBSCAN tunables. Both fields are required.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DensityParams {
    /// Neighbourhood radius.
    pub epsilon: f64,
    /// Points (self included) needed for a core point.
    pub min_points: usize,
}

impl DensityParams {
    /// Derive parameters from the data (90th percentile nearest-neighbour
    /// distance, 1% of records but at least 3).
    pub fn estimate(matrix: &crate::prepare::FeatureMatrix) -> Result<Self> {
        let (epsilon, min_points) = crate::cluster::Dbscan::estimate_params(matrix.view())?;
        Ok(Self {
            epsilon,
            min_points,
        })
    }
}

/// Gaussian mixture tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DistributionParams {
    /// EM iteration cap.
    pub max_iter: usize,
    /// Mean log-likelihood improvement below which EM stops.
    pub tol: f64,
    /// Variance floor added to every component.
    pub reg_covar: f64,
}

impl Default for DistributionParams {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-3,
            reg_covar: 1e-6,
        }
    }
}

/// Algorithm choice together with its parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AlgorithmParams {
    /// K-means.
    Centroid(CentroidParams),
    /// DBSCAN.
    Density(DensityParams),
    /// Gaussian mixture.
    Distribution(DistributionParams),
}

impl AlgorithmParams {
    /// The family these parameters belong to.
    pub fn algorithm(&self) -> Algorithm {
        match self {
            AlgorithmParams::Centroid(_) => Algorithm::Centroid,
            AlgorithmParams::Density(_) => Algorithm::Density,
            AlgorithmParams::Distribution(_) => Algorithm::Distribution,
        }
    }

    /// Whether the family takes a group count.
    pub fn takes_group_count(&self) -> bool {
        !matches!(self, AlgorithmParams::Density(_))
    }

    fn validate(&self) -> Result<()> {
        fn check_tol(tol: f64) -> Result<()> {
            if !(tol >= 0.0 && tol.is_finite()) {
                return Err(Error::invalid_parameter("tol", "must be finite and non-negative"));
            }
            Ok(())
        }
        fn check_iter(max_iter: usize) -> Result<()> {
            if max_iter == 0 {
                return Err(Error::invalid_parameter("max_iter", "must be at least 1"));
            }
            Ok(())
        }

        match *self {
            AlgorithmParams::Centroid(p) => {
                check_iter(p.max_iter)?;
                check_tol(p.tol)
            }
            AlgorithmParams::Density(p) => {
                if !(p.epsilon > 0.0 && p.epsilon.is_finite()) {
                    return Err(Error::invalid_parameter(
                        "epsilon",
                        format!("must be positive and finite, got {}", p.epsilon),
                    ));
                }
                if p.min_points == 0 {
                    return Err(Error::invalid_parameter("min_points", "must be at least 1"));
                }
                Ok(())
            }
            AlgorithmParams::Distribution(p) => {
                check_iter(p.max_iter)?;
                check_tol(p.tol)?;
                if !(p.reg_covar > 0.0 && p.reg_covar.is_finite()) {
                    return Err(Error::invalid_parameter(
                        "reg_covar",
                        "must be positive and finite",
                    ));
                }
                Ok(())
            }
        }
    }

    fn from_parts(algorithm: Algorithm, params: Option<Value>) -> Result<Self> {
        let params = params.unwrap_or_else(|| Value::Object(Default::default()));
        let bad = |e: serde_json::Error| Error::invalid_parameter("algorithm_params", e.to_string());
        Ok(match algorithm {
            Algorithm::Centroid => Self::Centroid(serde_json::from_value(params).map_err(bad)?),
            Algorithm::Density => Self::Density(serde_json::from_value(params).map_err(bad)?),
            Algorithm::Distribution => {
                Self::Distribution(serde_json::from_value(params).map_err(bad)?)
            }
        })
    }

    fn to_value(self) -> Value {
        let value = match self {
            AlgorithmParams::Centroid(p) => serde_json::to_value(p),
            AlgorithmParams::Density(p) => serde_json::to_value(p),
            AlgorithmParams::Distribution(p) => serde_json::to_value(p),
        };
        value.unwrap_or_default()
    }
}

impl Default for AlgorithmParams {
    fn default() -> Self {
        AlgorithmParams::Centroid(CentroidParams::default())
    }
}

/// Requested number of groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "NGroupsRepr", into = "NGroupsRepr")]
pub enum NGroups {
    /// Let the selector choose from the candidate range.
    #[default]
    Auto,
    /// Exactly this many.
    Fixed(usize),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum NGroupsRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<NGroupsRepr> for NGroups {
    type Error = String;

    fn try_from(repr: NGroupsRepr) -> std::result::Result<Self, String> {
        match repr {
            NGroupsRepr::Count(k) => Ok(NGroups::Fixed(k)),
            NGroupsRepr::Keyword(s) if s.eq_ignore_ascii_case("auto") => Ok(NGroups::Auto),
            NGroupsRepr::Keyword(s) => Err(format!("expected a positive integer or \"auto\", got \"{s}\"")),
        }
    }
}

impl From<NGroups> for NGroupsRepr {
    fn from(n: NGroups) -> Self {
        match n {
            NGroups::Auto => NGroupsRepr::Keyword("auto".to_string()),
            NGroups::Fixed(k) => NGroupsRepr::Count(k),
        }
    }
}

/// Serialized shape of [`GroupingConfig`].
#[derive(Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGroupingConfig {
    algorithm: Algorithm,
    #[serde(default)]
    n_groups: NGroups,
    #[serde(default = "default_seed")]
    random_seed: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    algorithm_params: Option<Value>,
    #[serde(default = "default_candidates")]
    candidate_range: Vec<usize>,
}

fn default_seed() -> u64 {
    42
}

fn default_candidates() -> Vec<usize> {
    (2..=10).collect()
}

/// Validated, immutable grouping configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawGroupingConfig", into = "RawGroupingConfig")]
pub struct GroupingConfig {
    algorithm: AlgorithmParams,
    n_groups: NGroups,
    random_seed: u64,
    candidate_range: Vec<usize>,
}

impl TryFrom<RawGroupingConfig> for GroupingConfig {
    type Error = Error;

    fn try_from(raw: RawGroupingConfig) -> Result<Self> {
        GroupingConfigBuilder {
            algorithm: AlgorithmParams::from_parts(raw.algorithm, raw.algorithm_params)?,
            n_groups: raw.n_groups,
            random_seed: raw.random_seed,
            candidate_range: raw.candidate_range,
        }
        .build()
    }
}

impl From<GroupingConfig> for RawGroupingConfig {
    fn from(config: GroupingConfig) -> Self {
        Self {
            algorithm: config.algorithm.algorithm(),
            n_groups: config.n_groups,
            random_seed: config.random_seed,
            algorithm_params: Some(config.algorithm.to_value()),
            candidate_range: config.candidate_range,
        }
    }
}

impl GroupingConfig {
    /// Start a builder with defaults: centroid, auto, seed 42, candidates 2..=10.
    pub fn builder() -> GroupingConfigBuilder {
        GroupingConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration.
    ///
    /// Malformed JSON is [`Error::Serialization`]; well-formed JSON with
    /// unusable values fails with the same error the builder returns.
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawGroupingConfig = serde_json::from_str(json)?;
        Self::try_from(raw)
    }

    /// Algorithm and its parameters.
    pub fn algorithm(&self) -> &AlgorithmParams {
        &self.algorithm
    }

    /// Requested group count.
    pub fn n_groups(&self) -> NGroups {
        self.n_groups
    }

    /// Seed for every randomised step.
    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    /// Candidates evaluated when `n_groups` is [`NGroups::Auto`].
    pub fn candidate_range(&self) -> &[usize] {
        &self.candidate_range
    }
}

/// Builder for [`GroupingConfig`].
#[derive(Debug, Clone)]
pub struct GroupingConfigBuilder {
    algorithm: AlgorithmParams,
    n_groups: NGroups,
    random_seed: u64,
    candidate_range: Vec<usize>,
}

impl Default for GroupingConfigBuilder {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmParams::default(),
            n_groups: NGroups::Auto,
            random_seed: default_seed(),
            candidate_range: default_candidates(),
        }
    }
}

impl GroupingConfigBuilder {
    /// Set algorithm and parameters.
    pub fn algorithm(mut self, algorithm: AlgorithmParams) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// K-means with default parameters.
    pub fn centroid(self) -> Self {
        self.algorithm(AlgorithmParams::Centroid(CentroidParams::default()))
    }

    /// DBSCAN with the given radius and minimum points.
    pub fn density(self, epsilon: f64, min_points: usize) -> Self {
        self.algorithm(AlgorithmParams::Density(DensityParams {
            epsilon,
            min_points,
        }))
    }

    /// Gaussian mixture with default parameters.
    pub fn distribution(self) -> Self {
        self.algorithm(AlgorithmParams::Distribution(DistributionParams::default()))
    }

    /// Set the group count.
    pub fn n_groups(mut self, n_groups: NGroups) -> Self {
        self.n_groups = n_groups;
        self
    }

    /// Shorthand for `n_groups(NGroups::Fixed(k))`.
    pub fn fixed_groups(self, k: usize) -> Self {
        self.n_groups(NGroups::Fixed(k))
    }

    /// Set the seed.
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Set the candidates for automatic selection.
    pub fn candidate_range(mut self, candidates: impl IntoIterator<Item = usize>) -> Self {
        self.candidate_range = candidates.into_iter().collect();
        self
    }

    /// Validate and freeze.
    pub fn build(self) -> Result<GroupingConfig> {
        self.algorithm.validate()?;

        if let NGroups::Fixed(0) = self.n_groups {
            return Err(Error::invalid_parameter("n_groups", "must be at least 1"));
        }
        if self.candidate_range.contains(&0) {
            return Err(Error::invalid_parameter(
                "candidate_range",
                "group counts must be at least 1",
            ));
        }
        if self.n_groups == NGroups::Auto
            && self.algorithm.takes_group_count()
            && self.candidate_range.is_empty()
        {
            return Err(Error::EmptyCandidateRange {
                reason: "no candidates configured for automatic selection".to_string(),
            });
        }

        let mut candidate_range = self.candidate_range;
        candidate_range.sort_unstable();
        candidate_range.dedup();

        Ok(GroupingConfig {
            algorithm: self.algorithm,
            n_groups: self.n_groups,
            random_seed: self.random_seed,
            candidate_range,
        })
    }
}
