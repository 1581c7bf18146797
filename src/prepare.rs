//! Feature preparation: raw employee attributes to a numeric matrix.
//!
//! Numeric attributes are standardised with batch statistics, categorical
//! attributes are one-hot expanded in first-seen order. Date attributes become
//! years elapsed up to a fixed reference date (tenure from a hire date) and
//! are then treated as numeric. Empty values are imputed (median for numeric
//! and date, mode for categorical) before scaling.
//!
//! ```rust
//! use cohort::prepare::{prepare, FeatureSpec, RawRecord};
//!
//! let spec = FeatureSpec::new().numeric("salary").categorical("department");
//! let records: Vec<RawRecord> = vec![
//!     [("salary", "50000"), ("department", "IT")].into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
//!     [("salary", "70000"), ("department", "HR")].into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
//! ];
//! let matrix = prepare(&records, &spec).unwrap();
//! assert_eq!(matrix.column_names(), vec!["salary", "department=IT", "department=HR"]);
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveDateTime};
use ndarray::{Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// One raw record: attribute name to raw text value.
pub type RawRecord = HashMap<String, String>;

/// Days per year when turning a date span into years.
const DAYS_PER_YEAR: f64 = 365.0;

/// How a raw attribute maps into matrix columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Parsed as a number and standardised.
    Numeric,
    /// One column per distinct value.
    Categorical,
    /// ISO date (`YYYY-MM-DD`, optionally with a time) turned into years
    /// elapsed up to `reference`, then standardised. Dates after the
    /// reference give negative values.
    Date {
        /// Date the elapsed time is measured to.
        reference: NaiveDate,
    },
}

/// A declared input attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureDef {
    /// Attribute name in the raw records.
    pub name: String,
    /// Encoding.
    pub kind: FeatureKind,
    /// Multiplier applied to the feature's columns after scaling.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Ordered list of declared attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSpec {
    features: Vec<FeatureDef>,
}

impl FeatureSpec {
    /// Empty spec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a numeric feature.
    pub fn numeric(self, name: impl Into<String>) -> Self {
        self.with_feature(name, FeatureKind::Numeric, 1.0)
    }

    /// Append a categorical feature.
    pub fn categorical(self, name: impl Into<String>) -> Self {
        self.with_feature(name, FeatureKind::Categorical, 1.0)
    }

    /// Append a date feature measured in years up to `reference`.
    pub fn date(self, name: impl Into<String>, reference: NaiveDate) -> Self {
        self.with_feature(name, FeatureKind::Date { reference }, 1.0)
    }

    /// Append a feature with an explicit weight.
    pub fn with_feature(mut self, name: impl Into<String>, kind: FeatureKind, weight: f64) -> Self {
        self.features.push(FeatureDef {
            name: name.into(),
            kind,
            weight,
        });
        self
    }

    /// Spec with one numeric feature per name.
    pub fn all_numeric<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(Self::new(), |spec, n| spec.numeric(n))
    }

    /// Declared features in order.
    pub fn features(&self) -> &[FeatureDef] {
        &self.features
    }

    /// Number of declared features.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    /// True when nothing is declared.
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Check names are unique and weights usable.
    pub fn validate(&self) -> Result<()> {
        if self.features.is_empty() {
            return Err(Error::EmptyInput);
        }
        let mut seen = HashSet::new();
        for def in &self.features {
            if !seen.insert(def.name.as_str()) {
                return Err(Error::invalid_parameter(
                    "feature_spec",
                    format!("duplicate feature '{}'", def.name),
                ));
            }
            if !(def.weight.is_finite() && def.weight > 0.0) {
                return Err(Error::invalid_parameter(
                    "weight",
                    format!("weight of '{}' must be finite and positive", def.name),
                ));
            }
        }
        Ok(())
    }
}

/// Metadata for one matrix column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Column name (`feature` or `feature=value`).
    pub name: String,
    /// Index of the source feature in the [`FeatureSpec`].
    pub feature: usize,
    /// Name of the source feature, when the column came from a preparer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Numeric feature matrix, one row per record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    data: Array2<f64>,
    columns: Vec<Column>,
}

impl FeatureMatrix {
    /// Wrap an array with column metadata. Rejects non-finite values.
    pub fn new(data: Array2<f64>, columns: Vec<Column>) -> Result<Self> {
        if columns.len() != data.ncols() {
            return Err(Error::DimensionMismatch {
                expected: data.ncols(),
                found: columns.len(),
            });
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            let record = pos / data.ncols().max(1);
            let field = columns[pos % data.ncols().max(1)].name.clone();
            return Err(Error::invalid_value(record, field, "value is not finite"));
        }
        Ok(Self { data, columns })
    }

    /// Build from already-numeric rows; column `j` is named `x{j}` and maps to
    /// feature `j`.
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        let n = rows.len();
        let d = rows.first().map_or(0, Vec::len);
        let mut flat = Vec::with_capacity(n * d);
        for row in rows {
            if row.len() != d {
                return Err(Error::DimensionMismatch {
                    expected: d,
                    found: row.len(),
                });
            }
            flat.extend_from_slice(row);
        }
        let data = Array2::from_shape_vec((n, d), flat)
            .map_err(|e| Error::invalid_parameter("rows", e.to_string()))?;
        let columns = (0..d)
            .map(|j| Column {
                name: format!("x{j}"),
                feature: j,
                source: None,
            })
            .collect();
        Self::new(data, columns)
    }

    /// Borrow the values.
    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// Row `i`.
    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }

    /// Number of records.
    pub fn nrows(&self) -> usize {
        self.data.nrows()
    }

    /// Number of columns.
    pub fn ncols(&self) -> usize {
        self.data.ncols()
    }

    /// Column metadata.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column names in order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Verify every column refers to a feature of `spec`, by name when the
    /// column records its source.
    pub(crate) fn check_spec(&self, spec: &FeatureSpec) -> Result<()> {
        if let Some(max) = self.columns.iter().map(|c| c.feature).max() {
            if max >= spec.len() {
                return Err(Error::DimensionMismatch {
                    expected: spec.len(),
                    found: max + 1,
                });
            }
        }
        for column in &self.columns {
            let declared = &spec.features()[column.feature].name;
            if let Some(source) = column.source.as_ref().filter(|s| *s != declared) {
                return Err(Error::invalid_parameter(
                    "feature_spec",
                    format!(
                        "column '{}' comes from '{source}' but the feature spec declares '{declared}' at position {}",
                        column.name, column.feature
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Encoder {
    Numeric { mean: f64, scale: f64, fill: f64 },
    Categorical { categories: Vec<String>, fill: String },
}

impl Encoder {
    fn width(&self) -> usize {
        match self {
            Encoder::Numeric { .. } => 1,
            Encoder::Categorical { categories, .. } => categories.len(),
        }
    }
}

/// Fitted scaling and encoding, reusable on new records sharing the spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeaturePreparer {
    spec: FeatureSpec,
    encoders: Vec<Encoder>,
    columns: Vec<Column>,
}

fn field<'a>(record: &'a RawRecord, i: usize, name: &str) -> Result<&'a str> {
    record
        .get(name)
        .map(|v| v.trim())
        .ok_or_else(|| Error::SchemaMismatch {
            record: i,
            field: name.to_string(),
        })
}

fn parse_number(raw: &str, i: usize, name: &str) -> Result<f64> {
    let value: f64 = raw
        .parse()
        .map_err(|_| Error::invalid_value(i, name, format!("cannot parse '{raw}' as a number")))?;
    if !value.is_finite() {
        return Err(Error::invalid_value(i, name, "value is not finite"));
    }
    Ok(value)
}

/// Years from the date in `raw` to `reference`.
fn years_before(reference: NaiveDate, raw: &str, i: usize, name: &str) -> Result<f64> {
    let date = raw
        .parse::<NaiveDate>()
        .or_else(|_| raw.parse::<NaiveDateTime>().map(|dt| dt.date()))
        .map_err(|_| Error::invalid_value(i, name, format!("cannot parse '{raw}' as an ISO date")))?;
    Ok(reference.signed_duration_since(date).num_days() as f64 / DAYS_PER_YEAR)
}

/// Numeric reading of a non-empty raw value of a numeric or date feature.
fn numeric_value(def: &FeatureDef, raw: &str, i: usize) -> Result<f64> {
    match def.kind {
        FeatureKind::Date { reference } => years_before(reference, raw, i, &def.name),
        FeatureKind::Numeric | FeatureKind::Categorical => parse_number(raw, i, &def.name),
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl FeaturePreparer {
    /// Learn scaling statistics and category vocabularies from `records`.
    pub fn fit(records: &[RawRecord], spec: &FeatureSpec) -> Result<Self> {
        spec.validate()?;
        if records.is_empty() {
            return Err(Error::EmptyInput);
        }

        let mut encoders = Vec::with_capacity(spec.len());
        let mut columns = Vec::new();

        for (f, def) in spec.features().iter().enumerate() {
            let raw: Vec<&str> = records
                .iter()
                .enumerate()
                .map(|(i, r)| field(r, i, &def.name))
                .collect::<Result<_>>()?;

            let encoder = match def.kind {
                FeatureKind::Numeric | FeatureKind::Date { .. } => Self::fit_numeric(&raw, def)?,
                FeatureKind::Categorical => Self::fit_categorical(&raw, &def.name)?,
            };

            match &encoder {
                Encoder::Numeric { .. } => columns.push(Column {
                    name: def.name.clone(),
                    feature: f,
                    source: Some(def.name.clone()),
                }),
                Encoder::Categorical { categories, .. } => {
                    columns.extend(categories.iter().map(|c| Column {
                        name: format!("{}={}", def.name, c),
                        feature: f,
                        source: Some(def.name.clone()),
                    }));
                }
            }
            encoders.push(encoder);
        }

        debug!(
            records = records.len(),
            features = spec.len(),
            columns = columns.len(),
            "fitted feature preparer"
        );

        Ok(Self {
            spec: spec.clone(),
            encoders,
            columns,
        })
    }

    fn fit_numeric(raw: &[&str], def: &FeatureDef) -> Result<Encoder> {
        let mut present = Vec::with_capacity(raw.len());
        for (i, v) in raw.iter().enumerate() {
            if !v.is_empty() {
                present.push(numeric_value(def, v, i)?);
            }
        }
        if present.is_empty() {
            return Err(Error::invalid_value(0, &def.name, "no non-empty values to fit"));
        }
        let n_present = present.len();
        let present_sum: f64 = present.iter().sum();
        let fill = median(&mut present);

        // Statistics over the imputed column.
        let n = raw.len() as f64;
        let n_missing = (raw.len() - n_present) as f64;
        let mean = (present_sum + n_missing * fill) / n;
        let var = (present.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
            + n_missing * (fill - mean).powi(2))
            / n;
        let std = var.sqrt();
        let scale = if std > f64::EPSILON { std } else { 1.0 };

        Ok(Encoder::Numeric { mean, scale, fill })
    }

    fn fit_categorical(raw: &[&str], name: &str) -> Result<Encoder> {
        let mut categories: Vec<String> = Vec::new();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for v in raw.iter().filter(|v| !v.is_empty()) {
            let count = counts.entry(*v).or_insert(0);
            if *count == 0 {
                categories.push((*v).to_string());
            }
            *count += 1;
        }
        // Mode, ties broken by first appearance.
        let fill = categories
            .iter()
            .fold(None::<(&String, usize)>, |best, c| {
                let count = counts[c.as_str()];
                match best {
                    Some((_, b)) if b >= count => best,
                    _ => Some((c, count)),
                }
            })
            .map(|(c, _)| c.clone())
            .ok_or_else(|| Error::invalid_value(0, name, "no non-empty values to fit"))?;

        Ok(Encoder::Categorical { categories, fill })
    }

    /// Encode `records` with the fitted statistics.
    pub fn transform(&self, records: &[RawRecord]) -> Result<FeatureMatrix> {
        if records.is_empty() {
            return Err(Error::EmptyInput);
        }
        let d = self.columns.len();
        let mut data = Array2::zeros((records.len(), d));

        for (i, record) in records.iter().enumerate() {
            let mut col = 0;
            for (def, encoder) in self.spec.features().iter().zip(&self.encoders) {
                let raw = field(record, i, &def.name)?;
                match encoder {
                    Encoder::Numeric { mean, scale, fill } => {
                        let value = if raw.is_empty() {
                            *fill
                        } else {
                            numeric_value(def, raw, i)?
                        };
                        data[[i, col]] = (value - mean) / scale * def.weight;
                    }
                    Encoder::Categorical { categories, fill } => {
                        let value = if raw.is_empty() { fill.as_str() } else { raw };
                        // Unseen categories stay all-zero.
                        if let Some(k) = categories.iter().position(|c| c == value) {
                            data[[i, col + k]] = def.weight;
                        }
                    }
                }
                col += encoder.width();
            }
        }

        FeatureMatrix::new(data, self.columns.clone())
    }

    /// Spec this preparer was fitted with.
    pub fn spec(&self) -> &FeatureSpec {
        &self.spec
    }

    /// Output columns.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }
}

/// Fit a preparer on `records` and encode them.
pub fn prepare(records: &[RawRecord], spec: &FeatureSpec) -> Result<FeatureMatrix> {
    FeaturePreparer::fit(records, spec)?.transform(records)
}
