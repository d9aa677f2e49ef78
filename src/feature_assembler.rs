//! Feature assembly for overdose risk model inference.
//!
//! The column order below is the order the scaler and classifier were fitted on.
//! It is fixed at compile time and never inferred from the incoming record.

use crate::types::patient::PatientRecord;
use crate::{PipelineError, Result};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Number of model input columns
pub const FEATURE_COUNT: usize = 22;

/// Model input columns, in training order.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "age",
    "weight_kg",
    "height_cm",
    "has_chronic_pain",
    "has_mental_health_dx",
    "history_of_substance_abuse",
    "liver_disease",
    "kidney_disease",
    "respiratory_disease",
    "daily_dosage_mg",
    "treatment_duration_months",
    "concurrent_benzos",
    "concurrent_muscle_relaxants",
    "concurrent_sleep_meds",
    "concurrent_antidepressants",
    "tobacco_use",
    "previous_overdose",
    "daily_mme",
    "risk_factors_count",
    "gender_encoded",
    "primary_opioid_encoded",
    "alcohol_use_encoded",
];

/// Value used for columns absent from the record
pub const MISSING_FILL: f64 = 0.0;

/// Position of a column in the feature vector
pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_NAMES.iter().position(|&n| n == name)
}

/// Ordered model input row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn new(values: [f64; FEATURE_COUNT]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_COUNT
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value of a named column
    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|i| self.0[i])
    }

    /// `(column, value)` pairs in schema order
    pub fn named(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        FEATURE_NAMES.iter().copied().zip(self.0.iter().copied())
    }
}

/// How to treat schema columns missing from the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFieldPolicy {
    /// Fill with [`MISSING_FILL`]
    #[default]
    ZeroFill,
    /// Fail the request with `MissingFeatures`
    Reject,
}

/// Assembly output: the vector plus the columns that were defaulted
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledFeatures {
    pub vector: FeatureVector,
    pub defaulted: Vec<&'static str>,
}

/// Builds the fixed-order feature vector from a normalized, encoded record.
#[derive(Debug, Clone, Default)]
pub struct FeatureAssembler {
    categorical_columns: BTreeSet<String>,
    missing_fields: MissingFieldPolicy,
}

impl FeatureAssembler {
    /// Create an assembler that drops the given raw categorical columns
    pub fn new<I, S>(categorical_columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categorical_columns: categorical_columns.into_iter().map(Into::into).collect(),
            missing_fields: MissingFieldPolicy::ZeroFill,
        }
    }

    pub fn with_missing_field_policy(mut self, policy: MissingFieldPolicy) -> Self {
        self.missing_fields = policy;
        self
    }

    /// Reindex the record onto [`FEATURE_NAMES`].
    ///
    /// Raw categorical columns are dropped first; only their `_encoded`
    /// counterparts can reach the vector. Extra fields are ignored.
    pub fn assemble(&self, mut record: PatientRecord) -> Result<AssembledFeatures> {
        for column in &self.categorical_columns {
            record.remove(column);
        }

        let mut values = [MISSING_FILL; FEATURE_COUNT];
        let mut defaulted = Vec::new();

        for (slot, column) in values.iter_mut().zip(FEATURE_NAMES) {
            match record.get(column).map(|v| numeric_value(column, v)).transpose()? {
                Some(Some(value)) => *slot = value,
                _ => defaulted.push(column),
            }
        }

        if !defaulted.is_empty() {
            if self.missing_fields == MissingFieldPolicy::Reject {
                return Err(PipelineError::MissingFeatures(
                    defaulted.iter().map(|c| c.to_string()).collect(),
                ));
            }
            debug!(columns = ?defaulted, "Zero-filled missing feature columns");
        }

        Ok(AssembledFeatures {
            vector: FeatureVector(values),
            defaulted,
        })
    }

    /// Get the number of features produced.
    pub fn feature_count(&self) -> usize {
        FEATURE_COUNT
    }

    /// Get feature names in model order.
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_NAMES
    }
}

/// Numeric reading of a record value. `Ok(None)` means "treat as absent".
fn numeric_value(column: &str, value: &Value) -> Result<Option<f64>> {
    let invalid = || PipelineError::InvalidValue {
        column: column.to_string(),
        value: value.to_string(),
    };

    let number = match value {
        Value::Null => return Ok(None),
        Value::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        Value::Array(_) | Value::Object(_) => return Err(invalid()),
    };

    if number.is_finite() {
        Ok(Some(number))
    } else {
        Err(invalid())
    }
}
