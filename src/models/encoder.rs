//! Categorical label encoders with append-on-unseen semantics.
//!
//! Each encoder owns its class list behind its own `RwLock`. Known labels are
//! encoded under a shared read lock; an unseen label takes the write lock,
//! re-checks membership and appends. Two requests racing on the same unseen
//! label therefore always agree on one index, and appends to one column never
//! block encoding on another.

use crate::types::patient::PatientRecord;
use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{debug, warn};

/// On-disk form of one fitted encoder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderArtifact {
    /// Known labels in fit order; a label's position is its code
    pub classes: Vec<String>,
}

/// Outcome of encoding one label
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedLabel {
    pub index: usize,
    /// True when the label was unseen and has just been appended
    pub appended: bool,
}

#[derive(Debug)]
struct EncoderState {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

/// Label encoder for a single categorical column.
#[derive(Debug)]
pub struct LabelEncoder {
    column: String,
    state: RwLock<EncoderState>,
}

impl LabelEncoder {
    /// Create an encoder from fitted classes. Duplicate labels keep their first index.
    pub fn new(column: impl Into<String>, classes: Vec<String>) -> Self {
        let mut index = HashMap::with_capacity(classes.len());
        for (i, label) in classes.iter().enumerate() {
            index.entry(label.clone()).or_insert(i);
        }

        Self {
            column: column.into(),
            state: RwLock::new(EncoderState { classes, index }),
        }
    }

    pub fn column(&self) -> &str {
        &self.column
    }

    /// Encode a label, appending it to the known classes if unseen.
    pub fn encode(&self, label: &str) -> Result<EncodedLabel> {
        {
            let state = self.read_state()?;
            if let Some(&index) = state.index.get(label) {
                return Ok(EncodedLabel {
                    index,
                    appended: false,
                });
            }
        }

        let mut state = self
            .state
            .write()
            .map_err(|_| PipelineError::EncoderUnavailable(self.column.clone()))?;

        // Another request may have appended it between the two locks
        if let Some(&index) = state.index.get(label) {
            return Ok(EncodedLabel {
                index,
                appended: false,
            });
        }

        let index = state.classes.len();
        state.classes.push(label.to_string());
        state.index.insert(label.to_string(), index);

        warn!(
            column = %self.column,
            label = %label,
            index = index,
            "Unseen category appended to encoder"
        );

        Ok(EncodedLabel {
            index,
            appended: true,
        })
    }

    /// Look up a label without growing the encoder
    pub fn lookup(&self, label: &str) -> Result<Option<usize>> {
        Ok(self.read_state()?.index.get(label).copied())
    }

    /// Snapshot of the current classes, in index order
    pub fn classes(&self) -> Result<Vec<String>> {
        Ok(self.read_state()?.classes.clone())
    }

    /// Number of known classes
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_state()?.classes.len())
    }

    /// Current state in artifact form
    pub fn to_artifact(&self) -> Result<EncoderArtifact> {
        Ok(EncoderArtifact {
            classes: self.classes()?,
        })
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, EncoderState>> {
        self.state
            .read()
            .map_err(|_| PipelineError::EncoderUnavailable(self.column.clone()))
    }
}

/// The full set of per-column encoders, keyed by raw categorical column name.
///
/// Built once at artifact-load time and shared between requests; the column set
/// is fixed, only each column's classes can grow.
#[derive(Debug, Default)]
pub struct CategoricalEncoders {
    encoders: BTreeMap<String, LabelEncoder>,
}

impl CategoricalEncoders {
    pub fn new(encoders: impl IntoIterator<Item = LabelEncoder>) -> Self {
        Self {
            encoders: encoders
                .into_iter()
                .map(|e| (e.column().to_string(), e))
                .collect(),
        }
    }

    /// Build from the deserialized encoders artifact
    pub fn from_artifacts(artifacts: BTreeMap<String, EncoderArtifact>) -> Self {
        Self::new(
            artifacts
                .into_iter()
                .map(|(column, artifact)| LabelEncoder::new(column, artifact.classes)),
        )
    }

    pub fn get(&self, column: &str) -> Option<&LabelEncoder> {
        self.encoders.get(column)
    }

    /// Raw categorical column names
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.encoders.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.encoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encoders.is_empty()
    }

    /// Encode every categorical column present in the record.
    ///
    /// Writes `<column>_encoded` next to the raw value, which is left in place for
    /// the assembler to drop. Columns absent from the record (or `null`) are
    /// skipped. Returns the number of labels appended.
    ///
    /// Caller-supplied `<column>_encoded` values are discarded first; only codes
    /// produced here reach the feature vector.
    pub fn encode_record(&self, record: &mut PatientRecord) -> Result<usize> {
        let mut appended = 0;

        for (column, encoder) in &self.encoders {
            let encoded_column = format!("{column}_encoded");
            if record.remove(&encoded_column).is_some() {
                debug!(column = %encoded_column, "Discarded caller-supplied encoded value");
            }

            let label = match record.get(column) {
                None | Some(Value::Null) => {
                    debug!(column = %column, "Categorical column absent, not encoded");
                    continue;
                }
                Some(value) => label_of(column, value)?,
            };

            let encoded = encoder.encode(&label)?;
            if encoded.appended {
                appended += 1;
            }
            record.insert(encoded_column, encoded.index as u64);
        }

        Ok(appended)
    }

    /// Current state of every encoder in artifact form
    pub fn to_artifacts(&self) -> Result<BTreeMap<String, EncoderArtifact>> {
        self.encoders
            .iter()
            .map(|(column, encoder)| Ok((column.clone(), encoder.to_artifact()?)))
            .collect()
    }
}

fn label_of(column: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(PipelineError::InvalidValue {
            column: column.to_string(),
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn gender_encoder() -> LabelEncoder {
        LabelEncoder::new("gender", vec!["female".to_string(), "male".to_string()])
    }

    #[test]
    fn test_known_labels_use_fit_order() {
        let encoder = gender_encoder();
        assert_eq!(encoder.encode("female").unwrap().index, 0);
        assert_eq!(encoder.encode("male").unwrap().index, 1);
        assert_eq!(encoder.len().unwrap(), 2);
    }

    #[test]
    fn test_unseen_label_appends_exactly_once() {
        let encoder = gender_encoder();

        let first = encoder.encode("nonbinary").unwrap();
        assert_eq!(first, EncodedLabel { index: 2, appended: true });
        assert_eq!(encoder.len().unwrap(), 3);

        let again = encoder.encode("nonbinary").unwrap();
        assert_eq!(again, EncodedLabel { index: 2, appended: false });
        assert_eq!(encoder.len().unwrap(), 3);

        assert_eq!(encoder.classes().unwrap(), vec!["female", "male", "nonbinary"]);
    }

    #[test]
    fn test_lookup_does_not_grow() {
        let encoder = gender_encoder();
        assert_eq!(encoder.lookup("other").unwrap(), None);
        assert_eq!(encoder.len().unwrap(), 2);
    }

    #[test]
    fn test_duplicate_fitted_labels_keep_first_index() {
        let encoder = LabelEncoder::new(
            "alcohol_use",
            vec!["none".to_string(), "heavy".to_string(), "none".to_string()],
        );
        assert_eq!(encoder.encode("none").unwrap().index, 0);
        assert_eq!(encoder.encode("light").unwrap().index, 3);
    }

    #[test]
    fn test_concurrent_unseen_labels_get_distinct_stable_indices() {
        let encoder = gender_encoder();
        let labels = ["alpha", "beta"];

        let results: Vec<(String, usize)> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..64)
                .map(|i| {
                    let encoder = &encoder;
                    let label = labels[i % labels.len()];
                    scope.spawn(move || (label.to_string(), encoder.encode(label).unwrap().index))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        // every caller saw the same index for the same label
        for label in labels {
            let seen: HashSet<usize> = results
                .iter()
                .filter(|(l, _)| l == label)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(seen.len(), 1, "label {label} got several indices");
        }

        // both appended once, at distinct new indices, nothing lost
        assert_eq!(encoder.len().unwrap(), 4);
        let alpha = encoder.lookup("alpha").unwrap().unwrap();
        let beta = encoder.lookup("beta").unwrap().unwrap();
        assert_ne!(alpha, beta);
        assert!(alpha >= 2 && beta >= 2);
        assert_eq!(encoder.encode("female").unwrap().index, 0);
    }

    #[test]
    fn test_encode_record_adds_encoded_columns() {
        let encoders = CategoricalEncoders::new([
            gender_encoder(),
            LabelEncoder::new("primary_opioid", vec!["morphine".into(), "oxycodone".into()]),
        ]);
        let mut record = PatientRecord::new()
            .with("gender", "female")
            .with("primary_opioid", "tapentadol");

        let appended = encoders.encode_record(&mut record).unwrap();

        assert_eq!(appended, 1);
        assert_eq!(record.get("gender_encoded"), Some(&json!(0)));
        assert_eq!(record.get("primary_opioid_encoded"), Some(&json!(2)));
        // raw columns are still there
        assert_eq!(record.get("gender"), Some(&json!("female")));
    }

    #[test]
    fn test_encode_record_discards_supplied_codes() {
        let encoders = CategoricalEncoders::new([
            gender_encoder(),
            LabelEncoder::new("alcohol_use", vec!["heavy".into(), "none".into()]),
        ]);
        let mut record = PatientRecord::new()
            .with("age", 40)
            .with("gender_encoded", 99)
            .with("alcohol_use", "none")
            .with("alcohol_use_encoded", -5);

        encoders.encode_record(&mut record).unwrap();

        // raw column absent: nothing left for the assembler but zero-fill
        assert_eq!(record.get("gender_encoded"), None);
        assert_eq!(record.get("alcohol_use_encoded"), Some(&json!(1)));
        assert_eq!(encoders.get("gender").unwrap().len().unwrap(), 2);
    }

    #[test]
    fn test_encode_record_skips_absent_columns() {
        let encoders = CategoricalEncoders::new([gender_encoder()]);
        let mut record = PatientRecord::new().with("age", 40);

        assert_eq!(encoders.encode_record(&mut record).unwrap(), 0);
        assert!(record.get("gender_encoded").is_none());

        let mut record = PatientRecord::new().with("gender", Value::Null);
        encoders.encode_record(&mut record).unwrap();
        assert!(record.get("gender_encoded").is_none());
    }

    #[test]
    fn test_non_string_labels_are_stringified() {
        let encoders = CategoricalEncoders::new([gender_encoder()]);
        let mut record = PatientRecord::new().with("gender", 2);

        encoders.encode_record(&mut record).unwrap();
        assert_eq!(record.get("gender_encoded"), Some(&json!(2)));
        assert_eq!(encoders.get("gender").unwrap().lookup("2").unwrap(), Some(2));
    }

    #[test]
    fn test_structured_label_is_rejected() {
        let encoders = CategoricalEncoders::new([gender_encoder()]);
        let mut record = PatientRecord::new().with("gender", json!(["female"]));

        let err = encoders.encode_record(&mut record).unwrap_err();
        assert_eq!(err.kind(), "invalid_value");
    }

    #[test]
    fn test_artifact_round_trip_reflects_growth() {
        let mut artifacts = BTreeMap::new();
        artifacts.insert(
            "gender".to_string(),
            EncoderArtifact {
                classes: vec!["female".into(), "male".into()],
            },
        );
        let encoders = CategoricalEncoders::from_artifacts(artifacts);
        encoders.get("gender").unwrap().encode("other").unwrap();

        let snapshot = encoders.to_artifacts().unwrap();
        assert_eq!(snapshot["gender"].classes, vec!["female", "male", "other"]);
    }
}
