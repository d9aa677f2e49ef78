//! Input normalization applied once per request, before encoding.

use crate::types::patient::PatientRecord;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;

/// Clinical and behavioral flag fields that accept string booleans.
pub const BOOLEAN_FIELDS: [&str; 12] = [
    "has_chronic_pain",
    "has_mental_health_dx",
    "history_of_substance_abuse",
    "liver_disease",
    "kidney_disease",
    "respiratory_disease",
    "concurrent_benzos",
    "concurrent_muscle_relaxants",
    "concurrent_sleep_meds",
    "concurrent_antidepressants",
    "tobacco_use",
    "previous_overdose",
];

/// Lower-cased spellings read as `true`. Anything else is `false`.
const TRUTHY: [&str; 5] = ["true", "1", "t", "y", "yes"];

/// Interpret a string flag value.
pub fn coerce_flag(raw: &str) -> bool {
    let lowered = raw.to_lowercase();
    TRUTHY.contains(&lowered.as_str())
}

/// Coerces a raw record into the shape the encoder and assembler expect.
///
/// Two rewrites happen, in order:
/// 1. configured field aliases are moved onto their schema names, only when the
///    schema name is absent
/// 2. string values of the [`BOOLEAN_FIELDS`] become booleans
///
/// Non-string flag values pass through untouched and absent fields stay absent.
#[derive(Debug, Clone, Default)]
pub struct InputNormalizer {
    aliases: BTreeMap<String, String>,
}

impl InputNormalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizer that also renames `alias -> schema field`
    pub fn with_aliases(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn normalize(&self, mut record: PatientRecord) -> PatientRecord {
        for (alias, target) in &self.aliases {
            if record.has_value(target) {
                continue;
            }
            if let Some(value) = record.remove(alias) {
                debug!(alias = %alias, field = %target, "Applied field alias");
                record.insert(target.clone(), value);
            }
        }

        for field in BOOLEAN_FIELDS {
            let coerced = match record.get(field) {
                Some(Value::String(raw)) => coerce_flag(raw),
                _ => continue,
            };
            record.insert(field, coerced);
        }

        record
    }
}
