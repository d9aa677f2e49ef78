//! Fitted feature scalers. Transform only; fitting happens at training time.

use crate::{PipelineError, Result};
use serde::{Deserialize, Serialize};

/// A fitted numeric scaler, tagged by `kind` in its artifact file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FeatureScaler {
    /// `(x - mean) / scale`
    Standard { mean: Vec<f64>, scale: Vec<f64> },
    /// `x * scale + min`
    MinMax { min: Vec<f64>, scale: Vec<f64> },
}

impl FeatureScaler {
    /// Number of columns the scaler was fitted on
    pub fn n_features(&self) -> usize {
        match self {
            FeatureScaler::Standard { mean, .. } => mean.len(),
            FeatureScaler::MinMax { min, .. } => min.len(),
        }
    }

    /// Structural checks run by the artifact loader
    pub fn validate(&self) -> std::result::Result<(), String> {
        let (offsets, scale) = match self {
            FeatureScaler::Standard { mean, scale } => (mean, scale),
            FeatureScaler::MinMax { min, scale } => (min, scale),
        };

        if offsets.is_empty() {
            return Err("scaler has no columns".to_string());
        }
        if offsets.len() != scale.len() {
            return Err(format!(
                "scaler offset/scale length differ ({} vs {})",
                offsets.len(),
                scale.len()
            ));
        }
        if offsets.iter().chain(scale).any(|v| !v.is_finite()) {
            return Err("scaler contains non-finite parameters".to_string());
        }
        Ok(())
    }

    /// Scale one row. Fails with `FeatureMismatch` on a width mismatch.
    pub fn transform(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.n_features() {
            return Err(PipelineError::FeatureMismatch {
                stage: "scaler",
                expected: self.n_features(),
                actual: features.len(),
            });
        }

        let scaled = match self {
            FeatureScaler::Standard { mean, scale } => features
                .iter()
                .zip(mean.iter().zip(scale))
                .map(|(x, (m, s))| {
                    // constant columns were fitted with unit scale
                    let s = if *s == 0.0 { 1.0 } else { *s };
                    (x - m) / s
                })
                .collect(),
            FeatureScaler::MinMax { min, scale } => features
                .iter()
                .zip(min.iter().zip(scale))
                .map(|(x, (m, s))| x * s + m)
                .collect(),
        };

        Ok(scaled)
    }
}
