//! Scaling and classification stage

use crate::feature_assembler::{FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
use crate::models::classifier::Classifier;
use crate::models::scaler::FeatureScaler;
use crate::types::prediction::PredictionResult;
use crate::{PipelineError, Result};
use tracing::{debug, warn};

/// Applies the fitted scaler to an assembled vector and queries the classifier.
///
/// Holds no mutable state; one engine is shared by every request.
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    scaler: FeatureScaler,
    classifier: Classifier,
}

impl InferenceEngine {
    pub fn new(scaler: FeatureScaler, classifier: Classifier) -> Self {
        if scaler.n_features() != FEATURE_COUNT || classifier.n_features() != FEATURE_COUNT {
            warn!(
                scaler_features = scaler.n_features(),
                classifier_features = classifier.n_features(),
                expected = FEATURE_COUNT,
                "Artifact widths disagree with the feature schema, every prediction will fail"
            );
        }

        debug!(
            classifier = classifier.name(),
            classes = ?classifier.classes(),
            "Inference engine built"
        );

        Self { scaler, classifier }
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn scaler(&self) -> &FeatureScaler {
        &self.scaler
    }

    /// Scale the vector and run the classifier
    pub fn predict(&self, features: &FeatureVector) -> Result<PredictionResult> {
        let scaled = self.scaler.transform(features.as_slice())?;
        if let Some(i) = scaled.iter().position(|v| !v.is_finite()) {
            let column = FEATURE_NAMES.get(i).copied().unwrap_or("unknown");
            return Err(PipelineError::InvalidValue {
                column: column.to_string(),
                value: format!("{} (scaled to {})", features.as_slice()[i], scaled[i]),
            });
        }

        if scaled.len() != self.classifier.n_features() {
            return Err(PipelineError::FeatureMismatch {
                stage: "classifier",
                expected: self.classifier.n_features(),
                actual: scaled.len(),
            });
        }

        let (class, probabilities) = self.classifier.predict(&scaled)?;
        if probabilities.iter().any(|p| !p.is_finite()) {
            return Err(PipelineError::InvalidValue {
                column: "risk_probability".to_string(),
                value: format!("{probabilities:?}"),
            });
        }

        debug!(
            prediction = class,
            probabilities = ?probabilities,
            "Inference complete"
        );

        Ok(PredictionResult::single(class, probabilities))
    }

    /// Run inference on a batch of feature vectors
    pub fn predict_batch(&self, batch: &[FeatureVector]) -> Vec<Result<PredictionResult>> {
        batch.iter().map(|f| self.predict(f)).collect()
    }
}
