//! Overdose Risk Pipeline Library
//!
//! Turns loosely-typed patient records into the fixed-order feature vector a
//! pre-fitted classifier expects, and runs inference against the serialized
//! classifier, scaler and categorical encoders.
//!
//! Stages, in request order:
//! - `normalizer`: string boolean coercion and field aliasing
//! - `models::encoder`: label encoding with append-on-unseen
//! - `feature_assembler`: the 22-column schema and zero-fill
//! - `models::inference`: scaling and classification
//! - `pipeline`: orchestration and result packaging

use std::path::PathBuf;

pub mod config;
pub mod consumer;
pub mod feature_assembler;
pub mod metrics;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod producer;
pub mod types;

pub use self::config::AppConfig;
pub use consumer::RequestConsumer;
pub use feature_assembler::{FeatureAssembler, FeatureVector, FEATURE_COUNT, FEATURE_NAMES};
pub use models::inference::InferenceEngine;
pub use models::loader::{ArtifactLoader, ModelArtifacts};
pub use normalizer::InputNormalizer;
pub use pipeline::RiskPipeline;
pub use producer::ResponsePublisher;
pub use types::{
    patient::{PatientRecord, PredictionRequest},
    prediction::{PredictionResponse, PredictionResult},
};

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Request-fatal pipeline failures.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Model artifact '{artifact}' unavailable at {}: {reason}", path.display())]
    ArtifactMissing {
        artifact: &'static str,
        path: PathBuf,
        reason: String,
    },

    #[error("Feature mismatch at {stage}: expected {expected} columns, got {actual}")]
    FeatureMismatch {
        stage: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Value for '{column}' cannot be interpreted: {value}")]
    InvalidValue { column: String, value: String },

    #[error("Missing required features: {}", .0.join(", "))]
    MissingFeatures(Vec<String>),

    #[error("Encoder for '{0}' is unavailable")]
    EncoderUnavailable(String),

    #[error("Malformed request payload: {0}")]
    MalformedRequest(#[from] serde_json::Error),
}

impl PipelineError {
    /// Stable identifier used in responses and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::ArtifactMissing { .. } => "artifact_missing",
            PipelineError::FeatureMismatch { .. } => "feature_mismatch",
            PipelineError::InvalidValue { .. } => "invalid_value",
            PipelineError::MissingFeatures(_) => "missing_features",
            PipelineError::EncoderUnavailable(_) => "encoder_unavailable",
            PipelineError::MalformedRequest(_) => "malformed_request",
        }
    }
}
