//! Prediction result and response data structures

use crate::PipelineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Classifier output for one request.
///
/// Both fields hold one row per scored record, so a single request always
/// yields `prediction.len() == 1` and `risk_probability.len() == 1`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Predicted class labels
    pub prediction: Vec<i64>,
    /// Per-class probability rows, in the classifier's class order
    pub risk_probability: Vec<Vec<f64>>,
}

impl PredictionResult {
    /// Result for a single scored record
    pub fn single(class: i64, probabilities: Vec<f64>) -> Self {
        Self {
            prediction: vec![class],
            risk_probability: vec![probabilities],
        }
    }

    /// Predicted class of the first row
    pub fn predicted_class(&self) -> Option<i64> {
        self.prediction.first().copied()
    }

    /// Probability of the last (positive) class of the first row
    pub fn positive_probability(&self) -> Option<f64> {
        self.risk_probability
            .first()
            .and_then(|row| row.last())
            .copied()
    }
}

/// Outcome of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

/// Response published for every request, successful or not
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    /// Unique response identifier
    pub response_id: String,

    /// Correlation id of the request
    pub request_id: String,

    pub status: ResponseStatus,

    /// Present on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,

    /// Human-readable failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// Stable failure kind (see `PipelineError::kind`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// End-to-end processing time
    pub processing_time_us: u64,

    pub timestamp: DateTime<Utc>,
}

impl PredictionResponse {
    fn base(request_id: String, status: ResponseStatus) -> Self {
        Self {
            response_id: uuid::Uuid::new_v4().to_string(),
            request_id,
            status,
            prediction: None,
            detail: None,
            error_kind: None,
            processing_time_us: 0,
            timestamp: Utc::now(),
        }
    }

    /// Successful response carrying the prediction
    pub fn success(request_id: String, prediction: PredictionResult) -> Self {
        Self {
            prediction: Some(prediction),
            ..Self::base(request_id, ResponseStatus::Success)
        }
    }

    /// Failed response; never carries a placeholder prediction
    pub fn failure(request_id: String, error: &PipelineError) -> Self {
        Self::failure_with(request_id, error.kind(), error.to_string())
    }

    /// Failed response for errors raised outside the pipeline (e.g. timeouts)
    pub fn failure_with(request_id: String, kind: &str, detail: String) -> Self {
        Self {
            detail: Some(detail),
            error_kind: Some(kind.to_string()),
            ..Self::base(request_id, ResponseStatus::Error)
        }
    }

    pub fn with_processing_time(mut self, elapsed: Duration) -> Self {
        self.processing_time_us = elapsed.as_micros() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_shape() {
        let result = PredictionResult::single(1, vec![0.25, 0.75]);

        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            json!({"prediction": [1], "risk_probability": [[0.25, 0.75]]})
        );
        assert_eq!(result.predicted_class(), Some(1));
        assert_eq!(result.positive_probability(), Some(0.75));
    }

    #[test]
    fn test_success_response_omits_error_fields() {
        let response = PredictionResponse::success(
            "req-1".to_string(),
            PredictionResult::single(0, vec![0.9, 0.1]),
        );

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "success");
        assert!(value.get("detail").is_none());
        assert!(value.get("error_kind").is_none());
        assert_eq!(value["prediction"]["prediction"], json!([0]));
    }

    #[test]
    fn test_failure_response_has_no_prediction() {
        let error = PipelineError::FeatureMismatch {
            stage: "scaler",
            expected: 22,
            actual: 21,
        };
        let response = PredictionResponse::failure("req-2".to_string(), &error);

        assert!(!response.is_success());
        assert!(response.prediction.is_none());
        assert_eq!(response.error_kind.as_deref(), Some("feature_mismatch"));
        assert!(response.detail.unwrap().contains("expected 22"));
    }
}
