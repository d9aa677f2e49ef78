//! Type definitions for the risk pipeline

pub mod patient;
pub mod prediction;

pub use patient::{PatientRecord, PredictionRequest};
pub use prediction::{PredictionResponse, PredictionResult, ResponseStatus};
