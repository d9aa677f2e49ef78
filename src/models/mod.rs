//! Fitted model artifacts and the inference stage

pub mod classifier;
pub mod encoder;
pub mod inference;
pub mod loader;
pub mod scaler;

pub use classifier::Classifier;
pub use encoder::{CategoricalEncoders, LabelEncoder};
pub use inference::InferenceEngine;
pub use loader::{ArtifactLoader, ModelArtifacts};
pub use scaler::FeatureScaler;
