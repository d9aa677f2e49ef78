//! Model artifact loader

use crate::config::ArtifactsConfig;
use crate::models::classifier::Classifier;
use crate::models::encoder::{CategoricalEncoders, EncoderArtifact};
use crate::models::scaler::FeatureScaler;
use crate::{PipelineError, Result};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// The three fitted objects inference depends on
#[derive(Debug)]
pub struct ModelArtifacts {
    pub classifier: Classifier,
    pub scaler: FeatureScaler,
    pub encoders: CategoricalEncoders,
}

/// File names of the artifacts inside the artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFiles {
    pub classifier: String,
    pub scaler: String,
    pub encoders: String,
}

impl Default for ArtifactFiles {
    fn default() -> Self {
        Self {
            classifier: "best_model.json".to_string(),
            scaler: "scaler.json".to_string(),
            encoders: "label_encoders.json".to_string(),
        }
    }
}

/// Loads classifier, scaler and encoders from a directory.
///
/// All three load or none do: any missing, unreadable, malformed or
/// structurally invalid artifact fails the whole load with `ArtifactMissing`.
#[derive(Debug, Clone)]
pub struct ArtifactLoader {
    artifacts_dir: PathBuf,
    files: ArtifactFiles,
}

impl ArtifactLoader {
    /// Loader using the default file names
    pub fn new<P: AsRef<Path>>(artifacts_dir: P) -> Self {
        Self::with_files(artifacts_dir, ArtifactFiles::default())
    }

    pub fn with_files<P: AsRef<Path>>(artifacts_dir: P, files: ArtifactFiles) -> Self {
        Self {
            artifacts_dir: artifacts_dir.as_ref().to_path_buf(),
            files,
        }
    }

    pub fn from_config(config: &ArtifactsConfig) -> Self {
        Self::with_files(
            &config.dir,
            ArtifactFiles {
                classifier: config.classifier_file.clone(),
                scaler: config.scaler_file.clone(),
                encoders: config.encoders_file.clone(),
            },
        )
    }

    pub fn artifacts_dir(&self) -> &Path {
        &self.artifacts_dir
    }

    /// Load all artifacts
    pub fn load(&self) -> Result<ModelArtifacts> {
        let classifier: Classifier = self.read_artifact("classifier", &self.files.classifier)?;
        let path = self.artifacts_dir.join(&self.files.classifier);
        classifier
            .validate()
            .map_err(|reason| invalid("classifier", path, reason))?;

        let scaler: FeatureScaler = self.read_artifact("scaler", &self.files.scaler)?;
        let path = self.artifacts_dir.join(&self.files.scaler);
        scaler
            .validate()
            .map_err(|reason| invalid("scaler", path, reason))?;

        let encoder_artifacts: BTreeMap<String, EncoderArtifact> =
            self.read_artifact("encoders", &self.files.encoders)?;
        let encoders = CategoricalEncoders::from_artifacts(encoder_artifacts);

        info!(
            dir = %self.artifacts_dir.display(),
            classifier = classifier.name(),
            scaler_features = scaler.n_features(),
            encoders = ?encoders.columns().collect::<Vec<_>>(),
            "Model artifacts loaded"
        );

        Ok(ModelArtifacts {
            classifier,
            scaler,
            encoders,
        })
    }

    fn read_artifact<T: DeserializeOwned>(&self, artifact: &'static str, file: &str) -> Result<T> {
        let path = self.artifacts_dir.join(file);

        info!(artifact = artifact, path = %path.display(), "Loading model artifact");

        let bytes = std::fs::read(&path).map_err(|e| PipelineError::ArtifactMissing {
            artifact,
            path: path.clone(),
            reason: e.to_string(),
        })?;

        serde_json::from_slice(&bytes).map_err(|e| PipelineError::ArtifactMissing {
            artifact,
            path,
            reason: format!("cannot deserialize: {e}"),
        })
    }
}

fn invalid(artifact: &'static str, path: PathBuf, reason: String) -> PipelineError {
    PipelineError::ArtifactMissing {
        artifact,
        path,
        reason: format!("invalid artifact: {reason}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const CLASSIFIER: &str = r#"{"kind": "logistic_regression", "classes": [0, 1],
        "coef": [[0.1, 0.2]], "intercept": [0.0]}"#;
    const SCALER: &str = r#"{"kind": "standard", "mean": [0.0, 0.0], "scale": [1.0, 1.0]}"#;
    const ENCODERS: &str = r#"{"gender": {"classes": ["female", "male"]}}"#;

    fn write_artifacts(dir: &Path, classifier: &str, scaler: &str, encoders: &str) {
        fs::write(dir.join("best_model.json"), classifier).unwrap();
        fs::write(dir.join("scaler.json"), scaler).unwrap();
        fs::write(dir.join("label_encoders.json"), encoders).unwrap();
    }

    fn missing_artifact(result: Result<ModelArtifacts>) -> &'static str {
        match result {
            Err(PipelineError::ArtifactMissing { artifact, .. }) => artifact,
            other => panic!("expected ArtifactMissing, got {other:?}"),
        }
    }

    #[test]
    fn test_load_all() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), CLASSIFIER, SCALER, ENCODERS);

        let artifacts = ArtifactLoader::new(dir.path()).load().unwrap();
        assert_eq!(artifacts.classifier.n_features(), 2);
        assert_eq!(artifacts.scaler.n_features(), 2);
        assert_eq!(artifacts.encoders.columns().collect::<Vec<_>>(), vec!["gender"]);
    }

    #[test]
    fn test_nonexistent_dir_fails_every_time() {
        let loader = ArtifactLoader::new("/nonexistent/overdose-risk/artifacts");
        for _ in 0..3 {
            assert_eq!(missing_artifact(loader.load()), "classifier");
        }
    }

    #[test]
    fn test_no_partial_success() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("best_model.json"), CLASSIFIER).unwrap();
        fs::write(dir.path().join("scaler.json"), SCALER).unwrap();

        assert_eq!(missing_artifact(ArtifactLoader::new(dir.path()).load()), "encoders");
    }

    #[test]
    fn test_malformed_artifact() {
        let dir = tempfile::tempdir().unwrap();
        write_artifacts(dir.path(), CLASSIFIER, "{not json", ENCODERS);

        assert_eq!(missing_artifact(ArtifactLoader::new(dir.path()).load()), "scaler");
    }

    #[test]
    fn test_structurally_invalid_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let one_class = r#"{"kind": "logistic_regression", "classes": [1],
            "coef": [[0.1, 0.2]], "intercept": [0.0]}"#;
        write_artifacts(dir.path(), one_class, SCALER, ENCODERS);

        assert_eq!(missing_artifact(ArtifactLoader::new(dir.path()).load()), "classifier");
    }

    #[test]
    fn test_forest_with_empty_leaf_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let forest = r#"{"kind": "random_forest", "classes": [0, 1], "n_features": 2,
            "trees": [{
                "children_left": [1, -1, -1],
                "children_right": [2, -1, -1],
                "feature": [0, -2, -2],
                "threshold": [0.5, -2.0, -2.0],
                "value": [[1.0, 3.0], [0.0, 0.0], [1.0, 3.0]]
            }]}"#;
        write_artifacts(dir.path(), forest, SCALER, ENCODERS);

        assert_eq!(missing_artifact(ArtifactLoader::new(dir.path()).load()), "classifier");
    }

    #[test]
    fn test_custom_file_names() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("model-v2.json"), CLASSIFIER).unwrap();
        fs::write(dir.path().join("scaler.json"), SCALER).unwrap();
        fs::write(dir.path().join("label_encoders.json"), ENCODERS).unwrap();

        let files = ArtifactFiles {
            classifier: "model-v2.json".to_string(),
            ..ArtifactFiles::default()
        };
        assert!(ArtifactLoader::with_files(dir.path(), files).load().is_ok());
    }
}
