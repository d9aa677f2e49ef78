//! End-to-end inference pipeline.
//!
//! Normalizer -> categorical encoder -> feature assembler -> scaler/classifier
//! -> result. Every stage is a synchronous, bounded transform; the only I/O is
//! artifact loading, which happens either once at construction or, in
//! per-request mode, at the start of each call.

use crate::config::{AppConfig, LoadMode};
use crate::feature_assembler::{FeatureAssembler, FeatureVector, MissingFieldPolicy};
use crate::models::classifier::Classifier;
use crate::models::encoder::CategoricalEncoders;
use crate::models::inference::InferenceEngine;
use crate::models::loader::{ArtifactLoader, ModelArtifacts};
use crate::models::scaler::FeatureScaler;
use crate::normalizer::InputNormalizer;
use crate::types::patient::PatientRecord;
use crate::types::prediction::PredictionResult;
use crate::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Request-independent pipeline settings
#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub missing_fields: MissingFieldPolicy,
    pub field_aliases: BTreeMap<String, String>,
}

impl PipelineOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            missing_fields: config.pipeline.missing_fields,
            field_aliases: config.pipeline.field_aliases.clone(),
        }
    }
}

/// Prediction plus what the pipeline had to do to produce it
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub result: PredictionResult,
    pub features: FeatureVector,
    /// Columns zero-filled because the record lacked them
    pub defaulted: Vec<&'static str>,
    /// Unseen categorical labels appended while encoding
    pub labels_appended: usize,
}

/// Stages that borrow loaded artifacts
struct Stages {
    encoders: Arc<CategoricalEncoders>,
    assembler: FeatureAssembler,
    engine: InferenceEngine,
}

impl Stages {
    fn new(
        classifier: Classifier,
        scaler: FeatureScaler,
        encoders: Arc<CategoricalEncoders>,
        options: &PipelineOptions,
    ) -> Self {
        let assembler = FeatureAssembler::new(encoders.columns())
            .with_missing_field_policy(options.missing_fields);

        Self {
            encoders,
            assembler,
            engine: InferenceEngine::new(scaler, classifier),
        }
    }

    fn from_artifacts(artifacts: ModelArtifacts, options: &PipelineOptions) -> Self {
        Self::new(
            artifacts.classifier,
            artifacts.scaler,
            Arc::new(artifacts.encoders),
            options,
        )
    }

    fn run(&self, mut record: PatientRecord) -> Result<PipelineOutput> {
        let labels_appended = self.encoders.encode_record(&mut record)?;
        let assembled = self.assembler.assemble(record)?;
        let result = self.engine.predict(&assembled.vector)?;

        Ok(PipelineOutput {
            result,
            features: assembled.vector,
            defaulted: assembled.defaulted,
            labels_appended,
        })
    }
}

enum ArtifactSource {
    Resident(Stages),
    PerRequest(ArtifactLoader),
}

/// Scores patient records against a set of fitted artifacts.
///
/// Cheap to share behind an `Arc`: `predict` takes `&self`, and the only state
/// it mutates is the encoders' class lists, which carry their own locks.
pub struct RiskPipeline {
    normalizer: InputNormalizer,
    source: ArtifactSource,
    options: PipelineOptions,
}

impl RiskPipeline {
    /// Pipeline over already-loaded artifacts
    pub fn new(artifacts: ModelArtifacts, options: PipelineOptions) -> Self {
        let stages = Stages::from_artifacts(artifacts, &options);
        Self::resident(stages, options)
    }

    /// Pipeline over individually supplied parts.
    ///
    /// The encoders are taken as a shared handle so callers (and tests) can
    /// inspect or isolate encoder state.
    pub fn from_parts(
        classifier: Classifier,
        scaler: FeatureScaler,
        encoders: Arc<CategoricalEncoders>,
        options: PipelineOptions,
    ) -> Self {
        let stages = Stages::new(classifier, scaler, encoders, &options);
        Self::resident(stages, options)
    }

    /// Pipeline that reloads artifacts on every call
    pub fn per_request(loader: ArtifactLoader, options: PipelineOptions) -> Self {
        info!(
            dir = %loader.artifacts_dir().display(),
            "Artifacts will be loaded per request"
        );
        Self {
            normalizer: InputNormalizer::with_aliases(options.field_aliases.clone()),
            source: ArtifactSource::PerRequest(loader),
            options,
        }
    }

    /// Build from configuration. In start-up mode artifacts are loaded here and
    /// a missing artifact is returned as an error.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let loader = ArtifactLoader::from_config(&config.artifacts);
        let options = PipelineOptions::from_config(config);

        match config.artifacts.load_mode {
            LoadMode::Startup => Ok(Self::new(loader.load()?, options)),
            LoadMode::PerRequest => Ok(Self::per_request(loader, options)),
        }
    }

    fn resident(stages: Stages, options: PipelineOptions) -> Self {
        let classifier = stages.engine.classifier();
        info!(
            classifier = classifier.name(),
            classes = ?classifier.classes(),
            encoders = stages.encoders.len(),
            "Inference engine initialized"
        );
        Self {
            normalizer: InputNormalizer::with_aliases(options.field_aliases.clone()),
            source: ArtifactSource::Resident(stages),
            options,
        }
    }

    /// Shared encoders, when artifacts are resident
    pub fn encoders(&self) -> Option<&Arc<CategoricalEncoders>> {
        match &self.source {
            ArtifactSource::Resident(stages) => Some(&stages.encoders),
            ArtifactSource::PerRequest(_) => None,
        }
    }

    pub fn load_mode(&self) -> LoadMode {
        match self.source {
            ArtifactSource::Resident(_) => LoadMode::Startup,
            ArtifactSource::PerRequest(_) => LoadMode::PerRequest,
        }
    }

    /// Score one record
    pub fn predict(&self, record: PatientRecord) -> Result<PredictionResult> {
        self.predict_detailed(record).map(|output| output.result)
    }

    /// Score one record, also reporting defaulted columns and encoder growth
    pub fn predict_detailed(&self, record: PatientRecord) -> Result<PipelineOutput> {
        let record = self.normalizer.normalize(record);

        let output = match &self.source {
            ArtifactSource::Resident(stages) => stages.run(record)?,
            ArtifactSource::PerRequest(loader) => {
                let stages = Stages::from_artifacts(loader.load()?, &self.options);
                stages.run(record)?
            }
        };

        debug!(
            prediction = ?output.result.prediction,
            defaulted = output.defaulted.len(),
            labels_appended = output.labels_appended,
            "Record scored"
        );

        Ok(output)
    }
}
