//! Configuration management for the risk pipeline

use crate::feature_assembler::MissingFieldPolicy;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Environment variable overriding the configuration file path
pub const CONFIG_PATH_ENV: &str = "RISK_CONFIG";

/// When model artifacts are read from disk
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Load once at start-up and share across requests
    #[default]
    Startup,
    /// Reload for every request; encoders start fresh each time
    PerRequest,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub artifacts: ArtifactsConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming prediction requests
    pub request_subject: String,
    /// Subject for responses to requests without a reply subject
    pub response_subject: String,
    /// Queue group shared by service replicas
    #[serde(default)]
    pub queue_group: Option<String>,
}

/// Model artifact configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    /// Directory containing the artifact files
    pub dir: String,
    #[serde(default = "default_classifier_file")]
    pub classifier_file: String,
    #[serde(default = "default_scaler_file")]
    pub scaler_file: String,
    #[serde(default = "default_encoders_file")]
    pub encoders_file: String,
    #[serde(default)]
    pub load_mode: LoadMode,
}

fn default_classifier_file() -> String {
    "best_model.json".to_string()
}

fn default_scaler_file() -> String {
    "scaler.json".to_string()
}

fn default_encoders_file() -> String {
    "label_encoders.json".to_string()
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Maximum concurrently processed requests
    pub workers: usize,
    /// Per-request processing timeout in milliseconds
    pub timeout_ms: u64,
    /// Treatment of feature columns missing from a record
    #[serde(default)]
    pub missing_fields: MissingFieldPolicy,
    /// Incoming field name -> schema field name
    #[serde(default)]
    pub field_aliases: BTreeMap<String, String>,
    /// Seconds between metrics summaries
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,
}

fn default_metrics_interval() -> u64 {
    30
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default level directive when RUST_LOG is unset
    pub level: String,
}

/// Target name of this crate in filter directives
const CRATE_TARGET: &str = "overdose_risk_pipeline";

impl LoggingConfig {
    /// Filter directives for the subscriber.
    ///
    /// `env` (normally `RUST_LOG`) wins over the configured level. Unless a
    /// directive already names this crate, the crate is pinned to the configured
    /// level so a quieter global default does not hide its logs.
    pub fn filter_directives(&self, env: Option<&str>) -> String {
        let base = env
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .unwrap_or(self.level.as_str());

        let is_bare_level = !self.level.contains(|c: char| c == '=' || c == ',');
        if base.contains(CRATE_TARGET) || !is_bare_level {
            return base.to_string();
        }
        format!("{base},{CRATE_TARGET}={}", self.level)
    }
}

impl AppConfig {
    /// Load configuration from `RISK_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load configuration from a specific path.
    ///
    /// Values can be overridden with `RISK__<SECTION>__<KEY>` environment variables.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(Environment::with_prefix("RISK").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            nats: NatsConfig {
                url: "nats://localhost:4222".to_string(),
                request_subject: "risk.requests".to_string(),
                response_subject: "risk.responses".to_string(),
                queue_group: None,
            },
            artifacts: ArtifactsConfig {
                dir: "artifacts".to_string(),
                classifier_file: default_classifier_file(),
                scaler_file: default_scaler_file(),
                encoders_file: default_encoders_file(),
                load_mode: LoadMode::Startup,
            },
            pipeline: PipelineConfig {
                workers: 4,
                timeout_ms: 1000,
                missing_fields: MissingFieldPolicy::ZeroFill,
                field_aliases: BTreeMap::new(),
                metrics_interval_secs: default_metrics_interval(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }
}
