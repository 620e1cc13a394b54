//! Configuration management for the fraud feature pipeline

use anyhow::{Context, Result};
use config::{Config, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Inference strategy for fraud scoring
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InferenceStrategy {
    /// Use the primary model only, falling back to the ensemble if it fails
    #[default]
    Primary,
    /// Weighted average of every loaded model
    Ensemble,
}

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub nats: NatsConfig,
    pub data: DataConfig,
    pub models: ModelsConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// NATS connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct NatsConfig {
    /// NATS server URL
    pub url: String,
    /// Subject for incoming scoring requests
    pub request_subject: String,
    /// Subject for outgoing prediction logs
    pub prediction_log_subject: String,
    /// Subject that triggers a record store reload
    #[serde(default = "default_reload_subject")]
    pub reload_subject: String,
}

fn default_reload_subject() -> String {
    "fraud.store.reload".to_string()
}

/// Record files the store is built from
#[derive(Debug, Clone, Deserialize)]
pub struct DataConfig {
    /// Payer (card) CSV
    pub cards_path: PathBuf,
    /// Seller (terminal) CSV
    pub terminals_path: PathBuf,
    /// Historical transaction CSVs, concatenated in order
    pub transactions_paths: Vec<PathBuf>,
    /// Drop history rows flagged both as fraud and as transactional fraud
    #[serde(default = "default_exclude_transactional_fraud")]
    pub exclude_transactional_fraud: bool,
}

fn default_exclude_transactional_fraud() -> bool {
    true
}

/// ML models configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    /// Directory containing ONNX model files
    pub models_dir: String,
    /// Inference strategy: "primary" (single model) or "ensemble" (all models)
    #[serde(default)]
    pub strategy: InferenceStrategy,
    /// Primary model name for single-model strategy
    #[serde(default = "default_primary_model")]
    pub primary_model: String,
    /// Model weights for ensemble scoring
    #[serde(default = "default_model_weights")]
    pub weights: HashMap<String, f64>,
    /// Number of threads for ONNX inference per model (default: 1)
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Version string written to prediction logs
    #[serde(default = "default_model_version")]
    pub version: String,
}

fn default_onnx_threads() -> usize {
    1
}

fn default_primary_model() -> String {
    "xgboost".to_string()
}

fn default_model_version() -> String {
    "v1.0.0".to_string()
}

fn default_model_weights() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    weights.insert("xgboost".to_string(), 0.5);
    weights.insert("lightgbm".to_string(), 0.5);
    weights
}

/// Decision configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Probabilities at or above this are declined
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.5
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Concurrent requests, and feature threads per request
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the prediction log queue
    #[serde(default = "default_log_queue_capacity")]
    pub log_queue_capacity: usize,
    /// Seconds between metrics summaries; 0 disables the reporter
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
}

fn default_workers() -> usize {
    4
}

fn default_log_queue_capacity() -> usize {
    10_000
}

fn default_metrics_interval_secs() -> u64 {
    10
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            log_queue_capacity: default_log_queue_capacity(),
            metrics_interval_secs: default_metrics_interval_secs(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/config.toml")
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
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
                request_subject: "fraud.score".to_string(),
                prediction_log_subject: "fraud.predictions".to_string(),
                reload_subject: default_reload_subject(),
            },
            data: DataConfig {
                cards_path: PathBuf::from("data/payers.csv"),
                terminals_path: PathBuf::from("data/sellers.csv"),
                transactions_paths: vec![PathBuf::from("data/transactions.csv")],
                exclude_transactional_fraud: true,
            },
            models: ModelsConfig {
                models_dir: "models".to_string(),
                strategy: InferenceStrategy::Primary,
                primary_model: default_primary_model(),
                weights: default_model_weights(),
                onnx_threads: 1,
                version: default_model_version(),
            },
            scoring: ScoringConfig::default(),
            pipeline: PipelineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
