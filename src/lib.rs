//! Fraud Feature Pipeline Library
//!
//! Point-in-time feature engineering and scoring for card payment batches:
//! each incoming transaction is joined with payer and seller reference data,
//! enriched with behavioral features computed strictly from history earlier
//! than its own timestamp, and scored by a fraud classifier.

pub mod assembler;
pub mod config;
pub mod consumer;
pub mod error;
pub mod features;
pub mod ingest;
pub mod join;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod producer;
pub mod scoring;
pub mod store;
pub mod types;

pub use assembler::{FeatureAssembler, FeatureTable, FEATURE_COLUMNS};
pub use config::AppConfig;
pub use consumer::RequestConsumer;
pub use error::{PipelineError, PipelineResult};
pub use features::{FeatureEngine, FeatureFrame, Region};
pub use join::{join_batch, TemporalJoin};
pub use models::OnnxClassifier;
pub use pipeline::FraudPipeline;
pub use producer::PredictionLogProducer;
pub use scoring::Classifier;
pub use store::{RecordStore, StoreHandle};
pub use types::{Card, ScoredTransaction, Terminal, Transaction};
