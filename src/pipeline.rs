//! Batch orchestration: store snapshot, join, features, assembly, scoring.
//!
//! Each call takes one snapshot of the record store and threads it through every
//! stage, so a concurrent reload never mixes two stores within a batch.

use crate::assembler::{FeatureAssembler, FeatureTable, FillReport};
use crate::error::{PipelineError, PipelineResult};
use crate::features::FeatureEngine;
use crate::ingest::ensure_unique_ids;
use crate::join::{join_batch, JoinDiagnostics};
use crate::metrics::PipelineMetrics;
use crate::producer::PredictionLogQueue;
use crate::scoring::{self, validate_threshold, Classifier};
use crate::store::StoreHandle;
use crate::types::{PredictionLog, ScoredTransaction, Transaction};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Features of one batch plus what it took to build them
#[derive(Debug, Clone)]
pub struct FeatureBatch {
    pub table: FeatureTable,
    pub diagnostics: JoinDiagnostics,
    pub fills: FillReport,
    /// Store generation the batch was computed against
    pub store_generation: u64,
}

/// Scored batch with its diagnostics
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub results: Vec<ScoredTransaction>,
    pub diagnostics: JoinDiagnostics,
    pub fills: FillReport,
}

/// End-to-end scoring pipeline
pub struct FraudPipeline {
    store: Arc<StoreHandle>,
    engine: FeatureEngine,
    assembler: FeatureAssembler,
    classifier: Arc<dyn Classifier>,
    threshold: f64,
    metrics: Option<Arc<PipelineMetrics>>,
    prediction_log: Option<PredictionLogQueue>,
}

impl FraudPipeline {
    pub fn new(store: Arc<StoreHandle>, classifier: Arc<dyn Classifier>, threshold: f64) -> PipelineResult<Self> {
        Ok(Self {
            store,
            engine: FeatureEngine::default(),
            assembler: FeatureAssembler::new(),
            classifier,
            threshold: validate_threshold(threshold)?,
            metrics: None,
            prediction_log: None,
        })
    }

    /// Threads used for row-level feature computation
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.engine = FeatureEngine::new(workers);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Emit one prediction log per scored row into `queue`
    pub fn with_prediction_log(mut self, queue: PredictionLogQueue) -> Self {
        self.prediction_log = Some(queue);
        self
    }

    pub fn store(&self) -> &Arc<StoreHandle> {
        &self.store
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Compute the assembled feature table of a batch without scoring it
    pub fn compute_features(&self, batch: &[Transaction]) -> PipelineResult<FeatureBatch> {
        ensure_unique_ids(batch)?;

        let store_generation = self.store.generation();
        let snapshot = self.store.snapshot();
        let join = join_batch(batch, &snapshot);
        let frame = self.engine.compute(&join);
        let (table, fills) = self.assembler.assemble(&frame)?;

        let diagnostics = join.diagnostics();
        if diagnostics.missing_payers > 0 || diagnostics.missing_sellers > 0 {
            debug!(
                missing_payers = diagnostics.missing_payers,
                missing_sellers = diagnostics.missing_sellers,
                "Reference data missing for some rows"
            );
        }
        if fills.non_finite > 0 {
            debug!(
                non_finite = fills.non_finite,
                columns = ?fills.by_column,
                "Numeric degeneracy replaced with defaults"
            );
        }

        Ok(FeatureBatch {
            table,
            diagnostics,
            fills,
            store_generation,
        })
    }

    /// Score a batch; results come back in submission order
    pub fn score_batch(&self, batch: &[Transaction]) -> PipelineResult<Vec<ScoredTransaction>> {
        self.score_batch_with_diagnostics(batch).map(|outcome| outcome.results)
    }

    pub fn score_batch_with_diagnostics(&self, batch: &[Transaction]) -> PipelineResult<BatchOutcome> {
        let start = Instant::now();
        let outcome = self.run(batch);

        match &outcome {
            Ok(outcome) => {
                let elapsed = start.elapsed();
                if let Some(metrics) = &self.metrics {
                    metrics.record_batch(elapsed, &outcome.results);
                    metrics.record_join(&outcome.diagnostics);
                    metrics.record_fills(&outcome.fills);
                }
                self.publish_logs(&outcome.results);
                info!(
                    rows = outcome.results.len(),
                    declined = outcome.results.iter().filter(|r| !r.approved).count(),
                    processing_time_us = elapsed.as_micros() as u64,
                    "Batch scored"
                );
            }
            Err(e) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_batch_failure();
                }
                warn!(rows = batch.len(), error = %e, "Batch failed");
            }
        }

        outcome
    }

    fn run(&self, batch: &[Transaction]) -> PipelineResult<BatchOutcome> {
        let features = self.compute_features(batch)?;

        let model_start = Instant::now();
        let results = scoring::score(&features.table, self.classifier.as_ref(), self.threshold)?;
        debug!(
            rows = results.len(),
            model_time_us = model_start.elapsed().as_micros() as u64,
            "Classifier finished"
        );

        if results.len() != batch.len() {
            return Err(PipelineError::Classifier(anyhow::anyhow!(
                "{} results for {} submitted transactions",
                results.len(),
                batch.len()
            )));
        }

        Ok(BatchOutcome {
            results,
            diagnostics: features.diagnostics,
            fills: features.fills,
        })
    }

    fn publish_logs(&self, results: &[ScoredTransaction]) {
        let Some(queue) = &self.prediction_log else {
            return;
        };
        let version = self.classifier.version();
        for result in results {
            if !queue.enqueue(PredictionLog::from_result(result, version)) {
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped_log();
                }
            }
        }
    }
}
