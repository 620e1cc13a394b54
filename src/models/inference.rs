//! ONNX-backed classifier over assembled feature tables

use crate::assembler::{FeatureTable, NUMERIC_FEATURES};
use crate::config::{InferenceStrategy, ModelsConfig};
use crate::features::Region;
use crate::metrics::PipelineMetrics;
use crate::models::aggregator::ScoreAggregator;
use crate::models::loader::{LoadedModel, ModelLoader};
use crate::scoring::Classifier;
use anyhow::{Context, Result};
use ort::memory::Allocator;
use ort::value::{DowncastableTarget, DynMapValueType, DynSequenceValueType, Tensor};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// `regiao` one-hot columns: every category except the first (`Centro-Oeste`)
pub const REGION_DUMMIES: usize = Region::ALL.len() - 1;

/// Width of one encoded model input row
pub const ENCODED_WIDTH: usize = REGION_DUMMIES + NUMERIC_FEATURES;

/// Flatten a feature table into the row-major `f32` matrix the models expect:
/// `regiao` dummies first, then the numeric columns in contract order.
pub fn encode_features(table: &FeatureTable) -> Vec<f32> {
    let mut encoded = Vec::with_capacity(table.len() * ENCODED_WIDTH);
    for row in table.rows() {
        for region in &Region::ALL[1..] {
            encoded.push(if row.regiao == *region { 1.0 } else { 0.0 });
        }
        encoded.extend(row.values.iter().map(|&v| v as f32));
    }
    encoded
}

/// Class-1 probability per row from a `[rows, classes]`, `[rows, 1]` or `[rows]` tensor
pub fn probabilities_from_tensor(dims: &[i64], data: &[f32], rows: usize) -> Result<Vec<f64>> {
    let classes = match dims {
        [n, k] if *n as usize == rows && *k >= 1 => *k as usize,
        [n] if *n as usize == rows => 1,
        _ => anyhow::bail!("unexpected probability shape {:?} for {} rows", dims, rows),
    };
    if data.len() < rows * classes {
        anyhow::bail!("probability tensor holds {} values for {} rows", data.len(), rows);
    }

    let column = if classes >= 2 { 1 } else { 0 };
    Ok((0..rows)
        .map(|row| data[row * classes + column] as f64)
        .collect())
}

/// Multi-model classifier using ONNX Runtime
pub struct OnnxClassifier {
    /// Loaded ONNX models (sessions need `&mut` to run)
    models: Vec<RwLock<LoadedModel>>,
    /// Score aggregator for the ensemble strategy
    aggregator: ScoreAggregator,
    strategy: InferenceStrategy,
    primary_model: String,
    version: String,
    metrics: Option<Arc<PipelineMetrics>>,
}

impl OnnxClassifier {
    /// Load every model in `config.models_dir`
    pub fn new(config: &ModelsConfig) -> Result<Self> {
        let loader = ModelLoader::with_threads(config.onnx_threads)?;
        let models: Vec<RwLock<LoadedModel>> = loader
            .load_all_models(&config.models_dir)?
            .into_iter()
            .map(RwLock::new)
            .collect();

        info!(
            strategy = ?config.strategy,
            primary_model = %config.primary_model,
            version = %config.version,
            "ONNX classifier initialized"
        );

        Ok(Self {
            models,
            aggregator: ScoreAggregator::new(config.weights.clone()),
            strategy: config.strategy.clone(),
            primary_model: config.primary_model.clone(),
            version: config.version.clone(),
            metrics: None,
        })
    }

    /// Record per-model latency and ensemble agreement
    pub fn with_metrics(mut self, metrics: Arc<PipelineMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn strategy(&self) -> &InferenceStrategy {
        &self.strategy
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    pub fn model_names(&self) -> Vec<String> {
        self.models
            .iter()
            .filter_map(|m| m.read().ok().map(|m| m.name.clone()))
            .collect()
    }

    /// Run only the primary model, falling back to the ensemble when it is
    /// missing or fails
    fn predict_primary(&self, input: &[f32], rows: usize) -> Result<Vec<f64>> {
        for model_lock in &self.models {
            let mut model = model_lock
                .write()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
            if model.name != self.primary_model {
                continue;
            }

            return match self.run_single_model(&mut model, input, rows) {
                Ok(probabilities) => {
                    debug!(strategy = "primary", model = %self.primary_model, rows = rows, "Primary model inference complete");
                    Ok(probabilities)
                }
                Err(e) => {
                    error!(
                        model = %self.primary_model,
                        error = %e,
                        "Primary model inference failed, falling back to ensemble"
                    );
                    drop(model);
                    self.predict_ensemble(input, rows)
                }
            };
        }

        warn!(
            primary_model = %self.primary_model,
            "Primary model not found, falling back to ensemble"
        );
        self.predict_ensemble(input, rows)
    }

    /// Weighted average over every model that ran successfully
    fn predict_ensemble(&self, input: &[f32], rows: usize) -> Result<Vec<f64>> {
        let mut per_model: Vec<(String, Vec<f64>)> = Vec::with_capacity(self.models.len());

        for model_lock in &self.models {
            let mut model = model_lock
                .write()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
            match self.run_single_model(&mut model, input, rows) {
                Ok(probabilities) => per_model.push((model.name.clone(), probabilities)),
                Err(e) => error!(model = %model.name, error = %e, "Model inference failed"),
            }
        }

        if per_model.is_empty() {
            anyhow::bail!("every model failed on a batch of {} rows", rows);
        }

        let mut aggregated = Vec::with_capacity(rows);
        for row in 0..rows {
            let model_scores: HashMap<String, f64> = per_model
                .iter()
                .map(|(name, probabilities)| (name.clone(), probabilities[row]))
                .collect();
            if let Some(metrics) = &self.metrics {
                metrics.record_model_agreement(&model_scores);
            }
            // Non-finite scores stay non-finite and fail only their row downstream
            aggregated.push(self.aggregator.aggregate(&model_scores).unwrap_or(f64::NAN));
        }

        debug!(
            strategy = "ensemble",
            models = per_model.len(),
            rows = rows,
            "Ensemble inference complete"
        );

        Ok(aggregated)
    }

    /// Run one model on a `[rows, ENCODED_WIDTH]` matrix
    fn run_single_model(&self, model: &mut LoadedModel, input: &[f32], rows: usize) -> Result<Vec<f64>> {
        let start = Instant::now();

        let shape = vec![rows as i64, ENCODED_WIDTH as i64];
        let input_tensor =
            Tensor::from_array((shape, input.to_vec())).context("Failed to create input tensor")?;

        let model_name = model.name.clone();
        let input_name = model.input_name.clone();
        let output_name = model.output_name.clone();
        let outputs = model.session.run(ort::inputs![input_name => input_tensor])?;

        let probabilities = Self::extract_probabilities(&outputs, &output_name, &model_name, rows)?;

        if let Some(metrics) = &self.metrics {
            metrics.record_model_time(&model_name, start.elapsed());
        }

        Ok(probabilities)
    }

    /// Fraud probabilities from model output.
    /// Handles tensor outputs (XGBoost) and seq(map) outputs (LightGBM, CatBoost).
    fn extract_probabilities(
        outputs: &ort::session::SessionOutputs,
        output_name: &str,
        model_name: &str,
        rows: usize,
    ) -> Result<Vec<f64>> {
        if let Some(output) = outputs.get(output_name) {
            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let dims: Vec<i64> = shape.iter().copied().collect();
                return probabilities_from_tensor(&dims, data, rows);
            }

            if DynSequenceValueType::can_downcast(&output.dtype()) {
                return Self::extract_from_sequence_map(output, model_name, rows);
            }
        }

        for (name, output) in outputs.iter() {
            if name.contains("label") {
                continue;
            }

            if let Ok((shape, data)) = output.try_extract_tensor::<f32>() {
                let dims: Vec<i64> = shape.iter().copied().collect();
                debug!(model = %model_name, output = %name, "Extracting from fallback output");
                return probabilities_from_tensor(&dims, data, rows);
            }

            if DynSequenceValueType::can_downcast(&output.dtype()) {
                return Self::extract_from_sequence_map(&output, model_name, rows);
            }
        }

        anyhow::bail!("model {} produced no probability output", model_name)
    }

    /// One `map(int64, float)` per row; the class-1 entry is the fraud probability
    fn extract_from_sequence_map(
        output: &ort::value::DynValue,
        model_name: &str,
        rows: usize,
    ) -> Result<Vec<f64>> {
        let allocator = Allocator::default();

        let sequence = output
            .downcast_ref::<DynSequenceValueType>()
            .map_err(|e| anyhow::anyhow!("Failed to downcast to sequence: {}", e))?;
        let maps = sequence.try_extract_sequence::<DynMapValueType>(&allocator)?;

        if maps.len() != rows {
            anyhow::bail!("model {} returned {} maps for {} rows", model_name, maps.len(), rows);
        }

        let mut probabilities = Vec::with_capacity(rows);
        for map_value in &maps {
            let kv_pairs = map_value.try_extract_key_values::<i64, f32>()?;
            let fraud = kv_pairs
                .iter()
                .find(|(class_id, _)| *class_id == 1)
                .map(|(_, prob)| *prob as f64)
                .or_else(|| {
                    kv_pairs
                        .iter()
                        .find(|(class_id, _)| *class_id == 0)
                        .map(|(_, prob)| 1.0 - *prob as f64)
                })
                .ok_or_else(|| anyhow::anyhow!("No probability found in map"))?;
            probabilities.push(fraud);
        }

        Ok(probabilities)
    }
}

impl Classifier for OnnxClassifier {
    fn predict_proba(&self, features: &FeatureTable) -> Result<Vec<f64>> {
        let rows = features.len();
        if rows == 0 {
            return Ok(Vec::new());
        }

        let input = encode_features(features);
        match self.strategy {
            InferenceStrategy::Primary => self.predict_primary(&input, rows),
            InferenceStrategy::Ensemble => self.predict_ensemble(&input, rows),
        }
    }

    fn version(&self) -> &str {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::FeatureRow;

    fn row(id: &str, regiao: Region, first: f64) -> FeatureRow {
        let mut values = [0.0; NUMERIC_FEATURES];
        values[0] = first;
        values[NUMERIC_FEATURES - 1] = 7.0;
        FeatureRow {
            transaction_id: id.to_string(),
            regiao,
            values,
        }
    }

    #[test]
    fn test_encoding_drops_first_region() {
        let table = FeatureTable::new(vec![
            row("a", Region::CentroOeste, 1.5),
            row("b", Region::Unknown, 2.5),
        ]);
        let encoded = encode_features(&table);

        assert_eq!(ENCODED_WIDTH, 19);
        assert_eq!(encoded.len(), 2 * ENCODED_WIDTH);
        assert_eq!(&encoded[..4], &[0.0, 0.0, 0.0, 1.5]);
        assert_eq!(encoded[ENCODED_WIDTH - 1], 7.0);

        let second = &encoded[ENCODED_WIDTH..];
        // Norte, Sudeste, UNKNOWN
        assert_eq!(&second[..3], &[0.0, 0.0, 1.0]);
        assert_eq!(second[3], 2.5);
    }

    #[test]
    fn test_two_class_tensor_takes_fraud_column() {
        let data = [0.9, 0.1, 0.3, 0.7];
        let probabilities = probabilities_from_tensor(&[2, 2], &data, 2).unwrap();
        assert!((probabilities[0] - 0.1).abs() < 1e-6);
        assert!((probabilities[1] - 0.7).abs() < 1e-6);
    }

    #[test]
    fn test_single_column_tensor() {
        let probabilities = probabilities_from_tensor(&[3], &[0.25, 0.5, 0.75], 3).unwrap();
        assert_eq!(probabilities, vec![0.25, 0.5, 0.75]);
        assert_eq!(probabilities_from_tensor(&[2, 1], &[0.25, 0.5], 2).unwrap(), vec![0.25, 0.5]);
    }

    #[test]
    fn test_shape_mismatch_is_an_error() {
        assert!(probabilities_from_tensor(&[1, 2], &[0.5, 0.5], 2).is_err());
        assert!(probabilities_from_tensor(&[2, 2], &[0.5, 0.5], 2).is_err());
    }
}
