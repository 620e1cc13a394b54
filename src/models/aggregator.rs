//! Score aggregation for multi-model ensemble

use std::collections::HashMap;

/// Weighted average of per-model fraud probabilities.
pub struct ScoreAggregator {
    /// Model weights for weighted average
    weights: HashMap<String, f64>,
    /// Weight for models not in the weights map
    default_weight: f64,
}

impl ScoreAggregator {
    /// Create a new score aggregator with model weights.
    ///
    /// Models without a configured weight contribute with weight 1.0 when no
    /// weights are configured at all, and 0.1 otherwise.
    pub fn new(weights: HashMap<String, f64>) -> Self {
        let default_weight = if weights.is_empty() { 1.0 } else { 0.1 };
        Self {
            weights,
            default_weight,
        }
    }

    /// Create aggregator with equal weights for all models.
    pub fn equal_weights() -> Self {
        Self::new(HashMap::new())
    }

    pub fn weight(&self, model_name: &str) -> f64 {
        self.weights
            .get(model_name)
            .copied()
            .unwrap_or(self.default_weight)
    }

    /// Weighted average of `model_scores`, weights normalized to sum to 1.
    ///
    /// `None` when there is nothing to average.
    pub fn aggregate(&self, model_scores: &HashMap<String, f64>) -> Option<f64> {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for (model_name, &score) in model_scores {
            let weight = self.weight(model_name);
            weighted_sum += score * weight;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            Some((weighted_sum / total_weight).clamp(0.0, 1.0))
        } else {
            None
        }
    }

    /// Get configured weights.
    pub fn weights(&self) -> &HashMap<String, f64> {
        &self.weights
    }
}
