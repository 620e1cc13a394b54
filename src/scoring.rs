//! Scoring adapter: opaque classifier plus decision threshold.

use crate::assembler::FeatureTable;
use crate::error::{PipelineError, PipelineResult};
use crate::types::ScoredTransaction;
use tracing::warn;

/// Any function from a feature table to per-row fraud probabilities.
///
/// Implementations return exactly one probability per row, in row order.
pub trait Classifier: Send + Sync {
    fn predict_proba(&self, features: &FeatureTable) -> anyhow::Result<Vec<f64>>;

    /// Identifier recorded in prediction logs
    fn version(&self) -> &str {
        "unversioned"
    }
}

impl<F> Classifier for F
where
    F: Fn(&FeatureTable) -> anyhow::Result<Vec<f64>> + Send + Sync,
{
    fn predict_proba(&self, features: &FeatureTable) -> anyhow::Result<Vec<f64>> {
        self(features)
    }
}

pub fn validate_threshold(threshold: f64) -> PipelineResult<f64> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(PipelineError::InvalidThreshold(threshold))
    }
}

/// Score every row and apply `approved = probability < threshold`.
///
/// A failing classifier or a probability count mismatch fails the whole batch.
/// A single unusable probability only fails its own row.
pub fn score(
    features: &FeatureTable,
    classifier: &dyn Classifier,
    threshold: f64,
) -> PipelineResult<Vec<ScoredTransaction>> {
    let threshold = validate_threshold(threshold)?;
    if features.is_empty() {
        return Ok(Vec::new());
    }

    let probabilities = classifier
        .predict_proba(features)
        .map_err(PipelineError::Classifier)?;

    if probabilities.len() != features.len() {
        return Err(PipelineError::Classifier(anyhow::anyhow!(
            "classifier returned {} probabilities for {} rows",
            probabilities.len(),
            features.len()
        )));
    }

    let results = features
        .transaction_ids()
        .zip(probabilities)
        .map(|(id, p)| {
            if p.is_finite() && (0.0..=1.0).contains(&p) {
                ScoredTransaction::scored(id.to_string(), p, threshold)
            } else {
                warn!(transaction_id = %id, probability = p, "Classifier returned an unusable probability");
                ScoredTransaction::failed(id.to_string(), format!("invalid fraud probability {p}"))
            }
        })
        .collect();

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::{FeatureRow, NUMERIC_FEATURES};
    use crate::features::Region;

    fn table(ids: &[&str]) -> FeatureTable {
        FeatureTable::new(
            ids.iter()
                .map(|id| FeatureRow {
                    transaction_id: id.to_string(),
                    regiao: Region::Unknown,
                    values: [0.0; NUMERIC_FEATURES],
                })
                .collect(),
        )
    }

    fn constant(probabilities: Vec<f64>) -> impl Classifier {
        move |_: &FeatureTable| -> anyhow::Result<Vec<f64>> { Ok(probabilities.clone()) }
    }

    #[test]
    fn test_threshold_decision_keeps_order() {
        let results = score(&table(&["a", "b", "c"]), &constant(vec![0.2, 0.5, 0.9]), 0.5).unwrap();
        let ids: Vec<_> = results.iter().map(|r| r.transaction_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(
            results.iter().map(|r| r.approved).collect::<Vec<_>>(),
            vec![true, false, false]
        );
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(matches!(
            score(&table(&["a"]), &constant(vec![0.1]), 1.5),
            Err(PipelineError::InvalidThreshold(_))
        ));
        assert!(validate_threshold(f64::NAN).is_err());
        assert!(validate_threshold(0.0).is_ok());
    }

    #[test]
    fn test_length_mismatch_fails_batch() {
        let err = score(&table(&["a", "b"]), &constant(vec![0.1]), 0.5).unwrap_err();
        assert!(matches!(err, PipelineError::Classifier(_)));
    }

    #[test]
    fn test_bad_probability_fails_only_its_row() {
        let results = score(&table(&["a", "b", "c"]), &constant(vec![0.1, f64::NAN, 1.2]), 0.5).unwrap();
        assert_eq!(results.len(), 3);
        assert!(!results[0].is_failed());
        assert!(results[1].is_failed());
        assert!(results[2].is_failed());
        assert!(!results[1].approved);
        assert_eq!(results[1].fraud_probability, None);
    }

    #[test]
    fn test_classifier_error_fails_batch() {
        let failing = |_: &FeatureTable| -> anyhow::Result<Vec<f64>> { anyhow::bail!("session crashed") };
        let err = score(&table(&["a"]), &failing, 0.5).unwrap_err();
        assert!(err.to_string().contains("session crashed"));
    }
}
