//! Scoring results and prediction log records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome for one submitted transaction, in submission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredTransaction {
    /// Submitted transaction identifier
    pub transaction_id: String,

    /// Fraud probability (0.0 - 1.0); `None` when the row failed
    pub fraud_probability: Option<f64>,

    /// Approve/decline decision; failed rows are declined
    pub approved: bool,

    /// Why the row could not be scored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ScoredTransaction {
    /// Apply the decision threshold to a probability
    pub fn scored(transaction_id: String, probability: f64, threshold: f64) -> Self {
        Self {
            transaction_id,
            fraud_probability: Some(probability),
            approved: probability < threshold,
            error: None,
        }
    }

    /// Explicitly failed row
    pub fn failed(transaction_id: String, reason: impl Into<String>) -> Self {
        Self {
            transaction_id,
            fraud_probability: None,
            approved: false,
            error: Some(reason.into()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// Record published on the prediction log channel after each scored row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionLog {
    /// Unique log identifier
    pub log_id: String,

    /// Associated transaction ID
    pub transaction_id: String,

    /// When the prediction was made
    pub timestamp: DateTime<Utc>,

    /// Declined as fraud
    pub is_fraud: bool,

    /// Probability returned by the classifier
    pub fraud_probability: Option<f64>,

    /// Classifier version that produced the score
    pub model_version: String,
}

impl PredictionLog {
    pub fn from_result(result: &ScoredTransaction, model_version: &str) -> Self {
        Self {
            log_id: uuid::Uuid::new_v4().to_string(),
            transaction_id: result.transaction_id.clone(),
            timestamp: Utc::now(),
            is_fraud: !result.approved,
            fraud_probability: result.fraud_probability,
            model_version: model_version.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_is_inclusive_for_decline() {
        assert!(ScoredTransaction::scored("a".into(), 0.49, 0.5).approved);
        assert!(!ScoredTransaction::scored("a".into(), 0.5, 0.5).approved);
    }

    #[test]
    fn test_failed_row_serialization() {
        let failed = ScoredTransaction::failed("tx_1".into(), "non-finite probability");
        let json = serde_json::to_string(&failed).unwrap();
        assert!(json.contains("\"fraud_probability\":null"));
        assert!(json.contains("\"error\""));

        let log = PredictionLog::from_result(&failed, "v1");
        assert!(log.is_fraud);
        assert_eq!(log.transaction_id, "tx_1");
    }
}
