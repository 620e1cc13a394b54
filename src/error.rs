//! Batch-level failures of the fraud feature pipeline.
//!
//! Per-row problems (a card without payer record, a degenerate variance) never show
//! up here: they are absorbed with documented defaults and only counted.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A required column is absent from an input batch
    #[error("{batch} batch is missing required column(s): {}", .missing.join(", "))]
    InputSchema {
        batch: &'static str,
        missing: Vec<String>,
    },

    #[error("transaction_id `{0}` appears more than once in the batch")]
    DuplicateTransactionId(String),

    /// A value could not be interpreted
    #[error("malformed {batch} record at row {row}: {reason}")]
    MalformedRecord {
        batch: &'static str,
        row: usize,
        reason: String,
    },

    /// A feature of the column contract was not produced (internal bug)
    #[error("feature column `{0}` was not produced by the aggregation engine")]
    Schema(String),

    #[error("decision threshold must lie in [0, 1], got {0}")]
    InvalidThreshold(f64),

    #[error("classifier failed: {0}")]
    Classifier(#[source] anyhow::Error),
}

impl PipelineError {
    /// Whether the caller sent a bad batch, as opposed to an internal failure
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            PipelineError::InputSchema { .. }
                | PipelineError::DuplicateTransactionId(_)
                | PipelineError::MalformedRecord { .. }
        )
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_schema_message_lists_columns() {
        let err = PipelineError::InputSchema {
            batch: "transaction",
            missing: vec!["tx_datetime".into(), "tx_amount".into()],
        };
        assert_eq!(
            err.to_string(),
            "transaction batch is missing required column(s): tx_datetime, tx_amount"
        );
        assert!(err.is_input_error());
        assert!(!PipelineError::Schema("regiao".into()).is_input_error());
    }
}
