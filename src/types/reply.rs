//! Reply bodies sent back on NATS request subjects

use crate::types::ScoredTransaction;
use serde::{Deserialize, Serialize};

/// Successful scoring reply, results in submission order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringReply {
    pub request_id: Option<String>,
    pub threshold: f64,
    pub count: usize,
    pub results: Vec<ScoredTransaction>,
}

impl ScoringReply {
    pub fn new(request_id: Option<String>, threshold: f64, results: Vec<ScoredTransaction>) -> Self {
        Self {
            request_id,
            threshold,
            count: results.len(),
            results,
        }
    }
}

/// A batch that failed as a whole
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub request_id: Option<String>,
    pub error: String,
}

/// Sizes of the store installed by a reload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReloadReply {
    pub generation: u64,
    pub cards: usize,
    pub terminals: usize,
    pub transactions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoring_reply_shape() {
        let reply = ScoringReply::new(
            Some("r-1".into()),
            0.5,
            vec![ScoredTransaction::scored("a".into(), 0.25, 0.5)],
        );
        let json = serde_json::to_value(&reply).unwrap();
        assert_eq!(json["count"], 1);
        assert_eq!(json["results"][0]["transaction_id"], "a");
        assert_eq!(json["results"][0]["approved"], true);
        assert!(json["results"][0].get("error").is_none());
    }
}
