//! Payer (card) reference records

use crate::types::fields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bin used when a card has no payer record or no bin.
pub const UNKNOWN_BIN: &str = "UNKNOWN";

/// Static card attributes, looked up by `card_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    /// Card key; payer exports name this column `card_hash`
    #[serde(alias = "card_hash", deserialize_with = "fields::identifier")]
    pub card_id: String,

    /// Leading digits of the card number
    #[serde(default, deserialize_with = "fields::optional_text")]
    pub card_bin: Option<String>,

    /// First time the card was seen transacting
    #[serde(default, deserialize_with = "fields::optional_timestamp")]
    pub card_first_transaction: Option<DateTime<Utc>>,
}

impl Card {
    pub fn new(card_id: impl Into<String>) -> Self {
        Self {
            card_id: card_id.into(),
            card_bin: None,
            card_first_transaction: None,
        }
    }

    pub fn with_bin(mut self, bin: impl Into<String>) -> Self {
        self.card_bin = Some(bin.into());
        self
    }

    pub fn with_first_transaction(mut self, at: DateTime<Utc>) -> Self {
        self.card_first_transaction = Some(at);
        self
    }

    /// Bin used as the pooling key, `UNKNOWN` when absent
    pub fn bin_key(&self) -> &str {
        self.card_bin.as_deref().unwrap_or(UNKNOWN_BIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_hash_alias() {
        let json = r#"{"card_hash": "abc", "card_bin": 411111}"#;
        let card: Card = serde_json::from_str(json).unwrap();
        assert_eq!(card.card_id, "abc");
        assert_eq!(card.bin_key(), "411111");
        assert!(card.card_first_transaction.is_none());
    }

    #[test]
    fn test_missing_bin_pools_as_unknown() {
        let card = Card::new("abc");
        assert_eq!(card.bin_key(), UNKNOWN_BIN);
    }
}
