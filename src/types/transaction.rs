//! Card transaction records, both historical and scoring targets

use crate::types::fields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Columns every transaction batch must carry.
pub const REQUIRED_COLUMNS: [&str; 5] = [
    "transaction_id",
    "card_id",
    "terminal_id",
    "tx_datetime",
    "tx_amount",
];

/// A card transaction.
///
/// Historical rows carry fraud labels; new rows submitted for scoring usually
/// leave `is_fraud` and `tx_fraud_report_date` empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier
    #[serde(deserialize_with = "fields::identifier")]
    pub transaction_id: String,

    /// Card (payer) key
    #[serde(deserialize_with = "fields::identifier")]
    pub card_id: String,

    /// Terminal (seller) key
    #[serde(deserialize_with = "fields::identifier")]
    pub terminal_id: String,

    /// When the transaction happened
    #[serde(deserialize_with = "fields::timestamp")]
    pub tx_datetime: DateTime<Utc>,

    /// Raw amount, before the log transform
    #[serde(deserialize_with = "fields::number")]
    pub tx_amount: f64,

    /// Fraud label (false when unknown)
    #[serde(default, deserialize_with = "fields::flag")]
    pub is_fraud: bool,

    /// When the fraud was discovered; may be later than `tx_datetime`
    #[serde(default, deserialize_with = "fields::optional_timestamp")]
    pub tx_fraud_report_date: Option<DateTime<Utc>>,

    /// Fraud flagged by the transactional rules engine (history only)
    #[serde(default, deserialize_with = "fields::flag")]
    pub is_transactional_fraud: bool,
}

impl Transaction {
    /// Create an unlabeled transaction with the required fields
    pub fn new(
        transaction_id: impl Into<String>,
        card_id: impl Into<String>,
        terminal_id: impl Into<String>,
        tx_datetime: DateTime<Utc>,
        tx_amount: f64,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            card_id: card_id.into(),
            terminal_id: terminal_id.into(),
            tx_datetime,
            tx_amount,
            is_fraud: false,
            tx_fraud_report_date: None,
            is_transactional_fraud: false,
        }
    }

    /// Mark as fraud reported at `report_date`
    pub fn with_fraud_report(mut self, report_date: DateTime<Utc>) -> Self {
        self.is_fraud = true;
        self.tx_fraud_report_date = Some(report_date);
        self
    }

    /// Transaction time in microseconds since the epoch
    pub fn at_micros(&self) -> i64 {
        self.tx_datetime.timestamp_micros()
    }

    /// Report date of a labeled fraud, if the fraud has been reported
    pub fn fraud_report(&self) -> Option<DateTime<Utc>> {
        if self.is_fraud {
            self.tx_fraud_report_date
        } else {
            None
        }
    }

    /// Basic value checks that serde cannot express
    pub fn validate(&self) -> Result<(), String> {
        if self.transaction_id.is_empty() {
            return Err("empty transaction_id".to_string());
        }
        if self.card_id.is_empty() {
            return Err("empty card_id".to_string());
        }
        if self.terminal_id.is_empty() {
            return Err("empty terminal_id".to_string());
        }
        if !self.tx_amount.is_finite() || self.tx_amount < 0.0 {
            return Err(format!("tx_amount must be a non-negative number, got {}", self.tx_amount));
        }
        // Report dates are day-granular, so a same-day report may read as midnight
        if let Some(report) = self.tx_fraud_report_date {
            if report.date_naive() < self.tx_datetime.date_naive() {
                return Err("tx_fraud_report_date precedes tx_datetime".to_string());
            }
        }
        Ok(())
    }
}
