//! Record decoding: CSV files for the record store and JSON scoring requests.
//!
//! Required columns are checked before any row is decoded, so a batch with a
//! missing column fails with [`PipelineError::InputSchema`] as a whole.

use crate::config::DataConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::store::RecordStore;
use crate::types::transaction::REQUIRED_COLUMNS;
use crate::types::{Card, Terminal, Transaction};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{info, warn};

/// A required column, satisfied by any of its accepted names
type ColumnSpec = &'static [&'static str];

const TRANSACTION_COLUMNS: [ColumnSpec; 5] = [
    &[REQUIRED_COLUMNS[0]],
    &[REQUIRED_COLUMNS[1]],
    &[REQUIRED_COLUMNS[2]],
    &[REQUIRED_COLUMNS[3]],
    &[REQUIRED_COLUMNS[4]],
];
const CARD_COLUMNS: [ColumnSpec; 1] = [&["card_id", "card_hash"]];
const TERMINAL_COLUMNS: [ColumnSpec; 1] = [&["terminal_id"]];

/// Columns of `required` that none of `present` satisfies
fn missing_columns(required: &[ColumnSpec], present: impl Fn(&str) -> bool) -> Vec<String> {
    required
        .iter()
        .filter(|names| !names.iter().any(|name| present(name)))
        .map(|names| names.join("|"))
        .collect()
}

/// Payer exports may carry both key columns; `card_hash` wins
fn prefer_card_hash(object: &mut Map<String, Value>) {
    if object.contains_key("card_hash") {
        object.remove("card_id");
    }
}

fn read_csv<R: Read, T: DeserializeOwned>(
    reader: R,
    batch: &'static str,
    required: &[ColumnSpec],
    prepare: fn(&mut Map<String, Value>),
) -> PipelineResult<Vec<T>> {
    let malformed = |row: usize, reason: String| PipelineError::MalformedRecord { batch, row, reason };

    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = reader.headers().map_err(|e| malformed(0, e.to_string()))?.clone();

    let missing = missing_columns(required, |name| headers.iter().any(|h| h == name));
    if !missing.is_empty() {
        return Err(PipelineError::InputSchema { batch, missing });
    }

    // Cells are kept as text so identifiers like "0042" survive; empty cells are null.
    reader
        .records()
        .enumerate()
        .map(|(i, record)| {
            let record = record.map_err(|e| malformed(i + 1, e.to_string()))?;
            let mut object: Map<String, Value> = headers
                .iter()
                .zip(record.iter())
                .map(|(header, cell)| {
                    let value = if cell.is_empty() {
                        Value::Null
                    } else {
                        Value::String(cell.to_string())
                    };
                    (header.to_string(), value)
                })
                .collect();
            prepare(&mut object);
            T::deserialize(Value::Object(object)).map_err(|e| malformed(i + 1, e.to_string()))
        })
        .collect()
}

/// Read transactions from CSV, validating every row
pub fn read_transactions<R: Read>(reader: R) -> PipelineResult<Vec<Transaction>> {
    let transactions: Vec<Transaction> = read_csv(reader, "transaction", &TRANSACTION_COLUMNS, |_| {})?;
    validate_rows(&transactions, "transaction")?;
    Ok(transactions)
}

pub fn read_cards<R: Read>(reader: R) -> PipelineResult<Vec<Card>> {
    read_csv(reader, "card", &CARD_COLUMNS, prefer_card_hash)
}

pub fn read_terminals<R: Read>(reader: R) -> PipelineResult<Vec<Terminal>> {
    read_csv(reader, "terminal", &TERMINAL_COLUMNS, |_| {})
}

fn validate_rows(transactions: &[Transaction], batch: &'static str) -> PipelineResult<()> {
    for (i, tx) in transactions.iter().enumerate() {
        tx.validate().map_err(|reason| PipelineError::MalformedRecord {
            batch,
            row: i + 1,
            reason,
        })?;
    }
    Ok(())
}

/// Transaction ids must be unique within one scoring batch
pub fn ensure_unique_ids(transactions: &[Transaction]) -> PipelineResult<()> {
    let mut seen = HashSet::with_capacity(transactions.len());
    for tx in transactions {
        if !seen.insert(tx.transaction_id.as_str()) {
            return Err(PipelineError::DuplicateTransactionId(tx.transaction_id.clone()));
        }
    }
    Ok(())
}

/// Scoring request as received on the request subject
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringRequest {
    #[serde(default)]
    pub request_id: Option<String>,
    pub transactions: Vec<Value>,
}

impl ScoringRequest {
    pub fn from_slice(payload: &[u8]) -> PipelineResult<Self> {
        serde_json::from_slice(payload).map_err(|e| PipelineError::MalformedRecord {
            batch: "request",
            row: 0,
            reason: e.to_string(),
        })
    }

    /// Decode and validate the submitted transactions
    pub fn decode(&self) -> PipelineResult<Vec<Transaction>> {
        decode_transactions(&self.transactions)
    }
}

/// Decode JSON transaction objects into a validated scoring batch.
///
/// Checks, in order: required keys on every record, per-row parsing and value
/// checks, then id uniqueness.
pub fn decode_transactions(records: &[Value]) -> PipelineResult<Vec<Transaction>> {
    let batch = "transaction";

    let mut missing: Vec<String> = Vec::new();
    for record in records {
        let object = record.as_object();
        for column in missing_columns(&TRANSACTION_COLUMNS, |name| {
            object.is_some_and(|fields| fields.contains_key(name))
        }) {
            if !missing.contains(&column) {
                missing.push(column);
            }
        }
    }
    if !missing.is_empty() {
        return Err(PipelineError::InputSchema { batch, missing });
    }

    let transactions = records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            Transaction::deserialize(record).map_err(|e| PipelineError::MalformedRecord {
                batch,
                row: i + 1,
                reason: e.to_string(),
            })
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    validate_rows(&transactions, batch)?;
    ensure_unique_ids(&transactions)?;
    Ok(transactions)
}

fn open(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open {}", path.display()))
}

/// Build a record store from the configured CSV files
pub fn load_store(config: &DataConfig) -> Result<RecordStore> {
    let cards = read_cards(open(&config.cards_path)?)
        .with_context(|| format!("Failed to read payers from {}", config.cards_path.display()))?;
    let terminals = read_terminals(open(&config.terminals_path)?)
        .with_context(|| format!("Failed to read sellers from {}", config.terminals_path.display()))?;

    let mut history = Vec::new();
    for path in &config.transactions_paths {
        let rows = read_transactions(open(path)?)
            .with_context(|| format!("Failed to read transactions from {}", path.display()))?;
        info!(path = %path.display(), rows = rows.len(), "Loaded transaction file");
        history.extend(rows);
    }

    if config.exclude_transactional_fraud {
        let before = history.len();
        history.retain(|tx| !(tx.is_fraud && tx.is_transactional_fraud));
        if history.len() < before {
            warn!(
                dropped = before - history.len(),
                "Excluded transactional fraud rows from history"
            );
        }
    }

    Ok(RecordStore::build(cards, terminals, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_missing_required_column() {
        let csv = "transaction_id,card_id,terminal_id,tx_amount\n1,c1,t1,10.0\n";
        match read_transactions(csv.as_bytes()) {
            Err(PipelineError::InputSchema { batch, missing }) => {
                assert_eq!(batch, "transaction");
                assert_eq!(missing, vec!["tx_datetime".to_string()]);
            }
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_transactions_with_optional_columns() {
        let csv = "\
transaction_id,card_id,terminal_id,tx_datetime,tx_amount,is_fraud,tx_fraud_report_date
1,c1,t1,2024-01-01 10:00:00,10.5,0,
2,c1,t2,2024-01-02 11:00:00,99.0,1,2024-01-03
";
        let txs = read_transactions(csv.as_bytes()).unwrap();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].transaction_id, "1");
        assert!(!txs[0].is_fraud);
        assert!(txs[0].tx_fraud_report_date.is_none());
        assert!(txs[1].fraud_report().is_some());
    }

    #[test]
    fn test_malformed_timestamp_reports_row() {
        let csv = "transaction_id,card_id,terminal_id,tx_datetime,tx_amount\n1,c1,t1,2024-01-01,1\n2,c1,t1,soon,1\n";
        match read_transactions(csv.as_bytes()) {
            Err(PipelineError::MalformedRecord { row, .. }) => assert_eq!(row, 2),
            other => panic!("expected malformed record, got {other:?}"),
        }
    }

    #[test]
    fn test_csv_identifiers_keep_leading_zeros() {
        let csv = "terminal_id,latitude,longitude,terminal_soft_descriptor\n0042,-12.5,-38.0,\n";
        let terminals = read_terminals(csv.as_bytes()).unwrap();
        assert_eq!(terminals[0].terminal_id, "0042");
        assert_eq!(terminals[0].location(), Some((-12.5, -38.0)));
        assert!(terminals[0].terminal_soft_descriptor.is_none());
    }

    #[test]
    fn test_cards_accept_card_hash() {
        let csv = "card_hash,card_bin,card_first_transaction\nabc,411111,2023-05-01\n";
        let cards = read_cards(csv.as_bytes()).unwrap();
        assert_eq!(cards[0].card_id, "abc");
        assert_eq!(cards[0].card_bin.as_deref(), Some("411111"));

        let missing = read_cards("card_bin\n1\n".as_bytes()).unwrap_err();
        assert!(missing.to_string().contains("card_id|card_hash"));
    }

    #[test]
    fn test_cards_with_both_key_columns_use_card_hash() {
        let csv = "card_id,card_hash,card_bin\nx1,abc,411111\n";
        let cards = read_cards(csv.as_bytes()).unwrap();
        assert_eq!(cards.len(), 1);
        assert_eq!(cards[0].card_id, "abc");
        assert_eq!(cards[0].bin_key(), "411111");
    }

    #[test]
    fn test_same_day_report_date_loads() {
        let csv = "\
transaction_id,card_id,terminal_id,tx_datetime,tx_amount,is_fraud,tx_fraud_report_date
1,c1,t1,2024-03-01 09:00:00,10.0,1,2024-03-01
";
        let txs = read_transactions(csv.as_bytes()).unwrap();
        assert_eq!(txs.len(), 1);
        assert!(txs[0].fraud_report().is_some());

        let earlier = csv.replace(",2024-03-01\n", ",2024-02-29\n");
        assert!(matches!(
            read_transactions(earlier.as_bytes()).unwrap_err(),
            PipelineError::MalformedRecord { row: 1, .. }
        ));
    }

    #[test]
    fn test_decode_request() {
        let payload = json!({
            "request_id": "r-1",
            "transactions": [
                {"transaction_id": "a", "card_id": "c1", "terminal_id": "t1",
                 "tx_datetime": "2024-01-01T10:00:00Z", "tx_amount": 12.5},
                {"transaction_id": 7, "card_id": "c1", "terminal_id": "t1",
                 "tx_datetime": "2024-01-01 11:00:00", "tx_amount": 3, "is_fraud": 0}
            ]
        });
        let request = ScoringRequest::from_slice(payload.to_string().as_bytes()).unwrap();
        assert_eq!(request.request_id.as_deref(), Some("r-1"));

        let txs = request.decode().unwrap();
        assert_eq!(txs[1].transaction_id, "7");
        assert_eq!(txs[1].tx_amount, 3.0);
    }

    #[test]
    fn test_decode_rejects_missing_keys_and_duplicates() {
        let missing = decode_transactions(&[json!({"transaction_id": "a", "card_id": "c1"})]).unwrap_err();
        assert!(matches!(missing, PipelineError::InputSchema { ref missing, .. } if missing.len() == 3));

        let row = json!({"transaction_id": "a", "card_id": "c1", "terminal_id": "t1",
                         "tx_datetime": "2024-01-01", "tx_amount": 1.0});
        let duplicate = decode_transactions(&[row.clone(), row]).unwrap_err();
        assert!(matches!(duplicate, PipelineError::DuplicateTransactionId(id) if id == "a"));

        let negative = json!({"transaction_id": "b", "card_id": "c1", "terminal_id": "t1",
                              "tx_datetime": "2024-01-01", "tx_amount": -1.0});
        assert!(matches!(
            decode_transactions(&[negative]).unwrap_err(),
            PipelineError::MalformedRecord { row: 1, .. }
        ));
    }

    #[test]
    fn test_load_store_filters_transactional_fraud() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, body: &str| {
            let path = dir.path().join(name);
            File::create(&path).unwrap().write_all(body.as_bytes()).unwrap();
            path
        };

        let config = DataConfig {
            cards_path: write("payers.csv", "card_id,card_bin\nc1,5500\n"),
            terminals_path: write("sellers.csv", "terminal_id,latitude,longitude\nt1,-5.0,-40.0\n"),
            transactions_paths: vec![
                write(
                    "tx1.csv",
                    "transaction_id,card_id,terminal_id,tx_datetime,tx_amount,is_fraud,tx_fraud_report_date,is_transactional_fraud\n\
                     1,c1,t1,2024-01-01 10:00:00,5,1,2024-01-02,1\n\
                     2,c1,t1,2024-01-01 11:00:00,5,1,2024-01-02,0\n",
                ),
                write(
                    "tx2.csv",
                    "transaction_id,card_id,terminal_id,tx_datetime,tx_amount\n3,c1,t1,2024-01-01 12:00:00,5\n",
                ),
            ],
            exclude_transactional_fraud: true,
        };

        let store = load_store(&config).unwrap();
        assert_eq!(store.transaction_count(), 2);
        assert_eq!(store.card_bin("c1"), "5500");

        let keep_all = DataConfig {
            exclude_transactional_fraud: false,
            ..config
        };
        assert_eq!(load_store(&keep_all).unwrap().transaction_count(), 3);
    }

    #[test]
    fn test_load_store_missing_file() {
        let config = DataConfig {
            cards_path: "/nonexistent/payers.csv".into(),
            terminals_path: "/nonexistent/sellers.csv".into(),
            transactions_paths: vec![],
            exclude_transactional_fraud: true,
        };
        let err = load_store(&config).unwrap_err();
        assert!(format!("{err:#}").contains("Failed to open /nonexistent/payers.csv"));
    }
}
