//! Property tests for the point-in-time feature engine.

use chrono::{DateTime, Duration, TimeZone, Utc};
use fraud_feature_pipeline::assembler::FeatureRow;
use fraud_feature_pipeline::{
    join_batch, Card, FeatureAssembler, FeatureEngine, FeatureTable, RecordStore, Terminal, Transaction,
};
use proptest::prelude::*;

/// (card, terminal, minutes after base, amount, fraud, report delay in minutes)
type TxParams = (usize, usize, i64, f64, bool, i64);

const THIRTY_DAYS_MINUTES: i64 = 30 * 24 * 60;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

fn cards() -> Vec<Card> {
    let opened = base() - Duration::days(100);
    vec![
        Card::new("c0").with_bin("1111").with_first_transaction(opened),
        Card::new("c1").with_bin("1111").with_first_transaction(opened),
        Card::new("c2"),
    ]
}

fn terminals() -> Vec<Terminal> {
    vec![
        Terminal::new("t0").with_location(-5.0, -60.0),
        Terminal::new("t1").with_location(-25.0, -46.0),
        Terminal::new("t2"),
    ]
}

fn transaction(id: String, params: &TxParams) -> Transaction {
    let (card, terminal, minutes, amount, fraud, report_delay) = *params;
    let at = base() + Duration::minutes(minutes);
    let tx = Transaction::new(id, format!("c{card}"), format!("t{terminal}"), at, amount);
    if fraud {
        tx.with_fraud_report(at + Duration::minutes(report_delay))
    } else {
        tx
    }
}

fn history(params: &[TxParams]) -> Vec<Transaction> {
    params
        .iter()
        .enumerate()
        .map(|(i, params)| transaction(format!("h{i}"), params))
        .collect()
}

fn features(store: &RecordStore, batch: &[Transaction], workers: usize) -> FeatureTable {
    let join = join_batch(batch, store);
    let frame = FeatureEngine::new(workers).compute(&join);
    FeatureAssembler::new().assemble(&frame).unwrap().0
}

fn tx_params(max_minutes: i64) -> impl Strategy<Value = TxParams> {
    (
        0usize..3,
        0usize..3,
        0..max_minutes,
        1.0f64..5000.0,
        any::<bool>(),
        0i64..20_000,
    )
}

fn row_of(table: &FeatureTable, index: usize) -> FeatureRow {
    table.rows()[index].clone()
}

proptest! {
    /// Adding a transaction at or after T leaves T's features untouched, even
    /// when it is a reported fraud.
    #[test]
    fn later_history_does_not_leak(
        past in prop::collection::vec(tx_params(THIRTY_DAYS_MINUTES), 0..25),
        probe in tx_params(THIRTY_DAYS_MINUTES),
        extra in tx_params(THIRTY_DAYS_MINUTES),
    ) {
        let probe_tx = Transaction::new(
            "probe",
            format!("c{}", probe.0),
            format!("t{}", probe.1),
            base() + Duration::minutes(probe.2),
            probe.3,
        );

        let mut later = extra;
        later.2 += probe.2;
        let mut extended = history(&past);
        extended.push(transaction("late".to_string(), &later));

        let batch = vec![probe_tx];
        let without = features(&RecordStore::build(cards(), terminals(), history(&past)), &batch, 1);
        let with = features(&RecordStore::build(cards(), terminals(), extended), &batch, 1);

        prop_assert_eq!(row_of(&without, 0), row_of(&with, 0));
    }

    /// Rows come back in submission order, every cell is finite, and the
    /// output does not depend on the worker count.
    #[test]
    fn output_is_ordered_complete_and_worker_independent(
        past in prop::collection::vec(tx_params(THIRTY_DAYS_MINUTES), 0..25),
        submitted in prop::collection::vec(tx_params(THIRTY_DAYS_MINUTES + 2000), 1..12),
        workers in 2usize..6,
    ) {
        let store = RecordStore::build(cards(), terminals(), history(&past));
        let batch: Vec<Transaction> = submitted
            .iter()
            .enumerate()
            .map(|(i, params)| transaction(format!("b{i}"), params))
            .collect();

        let serial = features(&store, &batch, 1);
        let parallel = features(&store, &batch, workers);
        let again = features(&store, &batch, 1);

        let ids: Vec<&str> = serial.transaction_ids().collect();
        let expected: Vec<&str> = batch.iter().map(|tx| tx.transaction_id.as_str()).collect();
        prop_assert_eq!(ids, expected);

        for row in serial.rows() {
            prop_assert!(row.values.iter().all(|v| v.is_finite()));
        }
        prop_assert_eq!(serial.rows(), parallel.rows());
        prop_assert_eq!(serial.rows(), again.rows());
    }

    /// A row's features do not depend on whether its earlier rows arrive as
    /// history or in the same batch.
    #[test]
    fn batch_rows_count_like_history(
        past in prop::collection::vec(tx_params(THIRTY_DAYS_MINUTES), 0..20),
        submitted in prop::collection::vec(tx_params(THIRTY_DAYS_MINUTES), 0..10),
        last in tx_params(THIRTY_DAYS_MINUTES),
    ) {
        let last_tx = Transaction::new(
            "last",
            format!("c{}", last.0),
            format!("t{}", last.1),
            base() + Duration::minutes(THIRTY_DAYS_MINUTES + 1),
            last.3,
        );
        let earlier: Vec<Transaction> = submitted
            .iter()
            .enumerate()
            .map(|(i, params)| transaction(format!("b{i}"), params))
            .collect();

        let mut batch = earlier.clone();
        batch.push(last_tx.clone());
        let batched = features(&RecordStore::build(cards(), terminals(), history(&past)), &batch, 1);

        let mut extended = history(&past);
        extended.extend(earlier);
        let historical = features(&RecordStore::build(cards(), terminals(), extended), &[last_tx], 1);

        let from_batch = row_of(&batched, submitted.len());
        let from_history = row_of(&historical, 0);
        prop_assert_eq!(from_batch.regiao, from_history.regiao);
        for (a, b) in from_batch.values.iter().zip(from_history.values.iter()) {
            prop_assert!((a - b).abs() <= 1e-9 * a.abs().max(1.0), "{} != {}", a, b);
        }
    }

    /// Features of a row only count transactions strictly before it, so the
    /// first submitted row on a fresh card sees nothing.
    #[test]
    fn fresh_card_has_no_history(
        past in prop::collection::vec(tx_params(THIRTY_DAYS_MINUTES), 0..25),
        minutes in 0..THIRTY_DAYS_MINUTES,
    ) {
        let store = RecordStore::build(cards(), terminals(), history(&past));
        let batch = vec![Transaction::new("n", "fresh", "t0", base() + Duration::minutes(minutes), 10.0)];
        let row = row_of(&features(&store, &batch, 1), 0);

        prop_assert_eq!(row.get("tx_time_diff_prev"), Some(0.0));
        prop_assert_eq!(row.get("amount_card_norm_pdf"), Some(0.5));
        prop_assert_eq!(row.get("card_fraud_count_last_7d"), Some(0.0));
        prop_assert_eq!(row.get("card_age_days"), Some(0.0));
    }
}
