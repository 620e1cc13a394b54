//! Per-key aggregates over historical transactions.
//!
//! The record store builds these once per load. A scoring batch builds the same
//! aggregates over its own rows and over the history rows it supersedes, so a
//! row reads `history + batch - superseded` with binary searches instead of
//! re-merging the key's full history.

use super::moments::PrefixMoments;
use super::window::{end_of_report_day, DistinctOwners, EventTimes};
use crate::types::Transaction;

/// A transaction with the row number that identifies it in its source
pub type Entry<'a> = (usize, &'a Transaction);

/// Sample fed to both amount densities
pub fn log_amount(tx: &Transaction) -> f64 {
    tx.tx_amount.ln_1p()
}

/// End-of-day adjusted report instant of a reported fraud
pub fn adjusted_report(tx: &Transaction) -> Option<i64> {
    tx.fraud_report()
        .map(|report| end_of_report_day(report.timestamp_micros()))
}

/// Instant a fraud counts against its terminal: the raw report date, but never
/// before the transaction itself
pub fn fraud_known_at(tx: &Transaction) -> Option<i64> {
    tx.fraud_report()
        .map(|report| report.timestamp_micros().max(tx.at_micros()))
}

pub fn non_fraud_at(tx: &Transaction) -> Option<i64> {
    (!tx.is_fraud).then(|| tx.at_micros())
}

pub fn card_seen_at(tx: &Transaction) -> Option<i64> {
    Some(tx.at_micros())
}

fn event_times(entries: &[Entry<'_>], event: fn(&Transaction) -> Option<i64>) -> EventTimes {
    EventTimes::from_unsorted(entries.iter().filter_map(|(_, tx)| event(tx)).collect())
}

fn card_owners(entries: &[Entry<'_>], event: fn(&Transaction) -> Option<i64>) -> DistinctOwners {
    DistinctOwners::from_unsorted(
        entries
            .iter()
            .filter_map(|(row, tx)| event(tx).map(|at| (at, tx.card_id.clone(), *row)))
            .collect(),
    )
}

fn log_amounts(entries: &[Entry<'_>]) -> PrefixMoments {
    PrefixMoments::from_samples(entries.iter().map(|(_, tx)| log_amount(tx)))
}

/// Aggregates of one card's entries, which must be ascending by time
#[derive(Debug, Default)]
pub struct CardAggregates {
    pub log_amounts: PrefixMoments,
    /// End-of-day adjusted report dates
    pub fraud_reports: EventTimes,
    pub non_fraud: EventTimes,
}

impl CardAggregates {
    pub fn build(entries: &[Entry<'_>]) -> Self {
        Self {
            log_amounts: log_amounts(entries),
            fraud_reports: event_times(entries, adjusted_report),
            non_fraud: event_times(entries, non_fraud_at),
        }
    }
}

/// Aggregates of one terminal's entries, which must be ascending by time
#[derive(Debug, Default)]
pub struct TerminalAggregates {
    pub log_amounts: PrefixMoments,
    /// Cards keyed by transaction time; repeats make up the reuse ratio
    pub cards: DistinctOwners,
    /// Cards with a fraud here, keyed by [`fraud_known_at`]
    pub fraud_cards: DistinctOwners,
}

impl TerminalAggregates {
    pub fn build(entries: &[Entry<'_>]) -> Self {
        Self {
            log_amounts: log_amounts(entries),
            cards: card_owners(entries, card_seen_at),
            fraud_cards: card_owners(entries, fraud_known_at),
        }
    }
}

/// Aggregates of one card bin
#[derive(Debug, Default)]
pub struct BinAggregates {
    /// End-of-day adjusted report dates
    pub fraud_reports: EventTimes,
}

impl BinAggregates {
    pub fn build(entries: &[Entry<'_>]) -> Self {
        Self {
            fraud_reports: event_times(entries, adjusted_report),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::window::DAY_MICROS;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_known_at_never_precedes_transaction() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
        let midnight = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let tx = Transaction::new("a", "c", "t", at, 1.0).with_fraud_report(midnight);

        assert_eq!(fraud_known_at(&tx), Some(at.timestamp_micros()));
        assert_eq!(adjusted_report(&tx), Some(midnight.timestamp_micros() + DAY_MICROS - 1));
        assert_eq!(non_fraud_at(&tx), None);
    }

    #[test]
    fn test_terminal_aggregates_track_cards() {
        let day = |d: u32| Utc.with_ymd_and_hms(2024, 3, d, 12, 0, 0).unwrap();
        let rows = [
            Transaction::new("h1", "a", "t1", day(1), 5.0),
            Transaction::new("h2", "b", "t1", day(2), 5.0).with_fraud_report(day(4)),
            Transaction::new("h3", "a", "t1", day(3), 5.0),
        ];
        let entries: Vec<Entry<'_>> = rows.iter().enumerate().collect();
        let aggregates = TerminalAggregates::build(&entries);

        assert_eq!(aggregates.cards.distinct_before(day(4).timestamp_micros()), 2);
        assert_eq!(aggregates.cards.first_event("a", |row| row == 0), Some(day(3).timestamp_micros()));
        assert_eq!(aggregates.fraud_cards.distinct_before(day(4).timestamp_micros()), 0);
        assert_eq!(aggregates.fraud_cards.distinct_before(day(5).timestamp_micros()), 1);
        assert_eq!(aggregates.log_amounts.prior(3).count, 3);
    }
}
