//! In-memory record store: payers, sellers and the historical transaction set.
//!
//! A [`RecordStore`] is immutable once built. Reloading builds a fresh store and
//! swaps it into a [`StoreHandle`]; batches already running keep the snapshot they
//! started with.

use crate::features::history::{BinAggregates, CardAggregates, Entry, TerminalAggregates};
use crate::types::{Card, Terminal, Transaction, UNKNOWN_BIN};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{info, warn};

/// Historical transactions of one key, ascending by `tx_datetime`
#[derive(Debug, Clone, Copy)]
pub struct HistorySlice<'a> {
    transactions: &'a [Transaction],
    positions: &'a [usize],
    times: &'a [i64],
}

impl<'a> HistorySlice<'a> {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&'a Transaction> {
        self.positions.get(index).map(|&pos| &self.transactions[pos])
    }

    /// Store position of the entry at `index`
    pub fn position(&self, index: usize) -> Option<usize> {
        self.positions.get(index).copied()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &'a Transaction> + 'a {
        let transactions = self.transactions;
        self.positions.iter().map(move |&pos| &transactions[pos])
    }

    /// Entries with their store positions
    pub fn entries(&self) -> impl ExactSizeIterator<Item = (usize, &'a Transaction)> + 'a {
        let transactions = self.transactions;
        self.positions.iter().map(move |&pos| (pos, &transactions[pos]))
    }

    /// Number of entries strictly before `reference_micros`
    pub fn prior_len(&self, reference_micros: i64) -> usize {
        self.times.partition_point(|&t| t < reference_micros)
    }
}

/// One key's history positions, ascending by time, with their aggregates
#[derive(Debug, Default)]
struct KeyHistory<A> {
    positions: Vec<usize>,
    times: Vec<i64>,
    aggregates: A,
}

impl<A> KeyHistory<A> {
    fn build(history: &[Transaction], positions: Vec<usize>, aggregate: fn(&[Entry<'_>]) -> A) -> Self {
        let entries: Vec<Entry<'_>> = positions.iter().map(|&pos| (pos, &history[pos])).collect();
        Self {
            times: entries.iter().map(|(_, tx)| tx.at_micros()).collect(),
            aggregates: aggregate(&entries),
            positions,
        }
    }
}

fn index_keys<A>(
    groups: HashMap<String, Vec<usize>>,
    history: &[Transaction],
    aggregate: fn(&[Entry<'_>]) -> A,
) -> HashMap<String, KeyHistory<A>> {
    groups
        .into_iter()
        .map(|(key, positions)| (key, KeyHistory::build(history, positions, aggregate)))
        .collect()
}

/// Per-key sorted positions and aggregates over the history vector
#[derive(Debug, Default)]
struct HistoryIndex {
    by_card: HashMap<String, KeyHistory<CardAggregates>>,
    by_terminal: HashMap<String, KeyHistory<TerminalAggregates>>,
    by_bin: HashMap<String, KeyHistory<BinAggregates>>,
    by_id: HashMap<String, Vec<usize>>,
    /// Aggregates of keys without history
    no_card: CardAggregates,
    no_terminal: TerminalAggregates,
    no_bin: BinAggregates,
}

impl HistoryIndex {
    fn build(history: &[Transaction], cards: &HashMap<String, Card>) -> Self {
        // Stable sort keeps load order among equal timestamps.
        let mut order: Vec<usize> = (0..history.len()).collect();
        order.sort_by_key(|&pos| history[pos].tx_datetime);

        let mut by_card: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_terminal: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_bin: HashMap<String, Vec<usize>> = HashMap::new();
        for pos in order {
            let tx = &history[pos];
            let bin = cards
                .get(&tx.card_id)
                .map(Card::bin_key)
                .unwrap_or(UNKNOWN_BIN);

            by_card.entry(tx.card_id.clone()).or_default().push(pos);
            by_terminal.entry(tx.terminal_id.clone()).or_default().push(pos);
            by_bin.entry(bin.to_string()).or_default().push(pos);
        }

        let mut by_id: HashMap<String, Vec<usize>> = HashMap::with_capacity(history.len());
        for (pos, tx) in history.iter().enumerate() {
            by_id.entry(tx.transaction_id.clone()).or_default().push(pos);
        }

        HistoryIndex {
            by_card: index_keys(by_card, history, CardAggregates::build),
            by_terminal: index_keys(by_terminal, history, TerminalAggregates::build),
            by_bin: index_keys(by_bin, history, BinAggregates::build),
            by_id,
            ..HistoryIndex::default()
        }
    }
}

/// Immutable snapshot of reference data and history
#[derive(Debug, Default)]
pub struct RecordStore {
    cards: HashMap<String, Card>,
    terminals: HashMap<String, Terminal>,
    history: Vec<Transaction>,
    index: HistoryIndex,
}

impl RecordStore {
    /// Build a snapshot. Duplicate payer/seller keys keep the last row.
    pub fn build(cards: Vec<Card>, terminals: Vec<Terminal>, history: Vec<Transaction>) -> Self {
        let card_rows = cards.len();
        let cards: HashMap<String, Card> = cards
            .into_iter()
            .map(|card| (card.card_id.clone(), card))
            .collect();
        if cards.len() < card_rows {
            warn!(
                rows = card_rows,
                unique = cards.len(),
                "Duplicate card_id rows in payer data, keeping the last"
            );
        }

        let terminal_rows = terminals.len();
        let terminals: HashMap<String, Terminal> = terminals
            .into_iter()
            .map(|terminal| (terminal.terminal_id.clone(), terminal))
            .collect();
        if terminals.len() < terminal_rows {
            warn!(
                rows = terminal_rows,
                unique = terminals.len(),
                "Duplicate terminal_id rows in seller data, keeping the last"
            );
        }

        let index = HistoryIndex::build(&history, &cards);

        info!(
            cards = cards.len(),
            terminals = terminals.len(),
            transactions = history.len(),
            bins = index.by_bin.len(),
            "Record store built"
        );

        Self {
            cards,
            terminals,
            history,
            index,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get_payer(&self, card_id: &str) -> Option<&Card> {
        self.cards.get(card_id)
    }

    pub fn get_seller(&self, terminal_id: &str) -> Option<&Terminal> {
        self.terminals.get(terminal_id)
    }

    /// Pooling bin of a card, `UNKNOWN` when the card or its bin is absent
    pub fn card_bin(&self, card_id: &str) -> &str {
        self.get_payer(card_id)
            .map(Card::bin_key)
            .unwrap_or(UNKNOWN_BIN)
    }

    pub fn history_for_card(&self, card_id: &str) -> HistorySlice<'_> {
        self.slice(self.index.by_card.get(card_id))
    }

    pub fn history_for_terminal(&self, terminal_id: &str) -> HistorySlice<'_> {
        self.slice(self.index.by_terminal.get(terminal_id))
    }

    pub fn history_for_bin(&self, card_bin: &str) -> HistorySlice<'_> {
        self.slice(self.index.by_bin.get(card_bin))
    }

    fn slice<'a, A>(&'a self, key: Option<&'a KeyHistory<A>>) -> HistorySlice<'a> {
        HistorySlice {
            transactions: &self.history,
            positions: key.map(|key| key.positions.as_slice()).unwrap_or(&[]),
            times: key.map(|key| key.times.as_slice()).unwrap_or(&[]),
        }
    }

    pub fn card_aggregates(&self, card_id: &str) -> &CardAggregates {
        self.index
            .by_card
            .get(card_id)
            .map_or(&self.index.no_card, |key| &key.aggregates)
    }

    pub fn terminal_aggregates(&self, terminal_id: &str) -> &TerminalAggregates {
        self.index
            .by_terminal
            .get(terminal_id)
            .map_or(&self.index.no_terminal, |key| &key.aggregates)
    }

    pub fn bin_aggregates(&self, card_bin: &str) -> &BinAggregates {
        self.index
            .by_bin
            .get(card_bin)
            .map_or(&self.index.no_bin, |key| &key.aggregates)
    }

    /// Store positions of history rows with this id
    pub fn positions_of(&self, transaction_id: &str) -> &[usize] {
        self.index
            .by_id
            .get(transaction_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn transaction_at(&self, position: usize) -> Option<&Transaction> {
        self.history.get(position)
    }

    pub fn card_count(&self) -> usize {
        self.cards.len()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.history.len()
    }
}

/// Shared, swappable pointer to the current [`RecordStore`]
pub struct StoreHandle {
    current: RwLock<Arc<RecordStore>>,
    generation: AtomicU64,
}

impl StoreHandle {
    pub fn new(store: RecordStore) -> Self {
        Self {
            current: RwLock::new(Arc::new(store)),
            generation: AtomicU64::new(0),
        }
    }

    /// Snapshot to thread through one scoring batch
    pub fn snapshot(&self) -> Arc<RecordStore> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Atomically install a new store, returning the previous one
    pub fn replace(&self, store: RecordStore) -> Arc<RecordStore> {
        let next = Arc::new(store);
        let previous = {
            let mut current = self
                .current
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, next)
        };
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(generation, "Record store snapshot replaced");
        previous
    }

    /// Number of swaps performed so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn at(hour: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, hour, 0, 0).unwrap()
    }

    fn sample_store() -> RecordStore {
        let cards = vec![
            Card::new("c1").with_bin("411111"),
            Card::new("c2").with_bin("411111"),
            Card::new("c3"),
        ];
        let terminals = vec![Terminal::new("t1").with_location(-5.0, -40.0)];
        let history = vec![
            Transaction::new("h3", "c1", "t1", at(12), 30.0),
            Transaction::new("h1", "c1", "t1", at(8), 10.0),
            Transaction::new("h2", "c2", "t2", at(10), 20.0),
            Transaction::new("h4", "c3", "t1", at(9), 5.0),
            Transaction::new("h5", "c9", "t1", at(9), 5.0),
        ];
        RecordStore::build(cards, terminals, history)
    }

    #[test]
    fn test_history_sorted_by_time() {
        let store = sample_store();
        let ids: Vec<&str> = store
            .history_for_card("c1")
            .iter()
            .map(|tx| tx.transaction_id.as_str())
            .collect();
        assert_eq!(ids, vec!["h1", "h3"]);

        let ids: Vec<&str> = store
            .history_for_terminal("t1")
            .iter()
            .map(|tx| tx.transaction_id.as_str())
            .collect();
        // h4 and h5 tie at 09:00 and keep load order
        assert_eq!(ids, vec!["h1", "h4", "h5", "h3"]);
    }

    #[test]
    fn test_bins_pool_cards_and_unknowns() {
        let store = sample_store();
        assert_eq!(store.history_for_bin("411111").len(), 3);
        // c3 has no bin, c9 has no payer row
        assert_eq!(store.history_for_bin(UNKNOWN_BIN).len(), 2);
        assert_eq!(store.card_bin("c9"), UNKNOWN_BIN);
    }

    #[test]
    fn test_absent_lookups_do_not_fail() {
        let store = sample_store();
        assert!(store.get_payer("nope").is_none());
        assert!(store.get_seller("t2").is_none());
        assert!(store.history_for_card("nope").is_empty());
    }

    #[test]
    fn test_aggregates_built_per_key() {
        let store = sample_store();
        let t1 = store.history_for_terminal("t1");
        assert_eq!(t1.prior_len(at(9).timestamp_micros()), 1);
        assert_eq!(t1.prior_len(at(10).timestamp_micros()), 3);
        assert_eq!(t1.position(0), Some(1));

        let cards = &store.terminal_aggregates("t1").cards;
        assert_eq!(cards.distinct_before(at(13).timestamp_micros()), 3);
        assert_eq!(store.card_aggregates("c1").log_amounts.prior(2).count, 2);
        assert!(store.bin_aggregates("none").fraud_reports.is_empty());
        assert_eq!(store.terminal_aggregates("none").cards.distinct_before(i64::MAX), 0);

        assert_eq!(store.positions_of("h2"), &[2]);
        assert!(store.positions_of("missing").is_empty());
        assert_eq!(store.transaction_at(2).map(|tx| tx.card_id.as_str()), Some("c2"));
    }

    #[test]
    fn test_duplicate_payer_keeps_last() {
        let store = RecordStore::build(
            vec![Card::new("c1").with_bin("1"), Card::new("c1").with_bin("2")],
            vec![],
            vec![],
        );
        assert_eq!(store.card_bin("c1"), "2");
    }

    #[test]
    fn test_snapshot_survives_replace() {
        let handle = StoreHandle::new(sample_store());
        let before = handle.snapshot();
        assert_eq!(handle.generation(), 0);

        let extra = Transaction::new("h9", "c1", "t1", at(20) + Duration::minutes(1), 1.0);
        handle.replace(RecordStore::build(vec![], vec![], vec![extra]));

        assert_eq!(handle.generation(), 1);
        assert_eq!(before.transaction_count(), 5);
        assert_eq!(handle.snapshot().transaction_count(), 1);
    }
}
