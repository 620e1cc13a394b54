//! Temporal join of a scoring batch with the record store.
//!
//! Every key touched by the batch (card, terminal, card bin) gets a
//! [`KeyOverlay`]: the store's sorted history of that key, the batch rows of the
//! same key in time order, and the history rows the batch supersedes.
//! `prior_slice` answers "everything of this key strictly before T", which also
//! makes earlier rows of the same batch visible to later ones.

use crate::store::{HistorySlice, RecordStore};
use crate::types::{Card, Terminal, Transaction};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

/// Key families an overlay can be built for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    Card,
    Terminal,
    CardBin,
}

/// A batch transaction merged with its payer and seller attributes
#[derive(Debug, Clone, Copy)]
pub struct EnrichedTransaction<'a> {
    pub tx: &'a Transaction,
    pub card: Option<&'a Card>,
    pub terminal: Option<&'a Terminal>,
    /// Pooling bin, `UNKNOWN` when absent
    pub card_bin: &'a str,
}

/// One key's history together with the batch rows that change it
#[derive(Debug)]
pub struct KeyOverlay<'a> {
    history: HistorySlice<'a>,
    /// Ascending by time, ties in submission order
    batch: Vec<&'a Transaction>,
    batch_times: Vec<i64>,
    /// History rows replaced by a batch row with the same id, ascending by time
    superseded: Vec<(usize, &'a Transaction)>,
    superseded_times: Vec<i64>,
    /// Store positions of `superseded`, sorted
    superseded_positions: Vec<usize>,
}

impl<'a> KeyOverlay<'a> {
    fn new(history: HistorySlice<'a>, batch: Vec<&'a Transaction>, superseded: Vec<(usize, &'a Transaction)>) -> Self {
        let mut superseded_positions: Vec<usize> = superseded.iter().map(|(pos, _)| *pos).collect();
        superseded_positions.sort_unstable();

        Self {
            history,
            batch_times: batch.iter().map(|tx| tx.at_micros()).collect(),
            batch,
            superseded_times: superseded.iter().map(|(_, tx)| tx.at_micros()).collect(),
            superseded,
            superseded_positions,
        }
    }

    pub fn history(&self) -> HistorySlice<'a> {
        self.history
    }

    pub fn batch(&self) -> &[&'a Transaction] {
        &self.batch
    }

    pub fn superseded(&self) -> &[(usize, &'a Transaction)] {
        &self.superseded
    }

    pub fn is_superseded(&self, position: usize) -> bool {
        self.superseded_positions.binary_search(&position).is_ok()
    }

    pub fn batch_prior_len(&self, reference_micros: i64) -> usize {
        self.batch_times.partition_point(|&t| t < reference_micros)
    }

    pub fn superseded_prior_len(&self, reference_micros: i64) -> usize {
        self.superseded_times.partition_point(|&t| t < reference_micros)
    }

    /// Number of entries strictly before `reference_micros`
    pub fn prior_len(&self, reference_micros: i64) -> usize {
        self.history.prior_len(reference_micros) + self.batch_prior_len(reference_micros)
            - self.superseded_prior_len(reference_micros)
    }

    /// Latest entry strictly before `reference_micros`; a batch row wins a tie
    /// with history.
    pub fn previous(&self, reference_micros: i64) -> Option<&'a Transaction> {
        let past = (0..self.history.prior_len(reference_micros))
            .rev()
            .find(|&i| self.history.position(i).is_some_and(|pos| !self.is_superseded(pos)))
            .and_then(|i| self.history.get(i));
        let batch = self
            .batch_prior_len(reference_micros)
            .checked_sub(1)
            .map(|i| self.batch[i]);

        match (past, batch) {
            (Some(past), Some(batch)) if past.tx_datetime > batch.tx_datetime => Some(past),
            (past, None) => past,
            (_, batch) => batch,
        }
    }

    /// Entries strictly before `reference`, ascending.
    ///
    /// Equal timestamps order history first, then batch rows in submission order.
    pub fn prior_slice(&self, reference: DateTime<Utc>) -> Vec<&'a Transaction> {
        let end = reference.timestamp_micros();
        let history_len = self.history.prior_len(end);
        let batch_len = self.batch_prior_len(end);

        let mut merged = Vec::with_capacity(history_len + batch_len);
        let mut pending = self.batch[..batch_len].iter().copied().peekable();
        for (pos, past) in self.history.entries().take(history_len) {
            if self.is_superseded(pos) {
                continue;
            }
            while let Some(next) = pending.next_if(|tx| tx.tx_datetime < past.tx_datetime) {
                merged.push(next);
            }
            merged.push(past);
        }
        merged.extend(pending);
        merged
    }
}

/// Counts of reference rows the join could not find
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinDiagnostics {
    pub missing_payers: usize,
    pub missing_sellers: usize,
    /// History rows replaced by a batch row with the same id
    pub superseded_history: usize,
}

/// Result of [`join_batch`]: enriched rows plus per-key overlays
pub struct TemporalJoin<'a> {
    store: &'a RecordStore,
    rows: Vec<EnrichedTransaction<'a>>,
    by_card: HashMap<&'a str, KeyOverlay<'a>>,
    by_terminal: HashMap<&'a str, KeyOverlay<'a>>,
    by_bin: HashMap<&'a str, KeyOverlay<'a>>,
    diagnostics: JoinDiagnostics,
}

type KeyRows<'a, T> = HashMap<&'a str, Vec<T>>;

/// Left-join the batch on card and terminal and build the overlays it needs.
///
/// Work is proportional to the batch and the rows it supersedes, not to the
/// history of the keys it touches.
pub fn join_batch<'a>(batch: &'a [Transaction], store: &'a RecordStore) -> TemporalJoin<'a> {
    let mut diagnostics = JoinDiagnostics::default();

    let rows: Vec<EnrichedTransaction<'a>> = batch
        .iter()
        .map(|tx| {
            let card = store.get_payer(&tx.card_id);
            let terminal = store.get_seller(&tx.terminal_id);
            if card.is_none() {
                diagnostics.missing_payers += 1;
                debug!(transaction_id = %tx.transaction_id, card_id = %tx.card_id, "No payer record");
            }
            if terminal.is_none() {
                diagnostics.missing_sellers += 1;
                debug!(transaction_id = %tx.transaction_id, terminal_id = %tx.terminal_id, "No seller record");
            }
            EnrichedTransaction {
                tx,
                card,
                terminal,
                card_bin: store.card_bin(&tx.card_id),
            }
        })
        .collect();

    let mut superseded: Vec<(usize, &'a Transaction)> = batch
        .iter()
        .flat_map(|tx| store.positions_of(&tx.transaction_id))
        .filter_map(|&pos| store.transaction_at(pos).map(|past| (pos, past)))
        .collect();
    superseded.sort_by_key(|(pos, past)| (past.tx_datetime, *pos));
    superseded.dedup_by_key(|(pos, _)| *pos);
    diagnostics.superseded_history = superseded.len();

    let mut card_replaced: KeyRows<'a, (usize, &'a Transaction)> = HashMap::new();
    let mut terminal_replaced: KeyRows<'a, (usize, &'a Transaction)> = HashMap::new();
    let mut bin_replaced: KeyRows<'a, (usize, &'a Transaction)> = HashMap::new();
    for &(pos, past) in &superseded {
        card_replaced.entry(past.card_id.as_str()).or_default().push((pos, past));
        terminal_replaced.entry(past.terminal_id.as_str()).or_default().push((pos, past));
        bin_replaced.entry(store.card_bin(&past.card_id)).or_default().push((pos, past));
    }

    // Batch rows grouped per key, sorted by time; stable so ties keep submission order.
    let mut sorted: Vec<&EnrichedTransaction<'a>> = rows.iter().collect();
    sorted.sort_by_key(|row| row.tx.tx_datetime);

    let mut card_rows: KeyRows<'a, &'a Transaction> = HashMap::new();
    let mut terminal_rows: KeyRows<'a, &'a Transaction> = HashMap::new();
    let mut bin_rows: KeyRows<'a, &'a Transaction> = HashMap::new();
    for row in sorted {
        let tx: &'a Transaction = row.tx;
        card_rows.entry(tx.card_id.as_str()).or_default().push(tx);
        terminal_rows.entry(tx.terminal_id.as_str()).or_default().push(tx);
        bin_rows.entry(row.card_bin).or_default().push(tx);
    }

    let by_card = card_rows
        .into_iter()
        .map(|(key, rows)| {
            let replaced = card_replaced.remove(key).unwrap_or_default();
            (key, KeyOverlay::new(store.history_for_card(key), rows, replaced))
        })
        .collect();
    let by_terminal = terminal_rows
        .into_iter()
        .map(|(key, rows)| {
            let replaced = terminal_replaced.remove(key).unwrap_or_default();
            (key, KeyOverlay::new(store.history_for_terminal(key), rows, replaced))
        })
        .collect();
    let by_bin = bin_rows
        .into_iter()
        .map(|(key, rows)| {
            let replaced = bin_replaced.remove(key).unwrap_or_default();
            (key, KeyOverlay::new(store.history_for_bin(key), rows, replaced))
        })
        .collect();

    TemporalJoin {
        store,
        rows,
        by_card,
        by_terminal,
        by_bin,
        diagnostics,
    }
}

impl<'a> TemporalJoin<'a> {
    /// Enriched rows in submission order
    pub fn rows(&self) -> &[EnrichedTransaction<'a>] {
        &self.rows
    }

    pub fn store(&self) -> &'a RecordStore {
        self.store
    }

    pub fn diagnostics(&self) -> JoinDiagnostics {
        self.diagnostics
    }

    pub fn overlay(&self, kind: KeyKind, key: &str) -> Option<&KeyOverlay<'a>> {
        match kind {
            KeyKind::Card => self.by_card.get(key),
            KeyKind::Terminal => self.by_terminal.get(key),
            KeyKind::CardBin => self.by_bin.get(key),
        }
    }

    /// All overlays of one key family
    pub fn overlays(&self, kind: KeyKind) -> impl Iterator<Item = (&'a str, &KeyOverlay<'a>)> + '_ {
        let map = match kind {
            KeyKind::Card => &self.by_card,
            KeyKind::Terminal => &self.by_terminal,
            KeyKind::CardBin => &self.by_bin,
        };
        map.iter().map(|(key, overlay)| (*key, overlay))
    }

    /// Transactions of `key` strictly before `reference_time`, ascending.
    ///
    /// Keys the batch never touched have no overlay and yield nothing.
    pub fn prior_slice(&self, kind: KeyKind, key: &str, reference_time: DateTime<Utc>) -> Vec<&'a Transaction> {
        self.overlay(kind, key)
            .map(|overlay| overlay.prior_slice(reference_time))
            .unwrap_or_default()
    }
}
