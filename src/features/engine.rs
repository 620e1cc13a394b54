//! Windowed aggregation engine.
//!
//! The record store already holds prefix aggregates for every key. For each key
//! touched by a batch the engine adds the same aggregates over the batch rows and
//! over the history rows they supersede, then answers each row with binary
//! searches at the row's timestamp. Rows are independent, so they are spread over
//! scoped worker threads and written back by position.
//!
//! The engine emits raw values: `None` where an input is absent and non-finite
//! numbers where a statistic degenerates. Defaults are applied by the assembler.

use super::geo::{travel_speed_kmh, Region};
use super::history::{card_seen_at, fraud_known_at, BinAggregates, CardAggregates, Entry, TerminalAggregates};
use super::moments::{PrefixMoments, PriorMoments};
use super::window::{DistinctOwners, EventTimes, FirstEventShift, DAY_MICROS, HOUR_MICROS, SECOND_MICROS};
use super::*;
use crate::join::{EnrichedTransaction, KeyKind, KeyOverlay, TemporalJoin};
use crate::types::{Terminal, Transaction};
use chrono::{Datelike, Timelike};
use std::collections::{HashMap, HashSet};
use std::time::Instant;
use tracing::debug;

/// One named column of a [`FeatureFrame`]
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureColumn {
    Numeric(Vec<Option<f64>>),
    Category(Vec<Option<Region>>),
}

impl FeatureColumn {
    pub fn len(&self) -> usize {
        match self {
            FeatureColumn::Numeric(values) => values.len(),
            FeatureColumn::Category(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Columnar, unfilled feature values in batch order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFrame {
    transaction_ids: Vec<String>,
    columns: Vec<(&'static str, FeatureColumn)>,
}

impl FeatureFrame {
    pub fn new(transaction_ids: Vec<String>) -> Self {
        Self {
            transaction_ids,
            columns: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.transaction_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transaction_ids.is_empty()
    }

    pub fn transaction_ids(&self) -> &[String] {
        &self.transaction_ids
    }

    /// Add a column, replacing any column with the same name
    pub fn insert(&mut self, name: &'static str, column: FeatureColumn) {
        debug_assert_eq!(column.len(), self.len(), "column {name} has the wrong length");
        match self.columns.iter_mut().find(|(existing, _)| *existing == name) {
            Some((_, slot)) => *slot = column,
            None => self.columns.push((name, column)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<FeatureColumn> {
        let pos = self.columns.iter().position(|(existing, _)| *existing == name)?;
        Some(self.columns.remove(pos).1)
    }

    pub fn column(&self, name: &str) -> Option<&FeatureColumn> {
        self.columns
            .iter()
            .find(|(existing, _)| *existing == name)
            .map(|(_, column)| column)
    }

    pub fn numeric(&self, name: &str) -> Option<&[Option<f64>]> {
        match self.column(name)? {
            FeatureColumn::Numeric(values) => Some(values),
            FeatureColumn::Category(_) => None,
        }
    }

    pub fn category(&self, name: &str) -> Option<&[Option<Region>]> {
        match self.column(name)? {
            FeatureColumn::Category(values) => Some(values),
            FeatureColumn::Numeric(_) => None,
        }
    }

    /// Column names in insertion order
    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|(name, _)| *name)
    }

    fn from_rows(transaction_ids: Vec<String>, rows: &[RowFeatures]) -> Self {
        type Getter = fn(&RowFeatures) -> Option<f64>;
        let numeric: [(&'static str, Getter); 16] = [
            (TX_AMOUNT, |r| r.tx_amount),
            (TX_HOUR_OF_DAY, |r| r.tx_hour_of_day),
            (TX_DAYOFWEEK, |r| r.tx_dayofweek),
            (CARD_AGE_DAYS, |r| r.card_age_days),
            (TX_TIME_DIFF_PREV, |r| r.tx_time_diff_prev),
            (AMOUNT_CARD_NORM_PDF, |r| r.amount_card_norm_pdf),
            (TERMINAL_AGE_DAYS, |r| r.terminal_age_days),
            (TERMINAL_CARD_REUSE_RATIO_PRIOR, |r| r.terminal_card_reuse_ratio_prior),
            (SHARED_TERMINAL_WITH_FRAUDS_PRIOR, |r| r.shared_terminal_with_frauds_prior),
            (CARD_FRAUD_COUNT_LAST_1D, |r| r.card_fraud_count_last_1d),
            (CARD_NONFRAUD_COUNT_LAST_1D, |r| r.card_nonfraud_count_last_1d),
            (CARD_FRAUD_COUNT_LAST_7D, |r| r.card_fraud_count_last_7d),
            (CARD_NONFRAUD_COUNT_LAST_7D, |r| r.card_nonfraud_count_last_7d),
            (AMOUNT_TERMINAL_NORM_PDF, |r| r.amount_terminal_norm_pdf),
            (AVG_SPEED_BETWEEN_TXS, |r| r.avg_speed_between_txs),
            (CARDBIN_FRAUD_COUNT_LAST_30D, |r| r.cardbin_fraud_count_last_30d),
        ];

        let mut frame = FeatureFrame::new(transaction_ids);
        frame.insert(
            REGIAO,
            FeatureColumn::Category(rows.iter().map(|r| r.regiao).collect()),
        );
        for (name, get) in numeric {
            frame.insert(name, FeatureColumn::Numeric(rows.iter().map(get).collect()));
        }
        frame
    }
}

/// Raw feature values of one row
#[derive(Debug, Clone, Copy, Default)]
struct RowFeatures {
    regiao: Option<Region>,
    tx_amount: Option<f64>,
    tx_hour_of_day: Option<f64>,
    tx_dayofweek: Option<f64>,
    card_age_days: Option<f64>,
    tx_time_diff_prev: Option<f64>,
    amount_card_norm_pdf: Option<f64>,
    terminal_age_days: Option<f64>,
    terminal_card_reuse_ratio_prior: Option<f64>,
    shared_terminal_with_frauds_prior: Option<f64>,
    card_fraud_count_last_1d: Option<f64>,
    card_nonfraud_count_last_1d: Option<f64>,
    card_fraud_count_last_7d: Option<f64>,
    card_nonfraud_count_last_7d: Option<f64>,
    amount_terminal_norm_pdf: Option<f64>,
    avg_speed_between_txs: Option<f64>,
    cardbin_fraud_count_last_30d: Option<f64>,
}

/// A key's store aggregates with the batch's additions and removals
struct Layered<'j, 'a, A> {
    overlay: &'j KeyOverlay<'a>,
    history: &'a A,
    batch: A,
    superseded: A,
}

impl<'j, 'a, A> Layered<'j, 'a, A> {
    fn build(overlay: &'j KeyOverlay<'a>, history: &'a A, aggregate: fn(&[Entry<'_>]) -> A) -> Self {
        let batch: Vec<Entry<'a>> = overlay.batch().iter().copied().enumerate().collect();
        Self {
            overlay,
            history,
            batch: aggregate(&batch),
            superseded: aggregate(overlay.superseded()),
        }
    }

    /// Moments of the samples strictly before `end`
    fn prior_moments(&self, end: i64, samples: fn(&A) -> &PrefixMoments) -> PriorMoments {
        samples(self.history).prior(self.overlay.history().prior_len(end))
            + samples(&self.batch).prior(self.overlay.batch_prior_len(end))
            - samples(&self.superseded).prior(self.overlay.superseded_prior_len(end))
    }

    /// Events in `[end - width, end)`
    fn count_in_window(&self, end: i64, width: i64, events: fn(&A) -> &EventTimes) -> usize {
        let added = events(self.history).count_in_window(end, width) + events(&self.batch).count_in_window(end, width);
        added.saturating_sub(events(&self.superseded).count_in_window(end, width))
    }
}

/// Terminal aggregates plus the batch's effect on distinct-card counts
struct TerminalState<'j, 'a> {
    layers: Layered<'j, 'a, TerminalAggregates>,
    cards: FirstEventShift,
    fraud_cards: FirstEventShift,
}

impl<'j, 'a> TerminalState<'j, 'a> {
    fn build(overlay: &'j KeyOverlay<'a>, history: &'a TerminalAggregates) -> Self {
        Self {
            cards: first_event_shift(overlay, &history.cards, card_seen_at),
            fraud_cards: first_event_shift(overlay, &history.fraud_cards, fraud_known_at),
            layers: Layered::build(overlay, history, TerminalAggregates::build),
        }
    }

    fn distinct_cards_before(&self, end: i64) -> usize {
        self.layers
            .history
            .cards
            .distinct_before(end)
            .saturating_add_signed(self.cards.delta_before(end))
    }

    fn distinct_fraud_cards_before(&self, end: i64) -> usize {
        self.layers
            .history
            .fraud_cards
            .distinct_before(end)
            .saturating_add_signed(self.fraud_cards.delta_before(end))
    }
}

/// How the batch moves each affected card's first event at a terminal
fn first_event_shift(
    overlay: &KeyOverlay<'_>,
    owners: &DistinctOwners,
    event: fn(&Transaction) -> Option<i64>,
) -> FirstEventShift {
    let mut batch_first: HashMap<&str, i64> = HashMap::new();
    for tx in overlay.batch() {
        if let Some(at) = event(tx) {
            batch_first
                .entry(tx.card_id.as_str())
                .and_modify(|first| *first = (*first).min(at))
                .or_insert(at);
        }
    }

    let affected: HashSet<&str> = overlay
        .superseded()
        .iter()
        .map(|(_, tx)| tx.card_id.as_str())
        .chain(batch_first.keys().copied())
        .collect();

    FirstEventShift::from_pairs(affected.into_iter().map(|card| {
        let before = owners.first_event(card, |_| false);
        let kept = owners.first_event(card, |pos| overlay.is_superseded(pos));
        let after = match (kept, batch_first.get(card).copied()) {
            (Some(kept), Some(batch)) => Some(kept.min(batch)),
            (kept, batch) => kept.or(batch),
        };
        (before, after)
    }))
}

struct KeyIndices<'j, 'a> {
    cards: HashMap<&'a str, Layered<'j, 'a, CardAggregates>>,
    terminals: HashMap<&'a str, TerminalState<'j, 'a>>,
    bins: HashMap<&'a str, Layered<'j, 'a, BinAggregates>>,
}

impl<'j, 'a> KeyIndices<'j, 'a> {
    fn build(join: &'j TemporalJoin<'a>) -> Self {
        let store = join.store();
        Self {
            cards: join
                .overlays(KeyKind::Card)
                .map(|(key, overlay)| {
                    (key, Layered::build(overlay, store.card_aggregates(key), CardAggregates::build))
                })
                .collect(),
            terminals: join
                .overlays(KeyKind::Terminal)
                .map(|(key, overlay)| (key, TerminalState::build(overlay, store.terminal_aggregates(key))))
                .collect(),
            bins: join
                .overlays(KeyKind::CardBin)
                .map(|(key, overlay)| {
                    (key, Layered::build(overlay, store.bin_aggregates(key), BinAggregates::build))
                })
                .collect(),
        }
    }
}

/// Computes the feature frame of a joined batch
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    workers: usize,
}

impl FeatureEngine {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn compute(&self, join: &TemporalJoin<'_>) -> FeatureFrame {
        let start = Instant::now();
        let indices = KeyIndices::build(join);

        let rows = map_rows(join.rows(), self.workers, |row| compute_row(row, &indices, join));
        let ids = join
            .rows()
            .iter()
            .map(|row| row.tx.transaction_id.clone())
            .collect();

        debug!(
            rows = rows.len(),
            cards = indices.cards.len(),
            terminals = indices.terminals.len(),
            bins = indices.bins.len(),
            workers = self.workers,
            elapsed_us = start.elapsed().as_micros() as u64,
            "Features computed"
        );

        FeatureFrame::from_rows(ids, &rows)
    }
}

impl Default for FeatureEngine {
    fn default() -> Self {
        Self::new(1)
    }
}

fn compute_row<'a>(row: &EnrichedTransaction<'a>, indices: &KeyIndices<'_, 'a>, join: &TemporalJoin<'a>) -> RowFeatures {
    let tx = row.tx;
    let t = tx.at_micros();
    let log_amount = tx.tx_amount.ln_1p();

    let mut features = RowFeatures {
        regiao: row
            .terminal
            .and_then(|terminal| terminal.latitude)
            .filter(|lat| !lat.is_nan())
            .map(|lat| Region::from_latitude(Some(lat))),
        tx_amount: Some(log_amount),
        tx_hour_of_day: Some(f64::from(tx.tx_datetime.hour())),
        tx_dayofweek: Some(f64::from(tx.tx_datetime.weekday().num_days_from_monday())),
        card_age_days: row
            .card
            .and_then(|card| card.card_first_transaction)
            .map(|first| age_days(t, first.timestamp_micros())),
        terminal_age_days: row
            .terminal
            .and_then(|terminal| terminal.terminal_operation_start)
            .map(|start| age_days(t, start.timestamp_micros())),
        ..RowFeatures::default()
    };

    if let Some(card) = indices.cards.get(tx.card_id.as_str()) {
        let previous = card.overlay.previous(t);

        features.tx_time_diff_prev = previous.map(|prev| {
            let seconds = (t - prev.at_micros()) as f64 / SECOND_MICROS as f64;
            (seconds + 1.0).log10()
        });
        features.amount_card_norm_pdf = card.prior_moments(t, |a| &a.log_amounts).norm_pdf(log_amount);
        features.avg_speed_between_txs = previous.and_then(|prev| {
            let elapsed_hours = (t - prev.at_micros()) as f64 / HOUR_MICROS as f64;
            let from = join
                .store()
                .get_seller(&prev.terminal_id)
                .and_then(Terminal::location);
            let to = row.terminal.and_then(Terminal::location);
            travel_speed_kmh(from, to, elapsed_hours)
        });

        let frauds = |width| Some(card.count_in_window(t, width, |a| &a.fraud_reports) as f64);
        let non_frauds = |width| Some(card.count_in_window(t, width, |a| &a.non_fraud) as f64);
        features.card_fraud_count_last_1d = frauds(DAY_MICROS);
        features.card_fraud_count_last_7d = frauds(7 * DAY_MICROS);
        features.card_nonfraud_count_last_1d = non_frauds(DAY_MICROS);
        features.card_nonfraud_count_last_7d = non_frauds(7 * DAY_MICROS);
    }

    if let Some(terminal) = indices.terminals.get(tx.terminal_id.as_str()) {
        let prior = terminal.layers.overlay.prior_len(t);
        features.amount_terminal_norm_pdf = terminal
            .layers
            .prior_moments(t, |a| &a.log_amounts)
            .norm_pdf(log_amount);
        features.terminal_card_reuse_ratio_prior = (prior > 0).then(|| {
            let reused = prior.saturating_sub(terminal.distinct_cards_before(t));
            reused as f64 / prior as f64
        });
        features.shared_terminal_with_frauds_prior = Some(terminal.distinct_fraud_cards_before(t) as f64);
    }

    features.cardbin_fraud_count_last_30d = indices
        .bins
        .get(row.card_bin)
        .map(|bin| bin.count_in_window(t, 30 * DAY_MICROS, |a| &a.fraud_reports) as f64);

    features
}

/// Whole days elapsed, floored
fn age_days(at: i64, since: i64) -> f64 {
    (at - since).div_euclid(DAY_MICROS) as f64
}

/// Map `f` over `items` on up to `workers` scoped threads, keeping input order.
fn map_rows<T, R, F>(items: &[T], workers: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    if workers <= 1 || items.len() < 2 {
        return items.iter().map(f).collect();
    }

    let chunk_size = items.len().div_ceil(workers);
    std::thread::scope(|scope| {
        let f = &f;
        let handles: Vec<_> = items
            .chunks(chunk_size)
            .map(|chunk| scope.spawn(move || chunk.iter().map(f).collect::<Vec<R>>()))
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect()
    })
}
