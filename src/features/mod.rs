//! Point-in-time feature computation over a [`TemporalJoin`](crate::join::TemporalJoin).

pub mod engine;
pub mod geo;
pub mod history;
pub mod moments;
pub mod window;

pub use engine::{FeatureColumn, FeatureEngine, FeatureFrame};
pub use geo::Region;

pub const REGIAO: &str = "regiao";
pub const TX_AMOUNT: &str = "tx_amount";
pub const TX_HOUR_OF_DAY: &str = "tx_hour_of_day";
pub const TX_DAYOFWEEK: &str = "tx_dayofweek";
pub const CARD_AGE_DAYS: &str = "card_age_days";
pub const TX_TIME_DIFF_PREV: &str = "tx_time_diff_prev";
pub const AMOUNT_CARD_NORM_PDF: &str = "amount_card_norm_pdf";
pub const TERMINAL_AGE_DAYS: &str = "terminal_age_days";
pub const TERMINAL_CARD_REUSE_RATIO_PRIOR: &str = "terminal_card_reuse_ratio_prior";
pub const SHARED_TERMINAL_WITH_FRAUDS_PRIOR: &str = "shared_terminal_with_frauds_prior";
pub const CARD_FRAUD_COUNT_LAST_1D: &str = "card_fraud_count_last_1d";
pub const CARD_NONFRAUD_COUNT_LAST_1D: &str = "card_nonfraud_count_last_1d";
pub const CARD_FRAUD_COUNT_LAST_7D: &str = "card_fraud_count_last_7d";
pub const CARD_NONFRAUD_COUNT_LAST_7D: &str = "card_nonfraud_count_last_7d";
pub const AMOUNT_TERMINAL_NORM_PDF: &str = "amount_terminal_norm_pdf";
pub const AVG_SPEED_BETWEEN_TXS: &str = "avg_speed_between_txs";
pub const CARDBIN_FRAUD_COUNT_LAST_30D: &str = "cardbin_fraud_count_last_30d";
