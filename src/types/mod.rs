//! Record and result types for the fraud feature pipeline

pub mod card;
pub mod fields;
pub mod prediction;
pub mod reply;
pub mod terminal;
pub mod transaction;

pub use card::{Card, UNKNOWN_BIN};
pub use prediction::{PredictionLog, ScoredTransaction};
pub use reply::{ErrorReply, ReloadReply, ScoringReply};
pub use terminal::Terminal;
pub use transaction::Transaction;
