//! Feature vector assembly for classifier inference.
//!
//! Turns the engine's raw [`FeatureFrame`] into a dense [`FeatureTable`] in the
//! exact column order the scoring models were trained with, applying the single
//! default-filling policy for absent and non-finite values.

use crate::error::{PipelineError, PipelineResult};
use crate::features::{self, FeatureFrame, Region};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::BTreeMap;

/// Column contract with the scoring function, in order
pub const FEATURE_COLUMNS: [&str; 17] = [
    features::REGIAO,
    features::TX_AMOUNT,
    features::TX_HOUR_OF_DAY,
    features::TX_DAYOFWEEK,
    features::CARD_AGE_DAYS,
    features::TX_TIME_DIFF_PREV,
    features::AMOUNT_CARD_NORM_PDF,
    features::TERMINAL_AGE_DAYS,
    features::TERMINAL_CARD_REUSE_RATIO_PRIOR,
    features::SHARED_TERMINAL_WITH_FRAUDS_PRIOR,
    features::CARD_FRAUD_COUNT_LAST_1D,
    features::CARD_NONFRAUD_COUNT_LAST_1D,
    features::CARD_FRAUD_COUNT_LAST_7D,
    features::CARD_NONFRAUD_COUNT_LAST_7D,
    features::AMOUNT_TERMINAL_NORM_PDF,
    features::AVG_SPEED_BETWEEN_TXS,
    features::CARDBIN_FRAUD_COUNT_LAST_30D,
];

/// Numeric columns follow the categorical `regiao`
pub const NUMERIC_FEATURES: usize = FEATURE_COLUMNS.len() - 1;

/// Density score used when no usable prior distribution exists
pub const NEUTRAL_DENSITY: f64 = 0.5;

/// Speed used when elapsed time is zero or the ratio is not finite (km/h)
pub const SPEED_SENTINEL: f64 = 800.0;

/// Replacement values for one numeric column
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FillDefaults {
    pub absent: f64,
    pub non_finite: f64,
}

/// Default policy, applied once per cell
pub fn fill_defaults(column: &str) -> FillDefaults {
    match column {
        features::AMOUNT_CARD_NORM_PDF | features::AMOUNT_TERMINAL_NORM_PDF => FillDefaults {
            absent: NEUTRAL_DENSITY,
            non_finite: NEUTRAL_DENSITY,
        },
        features::AVG_SPEED_BETWEEN_TXS => FillDefaults {
            absent: 0.0,
            non_finite: SPEED_SENTINEL,
        },
        _ => FillDefaults {
            absent: 0.0,
            non_finite: 0.0,
        },
    }
}

/// How many cells the default policy had to fill
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    pub absent: usize,
    pub non_finite: usize,
    /// Filled cells per column, only columns with at least one fill
    pub by_column: BTreeMap<&'static str, usize>,
}

impl FillReport {
    pub fn total(&self) -> usize {
        self.absent + self.non_finite
    }

    fn record(&mut self, column: &'static str, non_finite: bool) {
        if non_finite {
            self.non_finite += 1;
        } else {
            self.absent += 1;
        }
        *self.by_column.entry(column).or_default() += 1;
    }
}

/// One fully populated feature vector
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRow {
    pub transaction_id: String,
    pub regiao: Region,
    /// Columns `FEATURE_COLUMNS[1..]` in order
    pub values: [f64; NUMERIC_FEATURES],
}

impl FeatureRow {
    /// Numeric value by column name
    pub fn get(&self, column: &str) -> Option<f64> {
        FEATURE_COLUMNS[1..]
            .iter()
            .position(|name| *name == column)
            .map(|pos| self.values[pos])
    }
}

impl Serialize for FeatureRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(FEATURE_COLUMNS.len() + 1))?;
        map.serialize_entry("transaction_id", &self.transaction_id)?;
        map.serialize_entry(features::REGIAO, &self.regiao)?;
        for (name, value) in FEATURE_COLUMNS[1..].iter().zip(self.values.iter()) {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Dense feature table in batch order
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
#[serde(transparent)]
pub struct FeatureTable {
    rows: Vec<FeatureRow>,
}

impl FeatureTable {
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn columns(&self) -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }

    pub fn transaction_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.rows.iter().map(|row| row.transaction_id.as_str())
    }
}

/// Assembles engine output into the scoring contract.
pub struct FeatureAssembler;

impl FeatureAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Fill and order the frame's columns.
    ///
    /// Fails with [`PipelineError::Schema`] when a contract column is missing, so
    /// the classifier never sees a partial vector.
    pub fn assemble(&self, frame: &FeatureFrame) -> PipelineResult<(FeatureTable, FillReport)> {
        let regiao = frame
            .category(features::REGIAO)
            .ok_or_else(|| PipelineError::Schema(features::REGIAO.to_string()))?;

        let mut numeric = Vec::with_capacity(NUMERIC_FEATURES);
        for name in &FEATURE_COLUMNS[1..] {
            let column = frame
                .numeric(name)
                .ok_or_else(|| PipelineError::Schema(name.to_string()))?;
            numeric.push((*name, column, fill_defaults(name)));
        }

        let mut fills = FillReport::default();
        let rows = frame
            .transaction_ids()
            .iter()
            .enumerate()
            .map(|(i, id)| {
                let region = regiao[i].unwrap_or_else(|| {
                    fills.record(features::REGIAO, false);
                    Region::Unknown
                });

                let mut values = [0.0; NUMERIC_FEATURES];
                for (slot, (name, column, defaults)) in values.iter_mut().zip(&numeric) {
                    *slot = match column[i] {
                        Some(v) if v.is_finite() => v,
                        Some(_) => {
                            fills.record(*name, true);
                            defaults.non_finite
                        }
                        None => {
                            fills.record(*name, false);
                            defaults.absent
                        }
                    };
                }

                FeatureRow {
                    transaction_id: id.clone(),
                    regiao: region,
                    values,
                }
            })
            .collect();

        Ok((FeatureTable::new(rows), fills))
    }

    /// Get the number of columns in the contract
    pub fn feature_count(&self) -> usize {
        FEATURE_COLUMNS.len()
    }

    /// Get the contract column names in order
    pub fn feature_names(&self) -> &'static [&'static str] {
        &FEATURE_COLUMNS
    }
}

impl Default for FeatureAssembler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::FeatureColumn;

    fn full_frame(ids: &[&str]) -> FeatureFrame {
        let mut frame = FeatureFrame::new(ids.iter().map(|id| id.to_string()).collect());
        frame.insert(features::REGIAO, FeatureColumn::Category(vec![Some(Region::Norte); ids.len()]));
        for name in &FEATURE_COLUMNS[1..] {
            frame.insert(*name, FeatureColumn::Numeric(vec![Some(1.0); ids.len()]));
        }
        frame
    }

    #[test]
    fn test_feature_count() {
        let assembler = FeatureAssembler::new();
        assert_eq!(assembler.feature_count(), 17);
        assert_eq!(assembler.feature_names()[0], "regiao");
        assert_eq!(assembler.feature_names()[16], "cardbin_fraud_count_last_30d");
    }

    #[test]
    fn test_clean_frame_needs_no_fills() {
        let (table, fills) = FeatureAssembler::new().assemble(&full_frame(&["a", "b"])).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(fills.total(), 0);
        assert_eq!(table.rows()[1].transaction_id, "b");
        assert_eq!(table.rows()[0].get(features::TX_AMOUNT), Some(1.0));
    }

    #[test]
    fn test_default_policy_per_column() {
        let mut frame = full_frame(&["a", "b"]);
        frame.insert(features::REGIAO, FeatureColumn::Category(vec![None, Some(Region::Sudeste)]));
        frame.insert(
            features::AMOUNT_CARD_NORM_PDF,
            FeatureColumn::Numeric(vec![None, Some(f64::NAN)]),
        );
        frame.insert(
            features::AVG_SPEED_BETWEEN_TXS,
            FeatureColumn::Numeric(vec![None, Some(f64::INFINITY)]),
        );
        frame.insert(
            features::TX_TIME_DIFF_PREV,
            FeatureColumn::Numeric(vec![None, Some(f64::NEG_INFINITY)]),
        );

        let (table, fills) = FeatureAssembler::new().assemble(&frame).unwrap();
        let (a, b) = (&table.rows()[0], &table.rows()[1]);

        assert_eq!(a.regiao, Region::Unknown);
        assert_eq!(b.regiao, Region::Sudeste);
        assert_eq!(a.get(features::AMOUNT_CARD_NORM_PDF), Some(0.5));
        assert_eq!(b.get(features::AMOUNT_CARD_NORM_PDF), Some(0.5));
        assert_eq!(a.get(features::AVG_SPEED_BETWEEN_TXS), Some(0.0));
        assert_eq!(b.get(features::AVG_SPEED_BETWEEN_TXS), Some(800.0));
        assert_eq!(a.get(features::TX_TIME_DIFF_PREV), Some(0.0));
        assert_eq!(b.get(features::TX_TIME_DIFF_PREV), Some(0.0));

        assert_eq!(fills.absent, 4);
        assert_eq!(fills.non_finite, 3);
        assert_eq!(fills.by_column[features::AVG_SPEED_BETWEEN_TXS], 2);
    }

    #[test]
    fn test_missing_column_is_schema_error() {
        let mut frame = full_frame(&["a"]);
        frame.remove(features::CARDBIN_FRAUD_COUNT_LAST_30D);

        match FeatureAssembler::new().assemble(&frame) {
            Err(PipelineError::Schema(column)) => assert_eq!(column, "cardbin_fraud_count_last_30d"),
            other => panic!("expected schema error, got {other:?}"),
        }
    }

    #[test]
    fn test_row_serializes_in_contract_order() {
        let (table, _) = FeatureAssembler::new().assemble(&full_frame(&["a"])).unwrap();
        let json = serde_json::to_string(&table.rows()[0]).unwrap();
        assert!(json.starts_with(r#"{"transaction_id":"a","regiao":"Norte","tx_amount":1.0"#));
        assert!(json.ends_with(r#""cardbin_fraud_count_last_30d":1.0}"#));
    }

    #[test]
    fn test_table_serializes_as_row_array() {
        let (table, _) = FeatureAssembler::new().assemble(&full_frame(&["a", "b"])).unwrap();
        let json = serde_json::to_value(&table).unwrap();
        let rows = json.as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["transaction_id"], "b");
    }
}
