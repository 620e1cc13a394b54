//! Seller (terminal) reference records

use crate::types::fields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static terminal attributes, looked up by `terminal_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Terminal {
    #[serde(deserialize_with = "fields::identifier")]
    pub terminal_id: String,

    #[serde(default, deserialize_with = "fields::optional_number")]
    pub latitude: Option<f64>,

    #[serde(default, deserialize_with = "fields::optional_number")]
    pub longitude: Option<f64>,

    /// When the terminal started operating
    #[serde(default, deserialize_with = "fields::optional_timestamp")]
    pub terminal_operation_start: Option<DateTime<Utc>>,

    #[serde(default, deserialize_with = "fields::optional_text")]
    pub terminal_soft_descriptor: Option<String>,
}

impl Terminal {
    pub fn new(terminal_id: impl Into<String>) -> Self {
        Self {
            terminal_id: terminal_id.into(),
            latitude: None,
            longitude: None,
            terminal_operation_start: None,
            terminal_soft_descriptor: None,
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.latitude = Some(latitude);
        self.longitude = Some(longitude);
        self
    }

    pub fn with_operation_start(mut self, at: DateTime<Utc>) -> Self {
        self.terminal_operation_start = Some(at);
        self
    }

    /// `(latitude, longitude)` when both are present and finite
    pub fn location(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}
