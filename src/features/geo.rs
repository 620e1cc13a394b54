//! Terminal geography: region buckets and travel speed between transactions.

use serde::{Deserialize, Serialize};

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Latitude bucket of a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Region {
    #[serde(rename = "Norte")]
    Norte,
    #[serde(rename = "Centro-Oeste")]
    CentroOeste,
    #[serde(rename = "Sudeste")]
    Sudeste,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl Region {
    /// Categories in the order the scoring models were fitted with
    pub const ALL: [Region; 4] = [
        Region::CentroOeste,
        Region::Norte,
        Region::Sudeste,
        Region::Unknown,
    ];

    pub fn from_latitude(latitude: Option<f64>) -> Self {
        match latitude {
            Some(lat) if lat > -10.0 => Region::Norte,
            Some(lat) if lat > -20.0 => Region::CentroOeste,
            Some(lat) if lat <= -20.0 => Region::Sudeste,
            // absent or NaN
            _ => Region::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::Norte => "Norte",
            Region::CentroOeste => "Centro-Oeste",
            Region::Sudeste => "Sudeste",
            Region::Unknown => "UNKNOWN",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        Region::ALL.into_iter().find(|region| region.as_str() == label)
    }
}

/// Great-circle distance in kilometers
pub fn haversine_km(from: (f64, f64), to: (f64, f64)) -> f64 {
    let (lat1, lon1) = (from.0.to_radians(), from.1.to_radians());
    let (lat2, lon2) = (to.0.to_radians(), to.1.to_radians());
    let d_lat = lat2 - lat1;
    let d_lon = lon2 - lon1;

    let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
    EARTH_RADIUS_KM * 2.0 * a.sqrt().asin()
}

/// Average speed (km/h) needed to travel between two terminals.
///
/// `None` when either location is unknown. Zero or negative elapsed time yields
/// +inf. The engine always passes a strictly earlier previous transaction, so
/// only direct callers reach that case.
pub fn travel_speed_kmh(from: Option<(f64, f64)>, to: Option<(f64, f64)>, elapsed_hours: f64) -> Option<f64> {
    let (from, to) = (from?, to?);
    if elapsed_hours <= 0.0 {
        return Some(f64::INFINITY);
    }
    Some(haversine_km(from, to) / elapsed_hours)
}
