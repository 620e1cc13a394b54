//! Field-level parsing shared by the CSV and JSON record decoders.
//!
//! Both decoders go through `serde_json::Value`; CSV cells arrive as strings.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

/// Parse a timestamp in any of the accepted textual forms.
///
/// RFC 3339 values keep their offset and are converted to UTC; naive values and
/// bare dates are interpreted as UTC (a bare date is midnight).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Raw scalar as it arrives from JSON, or a CSV cell as text.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    fn into_text(self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Text(s) => s,
        }
    }
}

pub(crate) fn timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_timestamp(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
}

pub(crate) fn optional_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`"))),
    }
}

/// 0/1, true/false, "0"/"1"; absent or empty means false.
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(false),
        Some(Scalar::Bool(b)) => Ok(b),
        Some(Scalar::Int(i)) => Ok(i != 0),
        Some(Scalar::Float(f)) => Ok(f != 0.0),
        Some(Scalar::Text(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "" | "0" | "false" | "0.0" => Ok(false),
            "1" | "true" | "1.0" => Ok(true),
            other => Err(serde::de::Error::custom(format!("invalid flag `{other}`"))),
        },
    }
}

fn scalar_number<E: serde::de::Error>(value: Scalar) -> Result<f64, E> {
    match value {
        Scalar::Int(i) => Ok(i as f64),
        Scalar::Float(f) => Ok(f),
        Scalar::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| E::custom(format!("invalid number `{s}`"))),
        Scalar::Bool(b) => Err(E::custom(format!("invalid number `{b}`"))),
    }
}

/// Numbers may arrive as JSON numbers or as CSV text.
pub(crate) fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_number(Scalar::deserialize(deserializer)?)
}

pub(crate) fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Scalar>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Scalar::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(value) => scalar_number(value).map(Some),
    }
}

/// Identifiers may arrive as numbers (JSON ints).
pub(crate) fn identifier<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Scalar::deserialize(deserializer)?.into_text().trim().to_string())
}

pub(crate) fn optional_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?
        .map(|s| s.into_text().trim().to_string())
        .filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone, Timelike};

    #[test]
    fn test_parse_timestamp_forms() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 5, 14, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-03-05T14:30:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T14:30:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-05T11:30:00-03:00"), Some(expected));

        let date = parse_timestamp("2024-03-05").unwrap();
        assert_eq!((date.day(), date.hour()), (5, 0));
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("  ").is_none());
    }

    #[derive(Deserialize)]
    struct Row {
        #[serde(deserialize_with = "number")]
        amount: f64,
        #[serde(default, deserialize_with = "optional_number")]
        latitude: Option<f64>,
        #[serde(deserialize_with = "identifier")]
        id: String,
    }

    #[test]
    fn test_numbers_from_text_and_json() {
        let row: Row = serde_json::from_str(r#"{"amount": "12.50", "latitude": "", "id": "0042"}"#).unwrap();
        assert_eq!(row.amount, 12.5);
        assert_eq!(row.latitude, None);
        assert_eq!(row.id, "0042");

        let row: Row = serde_json::from_str(r#"{"amount": 3, "latitude": -23.5, "id": 7}"#).unwrap();
        assert_eq!(row.amount, 3.0);
        assert_eq!(row.latitude, Some(-23.5));
        assert_eq!(row.id, "7");

        assert!(serde_json::from_str::<Row>(r#"{"amount": "lots", "id": "x"}"#).is_err());
    }

    #[test]
    fn test_fractional_seconds_keep_microseconds() {
        let ts = parse_timestamp("2024-03-05 14:30:00.000001").unwrap();
        assert_eq!(ts.timestamp_subsec_micros(), 1);
    }
}
