use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Numeric timestamps below this are epoch seconds, at or above it epoch milliseconds.
const SECONDS_CUTOFF: f64 = 100_000_000_000.0;

/// A point in time, always held as epoch milliseconds.
///
/// Deserializes from epoch seconds, epoch milliseconds, RFC 3339 strings and
/// naive ISO strings (taken as UTC). Serializes as integer milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Timestamp(Utc::now().timestamp_millis())
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn from_number(value: f64) -> Option<Self> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let ms = if value < SECONDS_CUTOFF { value * 1000.0 } else { value };
        Some(Timestamp(ms.round() as i64))
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Timestamp(dt.timestamp_millis()));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(Timestamp(Utc.from_utc_datetime(&naive).timestamp_millis()));
            }
        }
        s.parse::<f64>().ok().and_then(Self::from_number)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

struct TimestampVisitor;

impl<'de> Visitor<'de> for TimestampVisitor {
    type Value = Timestamp;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an epoch number or an ISO 8601 timestamp string")
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Timestamp, E> {
        Timestamp::from_number(v as f64).ok_or_else(|| E::custom(format!("invalid timestamp: {}", v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Timestamp, E> {
        Timestamp::from_number(v as f64).ok_or_else(|| E::custom(format!("invalid timestamp: {}", v)))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Timestamp, E> {
        Timestamp::from_number(v).ok_or_else(|| E::custom(format!("invalid timestamp: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Timestamp, E> {
        Timestamp::parse(v).ok_or_else(|| E::custom(format!("invalid timestamp: {:?}", v)))
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(TimestampVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_seconds_and_millis_agree() {
        let secs: Timestamp = serde_json::from_str("1714557600").unwrap();
        let millis: Timestamp = serde_json::from_str("1714557600000").unwrap();
        assert_eq!(secs, millis);
        assert_eq!(millis.as_millis(), 1_714_557_600_000);
    }

    #[test]
    fn fractional_seconds_round_to_millis() {
        let ts: Timestamp = serde_json::from_str("1714557600.25").unwrap();
        assert_eq!(ts.as_millis(), 1_714_557_600_250);
    }

    #[test]
    fn rfc3339_with_offset() {
        let utc: Timestamp = serde_json::from_str("\"2024-05-01T10:00:00Z\"").unwrap();
        let shifted: Timestamp = serde_json::from_str("\"2024-05-01T12:00:00+02:00\"").unwrap();
        assert_eq!(utc, shifted);
        assert_eq!(utc.as_millis(), 1_714_557_600_000);
    }

    #[test]
    fn naive_iso_is_utc() {
        let ts: Timestamp = serde_json::from_str("\"2024-05-01T10:00:00.500000\"").unwrap();
        assert_eq!(ts.as_millis(), 1_714_557_600_500);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(serde_json::from_str::<Timestamp>("\"yesterday\"").is_err());
        assert!(serde_json::from_str::<Timestamp>("-5").is_err());
        assert!(Timestamp::parse("").is_none());
    }

    #[test]
    fn serializes_as_millis() {
        let json = serde_json::to_string(&Timestamp(42)).unwrap();
        assert_eq!(json, "42");
    }
}
