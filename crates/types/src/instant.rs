//! The single internal date/time representation.
//!
//! Hosted document stores accept native dates, store-specific timestamp
//! objects and ISO strings interchangeably. Inside DPR there is exactly one
//! representation: [`Instant`], a UTC timestamp.
//! Parsing from every external shape happens here, totally (never panics),
//! and documents always serialize the same fixed wire format so that stored
//! values compare consistently.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire format for timestamps in documents: fixed-width UTC with millisecond
/// precision, e.g. `2026-03-01T14:30:00.000Z`.
const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// A UTC instant. The only date/time type the services ever see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Instant(DateTime<Utc>);

impl Instant {
    // The wire format carries milliseconds, so sub-millisecond precision must
    // not survive construction or a value would no longer equal itself after
    // a store round-trip.
    fn new(dt: DateTime<Utc>) -> Self {
        Self(
            Utc.timestamp_millis_opt(dt.timestamp_millis())
                .single()
                .unwrap_or(dt),
        )
    }

    /// The current wall-clock time, at wire precision.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self::new(dt)
    }

    /// The Unix epoch, used as the placeholder stamp on default records.
    pub fn epoch() -> Self {
        Self(DateTime::UNIX_EPOCH)
    }

    /// Parse from milliseconds since the Unix epoch. Out-of-range values
    /// return `None`.
    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        Utc.timestamp_millis_opt(millis).single().map(Self)
    }

    /// Parse user or wire input: RFC 3339 / ISO 8601 date-times, or a bare
    /// `YYYY-MM-DD` date (interpreted as midnight UTC).
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self::new(dt.with_timezone(&Utc)));
        }

        // Datetime without offset, e.g. "2026-03-01T08:00:00".
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Some(Self(Utc.from_utc_datetime(&naive)));
        }

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            let naive = date.and_hms_opt(0, 0, 0)?;
            return Some(Self(Utc.from_utc_datetime(&naive)));
        }

        None
    }

    /// Parse from any JSON value an external representation may use: a wire
    /// string, a date string or an epoch-milliseconds number.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Number(n) => n.as_i64().and_then(Self::from_epoch_millis),
            _ => None,
        }
    }

    /// The fixed wire representation stored in documents.
    pub fn to_wire(self) -> String {
        self.0.format(WIRE_FORMAT).to_string()
    }

    pub fn to_value(self) -> Value {
        Value::String(self.to_wire())
    }

    pub fn datetime(self) -> DateTime<Utc> {
        self.0
    }

    /// Midnight (UTC) of the day this instant falls on.
    pub fn start_of_day(self) -> Self {
        let naive = self.0.date_naive().and_hms_opt(0, 0, 0).unwrap_or_default();
        Self(Utc.from_utc_datetime(&naive))
    }

    /// The calendar day key, `YYYY-MM-DD`.
    pub fn date(self) -> NaiveDate {
        self.0.date_naive()
    }

    pub fn add_days(self, days: i64) -> Self {
        Self(self.0 + Duration::days(days))
    }

    pub fn add_hours(self, hours: i64) -> Self {
        Self(self.0 + Duration::hours(hours))
    }
}

impl std::fmt::Display for Instant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}

impl Serialize for Instant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_wire())
    }
}

impl<'de> Deserialize<'de> for Instant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Instant::from_value(&value)
            .ok_or_else(|| serde::de::Error::custom("not a recognisable timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_bare_datetime_and_date_only() {
        let a = Instant::parse("2026-03-01T14:30:00.000Z").unwrap();
        let b = Instant::parse("2026-03-01T14:30:00").unwrap();
        assert_eq!(a, b);

        let d = Instant::parse("2026-03-01").unwrap();
        assert_eq!(d, a.start_of_day());
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        assert!(Instant::parse("").is_none());
        assert!(Instant::parse("mañana").is_none());
        assert!(Instant::from_value(&Value::Bool(true)).is_none());
    }

    #[test]
    fn wire_format_round_trips_and_orders_lexicographically() {
        let early = Instant::parse("2026-03-01T08:00:00Z").unwrap();
        let late = Instant::parse("2026-11-02T08:00:00Z").unwrap();

        assert!(early < late);
        assert!(early.to_wire() < late.to_wire());
        assert_eq!(Instant::parse(&early.to_wire()).unwrap(), early);
    }

    #[test]
    fn now_survives_a_wire_round_trip_unchanged() {
        let t = Instant::now();
        assert_eq!(Instant::parse(&t.to_wire()).unwrap(), t);

        // Sub-millisecond input is truncated on construction, so parsing
        // never produces a value finer than the wire carries.
        let fine = Instant::parse("2026-03-01T08:00:00.123456789Z").unwrap();
        assert_eq!(fine.to_wire(), "2026-03-01T08:00:00.123Z");
        assert_eq!(Instant::parse(&fine.to_wire()).unwrap(), fine);
    }

    #[test]
    fn epoch_millis_accepted_from_json_numbers() {
        let v = Value::from(1_700_000_000_000_i64);
        let t = Instant::from_value(&v).unwrap();
        assert_eq!(t.to_wire(), "2023-11-14T22:13:20.000Z");
    }
}
