//! Lenient timestamp parsing and ISO-8601 normalization.
//!
//! Publishers emit dates in many shapes (RFC 3339, RFC 2822, offsets without
//! colons, bare dates, Russian `dd.mm.yyyy`). [`Timestamp::parse`] accepts all
//! of them and keeps the offset when one was given.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

const ZONED_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%:z",
    "%Y-%m-%d %H:%M:%S%z",
    "%Y-%m-%dT%H:%M%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%d.%m.%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d"];

/// A point in time, with or without a UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    Zoned(DateTime<FixedOffset>),
    Naive(NaiveDateTime),
}

impl Timestamp {
    /// Parse a timestamp string. Returns `None` for empty or unrecognized input.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(Timestamp::Zoned(dt));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
            return Some(Timestamp::Zoned(dt));
        }
        for fmt in ZONED_FORMATS {
            if let Ok(dt) = DateTime::parse_from_str(value, fmt) {
                return Some(Timestamp::Zoned(dt));
            }
        }
        // A trailing `Z` that RFC 3339 rejected (e.g. missing seconds).
        if let Some(stripped) = value.strip_suffix('Z') {
            if let Some(Timestamp::Naive(naive)) = Self::parse_naive(stripped) {
                return Some(Timestamp::Zoned(naive.and_utc().fixed_offset()));
            }
        }
        Self::parse_naive(value)
    }

    fn parse_naive(value: &str) -> Option<Self> {
        for fmt in NAIVE_FORMATS {
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, fmt) {
                return Some(Timestamp::Naive(dt));
            }
        }
        for fmt in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(value, fmt) {
                return Some(Timestamp::Naive(date.and_time(NaiveTime::MIN)));
            }
        }
        None
    }

    /// Calendar date in the timestamp's own offset.
    pub fn date(&self) -> NaiveDate {
        match self {
            Timestamp::Zoned(dt) => dt.date_naive(),
            Timestamp::Naive(dt) => dt.date(),
        }
    }

    /// ISO-8601 rendering: `YYYY-MM-DDTHH:MM:SS` plus `±HH:MM` when zoned.
    pub fn to_iso(&self) -> String {
        match self {
            Timestamp::Zoned(dt) => dt.format("%Y-%m-%dT%H:%M:%S%:z").to_string(),
            Timestamp::Naive(dt) => dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

/// Normalize a date string to ISO-8601, dropping it if unparseable.
pub fn normalize_date(value: &str) -> Option<String> {
    let parsed = Timestamp::parse(value);
    if parsed.is_none() {
        tracing::debug!(value, "Dropping unparseable date");
    }
    parsed.map(|ts| ts.to_iso())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rfc3339_with_offset() {
        let ts = Timestamp::parse("2024-07-26T13:30:00+03:00").unwrap();
        assert_eq!(ts.to_iso(), "2024-07-26T13:30:00+03:00");
        assert_eq!(ts.date(), NaiveDate::from_ymd_opt(2024, 7, 26).unwrap());
    }

    #[test]
    fn parses_utc_suffix() {
        let ts = Timestamp::parse("2024-07-26T10:30:00Z").unwrap();
        assert_eq!(ts.to_iso(), "2024-07-26T10:30:00+00:00");
    }

    #[test]
    fn parses_offset_without_colon() {
        let ts = Timestamp::parse("2024-07-26T13:30:00+0300").unwrap();
        assert_eq!(ts.to_iso(), "2024-07-26T13:30:00+03:00");
    }

    #[test]
    fn parses_rfc2822() {
        let ts = Timestamp::parse("Fri, 26 Jul 2024 13:30:00 +0300").unwrap();
        assert_eq!(ts.to_iso(), "2024-07-26T13:30:00+03:00");
    }

    #[test]
    fn parses_naive_and_bare_dates() {
        assert_eq!(
            Timestamp::parse("2024-07-26 13:30").unwrap().to_iso(),
            "2024-07-26T13:30:00"
        );
        assert_eq!(
            Timestamp::parse("2024-07-26").unwrap().to_iso(),
            "2024-07-26T00:00:00"
        );
        assert_eq!(
            Timestamp::parse("26.07.2024 13:30").unwrap().to_iso(),
            "2024-07-26T13:30:00"
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(Timestamp::parse("").is_none());
        assert!(Timestamp::parse("   ").is_none());
        assert!(Timestamp::parse("вчера вечером").is_none());
        assert_eq!(normalize_date("not a date"), None);
    }
}
