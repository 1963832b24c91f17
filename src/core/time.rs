//! Timestamp primitive for record ordering.
//!
//! Producers write RFC 3339; legacy producers wrote naive ISO-8601 with no
//! offset, which we read as UTC. Ordering is total and decoupled from the
//! filename timestamp, which is advisory only.

use std::time::SystemTime;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use super::record::ValidationError;

/// Naive ISO-8601 without offset, with and without subseconds.
const NAIVE_FRAC: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]");
const NAIVE: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]");

/// Compact UTC form used in record filenames.
const COMPACT: &[time::format_description::BorrowedFormatItem<'_>] =
    format_description!("[year][month][day]_[hour][minute][second]");

/// Fixed-width RFC 3339 with nine subsecond digits, for text columns that
/// are sorted lexicographically.
const SORTABLE: &[time::format_description::BorrowedFormatItem<'_>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z"
);

/// A UTC instant attached to a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(OffsetDateTime);

impl Timestamp {
    pub fn now() -> Self {
        Self(OffsetDateTime::now_utc())
    }

    /// Parse an ISO-8601 instant.
    ///
    /// RFC 3339 first; falls back to naive date-times read as UTC so that
    /// legacy record files stay readable.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if let Ok(odt) = OffsetDateTime::parse(raw, &Rfc3339) {
            return Ok(Self(odt.to_offset(time::UtcOffset::UTC)));
        }
        for fmt in [NAIVE_FRAC, NAIVE] {
            if let Ok(naive) = PrimitiveDateTime::parse(raw, fmt) {
                return Ok(Self(naive.assume_utc()));
            }
        }
        Err(ValidationError::BadTimestamp {
            raw: raw.to_string(),
        })
    }

    pub fn to_rfc3339(&self) -> String {
        self.0
            .format(&Rfc3339)
            .unwrap_or_else(|_| self.0.to_string())
    }

    /// Filename form: `YYYYmmdd_HHMMSS`. Second resolution; the id suffix in
    /// the filename carries the uniqueness.
    pub fn compact(&self) -> String {
        self.0
            .format(&COMPACT)
            .unwrap_or_else(|_| self.0.unix_timestamp().to_string())
    }

    /// Fixed-width form whose lexicographic order matches chronological
    /// order, unlike [`to_rfc3339`](Self::to_rfc3339) which drops zero
    /// subseconds. Parses back via [`parse`](Self::parse).
    pub fn sortable(&self) -> String {
        self.0
            .format(&SORTABLE)
            .unwrap_or_else(|_| self.to_rfc3339())
    }

    pub fn unix_seconds(&self) -> i64 {
        self.0.unix_timestamp()
    }
}

impl From<SystemTime> for Timestamp {
    fn from(st: SystemTime) -> Self {
        Self(OffsetDateTime::from(st))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Timestamp::parse(&raw).map_err(serde::de::Error::custom)
    }
}
