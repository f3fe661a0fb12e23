//! Nanosecond timestamps and time ranges.
//!
//! Every timestamp in the graph is an integer count of nanoseconds since the
//! UNIX epoch. The persisted format is a local wall-clock string
//! (`YYYY-MM-DD HH:MM:SS`) truncated to whole seconds, so a write→read round
//! trip loses sub-second precision. That loss is part of the snapshot contract:
//! compare round-tripped timestamps with [`Timestamp::whole_seconds`].

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Format used for persisted timestamps.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors specific to timestamp handling.
#[derive(Debug, Error, Diagnostic)]
pub enum TemporalError {
    #[error("invalid datetime string: \"{value}\"")]
    #[diagnostic(
        code(egg::temporal::invalid_datetime),
        help("Timestamps are persisted as local time in the form `YYYY-MM-DD HH:MM:SS`.")
    )]
    InvalidDatetime { value: String },

    #[error("datetime {value} does not exist in the local timezone")]
    #[diagnostic(
        code(egg::temporal::nonexistent_local_time),
        help("The wall-clock time falls into a daylight-saving gap. Pick a time outside the gap.")
    )]
    NonexistentLocalTime { value: String },

    #[error("timestamp out of range: {value}")]
    #[diagnostic(
        code(egg::temporal::out_of_range),
        help("Timestamps must fit in a signed 64-bit nanosecond count (years 1677..2262).")
    )]
    OutOfRange { value: String },

    #[error("inverted time range: min {min_ns} > max {max_ns}")]
    #[diagnostic(
        code(egg::temporal::inverted_range),
        help("The lower bound of a time range must not be later than the upper bound.")
    )]
    InvertedRange { min_ns: i64, max_ns: i64 },
}

/// Result type for temporal operations.
pub type TemporalResult<T> = std::result::Result<T, TemporalError>;

// ---------------------------------------------------------------------------
// Timestamp
// ---------------------------------------------------------------------------

/// Nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The beginning of time, used as the open lower bound.
    pub const ZERO: Timestamp = Timestamp(0);
    /// The end of time, used as the open upper bound.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Create a timestamp from whole seconds, saturating on overflow.
    pub const fn from_secs(secs: i64) -> Self {
        Self(secs.saturating_mul(NANOS_PER_SEC))
    }

    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Seconds since the epoch, rounded towards negative infinity.
    pub fn as_secs(self) -> i64 {
        self.0.div_euclid(NANOS_PER_SEC)
    }

    /// This timestamp truncated to whole seconds.
    ///
    /// Equal to what survives a snapshot write→read round trip.
    pub fn whole_seconds(self) -> Self {
        Self(self.as_secs() * NANOS_PER_SEC)
    }

    /// Build a timestamp from local wall-clock components.
    pub fn from_local_parts(
        year: i32,
        month: u32,
        day: u32,
        hour: u32,
        minute: u32,
    ) -> TemporalResult<Self> {
        let naive = NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|d| d.and_hms_opt(hour, minute, 0))
            .ok_or_else(|| TemporalError::InvalidDatetime {
                value: format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}"),
            })?;
        Self::from_naive_local(&naive)
    }

    /// Parse a persisted local datetime string.
    ///
    /// Accepts `YYYY-MM-DD HH:MM:SS` with an optional fractional part.
    pub fn parse_local(value: &str) -> TemporalResult<Self> {
        let trimmed = value.trim();
        let naive = NaiveDateTime::parse_from_str(trimmed, DATETIME_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
            .map_err(|_| TemporalError::InvalidDatetime {
                value: value.to_string(),
            })?;
        Self::from_naive_local(&naive)
    }

    fn from_naive_local(naive: &NaiveDateTime) -> TemporalResult<Self> {
        // Ambiguous wall-clock times (DST fall-back) resolve to the earlier instant.
        let local = Local.from_local_datetime(naive).earliest().ok_or_else(|| {
            TemporalError::NonexistentLocalTime {
                value: naive.to_string(),
            }
        })?;
        local
            .timestamp()
            .checked_mul(NANOS_PER_SEC)
            .and_then(|n| n.checked_add(i64::from(local.timestamp_subsec_nanos())))
            .map(Self)
            .ok_or_else(|| TemporalError::OutOfRange {
                value: naive.to_string(),
            })
    }

    /// Local wall-clock representation, truncated to whole seconds.
    pub fn to_local_string(self) -> String {
        match DateTime::from_timestamp(self.as_secs(), 0) {
            Some(utc) => utc.with_timezone(&Local).format(DATETIME_FORMAT).to_string(),
            None => format!("@{}ns", self.0),
        }
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_local_string())
    }
}

// ---------------------------------------------------------------------------
// Time range
// ---------------------------------------------------------------------------

/// A closed interval `[min, max]` of timestamps with `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    min: Timestamp,
    max: Timestamp,
}

impl TimeRange {
    /// Create a range, rejecting `min > max`.
    pub fn new(min: Timestamp, max: Timestamp) -> TemporalResult<Self> {
        if min > max {
            return Err(TemporalError::InvertedRange {
                min_ns: min.as_nanos(),
                max_ns: max.as_nanos(),
            });
        }
        Ok(Self { min, max })
    }

    /// `[0, +inf]`: matches every non-negative timestamp.
    pub const fn unbounded() -> Self {
        Self {
            min: Timestamp::ZERO,
            max: Timestamp::MAX,
        }
    }

    pub fn min(&self) -> Timestamp {
        self.min
    }

    pub fn max(&self) -> Timestamp {
        self.max
    }

    pub fn contains(&self, t: Timestamp) -> bool {
        t >= self.min && t <= self.max
    }

    /// Whether `[start, end]` lies entirely inside this range.
    pub fn contains_span(&self, start: Timestamp, end: Timestamp) -> bool {
        start >= self.min && end <= self.max
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl std::fmt::Display for TimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lo = if self.min == Timestamp::ZERO {
            "-inf".to_string()
        } else {
            self.min.to_local_string()
        };
        let hi = if self.max == Timestamp::MAX {
            "+inf".to_string()
        } else {
            self.max.to_local_string()
        };
        write!(f, "[{lo}, {hi}]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_seconds_truncates() {
        let t = Timestamp::from_nanos(1_700_000_000_987_654_321);
        assert_eq!(t.whole_seconds().as_nanos(), 1_700_000_000_000_000_000);
        assert_eq!(t.as_secs(), 1_700_000_000);
    }

    #[test]
    fn local_string_round_trip_is_second_exact() {
        let t = Timestamp::from_nanos(1_718_000_123_456_789_000);
        let s = t.to_local_string();
        let back = Timestamp::parse_local(&s).unwrap();
        assert_eq!(back, t.whole_seconds());
    }

    #[test]
    fn parse_accepts_fractional_seconds() {
        let a = Timestamp::parse_local("2024-06-10 12:30:00").unwrap();
        let b = Timestamp::parse_local("2024-06-10 12:30:00.250000").unwrap();
        assert_eq!(b.as_nanos() - a.as_nanos(), 250_000_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Timestamp::parse_local("yesterday"),
            Err(TemporalError::InvalidDatetime { .. })
        ));
    }

    #[test]
    fn local_parts_match_parsed_string() {
        let a = Timestamp::from_local_parts(2024, 6, 10, 12, 30).unwrap();
        let b = Timestamp::parse_local("2024-06-10 12:30:00").unwrap();
        assert_eq!(a, b);
        assert!(Timestamp::from_local_parts(2024, 13, 1, 0, 0).is_err());
    }

    #[test]
    fn range_rejects_inversion() {
        let err = TimeRange::new(Timestamp::from_nanos(10), Timestamp::from_nanos(5));
        assert!(matches!(err, Err(TemporalError::InvertedRange { .. })));
        assert!(TimeRange::new(Timestamp::from_nanos(5), Timestamp::from_nanos(5)).is_ok());
    }

    #[test]
    fn range_containment_is_inclusive() {
        let r = TimeRange::new(Timestamp::from_nanos(100), Timestamp::from_nanos(200)).unwrap();
        assert!(r.contains(Timestamp::from_nanos(100)));
        assert!(r.contains(Timestamp::from_nanos(200)));
        assert!(!r.contains(Timestamp::from_nanos(201)));
        assert!(r.contains_span(Timestamp::from_nanos(100), Timestamp::from_nanos(200)));
        assert!(!r.contains_span(Timestamp::from_nanos(99), Timestamp::from_nanos(150)));
    }

    #[test]
    fn unbounded_range_display() {
        assert_eq!(TimeRange::unbounded().to_string(), "[-inf, +inf]");
    }
}
