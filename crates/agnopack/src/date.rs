//! # Dates
//!
//! On the wire a date is a signed count of microseconds since `0001-01-01T00:00:00Z`.
//! Every peer must use this epoch, whatever its native date type counts from.

use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Microseconds between `0001-01-01T00:00:00Z` and the Unix epoch.
pub const UNIX_EPOCH_MICROS: i64 = 62_135_596_800_000_000;

/// A UTC instant with microsecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Date(i64);

impl Date {
    /// Builds a date from microseconds since the agnos epoch.
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Microseconds since the agnos epoch, as sent on the wire.
    pub const fn as_micros(self) -> i64 {
        self.0
    }

    /// Builds a date from microseconds since the Unix epoch.
    pub const fn from_unix_micros(micros: i64) -> Self {
        Self(micros.saturating_add(UNIX_EPOCH_MICROS))
    }

    /// Microseconds since the Unix epoch (negative before 1970).
    pub const fn unix_micros(self) -> i64 {
        self.0.saturating_sub(UNIX_EPOCH_MICROS)
    }

    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }
}

impl From<SystemTime> for Date {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(after) => Self::from_unix_micros(after.as_micros() as i64),
            Err(before) => Self::from_unix_micros(-(before.duration().as_micros() as i64)),
        }
    }
}

impl From<Date> for SystemTime {
    fn from(d: Date) -> Self {
        let micros = d.unix_micros();
        if micros >= 0 {
            UNIX_EPOCH + Duration::from_micros(micros as u64)
        } else {
            UNIX_EPOCH - Duration::from_micros(micros.unsigned_abs())
        }
    }
}

#[cfg(feature = "chrono")]
mod chrono_impls {
    use chrono::DateTime;
    use chrono::Utc;

    use super::Date;
    use crate::error::Error;

    impl From<DateTime<Utc>> for Date {
        fn from(t: DateTime<Utc>) -> Self {
            Date::from_unix_micros(t.timestamp_micros())
        }
    }

    impl TryFrom<Date> for DateTime<Utc> {
        type Error = Error;

        fn try_from(d: Date) -> Result<Self, Error> {
            DateTime::<Utc>::from_timestamp_micros(d.unix_micros())
                .ok_or_else(|| Error::Custom(format!("date out of range: {} us", d.as_micros())))
        }
    }
}
