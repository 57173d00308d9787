//! Timestamp utilities

use crate::{Error, Result};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

/// Sortable, filename-safe format used for archive keys
const ARCHIVE_STAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Format a sync timestamp as an archive key component
///
/// Lexicographic order of the output matches chronological order.
pub fn archive_stamp(ts: DateTime<Utc>) -> String {
    ts.format(ARCHIVE_STAMP_FORMAT).to_string()
}

/// Parse an archive key component produced by [`archive_stamp`]
pub fn parse_archive_stamp(stamp: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(stamp, "%Y%m%dT%H%M%S%.fZ")
        .map(|naive| naive.and_utc())
        .map_err(|e| Error::InvalidInput(format!("Bad archive stamp '{}': {}", stamp, e)))
}

/// Coarse part of the day a play happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimePeriod {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimePeriod {
    /// 06-12 morning, 12-18 afternoon, 18-23 evening, otherwise night
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimePeriod::Morning,
            12..=17 => TimePeriod::Afternoon,
            18..=22 => TimePeriod::Evening,
            _ => TimePeriod::Night,
        }
    }

    pub fn of(ts: DateTime<Utc>) -> Self {
        Self::from_hour(ts.hour())
    }
}

pub fn is_weekend(ts: DateTime<Utc>) -> bool {
    matches!(ts.weekday(), Weekday::Sat | Weekday::Sun)
}
