//! Acquisition timestamp labels
//!
//! Layer names for interval change maps are derived from acquisition dates.
//! Two acquisitions can share a calendar day (adjacent slices of one pass), so
//! every label carries its 1-based position in the series.

use crate::types::{ChangeError, ChangeResult, EpochMillis};
use chrono::{DateTime, Utc};

fn to_utc(timestamp: EpochMillis) -> ChangeResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(timestamp).ok_or_else(|| {
        ChangeError::Validation(format!("Timestamp out of range: {} ms", timestamp))
    })
}

/// Canonical per-acquisition labels of the form `TYYYYMMDD_<position>`
pub fn timestamp_labels(timestamps: &[EpochMillis]) -> ChangeResult<Vec<String>> {
    timestamps
        .iter()
        .enumerate()
        .map(|(i, &ts)| Ok(format!("{}_{}", to_utc(ts)?.format("T%Y%m%d"), i + 1)))
        .collect()
}

/// Human-readable acquisition time, e.g. `Thu Jan  1 00:01:40 1970`
pub fn acquisition_time(timestamp: EpochMillis) -> ChangeResult<String> {
    Ok(to_utc(timestamp)?.format("%a %b %e %H:%M:%S %Y").to_string())
}

/// Human-readable times for a whole series
pub fn acquisition_times(timestamps: &[EpochMillis]) -> ChangeResult<Vec<String>> {
    timestamps.iter().map(|&ts| acquisition_time(ts)).collect()
}
