//! # Histogram
//!
//! Bucket granularity selection and gap filling for the chart. The output is
//! always a contiguous ascending series, one bucket per granularity step
//! from `floor(start)` through `end`, zero-filled where nothing matched.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;
use crate::level::Level;
use crate::row::{timestamp_micros, UnifiedRow};
use crate::sql::DatePart;

const MINUTE_US: i64 = 60 * 1_000_000;
const HOUR_US: i64 = 60 * MINUTE_US;
const DAY_US: i64 = 24 * HOUR_US;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Minute,
    Hour,
    Day,
}

impl Granularity {
    pub const fn duration_micros(self) -> i64 {
        match self {
            Self::Minute => MINUTE_US,
            Self::Hour => HOUR_US,
            Self::Day => DAY_US,
        }
    }

    /// Floor `micros` to a bucket boundary. Days are UTC days.
    pub const fn truncate(self, micros: i64) -> i64 {
        micros - micros.rem_euclid(self.duration_micros())
    }

    pub fn date_part(self) -> DatePart {
        match self {
            Self::Minute => DatePart::Minute,
            Self::Hour => DatePart::Hour,
            Self::Day => DatePart::Day,
        }
    }
}

/// `Day` from two whole days, `Hour` from twelve whole hours, else `Minute`.
pub fn choose_granularity(start: DateTime<Utc>, end: DateTime<Utc>) -> Granularity {
    choose_granularity_micros(start.timestamp_micros(), end.timestamp_micros())
}

pub const fn choose_granularity_micros(start_us: i64, end_us: i64) -> Granularity {
    let span = end_us.saturating_sub(start_us);
    if span / DAY_US >= 2 {
        Granularity::Day
    } else if span / HOUR_US >= 12 {
        Granularity::Hour
    } else {
        Granularity::Minute
    }
}

/// Number of buckets [`fill_gaps`] produces: `ceil((end - start) / g) + 1`.
pub const fn bucket_count(start_us: i64, end_us: i64, granularity: Granularity) -> u64 {
    let step = granularity.duration_micros() as u64;
    let span = if end_us > start_us {
        end_us.abs_diff(start_us)
    } else {
        0
    };
    span.div_ceil(step) + 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistogramBucket {
    /// Bucket start, microseconds since the epoch.
    pub timestamp: i64,
    pub success: u64,
    pub warning: u64,
    pub error: u64,
}

impl HistogramBucket {
    pub fn empty(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Self::default()
        }
    }

    pub fn record(&mut self, level: Level) {
        match level {
            Level::Success => self.success += 1,
            Level::Warning => self.warning += 1,
            Level::Error => self.error += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.success + self.warning + self.error
    }

    fn merge(&mut self, other: &HistogramBucket) {
        self.success += other.success;
        self.warning += other.warning;
        self.error += other.error;
    }

    /// Decode a histogram-shape result row (`time_bucket`, per-level counts).
    pub fn from_row(row: &Value) -> Result<Self, ExecutionError> {
        let timestamp = row
            .get("time_bucket")
            .and_then(timestamp_micros)
            .ok_or_else(|| ExecutionError::Decode("histogram row has no time_bucket".into()))?;
        let count = |key: &str| match row.get(key) {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(0),
            Some(Value::String(s)) => s.parse().unwrap_or(0),
            _ => 0,
        };
        Ok(Self {
            timestamp,
            success: count("success"),
            warning: count("warning"),
            error: count("error"),
        })
    }
}

/// Align `buckets` to `granularity`, merge collisions and zero-fill every
/// missing boundary between `floor(start)` and `end`. Buckets outside that
/// span are dropped.
pub fn fill_gaps(
    buckets: &[HistogramBucket],
    start_us: i64,
    end_us: i64,
    granularity: Granularity,
) -> Vec<HistogramBucket> {
    let step = granularity.duration_micros();
    let first = granularity.truncate(start_us);
    let count = bucket_count(start_us, end_us, granularity);
    let last = first.saturating_add((count as i64 - 1).saturating_mul(step));

    let mut aligned: BTreeMap<i64, HistogramBucket> = BTreeMap::new();
    let mut dropped = 0usize;
    for bucket in buckets {
        let key = granularity.truncate(bucket.timestamp);
        if key < first || key > last {
            dropped += 1;
            continue;
        }
        aligned
            .entry(key)
            .or_insert_with(|| HistogramBucket::empty(key))
            .merge(bucket);
    }
    if dropped > 0 {
        tracing::trace!(dropped, "histogram buckets outside the requested window");
    }

    (0..count as i64)
        .map(|i| {
            let timestamp = first + i * step;
            aligned
                .remove(&timestamp)
                .unwrap_or_else(|| HistogramBucket::empty(timestamp))
        })
        .collect()
}

/// Buckets counted directly from fetched rows, for when the histogram query
/// is unavailable. Uses each row's materialized level, which comes from the
/// same [`LevelRule`](crate::LevelRule) as the SQL aggregate.
pub fn buckets_from_rows(rows: &[UnifiedRow], granularity: Granularity) -> Vec<HistogramBucket> {
    let mut by_bucket: BTreeMap<i64, HistogramBucket> = BTreeMap::new();
    for row in rows {
        let key = granularity.truncate(row.timestamp);
        by_bucket
            .entry(key)
            .or_insert_with(|| HistogramBucket::empty(key))
            .record(row.level);
    }
    by_bucket.into_values().collect()
}
