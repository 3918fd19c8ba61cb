//! # Cursor Pagination
//!
//! Opportunistic keyset pagination over a descending time order. A cursor is
//! a row timestamp in microseconds; the step direction decides which side of
//! the time window it replaces.
//!
//! ```text
//!   range.start                                   range.end      now
//!       |<------------- next (older) -------------|               |
//!       |                             cursor|---------- prev ---->|
//! ```
//!
//! The execution collaborator compares the cursor with a strict "greater
//! than", so rows sharing the boundary timestamp can fall out of a page. The
//! `has_more` check treats `limit - 1` rows as a full page to avoid stalling
//! pagination on that gap.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CursorDecodeError, FilterError};
use crate::filter::TimeRange;
use crate::row::UnifiedRow;

// =============================================================================
// Cursor
// =============================================================================

/// A row timestamp in microseconds since the epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(i64);

impl Cursor {
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_datetime(instant: DateTime<Utc>) -> Self {
        Self(instant.timestamp_micros())
    }

    /// Parse a cursor token. Callers recover from the error by dropping the
    /// cursor.
    pub fn decode(raw: &str) -> Result<Self, CursorDecodeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(CursorDecodeError {
                raw: raw.to_string(),
                reason: "empty token",
            });
        }
        let micros: i64 = trimmed.parse().map_err(|_| CursorDecodeError {
            raw: raw.to_string(),
            reason: "not an integer",
        })?;
        if micros < 0 {
            return Err(CursorDecodeError {
                raw: raw.to_string(),
                reason: "negative timestamp",
            });
        }
        Ok(Self(micros))
    }

    pub const fn as_micros(self) -> i64 {
        self.0
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp_micros(self.0)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Toward older rows.
    #[default]
    Next,
    /// Toward newer rows; also the live-tail step.
    Prev,
}

impl FromStr for Direction {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "next" => Ok(Self::Next),
            "prev" => Ok(Self::Prev),
            _ => Err(FilterError::invalid("direction", s, "expected next or prev")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub cursor: Option<Cursor>,
    pub direction: Direction,
}

// =============================================================================
// Window resolution
// =============================================================================

/// The effective `[start, end]` sent to the collaborator alongside the SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn start_micros(&self) -> i64 {
        self.start.timestamp_micros()
    }

    pub fn end_micros(&self) -> i64 {
        self.end.timestamp_micros()
    }

    pub fn iso_start(&self) -> String {
        self.start.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    pub fn iso_end(&self) -> String {
        self.end.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

fn cursor_instant(cursor: Option<Cursor>) -> Option<DateTime<Utc>> {
    let cursor = cursor?;
    let instant = cursor.to_datetime();
    if instant.is_none() {
        tracing::debug!(%cursor, "cursor outside representable time, ignoring");
    }
    instant
}

/// Rewrite the requested range for one pagination step.
///
/// - `Next`: `end` becomes the cursor (or the range end).
/// - `Prev`: `start` becomes the cursor (or the range start), `end` is `now`.
/// - No step: the range as given; in live-tail mode `end` is re-anchored to
///   `now`.
pub fn resolve_window(
    range: &TimeRange,
    page: Option<&PageRequest>,
    live_tail: bool,
    now: DateTime<Utc>,
) -> Window {
    match page {
        Some(PageRequest {
            direction: Direction::Next,
            cursor,
        }) => {
            let end = cursor_instant(*cursor).unwrap_or(range.end);
            Window {
                start: range.start,
                end: end.max(range.start),
            }
        }
        Some(PageRequest {
            direction: Direction::Prev,
            cursor,
        }) => {
            let start = cursor_instant(*cursor).unwrap_or(range.start);
            Window {
                start: start.min(now),
                end: now,
            }
        }
        None if live_tail => Window {
            start: range.start.min(now),
            end: now,
        },
        None => Window {
            start: range.start,
            end: range.end,
        },
    }
}

// =============================================================================
// Cursor derivation
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursors {
    pub next: Option<Cursor>,
    pub prev: Cursor,
    pub has_more: bool,
}

/// Whether a page of `len` rows, fetched with `limit`, is treated as full.
/// An empty page never has more, even when `limit <= 1` would otherwise
/// satisfy `len >= limit - 1`; with no rows there is no `next` cursor to offer.
pub fn has_more(len: usize, limit: u32) -> bool {
    len > 0 && len as u64 + 1 >= u64::from(limit)
}

/// The reference point for `prev` on an empty page: the request's own `prev`
/// cursor while live tailing, so re-dispatching with no new rows leaves the
/// cursor unchanged; otherwise `now`.
pub fn live_anchor(page: Option<&PageRequest>, live_tail: bool, now: DateTime<Utc>) -> Cursor {
    match page {
        Some(PageRequest {
            direction: Direction::Prev,
            cursor: Some(cursor),
        }) if live_tail => *cursor,
        _ => Cursor::from_datetime(now),
    }
}

/// Cursors for a page ordered by `(timestamp, id)` descending.
pub fn derive_cursors(page: &[UnifiedRow], limit: u32, anchor: Cursor) -> PageCursors {
    PageCursors {
        next: page.last().map(|row| Cursor::from_micros(row.timestamp)),
        prev: page
            .first()
            .map_or(anchor, |row| Cursor::from_micros(row.timestamp)),
        has_more: has_more(page.len(), limit),
    }
}

#[cfg(kani)]
mod proofs {
    use super::*;

    /// **Proof: the tolerance never reports more on an empty page**
    #[kani::proof]
    fn verify_empty_page_has_no_more() {
        let limit: u32 = kani::any();
        assert!(!has_more(0, limit));
    }

    /// **Proof: `limit - 1` rows is a full page, `limit - 2` is not**
    #[kani::proof]
    fn verify_tolerance_threshold() {
        let limit: u32 = kani::any();
        kani::assume(limit >= 3);
        assert!(has_more(limit as usize - 1, limit));
        assert!(!has_more(limit as usize - 2, limit));
    }
}
