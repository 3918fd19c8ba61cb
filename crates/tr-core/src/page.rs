//! # Page Envelope
//!
//! The one response shape of a page fetch: rows, row counts, chart series,
//! facets and the two cursors.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::facets::{FacetResult, FacetSummary};
use crate::filter::{Field, FilterState, Sort, SortKey};
use crate::histogram::HistogramBucket;
use crate::pagination::{derive_cursors, live_anchor};
use crate::row::UnifiedRow;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    /// Rows in the window, ignoring predicates.
    pub total_row_count: u64,
    /// Rows matching the filter.
    pub filter_row_count: u64,
    pub chart_data: Vec<HistogramBucket>,
    pub facets: BTreeMap<String, FacetResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsPage {
    pub data: Vec<UnifiedRow>,
    pub meta: PageMeta,
    /// `null` once the older end of the range has been reached.
    pub next_cursor: Option<i64>,
    pub prev_cursor: i64,
}

impl LogsPage {
    /// Build the envelope. `rows` must be in keyset order (timestamp, id
    /// descending); cursors are taken from that order before any in-page
    /// re-sort.
    pub fn assemble(
        rows: Vec<UnifiedRow>,
        facets: FacetSummary,
        chart_data: Vec<HistogramBucket>,
        filter: &FilterState,
        now: DateTime<Utc>,
    ) -> Self {
        let anchor = live_anchor(filter.pagination.as_ref(), filter.live_tail, now);
        let cursors = derive_cursors(&rows, filter.page_size, anchor);

        let mut data = rows;
        if let Some(sort) = filter.sort {
            sort_rows(&mut data, sort);
        }

        Self {
            data,
            meta: PageMeta {
                total_row_count: facets.unfiltered_total,
                filter_row_count: facets.filtered_total,
                chart_data,
                facets: facets.facets,
            },
            next_cursor: cursors
                .next
                .filter(|_| cursors.has_more)
                .map(|c| c.as_micros()),
            prev_cursor: cursors.prev.as_micros(),
        }
    }
}

/// Stable in-page sort; ties keep keyset order.
fn sort_rows(rows: &mut [UnifiedRow], sort: Sort) {
    rows.sort_by(|a, b| {
        let ord = match sort.key {
            SortKey::Timestamp => a.timestamp.cmp(&b.timestamp),
            SortKey::Field(field) => compare_field(a, b, field),
        };
        if sort.descending {
            ord.reverse()
        } else {
            ord
        }
    });
}

fn compare_field(a: &UnifiedRow, b: &UnifiedRow, field: Field) -> Ordering {
    let numeric = |row: &UnifiedRow| row.status.as_deref().and_then(|s| s.parse::<i64>().ok());
    match field {
        Field::Level => a.level.cmp(&b.level),
        Field::LogType => a.source_type.as_str().cmp(b.source_type.as_str()),
        Field::Status => numeric(a).cmp(&numeric(b)),
        Field::LogCount => a.child_log_count.cmp(&b.child_log_count),
        Field::Method => a.method.cmp(&b.method),
        Field::Path => a.path.cmp(&b.path),
        Field::Host => a.host.cmp(&b.host),
        Field::EventMessage => a.event_message.cmp(&b.event_message),
        Field::ApiRole => a.api_role.cmp(&b.api_role),
        Field::AuthUser => a.auth_user.cmp(&b.auth_user),
    }
}
