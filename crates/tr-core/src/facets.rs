//! # Facet Aggregation
//!
//! The facets query returns flat `(dimension, value, count)` triples. This
//! module folds them into per-dimension results. The reserved `total`
//! dimension does not become a facet: `('total', 'all', n)` is the filtered
//! row count and `('total', 'unfiltered', n)` the count for the whole window.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExecutionError;

pub const TOTAL_DIMENSION: &str = "total";
pub const FILTERED_TOTAL: &str = "all";
pub const UNFILTERED_TOTAL: &str = "unfiltered";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacetTriple {
    pub dimension: String,
    pub value: Option<String>,
    pub count: u64,
}

impl FacetTriple {
    pub fn new(dimension: &str, value: Option<&str>, count: u64) -> Self {
        Self {
            dimension: dimension.to_string(),
            value: value.map(str::to_string),
            count,
        }
    }

    pub fn from_row(row: &Value) -> Result<Self, ExecutionError> {
        let dimension = row
            .get("dimension")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutionError::Decode("facet row has no dimension".into()))?;
        let value = match row.get("value") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            _ => None,
        };
        let count = match row.get("count") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.parse().ok(),
            _ => None,
        }
        .ok_or_else(|| {
            ExecutionError::Decode(format!("facet row for '{}' has no count", dimension))
        })?;
        Ok(Self {
            dimension: dimension.to_string(),
            value,
            count,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacetValue {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FacetResult {
    pub total: u64,
    /// Count descending, then value ascending.
    pub values: Vec<FacetValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FacetSummary {
    pub filtered_total: u64,
    pub unfiltered_total: u64,
    /// A missing dimension means no matching rows.
    pub facets: BTreeMap<String, FacetResult>,
}

pub fn build_facets(triples: &[FacetTriple]) -> FacetSummary {
    let mut summary = FacetSummary::default();
    let mut grouped: BTreeMap<&str, BTreeMap<&str, u64>> = BTreeMap::new();

    for triple in triples {
        if triple.dimension == TOTAL_DIMENSION {
            match triple.value.as_deref() {
                Some(FILTERED_TOTAL) => summary.filtered_total += triple.count,
                Some(UNFILTERED_TOTAL) => summary.unfiltered_total += triple.count,
                other => tracing::trace!(value = ?other, "ignoring unknown total row"),
            }
            continue;
        }
        let Some(value) = triple.value.as_deref().filter(|v| !v.is_empty()) else {
            continue;
        };
        *grouped
            .entry(triple.dimension.as_str())
            .or_default()
            .entry(value)
            .or_insert(0) += triple.count;
    }

    for (dimension, counts) in grouped {
        let mut values: Vec<FacetValue> = counts
            .into_iter()
            .map(|(value, count)| FacetValue {
                value: value.to_string(),
                count,
            })
            .collect();
        values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
        let total = values.iter().map(|v| v.count).sum();
        summary
            .facets
            .insert(dimension.to_string(), FacetResult { total, values });
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_totals_feed_row_counts_not_facets() {
        let summary = build_facets(&[
            FacetTriple::new("total", Some("all"), 42),
            FacetTriple::new("total", Some("unfiltered"), 100),
            FacetTriple::new("level", Some("error"), 2),
        ]);
        assert_eq!(summary.filtered_total, 42);
        assert_eq!(summary.unfiltered_total, 100);
        assert!(!summary.facets.contains_key("total"));
    }

    #[test]
    fn test_duplicates_are_summed_and_totals_match() {
        let summary = build_facets(&[
            FacetTriple::new("method", Some("GET"), 10),
            FacetTriple::new("method", Some("POST"), 4),
            FacetTriple::new("method", Some("GET"), 5),
            FacetTriple::new("log_type", Some("edge"), 7),
        ]);
        for result in summary.facets.values() {
            assert_eq!(result.total, result.values.iter().map(|v| v.count).sum::<u64>());
        }
        let method = &summary.facets["method"];
        assert_eq!(method.total, 19);
        assert_eq!(method.values[0], FacetValue { value: "GET".into(), count: 15 });
    }

    #[test]
    fn test_nulls_and_empty_values_are_dropped() {
        let summary = build_facets(&[
            FacetTriple::new("status", None, 9),
            FacetTriple::new("status", Some(""), 3),
            FacetTriple::new("status", Some("200"), 1),
        ]);
        assert_eq!(summary.facets["status"].total, 1);
    }

    #[test]
    fn test_dimension_with_only_nulls_is_absent() {
        let summary = build_facets(&[FacetTriple::new("method", None, 9)]);
        assert!(summary.facets.get("method").is_none());
    }

    #[test]
    fn test_ties_order_by_value() {
        let summary = build_facets(&[
            FacetTriple::new("level", Some("warning"), 3),
            FacetTriple::new("level", Some("error"), 3),
            FacetTriple::new("level", Some("success"), 8),
        ]);
        let order: Vec<&str> = summary.facets["level"]
            .values
            .iter()
            .map(|v| v.value.as_str())
            .collect();
        assert_eq!(order, ["success", "error", "warning"]);
    }

    #[test]
    fn test_triple_from_row_accepts_string_counts() {
        let triple =
            FacetTriple::from_row(&json!({"dimension": "status", "value": 404, "count": "12"})).unwrap();
        assert_eq!(triple, FacetTriple::new("status", Some("404"), 12));
        assert!(FacetTriple::from_row(&json!({"dimension": "status"})).is_err());
    }
}
