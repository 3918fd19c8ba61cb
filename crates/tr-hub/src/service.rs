//! # Logs Service
//!
//! Orchestrates one page fetch: compile the three shapes against a single
//! [`FilterState`] snapshot, dispatch them concurrently, then fold the results
//! into a [`LogsPage`].
//!
//! Row and facet failures fail the page. A failed histogram is not fatal: the
//! chart is rebuilt from the fetched rows instead.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tr_core::{
    build_facets, buckets_from_rows, choose_granularity, fill_gaps, Compiler, EngineError,
    ExecutionError, FacetTriple, FilterState, HistogramBucket, LogsPage, SourceRegistry,
    UnifiedRow,
};

use crate::config::QueryConfig;
use crate::executor::QueryExecutor;

pub struct LogsService {
    registry: Arc<SourceRegistry>,
    executor: Arc<dyn QueryExecutor>,
    query: QueryConfig,
}

impl LogsService {
    pub fn new(
        registry: Arc<SourceRegistry>,
        executor: Arc<dyn QueryExecutor>,
        query: QueryConfig,
    ) -> Self {
        Self {
            registry,
            executor,
            query,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn compiler(&self) -> Compiler<'_> {
        Compiler::new(&self.registry).with_facet_limit(self.query.facet_limit)
    }

    /// Parse query-string pairs into a filter, applying the configured page
    /// size default and cap.
    pub fn parse_filter<I, K, V>(&self, params: I) -> Result<FilterState, EngineError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let params: Vec<(K, V)> = params.into_iter().collect();
        let sized = params.iter().any(|(k, _)| k.as_ref() == "size");
        let mut filter = FilterState::from_params(params)?;
        if !sized {
            filter.page_size = self.query.default_page_size;
        }
        filter.clamp_page_size(self.query.max_page_size);
        Ok(filter)
    }

    pub async fn fetch_page(
        &self,
        filter: &FilterState,
        now: DateTime<Utc>,
    ) -> Result<LogsPage, EngineError> {
        let batch = self.compiler().compile_batch(filter, now)?;
        tracing::debug!(
            snapshot = %filter.snapshot_key(),
            start = %batch.rows.window.iso_start(),
            end = %batch.rows.window.iso_end(),
            "dispatching batch"
        );

        let (rows, facets, histogram) = tokio::join!(
            self.executor.execute(&batch.rows),
            self.executor.execute(&batch.facets),
            self.executor.execute(&batch.histogram),
        );

        let rows = rows?
            .iter()
            .map(|value| UnifiedRow::from_result(value, &self.registry))
            .collect::<Result<Vec<_>, _>>()?;

        let triples = facets?
            .iter()
            .map(FacetTriple::from_row)
            .collect::<Result<Vec<_>, _>>()?;
        let facets = build_facets(&triples);

        let window = batch.histogram.window;
        let granularity = batch
            .histogram
            .granularity
            .unwrap_or_else(|| choose_granularity(window.start, window.end));
        let buckets = match histogram.and_then(|result| decode_buckets(&result)) {
            Ok(buckets) => buckets,
            Err(e) => {
                tracing::warn!("histogram query failed, counting fetched rows instead: {}", e);
                buckets_from_rows(&rows, granularity)
            }
        };
        let chart = fill_gaps(
            &buckets,
            window.start_micros(),
            window.end_micros(),
            granularity,
        );

        Ok(LogsPage::assemble(rows, facets, chart, filter, now))
    }
}

fn decode_buckets(result: &[Value]) -> Result<Vec<HistogramBucket>, ExecutionError> {
    result.iter().map(HistogramBucket::from_row).collect()
}

// =============================================================================
// Stale-response tracking
// =============================================================================

/// Identifies one dispatched batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTicket {
    pub generation: u64,
    pub snapshot: String,
}

/// Hands out tickets in dispatch order. Only the newest ticket is current;
/// results carrying an older ticket are discarded on arrival. In-flight calls
/// are never cancelled.
#[derive(Debug, Default)]
pub struct BatchTracker {
    generation: AtomicU64,
}

impl BatchTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self, filter: &FilterState) -> BatchTicket {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        BatchTicket {
            generation,
            snapshot: filter.snapshot_key(),
        }
    }

    pub fn is_current(&self, ticket: &BatchTicket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.generation
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tr_core::{CompiledQuery, QueryShape};

    /// Canned results per shape, recording every query it receives.
    #[derive(Default)]
    pub struct FakeExecutor {
        pub rows: Vec<Value>,
        pub facets: Vec<Value>,
        pub histogram: Option<Vec<Value>>,
        pub fail_rows: bool,
        pub seen: Mutex<Vec<CompiledQuery>>,
    }

    #[async_trait]
    impl QueryExecutor for FakeExecutor {
        async fn execute(&self, query: &CompiledQuery) -> Result<Vec<Value>, ExecutionError> {
            self.seen.lock().unwrap().push(query.clone());
            match query.shape {
                QueryShape::Rows if self.fail_rows => {
                    Err(ExecutionError::Transport("connection refused".into()))
                }
                QueryShape::Rows => Ok(self.rows.clone()),
                QueryShape::Facets => Ok(self.facets.clone()),
                QueryShape::Histogram => self.histogram.clone().ok_or(ExecutionError::Rejected {
                    status: 400,
                    message: "histogram unavailable".into(),
                }),
            }
        }
    }

    pub fn service(executor: FakeExecutor) -> LogsService {
        LogsService::new(
            Arc::new(SourceRegistry::with_default_sources()),
            Arc::new(executor),
            QueryConfig::default(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{service, FakeExecutor};
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tr_core::{Field, Level, Predicate, QueryShape};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap()
    }

    fn row(id: &str, minute: i64, status: &str) -> Value {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().timestamp_micros()
            + minute * 60_000_000;
        json!({
            "id": id,
            "timestamp": ts,
            "log_type": "edge",
            "status": status,
            "level": match status.parse::<u16>().unwrap_or(0) {
                500..=u16::MAX => "error",
                400..=499 => "warning",
                _ => "success",
            },
            "method": "GET",
            "path": "/",
        })
    }

    #[tokio::test]
    async fn test_page_combines_all_three_shapes() {
        let executor = FakeExecutor {
            rows: vec![row("b", 30, "500"), row("a", 10, "200")],
            facets: vec![
                json!({ "dimension": "total", "value": "all", "count": 2 }),
                json!({ "dimension": "total", "value": "unfiltered", "count": 9 }),
                json!({ "dimension": "method", "value": "GET", "count": 2 }),
            ],
            histogram: Some(vec![json!({
                "time_bucket": "2024-01-01T00:30:00Z",
                "success": 0, "warning": 0, "error": 1
            })]),
            ..FakeExecutor::default()
        };
        let svc = service(executor);
        let page = svc.fetch_page(&FilterState::default(), now()).await.unwrap();

        assert_eq!(page.data.len(), 2);
        assert_eq!(page.data[0].level, Level::Error);
        assert_eq!(page.meta.filter_row_count, 2);
        assert_eq!(page.meta.total_row_count, 9);
        assert_eq!(page.meta.facets["method"].total, 2);
        assert_eq!(page.meta.chart_data.len(), 61);
        assert_eq!(page.meta.chart_data[30].error, 1);
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn test_failed_histogram_falls_back_to_rows() {
        let executor = FakeExecutor {
            rows: vec![row("b", 30, "404"), row("a", 30, "200")],
            histogram: None,
            ..FakeExecutor::default()
        };
        let svc = service(executor);
        let page = svc.fetch_page(&FilterState::default(), now()).await.unwrap();

        let bucket = page.meta.chart_data[30];
        assert_eq!((bucket.success, bucket.warning, bucket.error), (1, 1, 0));
        assert_eq!(page.meta.chart_data.iter().map(|b| b.total()).sum::<u64>(), 2);
    }

    #[tokio::test]
    async fn test_row_failure_fails_the_page() {
        let svc = service(FakeExecutor {
            fail_rows: true,
            ..FakeExecutor::default()
        });
        let err = svc.fetch_page(&FilterState::default(), now()).await.unwrap_err();
        assert!(matches!(err, EngineError::Execution(ExecutionError::Transport(_))));
    }

    #[tokio::test]
    async fn test_bad_filter_dispatches_nothing() {
        let executor = Arc::new(FakeExecutor::default());
        let svc = LogsService::new(
            Arc::new(SourceRegistry::with_default_sources()),
            executor.clone(),
            QueryConfig::default(),
        );
        let mut filter = FilterState::default();
        filter
            .predicates
            .insert(Field::LogCount, Predicate::Text("many".into()));
        let err = svc.fetch_page(&filter, now()).await.unwrap_err();
        assert!(matches!(err, EngineError::Compile(_)));
        assert!(executor.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_shapes_share_one_snapshot() {
        let executor = Arc::new(FakeExecutor::default());
        let svc = LogsService::new(
            Arc::new(SourceRegistry::with_default_sources()),
            executor.clone(),
            QueryConfig::default(),
        );
        let filter = svc.parse_filter([("method", "GET,POST")]).unwrap();
        svc.fetch_page(&filter, now()).await.unwrap();

        let seen = executor.seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        for query in seen.iter() {
            assert!(query.sql.contains("'POST'"), "{} lost the filter", query.shape);
        }
        let shapes: Vec<QueryShape> = seen.iter().map(|q| q.shape).collect();
        assert!(shapes.contains(&QueryShape::Histogram));
    }

    #[test]
    fn test_parse_filter_applies_page_size_config() {
        let svc = LogsService::new(
            Arc::new(SourceRegistry::with_default_sources()),
            Arc::new(FakeExecutor::default()),
            QueryConfig {
                default_page_size: 25,
                max_page_size: 100,
                facet_limit: 20,
            },
        );
        assert_eq!(svc.parse_filter(Vec::<(String, String)>::new()).unwrap().page_size, 25);
        assert_eq!(svc.parse_filter([("size", "5000")]).unwrap().page_size, 100);
        assert_eq!(svc.parse_filter([("size", "10")]).unwrap().page_size, 10);
    }

    #[test]
    fn test_newer_batch_supersedes_older() {
        let tracker = BatchTracker::new();
        let filter = FilterState::default();
        let first = tracker.begin(&filter);
        assert!(tracker.is_current(&first));

        let second = tracker.begin(&filter);
        assert!(!tracker.is_current(&first));
        assert!(tracker.is_current(&second));
        assert_eq!(first.snapshot, second.snapshot);
    }
}
