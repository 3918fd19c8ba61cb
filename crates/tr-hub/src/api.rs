//! # API Handlers
//!
//! Axum handlers for the log explorer. Every endpoint takes the filter as a
//! query string and parses it with the same rules.

use crate::error::ApiError;
use crate::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tr_core::{Field, Granularity, Level, LogsPage, QueryShape};

type Params = Query<Vec<(String, String)>>;

// =============================================================================
// Logs
// =============================================================================

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> Result<Json<LogsPage>, ApiError> {
    let filter = state.service.parse_filter(params)?;
    let page = state.service.fetch_page(&filter, Utc::now()).await?;
    tracing::debug!(
        rows = page.data.len(),
        next = ?page.next_cursor,
        prev = page.prev_cursor,
        "served page"
    );
    Ok(Json(page))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledResponse {
    pub shape: QueryShape,
    pub sql: String,
    pub time_range_start: String,
    pub time_range_end: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granularity: Option<Granularity>,
}

/// The SQL one shape compiles to, without executing it. `shape` defaults to
/// `rows`.
pub async fn get_logs_sql(
    State(state): State<Arc<AppState>>,
    Query(params): Params,
) -> Result<Json<CompiledResponse>, ApiError> {
    let mut shape = QueryShape::Rows;
    let mut rest = Vec::with_capacity(params.len());
    for (key, value) in params {
        if key == "shape" {
            shape = value.parse()?;
        } else {
            rest.push((key, value));
        }
    }

    let filter = state.service.parse_filter(rest)?;
    let compiled = state.service.compiler().compile(&filter, shape, Utc::now())?;
    Ok(Json(CompiledResponse {
        shape: compiled.shape,
        time_range_start: compiled.window.iso_start(),
        time_range_end: compiled.window.iso_end(),
        sql: compiled.sql,
        granularity: compiled.granularity,
    }))
}

// =============================================================================
// Sources
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub source: &'static str,
    pub level_rule: &'static str,
    /// Levels this source can be filtered to.
    pub levels: Vec<Level>,
    /// Fields this source produces values for.
    pub fields: Vec<&'static str>,
}

pub async fn list_sources(State(state): State<Arc<AppState>>) -> Json<Vec<SourceInfo>> {
    let sources = state
        .service
        .registry()
        .iter()
        .map(|adapter| {
            let rule = adapter.level_rule();
            SourceInfo {
                source: adapter.source().as_str(),
                level_rule: rule.kind(),
                levels: Level::ALL
                    .into_iter()
                    .filter(|level| rule.condition(*level).is_some())
                    .collect(),
                fields: Field::ALL
                    .into_iter()
                    .filter(|field| adapter.maps(*field))
                    .map(Field::as_str)
                    .collect(),
            }
        })
        .collect();
    Json(sources)
}

#[cfg(test)]
mod tests {
    use crate::config::Config;
    use crate::service::testing::{service, FakeExecutor};
    use crate::{app, AppState};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state(executor: FakeExecutor) -> Arc<AppState> {
        Arc::new(AppState {
            config: Config::default(),
            service: Arc::new(service(executor)),
        })
    }

    async fn get(executor: FakeExecutor, uri: &str) -> (StatusCode, Value) {
        let response = app(state(executor))
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_logs_envelope_shape() {
        let executor = FakeExecutor {
            rows: vec![json!({
                "id": "r1",
                "timestamp": 1_700_000_000_000_000i64,
                "log_type": "postgres",
                "event_message": "connection received",
                "level": "success",
            })],
            histogram: Some(vec![]),
            ..FakeExecutor::default()
        };
        let (status, body) = get(executor, "/api/logs?log_type=postgres&size=10").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["id"], "r1");
        assert_eq!(body["data"][0]["sourceType"], "postgres");
        assert!(body["nextCursor"].is_null());
        assert_eq!(body["prevCursor"], 1_700_000_000_000_000i64);
        assert!(body["meta"]["chartData"].as_array().unwrap().len() >= 61);
    }

    #[tokio::test]
    async fn test_unknown_field_is_bad_request() {
        let (status, body) = get(FakeExecutor::default(), "/api/logs?colour=red").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "unknown_field");
    }

    #[tokio::test]
    async fn test_execution_failure_is_bad_gateway() {
        let executor = FakeExecutor {
            fail_rows: true,
            ..FakeExecutor::default()
        };
        let (status, body) = get(executor, "/api/logs").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["type"], "execution_error");
    }

    #[tokio::test]
    async fn test_compiled_sql_endpoint() {
        let (status, body) = get(
            FakeExecutor::default(),
            "/api/logs/sql?shape=histogram&dateStart=1704067200000&dateEnd=1704326400000",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["shape"], "histogram");
        assert_eq!(body["granularity"], "day");
        assert_eq!(body["timeRangeStart"], "2024-01-01T00:00:00.000000Z");
        assert!(body["sql"].as_str().unwrap().contains("TIMESTAMP_TRUNC"));
    }

    #[tokio::test]
    async fn test_bad_shape_is_bad_request() {
        let (status, _) = get(FakeExecutor::default(), "/api/logs/sql?shape=pie").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sources_listing() {
        let (status, body) = get(FakeExecutor::default(), "/api/sources").await;
        assert_eq!(status, StatusCode::OK);
        let sources = body.as_array().unwrap();
        assert_eq!(sources.len(), 7);
        let postgres = sources.iter().find(|s| s["source"] == "postgres").unwrap();
        assert_eq!(postgres["levelRule"], "severity");
        assert!(!postgres["fields"]
            .as_array()
            .unwrap()
            .iter()
            .any(|f| f == "method"));
    }
}
