//! # Unified Rows
//!
//! Materialization of collaborator result rows into [`UnifiedRow`]. Decoding
//! is strict: a row without an id, a timestamp, a known source or a projected
//! level is an [`ExecutionError::Decode`], not a silently dropped row.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ExecutionError;
use crate::level::Level;
use crate::sources::{SourceRegistry, SourceType};

/// A console log emitted during one edge-function execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildLog {
    pub id: String,
    pub timestamp: i64,
    pub event_message: Option<String>,
    pub level: Option<String>,
    pub event_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedRow {
    pub id: String,
    /// Microseconds since the epoch.
    pub timestamp: i64,
    pub source_type: SourceType,
    pub status: Option<String>,
    pub level: Level,
    pub path: Option<String>,
    pub host: Option<String>,
    pub event_message: Option<String>,
    pub method: Option<String>,
    pub api_role: Option<String>,
    pub auth_user: Option<String>,
    pub child_log_count: u64,
    pub child_logs: Vec<ChildLog>,
}

impl UnifiedRow {
    pub fn from_result(value: &Value, registry: &SourceRegistry) -> Result<Self, ExecutionError> {
        let obj = value
            .as_object()
            .ok_or_else(|| decode("result row is not an object"))?;

        let id = scalar_string(obj.get("id")).ok_or_else(|| decode("row has no id"))?;
        let timestamp = obj
            .get("timestamp")
            .and_then(timestamp_micros)
            .ok_or_else(|| decode(format!("row {} has no usable timestamp", id)))?;
        let source_type: SourceType = obj
            .get("log_type")
            .and_then(Value::as_str)
            .ok_or_else(|| decode(format!("row {} has no log_type", id)))?
            .parse()
            .map_err(|err| decode(format!("row {}: {}", id, err)))?;
        if registry.get(source_type).is_none() {
            return Err(decode(format!(
                "row {}: source {} is not registered",
                id, source_type
            )));
        }
        let status = scalar_string(obj.get("status"));

        // Level is projected per source by the query; `status` alone cannot
        // recover it for severity-classified sources.
        let level = obj
            .get("level")
            .and_then(Value::as_str)
            .ok_or_else(|| decode(format!("row {} has no level", id)))?
            .parse::<Level>()
            .map_err(|err| decode(format!("row {}: {}", id, err)))?;

        let child_logs = match obj.get("logs") {
            Some(Value::Array(items)) => items
                .iter()
                .map(child_log)
                .collect::<Result<Vec<_>, _>>()?,
            _ => Vec::new(),
        };
        let child_log_count = obj
            .get("log_count")
            .and_then(count)
            .unwrap_or(child_logs.len() as u64);

        Ok(Self {
            id,
            timestamp,
            source_type,
            status,
            level,
            path: text(obj, "path"),
            host: text(obj, "host"),
            event_message: text(obj, "event_message"),
            method: text(obj, "method"),
            api_role: text(obj, "api_role"),
            auth_user: text(obj, "auth_user"),
            child_log_count,
            child_logs,
        })
    }

    #[cfg(test)]
    pub(crate) fn stub(id: &str, timestamp: i64) -> Self {
        Self {
            id: id.to_string(),
            timestamp,
            source_type: SourceType::Edge,
            status: Some("200".to_string()),
            level: Level::Success,
            path: None,
            host: None,
            event_message: None,
            method: None,
            api_role: None,
            auth_user: None,
            child_log_count: 0,
            child_logs: Vec::new(),
        }
    }
}

fn decode(message: impl Into<String>) -> ExecutionError {
    ExecutionError::Decode(message.into())
}

fn child_log(value: &Value) -> Result<ChildLog, ExecutionError> {
    let obj = value
        .as_object()
        .ok_or_else(|| decode("child log is not an object"))?;
    Ok(ChildLog {
        id: scalar_string(obj.get("id")).ok_or_else(|| decode("child log has no id"))?,
        timestamp: obj
            .get("timestamp")
            .and_then(timestamp_micros)
            .ok_or_else(|| decode("child log has no usable timestamp"))?,
        event_message: text(obj, "event_message"),
        level: text(obj, "level"),
        event_type: text(obj, "event_type"),
    })
}

fn text(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key).and_then(Value::as_str).map(str::to_string)
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// A timestamp as microseconds: an integer, a numeric string or RFC 3339.
pub(crate) fn timestamp_micros(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse::<i64>().ok().or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.timestamp_micros())
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_edge_function_row_with_child_logs() {
        let registry = SourceRegistry::with_default_sources();
        let row = UnifiedRow::from_result(
            &json!({
                "id": "f1",
                "timestamp": 1_704_067_200_000_000i64,
                "log_type": "edge function",
                "status": "500",
                "level": "error",
                "path": "/functions/v1/hello",
                "method": "POST",
                "log_count": 2,
                "logs": [
                    {"id": "c1", "timestamp": 1_704_067_200_000_100i64, "event_message": "boot", "level": "info"},
                    {"id": "c2", "timestamp": "2024-01-01T00:00:00.0002Z", "event_message": "boom", "level": "error"}
                ]
            }),
            &registry,
        )
        .unwrap();

        assert_eq!(row.source_type, SourceType::EdgeFunction);
        assert_eq!(row.level, Level::Error);
        assert_eq!(row.child_log_count, 2);
        assert_eq!(row.child_logs[1].timestamp, 1_704_067_200_000_200);
    }

    #[test]
    fn test_numeric_id_and_string_timestamp() {
        let registry = SourceRegistry::with_default_sources();
        let row = UnifiedRow::from_result(
            &json!({"id": 7, "timestamp": "1704067200000000", "log_type": "postgrest", "status": 404, "level": "warning"}),
            &registry,
        )
        .unwrap();
        assert_eq!(row.id, "7");
        assert_eq!(row.timestamp, 1_704_067_200_000_000);
        assert_eq!(row.status.as_deref(), Some("404"));
        assert_eq!(row.level, Level::Warning);
    }

    #[test]
    fn test_missing_level_is_a_decode_error() {
        let registry = SourceRegistry::with_default_sources();
        for row in [
            json!({"id": "p", "timestamp": 1, "log_type": "postgres", "status": "XX000", "event_message": "ERROR: boom"}),
            json!({"id": "s", "timestamp": 1, "log_type": "supavisor", "status": null}),
            json!({"id": "e", "timestamp": 1, "log_type": "edge", "status": 503}),
        ] {
            let err = UnifiedRow::from_result(&row, &registry).unwrap_err();
            assert!(
                matches!(&err, ExecutionError::Decode(msg) if msg.contains("has no level")),
                "{:?}",
                err
            );
        }
    }

    #[test]
    fn test_unregistered_source_is_a_decode_error() {
        let registry = SourceRegistry::new();
        let err = UnifiedRow::from_result(
            &json!({"id": "x", "timestamp": 1, "log_type": "edge", "level": "success"}),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Decode(_)));
    }

    #[test]
    fn test_unknown_source_is_a_decode_error() {
        let registry = SourceRegistry::with_default_sources();
        let err = UnifiedRow::from_result(
            &json!({"id": "x", "timestamp": 1, "log_type": "kafka"}),
            &registry,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::Decode(_)));
    }

    #[test]
    fn test_serializes_camel_case() {
        let value = serde_json::to_value(UnifiedRow::stub("a", 1)).unwrap();
        assert_eq!(value["sourceType"], "edge");
        assert_eq!(value["childLogCount"], 0);
        assert!(value.get("eventMessage").is_some());
    }
}
