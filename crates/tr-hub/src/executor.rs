//! # Query Executor
//!
//! The seam to the external analytical engine. [`HttpExecutor`] posts
//! `{ sql, timeRangeStart, timeRangeEnd }` and reads back `{ result: [...] }`
//! or `{ error: ... }`. The engine is a black box; nothing here inspects its
//! plan or retries a failed call.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tr_core::{CompiledQuery, ExecutionError};

use crate::config::ExecutionConfig;

#[async_trait]
pub trait QueryExecutor: Send + Sync {
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<Value>, ExecutionError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    sql: &'a str,
    time_range_start: String,
    time_range_end: String,
}

pub struct HttpExecutor {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

impl HttpExecutor {
    pub fn new(config: &ExecutionConfig) -> Result<Self, ExecutionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ExecutionError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            timeout_ms: config.timeout_ms,
        })
    }

    fn transport_error(&self, err: reqwest::Error) -> ExecutionError {
        if err.is_timeout() {
            ExecutionError::Timeout(self.timeout_ms)
        } else {
            ExecutionError::Transport(err.to_string())
        }
    }
}

#[async_trait]
impl QueryExecutor for HttpExecutor {
    async fn execute(&self, query: &CompiledQuery) -> Result<Vec<Value>, ExecutionError> {
        let body = ExecuteRequest {
            sql: &query.sql,
            time_range_start: query.window.iso_start(),
            time_range_end: query.window.iso_end(),
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        tracing::debug!(shape = %query.shape, endpoint = %self.endpoint, "dispatching query");
        let response = request.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let payload: Value = response.json().await.map_err(|e| {
            if e.is_timeout() {
                ExecutionError::Timeout(self.timeout_ms)
            } else {
                ExecutionError::Decode(e.to_string())
            }
        })?;

        parse_response(status.as_u16(), payload)
    }
}

/// Interpret the collaborator's reply. An `error` member wins over `result`,
/// and any non-success status is a rejection.
pub fn parse_response(status: u16, payload: Value) -> Result<Vec<Value>, ExecutionError> {
    if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
        return Err(ExecutionError::Rejected {
            status,
            message: error_message(error),
        });
    }
    if !(200..300).contains(&status) {
        return Err(ExecutionError::Rejected {
            status,
            message: payload.to_string(),
        });
    }
    match payload {
        Value::Object(mut map) => match map.remove("result") {
            Some(Value::Array(rows)) => Ok(rows),
            Some(Value::Null) | None => Ok(Vec::new()),
            Some(other) => Err(ExecutionError::Decode(format!(
                "expected result to be an array, got {}",
                other
            ))),
        },
        other => Err(ExecutionError::Decode(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

fn error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}
