//! # API Errors
//!
//! Maps engine failures onto HTTP responses with a JSON body of the form
//! `{ "error": { "message": ..., "type": ... } }`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tr_core::{CompileError, EngineError, ExecutionError, FilterError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed filter or query-string. Surfaced for correction.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// The compiler produced an AST it could not render.
    #[error("query compilation failed: {0}")]
    Render(String),

    /// The execution collaborator failed.
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

impl From<CompileError> for ApiError {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Filter(e) => Self::Filter(e),
            CompileError::Render(e) => Self::Render(e.to_string()),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Compile(e) => e.into(),
            EngineError::Execution(e) => Self::Execution(e),
        }
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Filter(_) => StatusCode::BAD_REQUEST,
            Self::Render(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Execution(ExecutionError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            Self::Execution(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// The `{ "error": { "message", "type" } }` body, also used for
    /// WebSocket error frames.
    pub fn body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.type_name(),
            }
        })
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Filter(FilterError::UnknownField(_)) => "unknown_field",
            Self::Filter(FilterError::ReservedKey(_)) => "reserved_key",
            Self::Filter(FilterError::UnmappedField(_)) => "unmapped_field",
            Self::Filter(FilterError::InvalidRange { .. }) => "invalid_range",
            Self::Filter(_) => "malformed_filter",
            Self::Render(_) => "internal_error",
            Self::Execution(ExecutionError::Timeout(_)) => "execution_timeout",
            Self::Execution(ExecutionError::Decode(_)) => "execution_decode_error",
            Self::Execution(_) => "execution_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("{}", self);
        } else {
            tracing::debug!("rejected request: {}", self);
        }

        (status, Json(self.body())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_errors_are_client_errors() {
        let err: ApiError = FilterError::UnknownField("colour".into()).into();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.type_name(), "unknown_field");
    }

    #[test]
    fn test_engine_error_unwraps_to_execution() {
        let err: ApiError = EngineError::from(ExecutionError::Timeout(500)).into();
        assert_eq!(err.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.to_string(), "execution service timed out after 500 ms");
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let err = ApiError::Execution(ExecutionError::Rejected {
            status: 400,
            message: "syntax error".into(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "execution_error");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("syntax error"));
    }
}
