//! Response envelopes and the API error type.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use engine_core::{BatchResponse, CompiledQuery, CustomQueryResult, EntryInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use telemetry::{HealthReport, MetricsSnapshot};

/// `{success: true, queryId?, data, meta}` for a single dynamic request.
#[derive(Debug, Serialize)]
pub struct BatchEnvelope {
    pub success: bool,
    #[serde(flatten)]
    pub response: BatchResponse,
}

impl From<BatchResponse> for BatchEnvelope {
    fn from(response: BatchResponse) -> Self {
        Self {
            success: true,
            response,
        }
    }
}

/// One slot of an explicit batch.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Ok(BatchEnvelope),
    Failed(FailureEnvelope),
}

/// `{success: true, batch: true, results}` for a list body.
#[derive(Debug, Serialize)]
pub struct BatchListEnvelope {
    pub success: bool,
    pub batch: bool,
    pub results: Vec<BatchOutcome>,
}

impl BatchListEnvelope {
    pub fn new(results: Vec<BatchOutcome>) -> Self {
        Self {
            success: true,
            batch: true,
            results,
        }
    }
}

/// `{success: false, error}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct FailureEnvelope {
    pub success: bool,
    pub error: String,
}

impl FailureEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CompileEnvelope {
    pub success: bool,
    #[serde(flatten)]
    pub compiled: CompiledQuery,
}

#[derive(Debug, Serialize)]
pub struct CustomQueryEnvelope {
    pub success: bool,
    #[serde(flatten)]
    pub result: CustomQueryResult,
}

#[derive(Debug, Serialize)]
pub struct QueryTypesEnvelope {
    pub success: bool,
    pub types: Vec<String>,
    pub configs: BTreeMap<String, EntryInfo>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    #[serde(flatten)]
    pub report: HealthReport,
    pub metrics: MetricsSnapshot,
}

/// Error body: the uniform failure envelope plus a stable code.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
        }
    }
}

/// Whole-request failure.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub response: ErrorResponse,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn with_code(status: StatusCode, code: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            status,
            response: ErrorResponse::new(msg, code),
            retry_after: None,
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::with_code(StatusCode::BAD_REQUEST, "REQ_001", msg)
    }

    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self {
            status: StatusCode::TOO_MANY_REQUESTS,
            response: ErrorResponse::new(msg, "RATE_001"),
            retry_after,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.response)).into_response();

        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }

        response
    }
}

impl From<engine_core::Error> for ApiError {
    fn from(err: engine_core::Error) -> Self {
        let status =
            StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        ApiError::with_code(status, err.code(), err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request(rejection.body_text())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::bad_request(err.to_string())
    }
}
