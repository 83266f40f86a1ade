//! HTTP boundary for the grading engine
//!
//! A deterministic code verdict is a successful request (200 with the
//! verdict embedded); only infrastructure problems surface as error
//! statuses. Scheduling starvation is 408, not a verdict.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;

use crate::dispatcher::{Dispatcher, Submission};
use crate::error::EngineError;
use crate::runner::RunLimits;
use crate::store::{CaseReport, GradingResult};
use crate::verdict::Verdict;
use crate::worker::{Comparison, TestCase};

/// Grading request body
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub submission_id: Option<i64>,
    #[serde(default)]
    pub question_id: Option<i64>,
    pub language: String,
    pub source_code: String,
    #[serde(default)]
    pub custom_input: Option<String>,
    #[serde(default)]
    pub comparison: Comparison,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub limits: Option<LimitsDto>,
}

/// Per-request resource limit overrides
#[derive(Debug, Default, Deserialize)]
pub struct LimitsDto {
    pub timeout_ms: Option<u32>,
    pub memory_mb: Option<u32>,
}

impl LimitsDto {
    fn resolve(&self, defaults: RunLimits) -> RunLimits {
        RunLimits {
            time_ms: self.timeout_ms.unwrap_or(defaults.time_ms),
            memory_mb: self.memory_mb.unwrap_or(defaults.memory_mb),
        }
    }
}

/// Grading response body
#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub status: Verdict,
    pub test_cases_passed: u32,
    pub total_test_cases: u32,
    pub score: u32,
    pub results: Vec<CaseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<GradingResult> for ExecuteResponse {
    fn from(result: GradingResult) -> Self {
        Self {
            status: result.status,
            test_cases_passed: result.test_cases_passed,
            total_test_cases: result.total_test_cases,
            score: result.score,
            results: result.feedback,
            note: result.note,
        }
    }
}

/// Map an engine error to its boundary status code
pub fn status_for(err: &EngineError) -> StatusCode {
    match err {
        EngineError::UnsupportedLanguage(_) | EngineError::NoTestCases => StatusCode::BAD_REQUEST,
        EngineError::AlreadyGrading(_) => StatusCode::CONFLICT,
        EngineError::PoolTimeout(_) => StatusCode::REQUEST_TIMEOUT,
        EngineError::Provision(_) | EngineError::Spawn(_) | EngineError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/healthz", get(healthz))
        .with_state(dispatcher)
}

async fn execute(
    State(dispatcher): State<Arc<Dispatcher>>,
    Json(request): Json<ExecuteRequest>,
) -> Response {
    let submission = Submission {
        submission_id: request.submission_id,
        question_id: request.question_id,
        language: request.language,
        source_code: request.source_code,
        custom_input: request.custom_input,
    };

    // A custom-input request without test cases is a trial run
    if submission.custom_input.is_some() && request.test_cases.is_empty() {
        return match dispatcher.trial_run(&submission).await {
            Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
            Err(err) => error_response(err),
        };
    }

    let limits = request
        .limits
        .unwrap_or_default()
        .resolve(dispatcher.default_limits());

    match dispatcher
        .grade(&submission, &request.test_cases, limits, request.comparison)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(ExecuteResponse::from(result))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn healthz(State(dispatcher): State<Arc<Dispatcher>>) -> Response {
    let pool = dispatcher.pool();
    let body = json!({
        "status": "ok",
        "pool": {
            "capacity": pool.capacity(),
            "live_leases": pool.live_leases().await,
        },
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn error_response(err: EngineError) -> Response {
    let status = status_for(&err);
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!(error = %err, "Grading request failed");
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&EngineError::UnsupportedLanguage("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&EngineError::NoTestCases), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_for(&EngineError::AlreadyGrading(1)),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(&EngineError::PoolTimeout(Duration::from_secs(1))),
            StatusCode::REQUEST_TIMEOUT
        );
        assert_eq!(
            status_for(&EngineError::Spawn("boom".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_request_deserialization_matches_wire_contract() {
        let raw = r#"{
            "language": "python",
            "source_code": "print(int(input())+int(input()))",
            "test_cases": [
                {"input": "3\n4", "output": "7", "hidden": false}
            ],
            "limits": {"timeout_ms": 5000, "memory_mb": 128}
        }"#;
        let request: ExecuteRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.language, "python");
        assert_eq!(request.test_cases.len(), 1);
        assert_eq!(request.test_cases[0].expected_output, "7");
        assert!(!request.test_cases[0].hidden);
        assert_eq!(request.comparison, Comparison::TrimmedLines);
        let limits = request.limits.unwrap().resolve(RunLimits::default());
        assert_eq!(limits.time_ms, 5_000);
        assert_eq!(limits.memory_mb, 128);
    }

    #[test]
    fn test_limit_overrides_fall_back_to_defaults() {
        let dto = LimitsDto {
            timeout_ms: Some(1_000),
            memory_mb: None,
        };
        let limits = dto.resolve(RunLimits::new(5_000, 128));
        assert_eq!(limits.time_ms, 1_000);
        assert_eq!(limits.memory_mb, 128);
    }

    #[test]
    fn test_response_serialization_shape() {
        let response = ExecuteResponse {
            status: Verdict::WrongAnswer,
            test_cases_passed: 2,
            total_test_cases: 3,
            score: 67,
            results: Vec::new(),
            note: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["status"], "wrong_answer");
        assert_eq!(value["test_cases_passed"], 2);
        assert_eq!(value["total_test_cases"], 3);
        assert_eq!(value["score"], 67);
        assert!(value.get("note").is_none());
    }
}
