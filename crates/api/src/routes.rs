//! HTTP route handlers for the API.

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use scanue_common::{HumanResponse, ScanueError};
use scanue_coordinator::RunReport;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub specialists: Vec<String>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        specialists: state.engine.specialist_ids().to_vec(),
    })
}

/// Submission request body.
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub task: String,
}

/// Checkpoint answer body.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub decision: String,
    #[serde(default)]
    pub comment: Option<String>,
}

impl From<FeedbackRequest> for HumanResponse {
    fn from(request: FeedbackRequest) -> Self {
        Self {
            decision: request.decision,
            comment: request.comment,
        }
    }
}

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: String,
    pub code: &'static str,
}

impl ErrorResponse {
    fn bad_request(error: impl Into<String>, code: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: error.into(),
            code,
        }
    }
}

impl From<ScanueError> for ErrorResponse {
    fn from(err: ScanueError) -> Self {
        let (status, code) = match &err {
            ScanueError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ScanueError::InvalidResponse { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_RESPONSE")
            }
            _ => {
                error!(error = %err, "Engine error");
                (StatusCode::INTERNAL_SERVER_ERROR, "ENGINE_ERROR")
            }
        };
        Self {
            status,
            error: err.to_string(),
            code,
        }
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Start a run and drive it until it completes, fails or pauses.
pub async fn submit_run(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<RunReport>, ErrorResponse> {
    if request.task.trim().is_empty() {
        return Err(ErrorResponse::bad_request("task must not be empty", "EMPTY_TASK"));
    }

    info!(
        task_preview = %request.task.chars().take(50).collect::<String>(),
        "Received task"
    );

    let report = state.engine.submit(request.task).await?;
    Ok(Json(report))
}

/// Current status of a run.
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
) -> Result<Json<RunReport>, ErrorResponse> {
    debug!(run_id = %run_id, "Getting run status");
    let report = state.engine.get_status(&run_id).await?;
    Ok(Json(report))
}

/// Answer the pending checkpoint of a run.
pub async fn provide_feedback(
    State(state): State<Arc<AppState>>,
    Path(run_id): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> Result<Json<RunReport>, ErrorResponse> {
    info!(run_id = %run_id, decision = %request.decision, "Received checkpoint response");
    let report = state
        .engine
        .provide_feedback(&run_id, request.into())
        .await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy",
            version: "0.1.0",
            uptime_seconds: 100,
            specialists: vec!["value_assessment".into()],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("healthy"));
        assert!(json.contains("value_assessment"));
    }

    #[test]
    fn test_feedback_request_without_comment() {
        let request: FeedbackRequest = serde_json::from_str(r#"{"decision": "approve"}"#).unwrap();
        let response: HumanResponse = request.into();
        assert_eq!(response.decision, "approve");
        assert!(response.comment.is_none());
    }

    #[test]
    fn test_error_status_mapping() {
        let not_found: ErrorResponse = ScanueError::NotFound("run_1".into()).into();
        assert_eq!(not_found.status, StatusCode::NOT_FOUND);

        let invalid: ErrorResponse = ScanueError::InvalidResponse {
            response: "maybe".into(),
            allowed: vec!["approve".into()],
        }
        .into();
        assert_eq!(invalid.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(invalid.code, "INVALID_RESPONSE");

        let store: ErrorResponse = ScanueError::Store("disk full".into()).into();
        assert_eq!(store.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_body_omits_status() {
        let json = serde_json::to_value(ErrorResponse::bad_request("empty", "EMPTY_TASK")).unwrap();
        assert_eq!(json["code"], "EMPTY_TASK");
        assert!(json.get("status").is_none());
    }
}
