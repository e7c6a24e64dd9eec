// HTTP route handlers for the judge API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use judge_common::types::{ProblemId, SubmissionId};
use judge_engine::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub language: String,
    pub source_code: String,
    pub problem_id: i64,
}

/// Envelope shared by every JSON response
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
            data: Some(data),
        })
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    let body = ApiResponse::<()> {
        success: false,
        message: message.into(),
        data: None,
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submission_id: Option<SubmissionId>,
}

fn status_for(err: &ServiceError) -> StatusCode {
    match err {
        ServiceError::UnsupportedLanguage(_)
        | ServiceError::SourceTooLarge { .. }
        | ServiceError::InputTooLarge { .. } => StatusCode::BAD_REQUEST,
        ServiceError::ProblemNotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::ProblemLookup { .. } => StatusCode::BAD_GATEWAY,
        ServiceError::QueueClosed => StatusCode::SERVICE_UNAVAILABLE,
    }
}

fn rejected(endpoint: &str, err: ServiceError) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!(endpoint = endpoint, error = %err, "Request failed");
        metrics::record_request(endpoint, "error");
    } else {
        warn!(endpoint = endpoint, error = %err, "Request rejected");
        metrics::record_request(endpoint, "rejected");
    }
    failure(status, err.to_string())
}

/// POST /api/code/run - Judge against sample tests
pub async fn run_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CodeRequest>,
) -> Response {
    match state
        .service
        .run(&payload.language, &payload.source_code, ProblemId(payload.problem_id))
        .await
    {
        Ok(job_id) => {
            metrics::record_request("run", "accepted");
            let data = JobAccepted {
                job_id: job_id.to_string(),
                submission_id: None,
            };
            (StatusCode::ACCEPTED, ApiResponse::ok("Code execution started", data)).into_response()
        }
        Err(e) => rejected("run", e),
    }
}

/// POST /api/code/submit - Judge against every test and record a submission
pub async fn submit_code(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CodeRequest>,
) -> Response {
    let problem_id = ProblemId(payload.problem_id);
    let submission_id = state.submissions.register(problem_id, &payload.language);

    match state
        .service
        .submit(&payload.language, &payload.source_code, problem_id, submission_id)
        .await
    {
        Ok(job_id) => {
            metrics::record_request("submit", "accepted");
            info!(job_id = %job_id, submission_id = %submission_id, "Submission accepted");
            let data = JobAccepted {
                job_id: job_id.to_string(),
                submission_id: Some(submission_id),
            };
            (StatusCode::ACCEPTED, ApiResponse::ok("Submission queued", data)).into_response()
        }
        Err(e) => {
            // Nothing will ever judge it
            state.submissions.remove(submission_id);
            rejected("submit", e)
        }
    }
}

/// GET /api/code/status/{job_id} - Poll a job
pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match state.service.get_status(&job_id) {
        Some(job) => {
            metrics::record_poll(true);
            (StatusCode::OK, ApiResponse::ok(job.status.to_string(), job)).into_response()
        }
        None => {
            metrics::record_poll(false);
            failure(StatusCode::NOT_FOUND, format!("Job {} not found", job_id))
        }
    }
}

/// GET /api/code/submissions/{id} - Recorded verdict of a submission
pub async fn get_submission(
    State(state): State<Arc<AppState>>,
    Path(submission_id): Path<i64>,
) -> Response {
    match state.submissions.get(SubmissionId(submission_id)) {
        Some(record) => (StatusCode::OK, ApiResponse::ok("Submission found", record)).into_response(),
        None => failure(
            StatusCode::NOT_FOUND,
            format!("Submission {} not found", submission_id),
        ),
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus scrape endpoint
pub async fn metrics_handler() -> Response {
    match metrics::render() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}
