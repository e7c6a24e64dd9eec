// Route table for the judge API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/code/run", post(handlers::run_code))
        .route("/api/code/submit", post(handlers::submit_code))
        .route("/api/code/status/:job_id", get(handlers::get_status))
        .route("/api/code/submissions/:id", get(handlers::get_submission))
        .route("/status", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
}
