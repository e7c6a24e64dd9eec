// Prometheus counters for the HTTP surface

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Requests to run/submit, by endpoint and outcome (accepted, rejected, error)
    pub static ref EXECUTION_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("judge_execution_requests_total", "Run and submit requests by outcome"),
        &["endpoint", "outcome"]
    )
    .expect("metric can be created");

    /// Status polls, by whether the job was found
    pub static ref STATUS_POLLS: IntCounterVec = IntCounterVec::new(
        Opts::new("judge_status_polls_total", "Job status lookups"),
        &["outcome"]
    )
    .expect("metric can be created");
}

/// Register all collectors. Called once at startup; repeated calls are ignored.
pub fn register() {
    // AlreadyReg errors on repeated calls are expected
    let _ = REGISTRY.register(Box::new(EXECUTION_REQUESTS.clone()));
    let _ = REGISTRY.register(Box::new(STATUS_POLLS.clone()));
}

pub fn record_request(endpoint: &str, outcome: &str) {
    EXECUTION_REQUESTS.with_label_values(&[endpoint, outcome]).inc();
}

pub fn record_poll(found: bool) {
    let outcome = if found { "found" } else { "not_found" };
    STATUS_POLLS.with_label_values(&[outcome]).inc();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}
