mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use judge_common::config::{EngineSettings, LanguageConfigManager};
use judge_engine::catalog::{InMemoryProblemCatalog, InMemorySubmissionTracker};
use judge_engine::docker::DockerRuntime;
use judge_engine::job_store::JobStore;
use judge_engine::registry::ExecutorRegistry;
use judge_engine::service::ExecutionService;
use judge_engine::worker::{self, Worker};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ExecutionService>,
    pub submissions: Arc<InMemorySubmissionTracker>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::routes())
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
        )
        .with_target(false)
        .init();

    info!("Judge API booting...");

    let settings = EngineSettings::from_env()?;
    let languages = LanguageConfigManager::load_or_builtin(&settings.languages_config)?;
    info!("Loaded language configurations for: {:?}", languages.list_languages());

    let problems_path = std::env::var("JUDGE_PROBLEMS_FILE")
        .unwrap_or_else(|_| "config/problems.json".to_string());
    let problems = Arc::new(InMemoryProblemCatalog::load(&PathBuf::from(&problems_path))?);

    let runtime = Arc::new(DockerRuntime::connect(settings.pull_images)?);
    let registry = Arc::new(ExecutorRegistry::with_defaults(runtime, &languages, &settings)?);

    let store = JobStore::new();
    let submissions = Arc::new(InMemorySubmissionTracker::new());
    let (queue, receiver) = worker::channel();

    let workers = Worker::new(store.clone(), registry.clone())
        .with_tracker(submissions.clone())
        .spawn(receiver, settings.worker_concurrency);

    let state = Arc::new(AppState {
        service: Arc::new(ExecutionService::new(store, queue, registry, problems)),
        submissions,
    });

    metrics::register();

    // Start server
    let addr = std::env::var("JUDGE_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = TcpListener::bind(&addr).await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!(
        verdict_policy = ?settings.verdict_policy,
        workers = settings.worker_concurrency,
        "HTTP server listening on {}", addr
    );

    // Setup graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for shutdown signal");
        }
        warn!("Received shutdown signal, draining queue...");
    };

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    let discarded = workers.shutdown().await;
    info!(discarded = discarded, "Judge API shutdown complete");
    Ok(())
}
