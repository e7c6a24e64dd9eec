/// Execution Service - façade between callers and the job machinery
///
/// `run` and `submit` validate synchronously, create a Queued job, enqueue it and return the
/// job id without waiting for execution. `get_status` is a plain store lookup.

use crate::error::ServiceError;
use crate::job_store::JobStore;
use crate::registry::ExecutorRegistry;
use crate::worker::{ExecutionQueue, QueuedExecution};
use async_trait::async_trait;
use judge_common::types::{
    CodeExecutionRequest, ExecutionJob, JobId, Problem, ProblemId, SubmissionId, SubmissionStatus,
    TestCase,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Largest accepted source file
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024;

/// Largest accepted single test input
pub const MAX_TEST_INPUT_BYTES: usize = 8 * 1024 * 1024;

/// Source of problem definitions and their test cases
#[async_trait]
pub trait ProblemProvider: Send + Sync {
    /// `Ok(None)` when the problem does not exist
    async fn get_problem(&self, problem_id: ProblemId) -> anyhow::Result<Option<Problem>>;
}

/// Sink for final verdicts of persisted submissions
#[async_trait]
pub trait SubmissionTracker: Send + Sync {
    async fn update_result(
        &self,
        submission_id: SubmissionId,
        status: SubmissionStatus,
        time_ms: u64,
        memory_kb: u64,
    ) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, Copy)]
enum TestSelection {
    SamplesOnly,
    All,
}

pub struct ExecutionService {
    store: JobStore,
    queue: ExecutionQueue,
    registry: Arc<ExecutorRegistry>,
    problems: Arc<dyn ProblemProvider>,
}

impl ExecutionService {
    pub fn new(
        store: JobStore,
        queue: ExecutionQueue,
        registry: Arc<ExecutorRegistry>,
        problems: Arc<dyn ProblemProvider>,
    ) -> Self {
        Self { store, queue, registry, problems }
    }

    /// Judge `source_code` against the problem's sample tests only
    pub async fn run(
        &self,
        language: &str,
        source_code: &str,
        problem_id: ProblemId,
    ) -> Result<JobId, ServiceError> {
        self.enqueue(language, source_code, problem_id, None, TestSelection::SamplesOnly)
            .await
    }

    /// Judge `source_code` against every test of the problem and report the verdict for
    /// `submission_id` once finished
    pub async fn submit(
        &self,
        language: &str,
        source_code: &str,
        problem_id: ProblemId,
        submission_id: SubmissionId,
    ) -> Result<JobId, ServiceError> {
        self.enqueue(
            language,
            source_code,
            problem_id,
            Some(submission_id),
            TestSelection::All,
        )
        .await
    }

    pub fn get_status(&self, job_id: &str) -> Option<ExecutionJob> {
        self.store.get_job_str(job_id)
    }

    async fn enqueue(
        &self,
        language: &str,
        source_code: &str,
        problem_id: ProblemId,
        submission_id: Option<SubmissionId>,
        selection: TestSelection,
    ) -> Result<JobId, ServiceError> {
        self.registry.resolve(language)?;

        if source_code.len() > MAX_SOURCE_CODE_BYTES {
            return Err(ServiceError::SourceTooLarge {
                size: source_code.len(),
                limit: MAX_SOURCE_CODE_BYTES,
            });
        }

        let problem = self
            .problems
            .get_problem(problem_id)
            .await
            .map_err(|reason| ServiceError::ProblemLookup { problem_id, reason })?
            .ok_or(ServiceError::ProblemNotFound(problem_id))?;

        let test_cases = match selection {
            TestSelection::SamplesOnly => problem.sample_test_cases(),
            TestSelection::All => problem.all_test_cases(),
        };
        check_inputs(&test_cases)?;

        let request = CodeExecutionRequest {
            language: language.to_string(),
            source_code: source_code.to_string(),
            test_cases,
            time_limit_ms: problem.time_limit_ms,
            memory_limit_mb: problem.memory_limit_mb,
        };
        let test_count = request.test_cases.len();

        let job = self.store.create_job(submission_id);
        let job_id = job.job_id;

        if self.queue.enqueue(QueuedExecution { job, request }).is_err() {
            error!(job_id = %job_id, "Execution queue closed, rejecting job");
            if let Err(e) = self.store.fail(&job_id, "execution queue is closed", None) {
                warn!(job_id = %job_id, error = %e, "Failed to mark rejected job");
            }
            return Err(ServiceError::QueueClosed);
        }

        info!(
            job_id = %job_id,
            language = %language,
            problem_id = %problem_id,
            submission_id = ?submission_id,
            test_count = test_count,
            "Job queued"
        );

        Ok(job_id)
    }
}

fn check_inputs(test_cases: &[TestCase]) -> Result<(), ServiceError> {
    for (idx, test_case) in test_cases.iter().enumerate() {
        if test_case.input.len() > MAX_TEST_INPUT_BYTES {
            return Err(ServiceError::InputTooLarge {
                index: idx + 1,
                size: test_case.input.len(),
                limit: MAX_TEST_INPUT_BYTES,
            });
        }
    }
    Ok(())
}
