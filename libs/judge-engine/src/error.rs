use judge_common::types::{JobId, JobStatus, ProblemId};
use thiserror::Error;

/// Infrastructure failures raised by an executor.
///
/// Judged-code failures (compile errors, wrong answers, crashes) are never reported
/// through this type; they travel inside the execution result.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("sandbox failure: {0:#}")]
    Sandbox(anyhow::Error),

    #[error("execution cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JobStoreError {
    #[error("job {0} not found")]
    NotFound(JobId),

    #[error("job {job_id} cannot move from {from} to {to}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },
}

/// Request-validation failures surfaced synchronously by `run`/`submit`
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    UnsupportedLanguage(#[from] RegistryError),

    #[error("problem {0} not found")]
    ProblemNotFound(ProblemId),

    #[error("failed to load problem {problem_id}: {reason:#}")]
    ProblemLookup {
        problem_id: ProblemId,
        reason: anyhow::Error,
    },

    #[error("source code is {size} bytes, limit is {limit}")]
    SourceTooLarge { size: usize, limit: usize },

    #[error("input of test case {index} is {size} bytes, limit is {limit}")]
    InputTooLarge { index: usize, size: usize, limit: usize },

    #[error("execution queue is closed")]
    QueueClosed,
}
