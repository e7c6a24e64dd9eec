/// Job Store - concurrent table of execution jobs
///
/// Shared by the service (creates jobs), the workers (move them through the lifecycle) and
/// pollers (read snapshots). Every write happens under the entry's shard lock, so a reader
/// never observes a status without its matching result or error.

use crate::error::JobStoreError;
use chrono::Utc;
use dashmap::DashMap;
use judge_common::types::{CodeExecutionResult, ExecutionJob, JobId, JobStatus, SubmissionId};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<DashMap<JobId, ExecutionJob>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and store a Queued job, returning a snapshot of it
    pub fn create_job(&self, submission_id: Option<SubmissionId>) -> ExecutionJob {
        let job = ExecutionJob::new(submission_id);
        self.jobs.insert(job.job_id, job.clone());
        debug!(job_id = %job.job_id, submission_id = ?submission_id, "Job created");
        job
    }

    pub fn get_job(&self, job_id: &JobId) -> Option<ExecutionJob> {
        self.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    /// Lookup by the caller-supplied string form; anything unparsable is unknown
    pub fn get_job_str(&self, job_id: &str) -> Option<ExecutionJob> {
        job_id.parse().ok().and_then(|id| self.get_job(&id))
    }

    pub fn mark_running(&self, job_id: &JobId) -> Result<ExecutionJob, JobStoreError> {
        self.transition(job_id, JobStatus::Running, |_| {})
    }

    pub fn complete(
        &self,
        job_id: &JobId,
        result: CodeExecutionResult,
    ) -> Result<ExecutionJob, JobStoreError> {
        self.transition(job_id, JobStatus::Completed, |job| {
            job.result = Some(result);
            job.error = None;
        })
    }

    /// Fail a job. A result is attached when one exists (time limit exceeded).
    pub fn fail(
        &self,
        job_id: &JobId,
        error: impl Into<String>,
        result: Option<CodeExecutionResult>,
    ) -> Result<ExecutionJob, JobStoreError> {
        let error = error.into();
        self.transition(job_id, JobStatus::Failed, |job| {
            job.error = Some(error);
            job.result = result;
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Number of jobs currently in `status`
    pub fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|entry| entry.status == status).count()
    }

    fn transition<F>(&self, job_id: &JobId, next: JobStatus, apply: F) -> Result<ExecutionJob, JobStoreError>
    where
        F: FnOnce(&mut ExecutionJob),
    {
        let mut entry = self
            .jobs
            .get_mut(job_id)
            .ok_or(JobStoreError::NotFound(*job_id))?;

        let job = entry.value_mut();
        if !job.status.can_transition_to(next) {
            return Err(JobStoreError::InvalidTransition {
                job_id: *job_id,
                from: job.status,
                to: next,
            });
        }

        apply(job);
        job.status = next;
        job.updated_at = Utc::now();
        debug!(job_id = %job_id, status = %next, "Job updated");

        Ok(job.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use judge_common::types::SubmissionStatus;
    use std::collections::HashSet;

    fn accepted() -> CodeExecutionResult {
        CodeExecutionResult {
            output: "1 / 1 test cases passed".to_string(),
            submission_status: SubmissionStatus::Accepted,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_job_starts_queued() {
        let store = JobStore::new();
        let job = store.create_job(Some(SubmissionId(7)));

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.submission_id, Some(SubmissionId(7)));
        assert!(job.result.is_none());
        assert!(job.error.is_none());
        assert_eq!(store.get_job(&job.job_id), Some(job));
    }

    #[test]
    fn test_unknown_and_malformed_ids_are_absent() {
        let store = JobStore::new();
        store.create_job(None);

        assert!(store.get_job(&JobId::new()).is_none());
        assert!(store.get_job_str("not-a-uuid").is_none());
        assert!(store.get_job_str("").is_none());
    }

    #[test]
    fn test_lifecycle_completed() {
        let store = JobStore::new();
        let job = store.create_job(None);

        let running = store.mark_running(&job.job_id).unwrap();
        assert_eq!(running.status, JobStatus::Running);

        let done = store.complete(&job.job_id, accepted()).unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result, Some(accepted()));
        assert!(done.updated_at >= done.created_at);
    }

    #[test]
    fn test_fail_keeps_attached_result() {
        let store = JobStore::new();
        let job = store.create_job(None);
        store.mark_running(&job.job_id).unwrap();

        let result = CodeExecutionResult {
            timed_out: true,
            submission_status: SubmissionStatus::TimeLimitExceeded,
            ..Default::default()
        };
        let failed = store
            .fail(&job.job_id, "time limit exceeded", Some(result.clone()))
            .unwrap();

        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.error.as_deref(), Some("time limit exceeded"));
        assert_eq!(failed.result, Some(result));
    }

    #[test]
    fn test_terminal_states_are_final() {
        let store = JobStore::new();
        let job = store.create_job(None);
        store.mark_running(&job.job_id).unwrap();
        store.complete(&job.job_id, accepted()).unwrap();

        let err = store.fail(&job.job_id, "late failure", None).unwrap_err();
        assert_eq!(
            err,
            JobStoreError::InvalidTransition {
                job_id: job.job_id,
                from: JobStatus::Completed,
                to: JobStatus::Failed,
            }
        );
        assert!(store.mark_running(&job.job_id).is_err());
        assert_eq!(store.get_job(&job.job_id).unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn test_queued_job_cannot_complete_directly() {
        let store = JobStore::new();
        let job = store.create_job(None);

        assert!(store.complete(&job.job_id, accepted()).is_err());
        assert!(store.fail(&job.job_id, "discarded", None).is_ok());
    }

    #[test]
    fn test_missing_job_update() {
        let store = JobStore::new();
        let id = JobId::new();
        assert_eq!(store.mark_running(&id).unwrap_err(), JobStoreError::NotFound(id));
    }

    #[test]
    fn test_repeated_reads_are_identical() {
        let store = JobStore::new();
        let job = store.create_job(None);
        store.mark_running(&job.job_id).unwrap();
        store.complete(&job.job_id, accepted()).unwrap();

        let first = serde_json::to_string(&store.get_job(&job.job_id)).unwrap();
        let second = serde_json::to_string(&store.get_job(&job.job_id)).unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_and_updates() {
        let store = JobStore::new();
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    let job = store.create_job(None);
                    store.mark_running(&job.job_id).unwrap();
                    store.complete(&job.job_id, accepted()).unwrap();
                    ids.push(job.job_id);
                }
                ids
            }));
        }

        let mut all = HashSet::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }

        assert_eq!(all.len(), 400);
        assert_eq!(store.len(), 400);
        assert_eq!(store.count_by_status(JobStatus::Completed), 400);
    }
}
