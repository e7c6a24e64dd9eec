/// Execution Queue + Worker pool
///
/// The queue is an unbounded FIFO; enqueueing never blocks the request path. Each consumer
/// takes one job at a time and runs it to completion before dequeuing the next. With a
/// concurrency of 1 jobs execute strictly one after another.
///
/// Known liveness gap: a job dequeued by a consumer that dies outside of `process` (the
/// process is killed, for instance) stays Running forever. Pollers see no timeout.

use crate::job_store::JobStore;
use crate::registry::ExecutorRegistry;
use crate::service::SubmissionTracker;
use futures_util::FutureExt;
use judge_common::types::{CodeExecutionRequest, CodeExecutionResult, ExecutionJob, SubmissionId};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Error recorded on jobs still queued when the pool shuts down
pub const DISCARDED_ON_SHUTDOWN: &str = "discarded: worker shut down";

/// One unit of work: the job record and the request it executes
#[derive(Debug, Clone)]
pub struct QueuedExecution {
    pub job: ExecutionJob,
    pub request: CodeExecutionRequest,
}

type Receiver = Arc<Mutex<mpsc::UnboundedReceiver<QueuedExecution>>>;

/// Producer side of the queue
#[derive(Clone)]
pub struct ExecutionQueue {
    sender: mpsc::UnboundedSender<QueuedExecution>,
}

impl ExecutionQueue {
    /// Hand `item` to the workers. Gives the item back if the pool has shut down.
    pub fn enqueue(&self, item: QueuedExecution) -> Result<(), QueuedExecution> {
        self.sender.send(item).map_err(|e| e.0)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side, handed to [`Worker::spawn`]
pub struct ExecutionReceiver {
    receiver: mpsc::UnboundedReceiver<QueuedExecution>,
}

pub fn channel() -> (ExecutionQueue, ExecutionReceiver) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (ExecutionQueue { sender }, ExecutionReceiver { receiver })
}

#[derive(Clone)]
pub struct Worker {
    store: JobStore,
    registry: Arc<ExecutorRegistry>,
    tracker: Option<Arc<dyn SubmissionTracker>>,
}

impl Worker {
    pub fn new(store: JobStore, registry: Arc<ExecutorRegistry>) -> Self {
        Self { store, registry, tracker: None }
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn SubmissionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Start `concurrency` consumers sharing `receiver`
    pub fn spawn(self, receiver: ExecutionReceiver, concurrency: usize) -> WorkerHandle {
        let receiver: Receiver = Arc::new(Mutex::new(receiver.receiver));
        let cancel = CancellationToken::new();
        let concurrency = concurrency.max(1);

        let consumers = (0..concurrency)
            .map(|consumer| {
                let worker = self.clone();
                let receiver = receiver.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker.consume(consumer, receiver, cancel).await })
            })
            .collect();

        info!(concurrency = concurrency, "Worker pool started");

        WorkerHandle {
            cancel,
            consumers,
            receiver,
            store: self.store,
        }
    }

    #[instrument(skip(self, receiver, cancel))]
    async fn consume(&self, consumer: usize, receiver: Receiver, cancel: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = async { receiver.lock().await.recv().await } => next,
            };

            match next {
                Some(item) => self.process(item, &cancel).await,
                None => {
                    debug!("Queue closed");
                    break;
                }
            }
        }

        debug!("Consumer stopped");
    }

    /// Run one job through its lifecycle. Never panics and never returns an error: every
    /// outcome ends in a terminal job state.
    #[instrument(
        skip(self, item, cancel),
        fields(job_id = %item.job.job_id, language = %item.request.language)
    )]
    pub async fn process(&self, item: QueuedExecution, cancel: &CancellationToken) {
        let QueuedExecution { job, request } = item;
        let job_id = job.job_id;

        if let Err(e) = self.store.mark_running(&job_id) {
            warn!(error = %e, "Skipping job");
            return;
        }

        // Resolved on every dequeue
        let executor = match self.registry.resolve(&request.language) {
            Ok(executor) => executor,
            Err(e) => {
                warn!(error = %e, "Cannot execute job");
                self.fail(&job, e.to_string(), None);
                return;
            }
        };

        info!(
            test_count = request.test_cases.len(),
            time_limit_ms = request.time_limit_ms,
            source_size = request.source_code.len(),
            "Executing job"
        );

        let outcome = AssertUnwindSafe(executor.execute(&request, cancel))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(result)) if result.timed_out => {
                let error = if result.error.is_empty() {
                    "time limit exceeded".to_string()
                } else {
                    result.error.clone()
                };
                self.fail(&job, error, Some(result.clone()));
                result
            }
            Ok(Ok(result)) => {
                if let Err(e) = self.store.complete(&job_id, result.clone()) {
                    error!(error = %e, "Failed to record job result");
                }
                info!(status = ?result.submission_status, "Job completed");
                result
            }
            Ok(Err(e)) => {
                error!(error = %e, "Execution failed");
                self.fail(&job, e.to_string(), None);
                return;
            }
            Err(_) => {
                error!("Executor panicked");
                self.fail(&job, "internal error: executor panicked", None);
                return;
            }
        };

        if let Some(submission_id) = job.submission_id {
            self.report(submission_id, &result).await;
        }
    }

    fn fail(&self, job: &ExecutionJob, error: impl Into<String>, result: Option<CodeExecutionResult>) {
        if let Err(e) = self.store.fail(&job.job_id, error, result) {
            error!(job_id = %job.job_id, error = %e, "Failed to record job failure");
        }
    }

    /// Persist the verdict. Failures are logged; the in-memory job is already terminal.
    async fn report(&self, submission_id: SubmissionId, result: &CodeExecutionResult) {
        let Some(tracker) = &self.tracker else {
            return;
        };

        let time_ms = result.max_execution_time_ms();
        match tracker
            .update_result(submission_id, result.submission_status, time_ms, 0)
            .await
        {
            Ok(()) => debug!(submission_id = %submission_id, "Submission verdict recorded"),
            Err(e) => error!(
                submission_id = %submission_id,
                error = %e,
                "Failed to record submission verdict"
            ),
        }
    }
}

/// Running worker pool
pub struct WorkerHandle {
    cancel: CancellationToken,
    consumers: Vec<JoinHandle<()>>,
    receiver: Receiver,
    store: JobStore,
}

impl WorkerHandle {
    /// Stop the pool. In-flight executions are cancelled, and jobs still queued are marked
    /// Failed. Returns the number of discarded jobs.
    pub async fn shutdown(self) -> usize {
        self.cancel.cancel();

        for consumer in self.consumers {
            if let Err(e) = consumer.await {
                error!(error = %e, "Consumer task ended abnormally");
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();

        let mut discarded = 0;
        while let Ok(item) = receiver.try_recv() {
            if let Err(e) = self.store.fail(&item.job.job_id, DISCARDED_ON_SHUTDOWN, None) {
                warn!(job_id = %item.job.job_id, error = %e, "Failed to discard job");
            }
            discarded += 1;
        }

        info!(discarded = discarded, "Worker pool stopped");
        discarded
    }
}
