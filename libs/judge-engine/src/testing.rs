//! Scripted sandbox runtime and fixtures for unit tests.

use crate::executor::STDIN_PATH;
use crate::job_store::JobStore;
use crate::registry::ExecutorRegistry;
use crate::sandbox::{ExecOutput, ExecRequest, ExecStage, SandboxLimits, SandboxRuntime, SandboxSpec};
use crate::service::{ExecutionService, ProblemProvider, SubmissionTracker};
use crate::worker::{self, Worker, WorkerHandle};
use anyhow::{Result, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use judge_common::config::{EngineSettings, LanguageConfigManager};
use judge_common::types::{CodeExecutionRequest, ExecutionJob, JobId, TestCase};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) enum RunBehavior {
    Output(ExecOutput),
    Sleep(Duration),
}

impl RunBehavior {
    pub(crate) fn stdout(stdout: &str) -> Self {
        RunBehavior::Output(ExecOutput {
            exit_code: 0,
            stdout: stdout.to_string(),
            ..Default::default()
        })
    }

    pub(crate) fn crash(stderr: &str) -> Self {
        RunBehavior::Output(ExecOutput {
            exit_code: 1,
            stderr: stderr.to_string(),
            ..Default::default()
        })
    }
}

type Program = Arc<dyn Fn(&str) -> RunBehavior + Send + Sync>;

#[derive(Default)]
struct FakeSandbox {
    spec: Option<SandboxSpec>,
    started: bool,
    destroyed: bool,
    files: HashMap<String, String>,
    execs: Vec<ExecStage>,
}

/// In-memory stand-in for a container runtime.
///
/// Upload scripts are interpreted against a per-sandbox file map, compile execs follow the
/// configured outcome, and run execs call `program` with the current stdin file contents.
pub(crate) struct FakeRuntime {
    sandboxes: Mutex<HashMap<String, FakeSandbox>>,
    next_id: Mutex<usize>,
    program: Program,
    compile_error: Option<String>,
    fail_uploads: bool,
    fail_create: bool,
    upload_delay: Option<Duration>,
}

impl FakeRuntime {
    pub(crate) fn with_program<F>(program: F) -> Self
    where
        F: Fn(&str) -> RunBehavior + Send + Sync + 'static,
    {
        Self {
            sandboxes: Mutex::new(HashMap::new()),
            next_id: Mutex::new(0),
            program: Arc::new(program),
            compile_error: None,
            fail_uploads: false,
            fail_create: false,
            upload_delay: None,
        }
    }

    /// Every program prints its input back
    pub(crate) fn echo() -> Self {
        Self::with_program(RunBehavior::stdout)
    }

    pub(crate) fn compile_error(mut self, stderr: &str) -> Self {
        self.compile_error = Some(stderr.to_string());
        self
    }

    pub(crate) fn failing_uploads(mut self) -> Self {
        self.fail_uploads = true;
        self
    }

    /// Every upload exec stalls for `delay` before doing its work
    pub(crate) fn slow_uploads(mut self, delay: Duration) -> Self {
        self.upload_delay = Some(delay);
        self
    }

    pub(crate) fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub(crate) fn file(&self, id: &str, path: &str) -> Option<String> {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes.get(id).and_then(|s| s.files.get(path).cloned())
    }

    pub(crate) fn exec_count(&self, id: &str, stage: ExecStage) -> usize {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes
            .get(id)
            .map(|s| s.execs.iter().filter(|e| **e == stage).count())
            .unwrap_or(0)
    }

    pub(crate) fn total_exec_count(&self, stage: ExecStage) -> usize {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes
            .values()
            .map(|s| s.execs.iter().filter(|e| **e == stage).count())
            .sum()
    }

    pub(crate) fn destroyed(&self, id: &str) -> bool {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes.get(id).is_some_and(|s| s.destroyed)
    }

    pub(crate) fn all_destroyed(&self) -> bool {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes.values().all(|s| s.destroyed)
    }

    pub(crate) fn created_count(&self) -> usize {
        self.sandboxes.lock().unwrap().len()
    }

    pub(crate) fn specs(&self) -> Vec<SandboxSpec> {
        let sandboxes = self.sandboxes.lock().unwrap();
        sandboxes.values().filter_map(|s| s.spec.clone()).collect()
    }

    pub(crate) fn sandbox_ids(&self) -> Vec<String> {
        self.sandboxes.lock().unwrap().keys().cloned().collect()
    }

    fn upload(sandbox: &mut FakeSandbox, request: &ExecRequest) -> Result<ExecOutput> {
        let script = request.script().unwrap_or_default();
        let quoted: Vec<&str> = script.split('\'').skip(1).step_by(2).collect();

        if script.starts_with(": >") {
            sandbox.files.insert(quoted[0].to_string(), String::new());
        } else if script.starts_with("printf") {
            // quoted[0] is the printf format
            let chunk = request.env_var("CHUNK").unwrap_or_default();
            sandbox
                .files
                .entry(quoted[1].to_string())
                .or_default()
                .push_str(chunk);
        } else if script.starts_with("base64 -d") {
            let encoded = sandbox.files.remove(quoted[0]).unwrap_or_default();
            let decoded = general_purpose::STANDARD.decode(encoded)?;
            sandbox
                .files
                .insert(quoted[1].to_string(), String::from_utf8(decoded)?);
        } else {
            bail!("unexpected upload script: {}", script);
        }

        Ok(ExecOutput::default())
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<String> {
        if self.fail_create {
            bail!("Cannot connect to the Docker daemon");
        }

        let mut next_id = self.next_id.lock().unwrap();
        *next_id += 1;
        let id = format!("sandbox-{}", *next_id);

        self.sandboxes.lock().unwrap().insert(
            id.clone(),
            FakeSandbox {
                spec: Some(spec.clone()),
                ..Default::default()
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let mut sandboxes = self.sandboxes.lock().unwrap();
        match sandboxes.get_mut(id) {
            Some(sandbox) => {
                sandbox.started = true;
                Ok(())
            }
            None => bail!("no such sandbox: {}", id),
        }
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput> {
        if let (ExecStage::Upload, Some(delay)) = (request.stage, self.upload_delay) {
            tokio::time::sleep(delay).await;
        }

        let behavior = {
            let mut sandboxes = self.sandboxes.lock().unwrap();
            let sandbox = match sandboxes.get_mut(id) {
                Some(s) if !s.destroyed => s,
                _ => bail!("sandbox {} is not running", id),
            };
            sandbox.execs.push(request.stage);

            match request.stage {
                ExecStage::Compile | ExecStage::Run if !sandbox.started => {
                    bail!("sandbox {} was never started", id);
                }
                ExecStage::Upload if self.fail_uploads => {
                    return Ok(ExecOutput {
                        exit_code: 1,
                        stderr: "sh: can't create: Read-only file system".to_string(),
                        ..Default::default()
                    });
                }
                ExecStage::Upload => return Self::upload(sandbox, request),
                ExecStage::Compile => {
                    return Ok(match &self.compile_error {
                        Some(stderr) => ExecOutput {
                            exit_code: 1,
                            stderr: stderr.clone(),
                            ..Default::default()
                        },
                        None => ExecOutput::default(),
                    });
                }
                ExecStage::Run => {
                    let input = sandbox.files.get(STDIN_PATH).cloned().unwrap_or_default();
                    (self.program)(&input)
                }
            }
        };

        match behavior {
            RunBehavior::Output(output) => Ok(cap_output(output, request.output_limit)),
            RunBehavior::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(ExecOutput::default())
            }
        }
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        if let Some(sandbox) = self.sandboxes.lock().unwrap().get_mut(id) {
            sandbox.destroyed = true;
        }
        Ok(())
    }
}

/// Cut stdout the way a real runtime does once it passes `limit`
fn cap_output(mut output: ExecOutput, limit: usize) -> ExecOutput {
    if output.stdout.len() > limit {
        let mut cut = limit;
        while !output.stdout.is_char_boundary(cut) {
            cut -= 1;
        }
        output.stdout.truncate(cut);
        output.truncated = true;
    }
    output
}

pub(crate) fn spec() -> SandboxSpec {
    SandboxSpec {
        name: "judge-test".to_string(),
        image: "test:latest".to_string(),
        working_dir: "/workspace".to_string(),
        user: None,
        env: Vec::new(),
        limits: SandboxLimits {
            memory_bytes: 64 * 1024 * 1024,
            nano_cpus: 1_000_000_000,
            pids_limit: 16,
            workspace_size_mb: 16,
        },
        lifetime: Duration::from_secs(60),
    }
}

pub(crate) fn request(language: &str, tests: &[(&str, &str)]) -> CodeExecutionRequest {
    CodeExecutionRequest {
        language: language.to_string(),
        source_code: "source".to_string(),
        test_cases: tests
            .iter()
            .map(|(input, expected)| TestCase {
                input: input.to_string(),
                expected_output: expected.to_string(),
            })
            .collect(),
        time_limit_ms: 1_000,
        memory_limit_mb: 0,
    }
}

/// Poll until the job reaches a terminal state
pub(crate) async fn wait_terminal(store: &JobStore, job_id: &JobId) -> ExecutionJob {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(job) = store.get_job(job_id) {
            if job.status.is_terminal() {
                return job;
            }
        }
        assert!(tokio::time::Instant::now() < deadline, "job {} never finished", job_id);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Service, store and a single-consumer worker pool over a fake runtime
pub(crate) struct TestEngine {
    pub(crate) service: Arc<ExecutionService>,
    pub(crate) store: JobStore,
    handle: WorkerHandle,
}

impl TestEngine {
    pub(crate) fn start(
        runtime: FakeRuntime,
        problems: Arc<dyn ProblemProvider>,
        tracker: Option<Arc<dyn SubmissionTracker>>,
    ) -> Self {
        let registry = Arc::new(
            ExecutorRegistry::with_defaults(
                Arc::new(runtime),
                &LanguageConfigManager::builtin(),
                &EngineSettings::default(),
            )
            .unwrap(),
        );
        let store = JobStore::new();
        let (queue, receiver) = worker::channel();

        let mut worker = Worker::new(store.clone(), registry.clone());
        if let Some(tracker) = tracker {
            worker = worker.with_tracker(tracker);
        }
        let handle = worker.spawn(receiver, 1);

        let service = Arc::new(ExecutionService::new(store.clone(), queue, registry, problems));
        Self { service, store, handle }
    }

    pub(crate) async fn wait(&self, job_id: &JobId) -> ExecutionJob {
        wait_terminal(&self.store, job_id).await
    }

    pub(crate) async fn shutdown(self) {
        self.handle.shutdown().await;
    }
}
