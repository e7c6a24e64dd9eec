/// Executor - runs one execution request inside a fresh sandbox
///
/// **Protocol (identical for every language):**
/// 1. Create an isolated sandbox from the language image with hard limits
/// 2. Start it and upload the source under the language's file-name convention
/// 3. Compile once if the toolchain has a compile step; failure short-circuits
/// 4. Run each test case in input order, stdin fed from an uploaded file
/// 5. Aggregate per-test results into a verdict
/// 6. Tear the sandbox down on every exit path
///
/// Judged-code failures end up in the returned result. Only infrastructure problems and
/// cancellation surface as `ExecutorError`.

use crate::error::ExecutorError;
use crate::evaluator;
use crate::sandbox::{
    self, ExecOutput, ExecRequest, ExecStage, SandboxGuard, SandboxLimits, SandboxRuntime,
    SandboxSpec, WORKSPACE_DIR,
};
use anyhow::Context;
use async_trait::async_trait;
use judge_common::config::{EngineSettings, LanguageConfig, VerdictPolicy};
use judge_common::types::{CodeExecutionRequest, CodeExecutionResult, Language};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// File the current test case's input is written to before each run
pub const STDIN_PATH: &str = "/workspace/stdin.txt";

/// Bound on writing one file (source or test input) into the sandbox
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Room allowed above the expected output before stdout is cut
const OUTPUT_LIMIT_MARGIN: usize = 64 * 1024;

/// Extra sandbox lifetime on top of the sum of every stage's bound
const SANDBOX_LIFETIME_SLACK: Duration = Duration::from_secs(30);

#[async_trait]
pub trait Executor: Send + Sync {
    fn language(&self) -> Language;

    async fn execute(
        &self,
        request: &CodeExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<CodeExecutionResult, ExecutorError>;
}

/// Language-specific knowledge: where the source goes and how to build and run it
pub trait Toolchain: Send + Sync + 'static {
    fn language(&self) -> Language;

    /// File name the source is written to inside the workspace
    fn source_file(&self) -> &'static str;

    /// Shell script compiling the source, if the language has a compile step
    fn compile_command(&self) -> Option<String>;

    /// Shell script running the program; stdin redirection is appended by the executor
    fn run_command(&self) -> String;

    /// Extra environment for every exec in the sandbox, given its memory ceiling
    fn env(&self, _memory_mb: u32) -> Vec<String> {
        Vec::new()
    }
}

/// Process-wide knobs shared by every executor
#[derive(Debug, Clone)]
pub struct ExecutorOptions {
    pub verdict_policy: VerdictPolicy,
    pub default_time_limit_ms: u64,
    pub sandbox_user: Option<String>,
    pub upload_timeout: Duration,
}

impl From<&EngineSettings> for ExecutorOptions {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            verdict_policy: settings.verdict_policy,
            default_time_limit_ms: settings.default_time_limit_ms,
            sandbox_user: settings.sandbox_user.clone(),
            upload_timeout: DEFAULT_UPLOAD_TIMEOUT,
        }
    }
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        (&EngineSettings::default()).into()
    }
}

enum Bounded {
    Finished(ExecOutput),
    TimedOut,
}

/// The sandbox protocol, parameterized by a language toolchain
pub struct SandboxExecutor<T: Toolchain> {
    toolchain: T,
    runtime: Arc<dyn SandboxRuntime>,
    config: LanguageConfig,
    options: ExecutorOptions,
}

impl<T: Toolchain> SandboxExecutor<T> {
    pub fn new(
        toolchain: T,
        runtime: Arc<dyn SandboxRuntime>,
        config: LanguageConfig,
        options: ExecutorOptions,
    ) -> Self {
        Self { toolchain, runtime, config, options }
    }

    fn time_limit(&self, request: &CodeExecutionRequest) -> Duration {
        let ms = if request.time_limit_ms > 0 {
            request.time_limit_ms
        } else {
            self.options.default_time_limit_ms
        };
        Duration::from_millis(ms)
    }

    fn memory_limit_mb(&self, request: &CodeExecutionRequest) -> u32 {
        if request.memory_limit_mb > 0 {
            request.memory_limit_mb
        } else {
            self.config.memory_limit_mb
        }
    }

    /// Compile, every upload and every test run, plus slack
    fn sandbox_lifetime(&self, request: &CodeExecutionRequest) -> Duration {
        let tests = u32::try_from(request.test_cases.len()).unwrap_or(u32::MAX);
        let per_test = self.time_limit(request).saturating_add(self.options.upload_timeout);

        Duration::from_millis(self.config.compile_timeout_ms)
            .saturating_add(self.options.upload_timeout)
            .saturating_add(per_test.saturating_mul(tests))
            .saturating_add(SANDBOX_LIFETIME_SLACK)
    }

    fn sandbox_spec(&self, request: &CodeExecutionRequest) -> SandboxSpec {
        let memory_mb = self.memory_limit_mb(request);

        let mut env = vec![format!("HOME={}", WORKSPACE_DIR)];
        env.extend(self.toolchain.env(memory_mb));

        SandboxSpec {
            name: format!("judge-{}-{}", self.toolchain.language(), uuid::Uuid::new_v4()),
            image: self.config.image.clone(),
            working_dir: WORKSPACE_DIR.to_string(),
            user: self.options.sandbox_user.clone(),
            env,
            limits: SandboxLimits {
                memory_bytes: i64::from(memory_mb) * 1024 * 1024,
                nano_cpus: (f64::from(self.config.cpu_limit) * 1_000_000_000.0) as i64,
                pids_limit: self.config.pids_limit,
                workspace_size_mb: self.config.workspace_size_mb,
            },
            lifetime: self.sandbox_lifetime(request),
        }
    }

    /// Run one exec bounded by `limit`, racing cancellation
    async fn exec_bounded(
        &self,
        id: &str,
        request: &ExecRequest,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<Bounded, ExecutorError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
            outcome = tokio::time::timeout(limit, self.runtime.exec(id, request)) => match outcome {
                Ok(Ok(output)) => Ok(Bounded::Finished(output)),
                Ok(Err(e)) => Err(ExecutorError::Sandbox(
                    e.context(format!("{} exec failed", request.stage)),
                )),
                Err(_) => Ok(Bounded::TimedOut),
            }
        }
    }

    /// Write a file into the sandbox, bounded by the upload timeout and racing cancellation
    async fn upload(
        &self,
        id: &str,
        path: &str,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutorError> {
        let limit = self.options.upload_timeout;
        let write = sandbox::upload(self.runtime.as_ref(), id, path, content);

        tokio::select! {
            _ = cancel.cancelled() => Err(ExecutorError::Cancelled),
            outcome = tokio::time::timeout(limit, write) => match outcome {
                Ok(result) => result.map_err(ExecutorError::Sandbox),
                Err(_) => Err(ExecutorError::Sandbox(anyhow::anyhow!(
                    "Writing {} timed out after {} ms",
                    path,
                    limit.as_millis()
                ))),
            }
        }
    }

    async fn run_protocol(
        &self,
        id: &str,
        request: &CodeExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<CodeExecutionResult, ExecutorError> {
        self.runtime
            .start(id)
            .await
            .context("Failed to start sandbox")
            .map_err(ExecutorError::Sandbox)?;

        let env = self.toolchain.env(self.memory_limit_mb(request));
        let source_path = format!("{}/{}", WORKSPACE_DIR, self.toolchain.source_file());
        self.upload(id, &source_path, &request.source_code, cancel).await?;

        if let Some(script) = self.toolchain.compile_command() {
            let compile = ExecRequest::shell(ExecStage::Compile, script, env.clone());
            let limit = Duration::from_millis(self.config.compile_timeout_ms);
            let started = Instant::now();

            match self.exec_bounded(id, &compile, limit, cancel).await? {
                Bounded::Finished(output) if output.success() => {
                    debug!(
                        compilation_time_ms = started.elapsed().as_millis() as u64,
                        "Compilation succeeded"
                    );
                }
                Bounded::Finished(output) => {
                    warn!(
                        exit_code = output.exit_code,
                        error_preview = output.stderr.lines().next().unwrap_or(""),
                        "Compilation failed"
                    );
                    return Ok(evaluator::compilation_failed(&output));
                }
                Bounded::TimedOut => {
                    warn!(compile_timeout_ms = self.config.compile_timeout_ms, "Compilation timed out");
                    return Ok(evaluator::compilation_timed_out(self.config.compile_timeout_ms));
                }
            }
        }

        let time_limit = self.time_limit(request);
        let run_script = format!("{} < {}", self.toolchain.run_command(), STDIN_PATH);
        let total = request.test_cases.len();
        let mut results = Vec::with_capacity(total);

        for (idx, test_case) in request.test_cases.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(ExecutorError::Cancelled);
            }

            let index = idx + 1;
            self.upload(id, STDIN_PATH, &test_case.input, cancel).await?;

            let output_limit = test_case.expected_output.len().saturating_add(OUTPUT_LIMIT_MARGIN);
            let run = ExecRequest::shell(ExecStage::Run, run_script.clone(), env.clone())
                .with_output_limit(output_limit);
            let started = Instant::now();
            let bounded = self.exec_bounded(id, &run, time_limit, cancel).await?;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match bounded {
                Bounded::Finished(output) => {
                    let result = evaluator::evaluate_test(index, test_case, &output, elapsed_ms);
                    debug!(
                        test_num = index,
                        passed = result.passed,
                        truncated = output.truncated,
                        exit_code = output.exit_code,
                        execution_ms = elapsed_ms,
                        "Test result"
                    );
                    results.push(result);
                }
                Bounded::TimedOut => {
                    warn!(
                        test_num = index,
                        time_limit_ms = time_limit.as_millis() as u64,
                        "Test execution timed out"
                    );
                    results.push(evaluator::timed_out_test(index, test_case, elapsed_ms));
                    return Ok(evaluator::time_limit_exceeded(
                        results,
                        total,
                        time_limit.as_millis() as u64,
                    ));
                }
            }
        }

        Ok(evaluator::aggregate(results, self.options.verdict_policy))
    }
}

#[async_trait]
impl<T: Toolchain> Executor for SandboxExecutor<T> {
    fn language(&self) -> Language {
        self.toolchain.language()
    }

    #[tracing::instrument(
        skip(self, request, cancel),
        fields(language = %self.toolchain.language(), test_count = request.test_cases.len())
    )]
    async fn execute(
        &self,
        request: &CodeExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<CodeExecutionResult, ExecutorError> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let spec = self.sandbox_spec(request);
        let started = Instant::now();

        let id = self
            .runtime
            .create(&spec)
            .await
            .with_context(|| format!("Failed to create sandbox from image {}", spec.image))
            .map_err(ExecutorError::Sandbox)?;

        let guard = SandboxGuard::new(self.runtime.clone(), id);
        let outcome = self.run_protocol(guard.id(), request, cancel).await;
        guard.teardown().await;

        if let Ok(result) = &outcome {
            info!(
                status = ?result.submission_status,
                passed = result.passed_count(),
                executed = result.test_case_results.len(),
                timed_out = result.timed_out,
                total_ms = started.elapsed().as_millis() as u64,
                "Execution finished"
            );
        }

        outcome
    }
}
