/// Sandbox Runtime - the container contract executors run against
///
/// The runtime is a black box exposing create / start / exec / destroy. Production uses
/// `DockerRuntime`; tests substitute a scripted fake. Every sandbox is created fresh for one
/// execution and destroyed afterwards.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Mount point of the memory-backed writable workspace inside every sandbox
pub const WORKSPACE_DIR: &str = "/workspace";

/// Largest base64 chunk carried in a single exec environment variable.
/// Kept well below the kernel's per-string argument limit (128 KiB).
const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Per-stream capture cap used unless an exec asks for more
pub const DEFAULT_OUTPUT_LIMIT: usize = 1024 * 1024;

/// Hard resource ceilings applied to a sandbox
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxLimits {
    pub memory_bytes: i64,
    pub nano_cpus: i64,
    pub pids_limit: i64,
    pub workspace_size_mb: u32,
}

/// Everything needed to create one sandbox
#[derive(Debug, Clone)]
pub struct SandboxSpec {
    pub name: String,
    pub image: String,
    pub working_dir: String,
    pub user: Option<String>,
    pub env: Vec<String>,
    pub limits: SandboxLimits,
    /// How long the sandbox may stay up before it stops on its own
    pub lifetime: Duration,
}

/// Stage an exec belongs to, for logging and for fakes to dispatch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStage {
    Upload,
    Compile,
    Run,
}

impl fmt::Display for ExecStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExecStage::Upload => "upload",
            ExecStage::Compile => "compile",
            ExecStage::Run => "run",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub stage: ExecStage,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// Bytes captured per stream before output is cut
    pub output_limit: usize,
}

impl ExecRequest {
    /// `sh -c <script>` with the given environment
    pub fn shell(stage: ExecStage, script: impl Into<String>, env: Vec<String>) -> Self {
        Self {
            stage,
            cmd: vec!["sh".to_string(), "-c".to_string(), script.into()],
            env,
            output_limit: DEFAULT_OUTPUT_LIMIT,
        }
    }

    pub fn with_output_limit(mut self, output_limit: usize) -> Self {
        self.output_limit = output_limit.max(DEFAULT_OUTPUT_LIMIT);
        self
    }

    /// Shell script passed to `sh -c`, if this is a shell exec
    pub fn script(&self) -> Option<&str> {
        match self.cmd.as_slice() {
            [sh, flag, script] if sh == "sh" && flag == "-c" => Some(script.as_str()),
            _ => None,
        }
    }

    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            entry
                .split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

/// Captured result of one exec
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    /// Output exceeded the capture cap and was cut
    pub truncated: bool,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, the way compiler diagnostics are shown to users
    pub fn combined(&self) -> String {
        let mut combined = self.stdout.clone();
        combined.push_str(&self.stderr);
        combined
    }
}

#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create (but do not start) an isolated sandbox, returning its id
    async fn create(&self, spec: &SandboxSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput>;

    /// Stop and remove the sandbox. Must tolerate sandboxes that are already gone.
    async fn destroy(&self, id: &str) -> Result<()>;
}

/// Cleanup guard - guarantees sandbox removal.
///
/// `teardown` is the normal path. If the guard is dropped while still armed (timeout,
/// cancellation, panic) removal is spawned onto the current runtime instead.
pub struct SandboxGuard {
    runtime: Arc<dyn SandboxRuntime>,
    id: String,
    armed: bool,
}

impl SandboxGuard {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, id: String) -> Self {
        Self { runtime, id, armed: true }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn teardown(mut self) {
        self.armed = false;
        match self.runtime.destroy(&self.id).await {
            Ok(()) => debug!(sandbox_id = %self.id, "Sandbox removed"),
            Err(e) => warn!(sandbox_id = %self.id, error = %e, "Failed to remove sandbox"),
        }
    }
}

impl Drop for SandboxGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let runtime = self.runtime.clone();
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = runtime.destroy(&id).await {
                        warn!(sandbox_id = %id, error = %e, "Failed to cleanup sandbox");
                    }
                });
            }
            Err(_) => warn!(sandbox_id = %id, "No async runtime available, sandbox leaked"),
        }
    }
}

/// Write `content` to `path` inside the sandbox.
///
/// The content is base64-encoded and appended in chunks passed through the exec environment,
/// then decoded in place. Nothing user-controlled is ever spliced into shell text.
pub async fn upload(
    runtime: &dyn SandboxRuntime,
    id: &str,
    path: &str,
    content: &str,
) -> Result<()> {
    let encoded = general_purpose::STANDARD.encode(content.as_bytes());
    let staging = format!("{}.b64", path);

    let reset = ExecRequest::shell(ExecStage::Upload, format!(": > '{}'", staging), Vec::new());
    check_upload(runtime.exec(id, &reset).await, path)?;

    // base64 output is ASCII, so byte chunks are valid str slices
    for chunk in encoded.as_bytes().chunks(UPLOAD_CHUNK_BYTES) {
        let chunk = std::str::from_utf8(chunk).context("base64 chunk was not ASCII")?;
        let append = ExecRequest::shell(
            ExecStage::Upload,
            format!("printf '%s' \"$CHUNK\" >> '{}'", staging),
            vec![format!("CHUNK={}", chunk)],
        );
        check_upload(runtime.exec(id, &append).await, path)?;
    }

    let decode = ExecRequest::shell(
        ExecStage::Upload,
        format!("base64 -d '{0}' > '{1}' && rm -f '{0}'", staging, path),
        Vec::new(),
    );
    check_upload(runtime.exec(id, &decode).await, path)
}

fn check_upload(result: Result<ExecOutput>, path: &str) -> Result<()> {
    let output = result.with_context(|| format!("Failed to write {}", path))?;
    if !output.success() {
        bail!(
            "Writing {} exited with code {}: {}",
            path,
            output.exit_code,
            output.stderr.trim()
        );
    }
    Ok(())
}
