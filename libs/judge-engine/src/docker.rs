/// Docker-based sandbox runtime
///
/// **Isolation applied to every container (not configurable away):**
/// - Networking disabled (`network_mode=none`)
/// - Read-only root filesystem; the only writable path is a size-capped tmpfs workspace
/// - All capabilities dropped, `no-new-privileges`
/// - Hard pids, memory (no swap) and CPU ceilings
/// - Auto-removed once stopped
///
/// Containers idle on `sleep` and all work happens through exec calls, so one container
/// serves the upload, compile and every test run of a single execution.

use crate::sandbox::{ExecOutput, ExecRequest, SandboxRuntime, SandboxSpec};
use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info, warn};

pub struct DockerRuntime {
    docker: Docker,
    pull_images: bool,
}

impl DockerRuntime {
    pub fn connect(pull_images: bool) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self { docker, pull_images })
    }

    /// Ensure the image is available locally, pulling it on a cache miss
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            debug!(image = %image, "Image cache hit");
            return Ok(());
        }

        if !self.pull_images {
            anyhow::bail!("Image {} is not present and pulling is disabled", image);
        }

        warn!(image = %image, "Image cache miss, pulling");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %image, "Image pulled");
        Ok(())
    }
}

/// Container configuration for `spec` with the full isolation profile
pub fn container_config(spec: &SandboxSpec) -> Config<String> {
    let mut tmpfs = HashMap::new();
    tmpfs.insert(
        spec.working_dir.clone(),
        format!("rw,exec,nosuid,size={}m,mode=1777", spec.limits.workspace_size_mb),
    );

    Config {
        image: Some(spec.image.clone()),
        // Keep the container alive for exec calls
        cmd: Some(vec![
            "sh".to_string(),
            "-c".to_string(),
            format!("sleep {}", spec.lifetime.as_secs().max(1)),
        ]),
        entrypoint: Some(vec![]),
        env: Some(spec.env.clone()),
        working_dir: Some(spec.working_dir.clone()),
        user: spec.user.clone(),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            network_mode: Some("none".to_string()),
            readonly_rootfs: Some(true),
            tmpfs: Some(tmpfs),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            pids_limit: Some(spec.limits.pids_limit),
            memory: Some(spec.limits.memory_bytes),
            memory_swap: Some(spec.limits.memory_bytes),
            nano_cpus: Some(spec.limits.nano_cpus),
            auto_remove: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Append `message` to `buffer` without growing it past `limit`
fn capture(buffer: &mut Vec<u8>, message: &[u8], limit: usize) -> bool {
    let room = limit.saturating_sub(buffer.len());
    if message.len() > room {
        buffer.extend_from_slice(&message[..room]);
        true
    } else {
        buffer.extend_from_slice(message);
        false
    }
}

/// Removal races with auto-remove; "gone" and "already being removed" are fine
fn is_already_gone(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code: 404 | 409, .. }
    )
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn create(&self, spec: &SandboxSpec) -> Result<String> {
        self.ensure_image(&spec.image)
            .await
            .with_context(|| format!("Failed to ensure Docker image '{}' is available", spec.image))?;

        let options = CreateContainerOptions {
            name: spec.name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .context("Failed to create Docker container")?;

        for warning in &container.warnings {
            warn!(container = %spec.name, warning = %warning, "Docker create warning");
        }

        debug!(container_id = %container.id, image = %spec.image, "Container created");
        Ok(container.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")
    }

    async fn exec(&self, id: &str, request: &ExecRequest) -> Result<ExecOutput> {
        let exec_config = CreateExecOptions {
            cmd: Some(request.cmd.clone()),
            env: Some(request.env.clone()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(id, exec_config)
            .await
            .with_context(|| format!("Failed to create exec for {}", request.stage))?;

        let start_config = StartExecOptions {
            detach: false,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(&exec.id, Some(start_config))
            .await
            .with_context(|| format!("Failed to start exec for {}", request.stage))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut truncated = false;

        match started {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(msg) = output.next().await {
                    match msg.context("Failed to read exec output")? {
                        LogOutput::StdOut { message } => {
                            truncated |= capture(&mut stdout, &message, request.output_limit);
                        }
                        LogOutput::StdErr { message } => {
                            truncated |= capture(&mut stderr, &message, request.output_limit);
                        }
                        _ => {}
                    }
                }
            }
            StartExecResults::Detached => {
                anyhow::bail!("Exec for {} started detached", request.stage);
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .context("Failed to inspect exec")?;

        let exit_code = inspect
            .exit_code
            .ok_or_else(|| anyhow::anyhow!("No exit code captured for {}", request.stage))?;

        if truncated {
            warn!(stage = %request.stage, limit = request.output_limit, "Exec output truncated");
        }

        Ok(ExecOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            truncated,
        })
    }

    async fn destroy(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_already_gone(&e) => Ok(()),
            Err(e) => Err(e).context("Failed to remove Docker container"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{ExecStage, SandboxLimits, DEFAULT_OUTPUT_LIMIT};

    fn spec() -> SandboxSpec {
        SandboxSpec {
            name: "judge-java-test".to_string(),
            image: "eclipse-temurin:17-jdk-alpine".to_string(),
            working_dir: "/workspace".to_string(),
            user: Some("65534:65534".to_string()),
            env: vec!["HOME=/workspace".to_string()],
            limits: SandboxLimits {
                memory_bytes: 256 * 1024 * 1024,
                nano_cpus: 1_000_000_000,
                pids_limit: 64,
                workspace_size_mb: 64,
            },
            lifetime: std::time::Duration::from_secs(95),
        }
    }

    #[test]
    fn test_container_config_applies_every_isolation_default() {
        let config = container_config(&spec());
        let host = config.host_config.unwrap();

        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(host.readonly_rootfs, Some(true));
        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(host.security_opt, Some(vec!["no-new-privileges".to_string()]));
        assert_eq!(host.pids_limit, Some(64));
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.memory_swap, host.memory);
        assert_eq!(host.nano_cpus, Some(1_000_000_000));
        assert_eq!(host.auto_remove, Some(true));
        assert_eq!(config.user.as_deref(), Some("65534:65534"));

        let tmpfs = host.tmpfs.unwrap();
        let workspace = tmpfs.get("/workspace").unwrap();
        assert!(workspace.contains("rw,exec"));
        assert!(workspace.contains("size=64m"));

        let cmd = config.cmd.unwrap();
        assert_eq!(cmd.last().map(String::as_str), Some("sleep 95"));
    }

    #[test]
    fn test_capture_caps_output() {
        let limit = 16;
        let mut buffer = vec![b'a'; limit - 2];
        assert!(!capture(&mut buffer, b"b", limit));
        assert!(capture(&mut buffer, b"cdef", limit));
        assert_eq!(buffer.len(), limit);
        assert!(capture(&mut buffer, b"g", limit));
        assert_eq!(buffer.len(), limit);
    }

    #[test]
    fn test_capture_keeps_output_under_a_raised_limit() {
        // 200k lines, larger than the default cap
        let expected: String = (0..200_000).map(|i| format!("{}\n", i)).collect();
        assert!(expected.len() > DEFAULT_OUTPUT_LIMIT);

        let request = ExecRequest::shell(ExecStage::Run, "true", vec![])
            .with_output_limit(expected.len() + 1024);
        let mut buffer = Vec::new();
        let mut truncated = false;
        for chunk in expected.as_bytes().chunks(8 * 1024) {
            truncated |= capture(&mut buffer, chunk, request.output_limit);
        }

        assert!(!truncated);
        assert_eq!(buffer, expected.as_bytes());
    }

    /// Full round trip against a local Docker daemon
    #[tokio::test]
    #[ignore] // Requires Docker
    async fn test_docker_exec_round_trip() {
        let runtime = DockerRuntime::connect(true).expect("Failed to connect to Docker");
        let mut spec = spec();
        spec.name = format!("judge-test-{}", uuid::Uuid::new_v4());
        spec.image = "alpine:3.19".to_string();

        let id = runtime.create(&spec).await.expect("create");
        runtime.start(&id).await.expect("start");

        let output = runtime
            .exec(&id, &ExecRequest::shell(ExecStage::Run, "echo hi; echo oops >&2; exit 3", vec![]))
            .await
            .expect("exec");
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stdout.trim(), "hi");
        assert_eq!(output.stderr.trim(), "oops");

        let denied = runtime
            .exec(&id, &ExecRequest::shell(ExecStage::Run, "touch /etc/owned", vec![]))
            .await
            .expect("exec");
        assert_ne!(denied.exit_code, 0);

        runtime.destroy(&id).await.expect("destroy");
        runtime.destroy(&id).await.expect("destroy is idempotent");
    }
}
