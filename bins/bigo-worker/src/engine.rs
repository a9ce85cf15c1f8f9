/// Execution Engine - Sandboxed Code Execution
///
/// **Core Responsibility:**
/// Run one program under CPU/memory/network/time limits and capture raw
/// stdout, stderr, exit code and wall-clock duration.
///
/// **Contract:**
/// - Unsupported language is the only error; it is raised before anything
///   is allocated
/// - Infrastructure failures come back as an output with a negative exit code
/// - Timeouts kill the container and report exit code 124
/// - Every run gets its own scratch directory and container, both removed
///   on every exit path
///
/// The engine knows nothing about timing markers or complexity classes;
/// interpreting the output is the evaluator's job.

use anyhow::{Context, Result};
use async_trait::async_trait;
use bigo_common::config::SandboxConfig;
use bigo_common::language::{LanguageRegistry, LanguageSpec};
use bigo_common::{Language, UnsupportedLanguage};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exit code reported when the wall-clock budget was exceeded
pub const TIMEOUT_EXIT_CODE: i64 = 124;

/// Exit code reported when the sandbox could not be provisioned
pub const INFRASTRUCTURE_EXIT_CODE: i64 = -1;

pub const TIMEOUT_ANNOTATION: &str = "Execution Timed Out";

/// Captured stdout/stderr are truncated past this size
const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Raw output of one sandboxed run
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionOutput {
    pub fn infrastructure_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: INFRASTRUCTURE_EXIT_CODE,
            duration_ms: 0,
            timed_out: false,
        }
    }

    pub fn is_infrastructure_failure(&self) -> bool {
        self.exit_code < 0
    }
}

/// Execution engine trait
///
/// Implementations must be stateless between calls and safe to share
/// across concurrently running pipelines.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    async fn execute(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
    ) -> Result<ExecutionOutput, UnsupportedLanguage>;
}

/// Docker-based execution engine
///
/// **Docker Execution Rules:**
/// 1. Source (and `input.txt` when stdin is given) is written to a fresh
///    scratch directory, bind-mounted at `/app`
/// 2. `/bin/sh -c "<compile> && <run> [< input.txt]"` runs in the
///    language's image with networking disabled and memory/CPU/PID limits
/// 3. Output is streamed until exit or timeout; on timeout the container
///    is killed
/// 4. The container is force-removed and the scratch directory deleted
pub struct DockerEngine {
    docker: Docker,
    registry: Arc<LanguageRegistry>,
    config: SandboxConfig,
}

impl DockerEngine {
    pub fn new(registry: Arc<LanguageRegistry>, config: SandboxConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;
        Ok(Self {
            docker,
            registry,
            config,
        })
    }

    /// Ensure Docker image is available (pull if needed)
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            return Ok(());
        }

        debug!(image, "Pulling sandbox image");
        let options = Some(CreateImageOptions {
            from_image: image,
            ..Default::default()
        });
        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }
        Ok(())
    }

    async fn run(&self, spec: &LanguageSpec, code: &str, stdin: Option<&str>) -> Result<ExecutionOutput> {
        tokio::fs::create_dir_all(&self.config.workdir)
            .await
            .with_context(|| format!("Failed to create {}", self.config.workdir.display()))?;

        // Dropped (and deleted) on every early return below
        let workdir = tempfile::Builder::new()
            .prefix("run-")
            .tempdir_in(&self.config.workdir)
            .context("Failed to create sandbox directory")?;

        tokio::fs::write(workdir.path().join(&spec.source_file), code)
            .await
            .context("Failed to write source file")?;
        if let Some(input) = stdin {
            tokio::fs::write(workdir.path().join("input.txt"), input)
                .await
                .context("Failed to write stdin file")?;
        }

        let image = spec.image.clone().unwrap_or_else(|| self.config.image.clone());
        self.ensure_image(&image).await?;

        let script = spec.script(stdin.is_some());
        let config = container_config(&self.config, &image, &script, workdir.path());
        let container_name = format!("bigo-{}", uuid::Uuid::new_v4());

        let container = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: container_name.as_str(),
                    platform: None,
                }),
                config,
            )
            .await
            .context("Failed to create container")?;

        let result = self.run_container(&container.id).await;
        self.remove_container(&container.id).await;

        let path = workdir.path().display().to_string();
        if let Err(e) = workdir.close() {
            warn!(path = %path, error = %e, "Failed to remove sandbox directory");
        }

        result
    }

    async fn run_container(&self, container_id: &str) -> Result<ExecutionOutput> {
        let started = Instant::now();
        self.docker
            .start_container(container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start container")?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        let collect = async {
            let options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });
            let mut logs = self.docker.logs(container_id, options);
            while let Some(chunk) = logs.next().await {
                match chunk {
                    Ok(LogOutput::StdOut { message }) => push_capped(&mut stdout, &message),
                    Ok(LogOutput::StdErr { message }) => push_capped(&mut stderr, &message),
                    Ok(_) => {}
                    Err(e) => {
                        debug!(container_id, error = %e, "Log stream ended early");
                        break;
                    }
                }
            }
        };
        let wait = async {
            let mut wait = self.docker.wait_container(
                container_id,
                Some(WaitContainerOptions {
                    condition: "not-running",
                }),
            );
            wait.next().await
        };

        let waited = within_deadline(self.config.timeout(), collect, wait).await;
        let timed_out = waited.is_none();

        if timed_out {
            let _ = self
                .docker
                .kill_container(container_id, None::<KillContainerOptions<String>>)
                .await;
        }

        let exit_code = match waited {
            None => TIMEOUT_EXIT_CODE,
            Some(Some(Ok(response))) => response.status_code,
            // bollard reports non-zero exits as a wait error
            Some(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => code,
            Some(Some(Err(e))) => return Err(e).context("Failed to wait for container"),
            Some(None) => INFRASTRUCTURE_EXIT_CODE,
        };
        let duration_ms = started.elapsed().as_millis() as u64;

        if timed_out {
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(TIMEOUT_ANNOTATION);
            return Ok(ExecutionOutput {
                stdout,
                stderr,
                exit_code: TIMEOUT_EXIT_CODE,
                duration_ms,
                timed_out: true,
            });
        }

        Ok(ExecutionOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms,
            timed_out: false,
        })
    }

    async fn remove_container(&self, container_id: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = self
            .docker
            .remove_container(container_id, Some(options))
            .await
        {
            warn!(container_id, error = %e, "Failed to remove sandbox container");
        }
    }
}

#[async_trait]
impl ExecutionEngine for DockerEngine {
    async fn execute(
        &self,
        language: Language,
        code: &str,
        stdin: Option<&str>,
    ) -> Result<ExecutionOutput, UnsupportedLanguage> {
        let spec = self.registry.get(language)?;
        match self.run(spec, code, stdin).await {
            Ok(output) => {
                debug!(
                    %language,
                    exit_code = output.exit_code,
                    duration_ms = output.duration_ms,
                    timed_out = output.timed_out,
                    "Sandbox run finished"
                );
                Ok(output)
            }
            Err(e) => {
                warn!(%language, error = %format!("{:#}", e), "Sandbox infrastructure failure");
                Ok(ExecutionOutput::infrastructure_failure(format!("{:#}", e)))
            }
        }
    }
}

/// Drain the output, then wait for exit, both inside one wall-clock budget.
/// `None` means the budget ran out, whichever phase was still pending.
async fn within_deadline<C, W>(budget: Duration, collect: C, wait: W) -> Option<W::Output>
where
    C: Future<Output = ()>,
    W: Future,
{
    tokio::time::timeout(budget, async move {
        collect.await;
        wait.await
    })
    .await
    .ok()
}

/// Container configuration for one run
fn container_config(config: &SandboxConfig, image: &str, script: &str, workdir: &Path) -> Config<String> {
    let memory = (config.memory_mb as i64) * 1024 * 1024;
    Config {
        image: Some(image.to_string()),
        cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]),
        working_dir: Some("/app".to_string()),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            memory: Some(memory),
            // Same as memory: no swap headroom
            memory_swap: Some(memory),
            nano_cpus: Some((config.cpus * 1_000_000_000.0) as i64),
            pids_limit: Some(config.pids_limit),
            network_mode: Some("none".to_string()),
            binds: Some(vec![format!("{}:/app", workdir.display())]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn push_capped(buffer: &mut String, bytes: &[u8]) {
    if buffer.len() >= MAX_CAPTURE_BYTES {
        return;
    }
    let room = MAX_CAPTURE_BYTES - buffer.len();
    let text = String::from_utf8_lossy(bytes);
    if text.len() <= room {
        buffer.push_str(&text);
    } else {
        let mut cut = room;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        buffer.push_str(&text[..cut]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigo_common::Config as AppConfig;
    use std::path::PathBuf;

    fn sandbox_config() -> SandboxConfig {
        AppConfig::from_lookup(|key| match key {
            "SANDBOX_TIMEOUT_MS" => Some("2000".to_string()),
            "SANDBOX_MEMORY_MB" => Some("256".to_string()),
            _ => None,
        })
        .sandbox
    }

    #[test]
    fn test_container_config_limits() {
        let config = sandbox_config();
        let workdir = PathBuf::from("/tmp/bigo-sandbox/run-abc");
        let container = container_config(&config, "sandbox-runner", "python3 main.py", &workdir);

        assert_eq!(container.image.as_deref(), Some("sandbox-runner"));
        assert_eq!(container.network_disabled, Some(true));
        assert_eq!(container.working_dir.as_deref(), Some("/app"));
        assert_eq!(
            container.cmd,
            Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "python3 main.py".to_string()
            ])
        );

        let host = container.host_config.unwrap();
        assert_eq!(host.memory, Some(256 * 1024 * 1024));
        assert_eq!(host.nano_cpus, Some(500_000_000));
        assert_eq!(host.network_mode.as_deref(), Some("none"));
        assert_eq!(
            host.binds,
            Some(vec!["/tmp/bigo-sandbox/run-abc:/app".to_string()])
        );
    }

    #[test]
    fn test_infrastructure_failure_output() {
        let output = ExecutionOutput::infrastructure_failure("daemon unreachable");
        assert_eq!(output.exit_code, INFRASTRUCTURE_EXIT_CODE);
        assert!(output.is_infrastructure_failure());
        assert_eq!(output.stderr, "daemon unreachable");
        assert!(!output.timed_out);
    }

    #[test]
    fn test_push_capped_truncates() {
        let mut buffer = "x".repeat(MAX_CAPTURE_BYTES - 2);
        push_capped(&mut buffer, "héllo".as_bytes());
        assert!(buffer.len() <= MAX_CAPTURE_BYTES);
        assert!(buffer.ends_with('h'));

        push_capped(&mut buffer, b"more");
        assert!(buffer.len() <= MAX_CAPTURE_BYTES);
    }

    #[tokio::test]
    async fn test_deadline_covers_wait_after_log_stream_ends() {
        // Logs stop early but the container never exits
        let waited = within_deadline(Duration::from_millis(50), async {}, std::future::pending::<i64>()).await;
        assert!(waited.is_none());
    }

    #[tokio::test]
    async fn test_deadline_covers_log_collection() {
        let waited = within_deadline(Duration::from_millis(50), std::future::pending::<()>(), async { 0 }).await;
        assert!(waited.is_none());
    }

    #[tokio::test]
    async fn test_deadline_returns_exit_status() {
        let waited = within_deadline(Duration::from_secs(1), async {}, async { 3 }).await;
        assert_eq!(waited, Some(3));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon and the sandbox-runner image"]
    async fn test_non_terminating_program_times_out() {
        let engine = DockerEngine::new(Arc::new(LanguageRegistry::builtin()), sandbox_config()).unwrap();
        let started = Instant::now();

        let output = engine
            .execute(Language::Python, "while True:\n    pass\n", None)
            .await
            .unwrap();

        assert!(output.timed_out);
        assert_eq!(output.exit_code, TIMEOUT_EXIT_CODE);
        assert!(output.stderr.contains(TIMEOUT_ANNOTATION));
        assert!(started.elapsed().as_millis() < 15_000);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon and the sandbox-runner image"]
    async fn test_stdin_is_piped() {
        let engine = DockerEngine::new(Arc::new(LanguageRegistry::builtin()), sandbox_config()).unwrap();

        let output = engine
            .execute(Language::Python, "print(input()[::-1])", Some("abc\n"))
            .await
            .unwrap();

        assert_eq!(output.exit_code, 0);
        assert_eq!(output.stdout.trim(), "cba");
    }
}
