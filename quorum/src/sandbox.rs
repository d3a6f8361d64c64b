//! Sandbox executor — isolated execution of untrusted skill code
//!
//! The executor is an external capability behind one trait; the shipped
//! backend drives the `docker` CLI with hard resource ceilings and no
//! network access. Execution-scoped filesystem state lives in a temp
//! directory whose cleanup is guaranteed on drop regardless of outcome.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::SandboxSettings;

/// Error type for sandbox operations
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Failed to stage execution files: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Sandbox backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Report from one sandboxed execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Whether the program exited cleanly
    pub success: bool,
    /// Process exit code; -1 when the run was killed by timeout
    pub exit_code: i32,
    /// Combined stdout/stderr
    pub output: String,
    /// Wall-clock execution time in seconds
    pub execution_time: f64,
    /// Backend identifier ("docker", test doubles, ...)
    pub backend: String,
}

impl ExecutionReport {
    /// Report for a run killed at the wall-clock ceiling
    pub fn timed_out(backend: &str, elapsed: f64) -> Self {
        Self {
            success: false,
            exit_code: -1,
            output: "execution timed out".to_string(),
            execution_time: elapsed,
            backend: backend.to_string(),
        }
    }
}

/// Capability interface for isolated code execution
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    /// Run the program (optionally with an appended test harness) in
    /// isolation and report exit status and output
    async fn execute(&self, code: &str, test_code: Option<&str>) -> SandboxResult<ExecutionReport>;
}

/// Shared reference to a sandbox executor
pub type SharedSandbox = Arc<dyn SandboxExecutor>;

/// Docker-CLI-driven sandbox backend.
///
/// Stages the program into a temp directory mounted at `/work`, then runs
/// `docker run --rm --network none` with memory/CPU/pid ceilings, a
/// read-only root, and all capabilities dropped.
pub struct DockerSandbox {
    settings: SandboxSettings,
}

impl DockerSandbox {
    pub fn new(settings: SandboxSettings) -> Self {
        Self { settings }
    }

    /// Create a shared reference to this sandbox
    pub fn shared(self) -> SharedSandbox {
        Arc::new(self)
    }
}

#[async_trait]
impl SandboxExecutor for DockerSandbox {
    async fn execute(&self, code: &str, test_code: Option<&str>) -> SandboxResult<ExecutionReport> {
        let dir = tempfile::Builder::new().prefix("quorum_run_").tempdir()?;

        let program = match test_code {
            Some(test) => format!("{code}\n\n{test}\n"),
            None => code.to_string(),
        };
        std::fs::write(dir.path().join("skill.py"), program)?;

        let mount = format!("{}:/work:rw", dir.path().display());
        let start = Instant::now();

        let mut command = Command::new("docker");
        command
            .arg("run")
            .arg("--rm")
            .args(["--network", &self.settings.network])
            .args(["--pids-limit", "256"])
            .arg(format!("--cpus={}", self.settings.cpus))
            .arg(format!("--memory={}", self.settings.memory_limit))
            .arg("--read-only")
            .args(["--cap-drop", "ALL"])
            .args(["--security-opt", "no-new-privileges"])
            .args(["-v", &mount])
            .arg(&self.settings.image)
            .args(["python", "/work/skill.py"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(image = %self.settings.image, "Starting sandboxed execution");

        let child = command
            .spawn()
            .map_err(|e| SandboxError::BackendUnavailable(e.to_string()))?;

        let output = match tokio::time::timeout(self.settings.timeout(), child.wait_with_output())
            .await
        {
            Ok(result) => result.map_err(|e| SandboxError::BackendUnavailable(e.to_string()))?,
            Err(_) => {
                // Dropping the output future kills the container process
                let elapsed = start.elapsed().as_secs_f64();
                warn!(elapsed, "Sandbox execution hit the wall-clock ceiling");
                return Ok(ExecutionReport::timed_out("docker", elapsed));
            }
        };

        let elapsed = start.elapsed().as_secs_f64();
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        Ok(ExecutionReport {
            success: output.status.success(),
            exit_code: output.status.code().unwrap_or(-1),
            output: combined,
            execution_time: elapsed,
            backend: "docker".to_string(),
        })
        // `dir` drops here; staged files are removed regardless of outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted sandbox for exercising callers without a container runtime
    pub struct StaticSandbox {
        pub reports: std::sync::Mutex<Vec<ExecutionReport>>,
    }

    impl StaticSandbox {
        pub fn failing_n_times(n: usize) -> Self {
            let mut reports = Vec::new();
            for _ in 0..n {
                reports.push(ExecutionReport {
                    success: false,
                    exit_code: 1,
                    output: "Traceback: boom".to_string(),
                    execution_time: 0.01,
                    backend: "static".to_string(),
                });
            }
            Self {
                reports: std::sync::Mutex::new(reports),
            }
        }
    }

    #[async_trait]
    impl SandboxExecutor for StaticSandbox {
        async fn execute(
            &self,
            _code: &str,
            _test_code: Option<&str>,
        ) -> SandboxResult<ExecutionReport> {
            let mut reports = self.reports.lock().unwrap();
            if reports.is_empty() {
                Ok(ExecutionReport {
                    success: true,
                    exit_code: 0,
                    output: "{\"success\": true}".to_string(),
                    execution_time: 0.01,
                    backend: "static".to_string(),
                })
            } else {
                Ok(reports.remove(0))
            }
        }
    }

    #[tokio::test]
    async fn test_static_sandbox_sequence() {
        let sandbox = StaticSandbox::failing_n_times(2);
        assert!(!sandbox.execute("code", None).await.unwrap().success);
        assert!(!sandbox.execute("code", None).await.unwrap().success);
        assert!(sandbox.execute("code", None).await.unwrap().success);
    }

    #[test]
    fn test_timed_out_report_shape() {
        let report = ExecutionReport::timed_out("docker", 60.2);
        assert!(!report.success);
        assert_eq!(report.exit_code, -1);
        assert!(report.output.contains("timed out"));
    }
}
