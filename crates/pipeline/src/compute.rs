//! The opaque stage computation contract and its subprocess-backed
//! implementation.
//!
//! The orchestrator never looks inside a stage's numerics; it only needs a
//! unit of work with a UUID, known output locations, and a run method with a
//! terminal success/failure outcome. Production stages are external analysis
//! tools launched as child processes with their merged parameters piped to
//! stdin as JSON.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use uuid::Uuid;

use dropsight_core::stage::Stage;

/// Default wall-clock budget for one stage computation.
pub const DEFAULT_STAGE_TIMEOUT: Duration = Duration::from_secs(4 * 60 * 60);

/// Errors from a stage computation.
#[derive(Debug, thiserror::Error)]
pub enum ComputationError {
    /// The tool ran but exited with a non-zero exit code.
    #[error("exit code {exit_code}: {stderr}")]
    Failed { exit_code: i32, stderr: String },

    /// The tool exceeded its wall-clock budget and was killed.
    #[error("timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Spawning or talking to the child process failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One opaque long-running stage computation.
///
/// The UUID is assigned at construction; the output locations are known
/// before the computation runs so the caller can persist them regardless of
/// when the underlying tool materializes the files.
#[async_trait::async_trait]
pub trait StageComputation: Send + Sync {
    fn uuid(&self) -> Uuid;
    fn outfile_path(&self) -> Option<String>;
    fn plot_path(&self) -> Option<String>;
    async fn run(&self) -> Result<(), ComputationError>;
}

/// Builds one computation per (stage, merged parameters) pair.
pub trait ComputationFactory: Send + Sync {
    fn make(&self, stage: Stage, parameters: &Value) -> Box<dyn StageComputation>;
}

// ---------------------------------------------------------------------------
// Subprocess-backed implementation
// ---------------------------------------------------------------------------

/// Program and fixed arguments for one stage's analysis tool.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

/// The configured analysis toolchain: one command per stage plus the shared
/// results directory and per-stage timeout.
#[derive(Debug, Clone)]
pub struct ToolchainConfig {
    pub primary_analysis: ToolCommand,
    pub identity: ToolCommand,
    pub assay_caller: ToolCommand,
    pub genotyper: ToolCommand,
    /// Root directory for stage outputs; each execution writes under
    /// `<results_dir>/<stage>/<uuid>/`.
    pub results_dir: PathBuf,
    pub timeout: Duration,
}

impl ToolchainConfig {
    fn command_for(&self, stage: Stage) -> &ToolCommand {
        match stage {
            Stage::PrimaryAnalysis => &self.primary_analysis,
            Stage::Identity => &self.identity,
            Stage::AssayCaller => &self.assay_caller,
            Stage::Genotyper => &self.genotyper,
        }
    }
}

/// A [`ComputationFactory`] that launches the configured external tool for
/// each stage.
pub struct ToolchainFactory {
    config: ToolchainConfig,
}

impl ToolchainFactory {
    pub fn new(config: ToolchainConfig) -> Self {
        Self { config }
    }
}

impl ComputationFactory for ToolchainFactory {
    fn make(&self, stage: Stage, parameters: &Value) -> Box<dyn StageComputation> {
        let uuid = Uuid::new_v4();
        let out_dir = self
            .config
            .results_dir
            .join(stage.as_str())
            .join(uuid.to_string());
        Box::new(ToolComputation {
            uuid,
            stage,
            command: self.config.command_for(stage).clone(),
            parameters: parameters.clone(),
            outfile: out_dir.join("out.json"),
            plot: out_dir.join("plot.png"),
            timeout: self.config.timeout,
        })
    }
}

/// One stage execution as an external child process.
///
/// The child receives the merged parameters plus its output paths as a JSON
/// object on stdin and is expected to write its artifacts to those paths
/// before exiting 0.
pub struct ToolComputation {
    uuid: Uuid,
    stage: Stage,
    command: ToolCommand,
    parameters: Value,
    outfile: PathBuf,
    plot: PathBuf,
    timeout: Duration,
}

impl ToolComputation {
    fn stdin_payload(&self) -> Value {
        serde_json::json!({
            "uuid": self.uuid,
            "parameters": self.parameters,
            "outfile_path": self.outfile,
            "plot_path": self.plot,
        })
    }
}

fn path_string(path: &Path) -> Option<String> {
    Some(path.to_string_lossy().into_owned())
}

#[async_trait::async_trait]
impl StageComputation for ToolComputation {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn outfile_path(&self) -> Option<String> {
        path_string(&self.outfile)
    }

    fn plot_path(&self) -> Option<String> {
        path_string(&self.plot)
    }

    async fn run(&self) -> Result<(), ComputationError> {
        if let Some(parent) = self.outfile.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut cmd = Command::new(&self.command.program);
        cmd.args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Ensure the child dies with us on timeout.
            .kill_on_drop(true);

        let start = Instant::now();
        let mut child = cmd.spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            let payload = serde_json::to_vec(&self.stdin_payload()).unwrap_or_default();
            // Best-effort write; a tool that closes stdin early is its own
            // business.
            let _ = stdin.write_all(&payload).await;
            drop(stdin);
        }

        let stderr_handle = child.stderr.take();
        let stderr_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr_handle {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_end(&mut buf).await;
            }
            buf
        });

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) if status.success() => {
                tracing::debug!(
                    stage = %self.stage,
                    uuid = %self.uuid,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Stage tool finished",
                );
                Ok(())
            }
            Ok(Ok(status)) => {
                let stderr_bytes = stderr_task.await.unwrap_or_default();
                Err(ComputationError::Failed {
                    exit_code: status.code().unwrap_or(-1),
                    stderr: String::from_utf8_lossy(&stderr_bytes).trim().to_string(),
                })
            }
            Ok(Err(e)) => Err(ComputationError::Io(e)),
            Err(_elapsed) => {
                // Dropping `child` kills the process via kill_on_drop.
                Err(ComputationError::Timeout {
                    elapsed_ms: start.elapsed().as_millis() as u64,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn toolchain(dir: &Path, program: &str, args: &[&str], timeout: Duration) -> ToolchainFactory {
        let command = ToolCommand {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
        };
        ToolchainFactory::new(ToolchainConfig {
            primary_analysis: command.clone(),
            identity: command.clone(),
            assay_caller: command.clone(),
            genotyper: command,
            results_dir: dir.to_path_buf(),
            timeout,
        })
    }

    #[test]
    fn computations_get_distinct_uuids_and_paths() {
        let dir = tempfile::tempdir().unwrap();
        let factory = toolchain(dir.path(), "true", &[], DEFAULT_STAGE_TIMEOUT);

        let a = factory.make(Stage::Identity, &json!({}));
        let b = factory.make(Stage::Identity, &json!({}));
        assert_ne!(a.uuid(), b.uuid());
        assert_ne!(a.outfile_path(), b.outfile_path());
        assert!(a
            .outfile_path()
            .unwrap()
            .contains(&format!("identity/{}", a.uuid())));
    }

    #[tokio::test]
    async fn successful_tool_reports_ok() {
        let dir = tempfile::tempdir().unwrap();
        // `cat` drains stdin and exits 0.
        let factory = toolchain(dir.path(), "cat", &[], DEFAULT_STAGE_TIMEOUT);

        let computation = factory.make(Stage::PrimaryAnalysis, &json!({"archive": "x"}));
        computation.run().await.unwrap();
    }

    #[tokio::test]
    async fn failing_tool_reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let factory = toolchain(
            dir.path(),
            "sh",
            &["-c", "echo 'no such archive' >&2; exit 3"],
            DEFAULT_STAGE_TIMEOUT,
        );

        let computation = factory.make(Stage::PrimaryAnalysis, &json!({}));
        let err = computation.run().await.unwrap_err();
        assert_matches::assert_matches!(
            err,
            ComputationError::Failed { exit_code: 3, ref stderr } if stderr.contains("no such archive")
        );
    }

    #[tokio::test]
    async fn slow_tool_is_killed_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let factory = toolchain(dir.path(), "sleep", &["5"], Duration::from_millis(50));

        let computation = factory.make(Stage::Genotyper, &json!({}));
        let err = computation.run().await.unwrap_err();
        assert_matches::assert_matches!(err, ComputationError::Timeout { .. });
    }
}
