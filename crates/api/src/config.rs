use std::path::PathBuf;
use std::time::Duration;

use dropsight_pipeline::compute::{ToolCommand, ToolchainConfig};
use dropsight_pipeline::executor::ExecutorConfig;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Analysis toolchain and executor settings.
    pub pipeline: PipelineConfig,
}

/// Settings for the analysis toolchain and the workflow executor.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root directory for stage outputs.
    pub results_dir: PathBuf,
    /// Wall-clock budget per stage tool in seconds.
    pub stage_timeout_secs: u64,
    /// Interval between final-artifact polls in seconds.
    pub finalize_poll_interval_secs: u64,
    /// Maximum number of final-artifact polls before the workflow fails.
    pub finalize_max_polls: u32,
    /// One external command line per stage.
    pub primary_analysis_cmd: String,
    pub identity_cmd: String,
    pub assay_caller_cmd: String,
    pub genotyper_cmd: String,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                      |
    /// |------------------------------|------------------------------|
    /// | `HOST`                       | `0.0.0.0`                    |
    /// | `PORT`                       | `3000`                       |
    /// | `CORS_ORIGINS`               | `http://localhost:5173`      |
    /// | `REQUEST_TIMEOUT_SECS`       | `30`                         |
    /// | `RESULTS_DIR`                | `results`                    |
    /// | `STAGE_TIMEOUT_SECS`         | `14400`                      |
    /// | `FINALIZE_POLL_INTERVAL_SECS`| `2`                          |
    /// | `FINALIZE_MAX_POLLS`         | `150`                        |
    /// | `PRIMARY_ANALYSIS_CMD`       | `dropsight-primary-analysis` |
    /// | `IDENTITY_CMD`               | `dropsight-identity`         |
    /// | `ASSAY_CALLER_CMD`           | `dropsight-assay-caller`     |
    /// | `GENOTYPER_CMD`              | `dropsight-genotyper`        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs = env_u64("REQUEST_TIMEOUT_SECS", 30);

        let pipeline = PipelineConfig {
            results_dir: std::env::var("RESULTS_DIR")
                .unwrap_or_else(|_| "results".into())
                .into(),
            stage_timeout_secs: env_u64("STAGE_TIMEOUT_SECS", 14_400),
            finalize_poll_interval_secs: env_u64("FINALIZE_POLL_INTERVAL_SECS", 2),
            finalize_max_polls: env_u64("FINALIZE_MAX_POLLS", 150) as u32,
            primary_analysis_cmd: std::env::var("PRIMARY_ANALYSIS_CMD")
                .unwrap_or_else(|_| "dropsight-primary-analysis".into()),
            identity_cmd: std::env::var("IDENTITY_CMD")
                .unwrap_or_else(|_| "dropsight-identity".into()),
            assay_caller_cmd: std::env::var("ASSAY_CALLER_CMD")
                .unwrap_or_else(|_| "dropsight-assay-caller".into()),
            genotyper_cmd: std::env::var("GENOTYPER_CMD")
                .unwrap_or_else(|_| "dropsight-genotyper".into()),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            pipeline,
        }
    }
}

impl PipelineConfig {
    /// Build the external toolchain configuration.
    pub fn toolchain(&self) -> ToolchainConfig {
        ToolchainConfig {
            primary_analysis: parse_command(&self.primary_analysis_cmd),
            identity: parse_command(&self.identity_cmd),
            assay_caller: parse_command(&self.assay_caller_cmd),
            genotyper: parse_command(&self.genotyper_cmd),
            results_dir: self.results_dir.clone(),
            timeout: Duration::from_secs(self.stage_timeout_secs),
        }
    }

    /// Build the executor bounds.
    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            finalize_poll_interval: Duration::from_secs(self.finalize_poll_interval_secs),
            finalize_max_polls: self.finalize_max_polls,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid u64"))
}

/// Split a command line into program and arguments on whitespace.
///
/// Quoting is intentionally not supported; stage tools take their real
/// input from stdin, so the command line stays simple.
fn parse_command(cmd: &str) -> ToolCommand {
    let mut parts = cmd.split_whitespace();
    let program = parts.next().unwrap_or_default().to_string();
    ToolCommand {
        program,
        args: parts.map(str::to_string).collect(),
    }
}
