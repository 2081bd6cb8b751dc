//! Pipeline configuration.
//!
//! Built once at start-up (CLI flags, each with an environment fallback) and
//! handed to every component. Nothing in the pipeline reads the process
//! environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

/// Immutable settings shared by every pipeline stage.
#[derive(Debug, Clone, Args)]
pub struct PipelineConfig {
    /// GitHub token used to create and publish repositories.
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub REST API base URL.
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    /// API key for the code-generation model.
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// Model name passed to the chat completions endpoint.
    #[arg(long, env = "OPENAI_MODEL", default_value = "gpt-4o")]
    pub openai_model: String,

    /// Chat completions API base URL.
    #[arg(long, env = "OPENAI_API_URL", default_value = "https://api.openai.com/v1")]
    pub openai_api_url: String,

    /// Secret scanner executable.
    #[arg(long, env = "TRUFFLEHOG_BIN", default_value = "trufflehog")]
    pub trufflehog_bin: String,

    /// Directory for transient scan files (system temp dir if unset).
    #[arg(long, env = "PAGECRAFT_SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Wait after repository creation before reading the branch tip.
    #[arg(long, env = "PAGECRAFT_SETTLE_DELAY_MS", default_value_t = 2000)]
    pub settle_delay_ms: u64,

    /// Seconds between availability probes.
    #[arg(long, env = "PAGECRAFT_POLL_INTERVAL_SECS", default_value_t = 10)]
    pub poll_interval_secs: u64,

    /// Upper bound on the availability wait.
    #[arg(long, env = "PAGECRAFT_POLL_MAX_WAIT_SECS", default_value_t = 120)]
    pub poll_max_wait_secs: u64,

    /// Webhook retries after the first attempt.
    #[arg(long, env = "PAGECRAFT_NOTIFY_MAX_RETRIES", default_value_t = 5)]
    pub notify_max_retries: u32,

    /// Base of the exponential webhook backoff.
    #[arg(long, env = "PAGECRAFT_NOTIFY_BACKOFF_MS", default_value_t = 1000)]
    pub notify_backoff_ms: u64,

    /// Serialize concurrent runs that target the same repository.
    #[arg(long, env = "PAGECRAFT_SERIALIZE_TARGETS", default_value_t = false)]
    pub serialize_targets: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            github_token: None,
            github_api_url: "https://api.github.com".to_string(),
            openai_api_key: None,
            openai_model: "gpt-4o".to_string(),
            openai_api_url: "https://api.openai.com/v1".to_string(),
            trufflehog_bin: "trufflehog".to_string(),
            scratch_dir: None,
            settle_delay_ms: 2000,
            poll_interval_secs: 10,
            poll_max_wait_secs: 120,
            notify_max_retries: 5,
            notify_backoff_ms: 1000,
            serialize_targets: false,
        }
    }
}

impl PipelineConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn poll_max_wait(&self) -> Duration {
        Duration::from_secs(self.poll_max_wait_secs)
    }

    pub fn notify_backoff(&self) -> Duration {
        Duration::from_millis(self.notify_backoff_ms)
    }

    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
