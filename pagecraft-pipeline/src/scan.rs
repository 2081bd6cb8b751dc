//! Secret scanning and the regenerate-until-safe loop.
//!
//! The gate is fail-open on two levels: a scanner that cannot run reports
//! "safe", and a bundle that is still unsafe after the last attempt is
//! handed on anyway (with an error log) instead of stopping the pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;

use crate::bundle::ArtifactBundle;
use crate::error::GenerateError;
use crate::generate::Generator;
use crate::request::DeploymentRequest;

/// Total generations attempted before giving up on a clean scan.
pub const MAX_GENERATION_ATTEMPTS: u32 = 3;

/// Binary classifier over a generated document.
#[async_trait]
pub trait SecretScanner: Send + Sync {
    /// `false` only when secrets were positively detected.
    async fn is_safe(&self, text: &str) -> bool;
}

/// Runs `trufflehog filesystem <file> --json` over a scratch copy.
pub struct TruffleHog {
    program: String,
    scratch_dir: PathBuf,
}

impl TruffleHog {
    pub fn new(program: impl Into<String>, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    async fn scan(&self, text: &str) -> std::io::Result<Option<bool>> {
        // Removed when dropped, on every return path.
        let file = tempfile::Builder::new()
            .prefix("scan-")
            .suffix(".html")
            .tempfile_in(&self.scratch_dir)?;
        tokio::fs::write(file.path(), text).await?;

        let output = match Command::new(&self.program)
            .arg("filesystem")
            .arg(file.path())
            .arg("--json")
            .output()
            .await
        {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        if !output.status.success() {
            tracing::warn!(
                code = output.status.code().unwrap_or(-1),
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Secret scanner exited with an error, treating as clean"
            );
            return Ok(Some(true));
        }

        let findings = String::from_utf8_lossy(&output.stdout);
        Ok(Some(findings.trim().is_empty()))
    }
}

#[async_trait]
impl SecretScanner for TruffleHog {
    async fn is_safe(&self, text: &str) -> bool {
        tracing::debug!(bytes = text.len(), "Scanning generated page for secrets");
        match self.scan(text).await {
            Ok(Some(true)) => {
                tracing::info!("No secrets detected");
                true
            }
            Ok(Some(false)) => {
                tracing::warn!("Secrets detected in generated page");
                false
            }
            Ok(None) => {
                tracing::info!(program = %self.program, "Secret scanner not available, skipping scan");
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Secret scan failed, treating as clean");
                true
            }
        }
    }
}

/// How the gate loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Clean,
    /// Every attempt was flagged; the last bundle is used anyway.
    UnsafeAfterRetries,
}

/// The bundle that leaves the gate, with how it got there.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub bundle: ArtifactBundle,
    pub attempts: u32,
    pub verdict: GateVerdict,
}

/// The step of the gate loop an attempt is entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    Generating,
    Scanning,
}

/// Drives generate → scan → regenerate.
#[derive(Clone)]
pub struct SecurityGate {
    scanner: Arc<dyn SecretScanner>,
    max_attempts: u32,
}

impl SecurityGate {
    pub fn new(scanner: Arc<dyn SecretScanner>) -> Self {
        Self {
            scanner,
            max_attempts: MAX_GENERATION_ATTEMPTS,
        }
    }

    /// Generate until a bundle scans clean or the attempts run out.
    ///
    /// Generation errors end the loop immediately; only scan rejections are
    /// retried.
    pub async fn generate_until_safe(
        &self,
        generator: &Generator,
        request: &DeploymentRequest,
        attachment_names: &[String],
        prior: Option<&str>,
    ) -> Result<GateOutcome, GenerateError> {
        self.generate_until_safe_observed(generator, request, attachment_names, prior, |_, _| {})
            .await
    }

    /// [`Self::generate_until_safe`], calling `observe` as each attempt
    /// enters generation and then scanning.
    pub async fn generate_until_safe_observed(
        &self,
        generator: &Generator,
        request: &DeploymentRequest,
        attachment_names: &[String],
        prior: Option<&str>,
        mut observe: impl FnMut(GateStep, u32) + Send,
    ) -> Result<GateOutcome, GenerateError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            observe(GateStep::Generating, attempt);
            let bundle = generator.generate(request, attachment_names, prior).await?;

            observe(GateStep::Scanning, attempt);
            if self.scanner.is_safe(&bundle.index_html).await {
                tracing::info!(attempt, "Generated page passed security scan");
                return Ok(GateOutcome {
                    bundle,
                    attempts: attempt,
                    verdict: GateVerdict::Clean,
                });
            }

            if attempt >= self.max_attempts {
                tracing::error!(
                    attempts = attempt,
                    task = %request.task,
                    round = request.round,
                    "Security scan still failing after max attempts, proceeding with last page"
                );
                return Ok(GateOutcome {
                    bundle,
                    attempts: attempt,
                    verdict: GateVerdict::UnsafeAfterRetries,
                });
            }

            tracing::warn!(
                attempt,
                max = self.max_attempts,
                "Security scan failed, regenerating"
            );
        }
    }
}
