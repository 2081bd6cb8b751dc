//! Pipeline orchestrator: one request in, one notification out.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::Instrument;

use crate::config::PipelineConfig;
use crate::error::{HostingError, PipelineError};
use crate::generate::Generator;
use crate::hosting::{GitHubClient, HostingApi};
use crate::llm::{CodeModel, LlmClient};
use crate::notify::{Delivery, EvaluationPayload, Notifier};
use crate::poll::{AvailabilityPoller, HttpProbe, LivenessProbe};
use crate::publish::{PublicationResult, Publisher};
use crate::request::{DeploymentRequest, decode_attachments};
use crate::scan::{GateStep, GateVerdict, SecretScanner, SecurityGate, TruffleHog};

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Generating,
    Scanning,
    Publishing,
    PollingAvailability,
    Notifying,
    Done,
    Failed,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Received => write!(f, "received"),
            Stage::Generating => write!(f, "generating"),
            Stage::Scanning => write!(f, "scanning"),
            Stage::Publishing => write!(f, "publishing"),
            Stage::PollingAvailability => write!(f, "polling availability"),
            Stage::Notifying => write!(f, "notifying"),
            Stage::Done => write!(f, "done"),
            Stage::Failed => write!(f, "failed"),
        }
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub stages: Vec<Stage>,
    pub attempts: u32,
    pub verdict: GateVerdict,
    pub publication: PublicationResult,
    pub live: bool,
    pub delivery: Delivery,
}

/// Keyed async locks, one per publication target.
#[derive(Default)]
pub struct TargetLocks {
    locks: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl TargetLocks {
    pub async fn acquire(&self, target: &str) -> TargetGuard<'_> {
        let lock = {
            let mut map = self.locks.lock();
            // Entries left behind by cancelled waiters.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry(target.to_string()).or_default().clone()
        };
        TargetGuard {
            locks: self,
            target: target.to_string(),
            held: Some(lock.lock_owned().await),
        }
    }

    /// Targets currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Holds a target's lock; forgets the target once nobody holds or awaits it.
pub struct TargetGuard<'a> {
    locks: &'a TargetLocks,
    target: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for TargetGuard<'_> {
    fn drop(&mut self) {
        self.held.take();
        let mut map = self.locks.locks.lock();
        // Waiters hold their own clone, so a count of one means only the map is left.
        if map.get(&self.target).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            map.remove(&self.target);
        }
    }
}

/// The wired-up pipeline. Cheap to share behind an `Arc`.
pub struct Pipeline {
    generator: Generator,
    gate: SecurityGate,
    hosting: Arc<dyn HostingApi>,
    publisher: Publisher,
    poller: AvailabilityPoller,
    poll_max_wait: Duration,
    notifier: Notifier,
    locks: Option<TargetLocks>,
}

impl Pipeline {
    /// Production wiring. Fails before any network activity when a
    /// credential is missing.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let model = LlmClient::new(config)?;
        let hosting = GitHubClient::new(config)?;
        let scanner = TruffleHog::new(config.trufflehog_bin.clone(), config.scratch_dir());
        Ok(Self::with_components(
            config,
            Arc::new(model),
            Arc::new(scanner),
            Arc::new(hosting),
            Arc::new(HttpProbe::new(PROBE_TIMEOUT)),
        ))
    }

    pub fn with_components(
        config: &PipelineConfig,
        model: Arc<dyn CodeModel>,
        scanner: Arc<dyn SecretScanner>,
        hosting: Arc<dyn HostingApi>,
        probe: Arc<dyn LivenessProbe>,
    ) -> Self {
        Self {
            generator: Generator::new(model),
            gate: SecurityGate::new(scanner),
            publisher: Publisher::new(hosting.clone(), config.settle_delay()),
            hosting,
            poller: AvailabilityPoller::new(probe, config.poll_interval()),
            poll_max_wait: config.poll_max_wait(),
            notifier: Notifier::new(
                config.notify_max_retries,
                config.notify_backoff(),
                NOTIFY_TIMEOUT,
            ),
            locks: config.serialize_targets.then(TargetLocks::default),
        }
    }

    /// Run every stage and return the terminal stage. Never propagates.
    pub async fn execute(&self, request: &DeploymentRequest) -> Stage {
        match self.run(request).await {
            Ok(_) => Stage::Done,
            Err(e) => {
                tracing::error!(
                    task = %request.task,
                    round = request.round,
                    nonce = %request.nonce,
                    "Pipeline failed: {}",
                    error_chain(&e)
                );
                Stage::Failed
            }
        }
    }

    pub async fn run(&self, request: &DeploymentRequest) -> Result<PipelineReport, PipelineError> {
        let span = tracing::info_span!(
            "pipeline",
            task = %request.task,
            round = request.round,
            nonce = %request.nonce,
        );
        self.run_stages(request).instrument(span).await
    }

    async fn run_stages(&self, request: &DeploymentRequest) -> Result<PipelineReport, PipelineError> {
        let _guard = match &self.locks {
            Some(locks) => Some(locks.acquire(&request.target_name()).await),
            None => None,
        };

        let mut stages = vec![Stage::Received];
        tracing::info!(stage = %Stage::Received, "Processing deployment request");

        let attachments = decode_attachments(&request.attachments);
        let attachment_names: Vec<String> = attachments.iter().map(|a| a.name.clone()).collect();

        let prior = match request.previous_target_name() {
            Some(previous) => Some(self.previous_page(&previous).await?),
            None => None,
        };

        let outcome = self
            .gate
            .generate_until_safe_observed(
                &self.generator,
                request,
                &attachment_names,
                prior.as_deref(),
                |step, attempt| {
                    let stage = match step {
                        GateStep::Generating => Stage::Generating,
                        GateStep::Scanning => Stage::Scanning,
                    };
                    tracing::info!(%stage, attempt, "Stage transition");
                    stages.push(stage);
                },
            )
            .await?;
        let mut bundle = outcome.bundle;
        bundle.attachments = attachments;

        enter(&mut stages, Stage::Publishing);
        let publication = self
            .publisher
            .publish(&request.task, request.round, &bundle)
            .await?;

        enter(&mut stages, Stage::PollingAvailability);
        let live = self
            .poller
            .await_live(&publication.pages_url, self.poll_max_wait)
            .await;
        if !live {
            tracing::warn!(
                url = %publication.pages_url,
                "Page not live within the wait limit, notifying anyway"
            );
        }

        enter(&mut stages, Stage::Notifying);
        let payload = EvaluationPayload::new(request.correlation(), &publication);
        let delivery = self.notifier.notify(&request.evaluation_url, &payload).await?;

        enter(&mut stages, Stage::Done);
        Ok(PipelineReport {
            stages,
            attempts: outcome.attempts,
            verdict: outcome.verdict,
            publication,
            live,
            delivery,
        })
    }

    /// `index.html` of the previous round, or empty text if it has none.
    async fn previous_page(&self, previous: &str) -> Result<String, HostingError> {
        let owner = self.hosting.authenticated_login().await?;
        tracing::info!(%owner, repo = %previous, "Fetching previous round");
        let text = self.hosting.file_content(&owner, previous, "index.html").await?;
        if text.is_empty() {
            tracing::warn!(repo = %previous, "Previous round has no index.html");
        }
        Ok(text)
    }
}

fn enter(stages: &mut Vec<Stage>, stage: Stage) {
    tracing::info!(%stage, "Stage transition");
    stages.push(stage);
}

fn error_chain(err: &dyn std::error::Error) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}
