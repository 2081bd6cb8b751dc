//! Work queue between intake and the pipeline.
//!
//! Intake only enqueues; the worker owns execution and spawns one task per
//! request, so a slow run never delays the acknowledgement of the next one.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::error::DispatchError;
use crate::pipeline::Pipeline;
use crate::request::DeploymentRequest;

/// Sending half, held by intake.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::Sender<DeploymentRequest>,
}

/// Receiving half, consumed by [`run_worker`].
pub struct JobReceiver {
    rx: mpsc::Receiver<DeploymentRequest>,
}

pub fn queue(capacity: usize) -> (Dispatcher, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (Dispatcher { tx }, JobReceiver { rx })
}

impl Dispatcher {
    /// Enqueue without waiting for a free slot.
    pub fn submit(&self, request: DeploymentRequest) -> Result<(), DispatchError> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DispatchError::Full,
            mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
        })
    }
}

impl JobReceiver {
    pub async fn recv(&mut self) -> Option<DeploymentRequest> {
        self.rx.recv().await
    }
}

/// Run queued requests until every [`Dispatcher`] is dropped, then wait for
/// the runs still in flight.
pub async fn run_worker(mut jobs: JobReceiver, pipeline: Arc<Pipeline>) {
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            job = jobs.recv() => match job {
                Some(request) => {
                    tracing::info!(task = %request.task, round = request.round, "Starting pipeline run");
                    let pipeline = pipeline.clone();
                    running.spawn(async move { pipeline.execute(&request).await });
                }
                None => break,
            },
            Some(joined) = running.join_next(), if !running.is_empty() => reap(joined),
        }
    }

    tracing::info!(in_flight = running.len(), "Work queue closed, draining");
    while let Some(joined) = running.join_next().await {
        reap(joined);
    }
}

fn reap(joined: Result<crate::pipeline::Stage, tokio::task::JoinError>) {
    match joined {
        Ok(stage) => tracing::debug!(%stage, "Pipeline run finished"),
        Err(e) => tracing::error!(error = %e, "Pipeline task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::tests::WELL_FORMED;
    use crate::config::PipelineConfig;
    use crate::generate::tests::ScriptedModel;
    use crate::poll::tests::CountingProbe;
    use crate::publish::tests::FakeHosting;
    use crate::request::tests::request;
    use crate::scan::tests::ScriptedScanner;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn full_queue_is_reported() {
        let (dispatcher, _jobs) = queue(1);
        assert_eq!(dispatcher.submit(request("a", 1)), Ok(()));
        assert_eq!(dispatcher.submit(request("b", 1)), Err(DispatchError::Full));
    }

    #[test]
    fn dropped_worker_is_reported() {
        let (dispatcher, jobs) = queue(4);
        drop(jobs);
        assert_eq!(dispatcher.submit(request("a", 1)), Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn submitted_requests_are_received_in_order() {
        let (dispatcher, mut jobs) = queue(4);
        dispatcher.submit(request("first", 1)).unwrap();
        dispatcher.submit(request("second", 2)).unwrap();
        drop(dispatcher);

        assert_eq!(jobs.recv().await.map(|r| r.task), Some("first".to_string()));
        assert_eq!(jobs.recv().await.map(|r| r.round), Some(2));
        assert!(jobs.recv().await.is_none());
    }

    #[tokio::test]
    async fn worker_runs_every_job_and_drains_on_close() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let hosting = Arc::new(FakeHosting::default());
        let config = PipelineConfig {
            settle_delay_ms: 0,
            ..Default::default()
        };
        let pipeline = Arc::new(Pipeline::with_components(
            &config,
            Arc::new(ScriptedModel::always(WELL_FORMED)),
            Arc::new(ScriptedScanner::new(&[])),
            hosting.clone(),
            Arc::new(CountingProbe::new(1)),
        ));

        let (dispatcher, jobs) = queue(8);
        for task in ["alpha", "beta"] {
            let mut req = request(task, 1);
            req.evaluation_url = server.uri();
            dispatcher.submit(req).unwrap();
        }
        drop(dispatcher);

        run_worker(jobs, pipeline).await;

        let calls = hosting.calls.lock();
        assert!(calls.contains(&"create alpha-round1".to_string()));
        assert!(calls.contains(&"create beta-round1".to_string()));
    }
}
