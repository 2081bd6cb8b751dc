//! Availability polling for freshly published pages.
//!
//! Advisory only: the pipeline notifies whether or not the page came up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// A single liveness check.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// `true` when the URL answered with a success status. Transport errors
    /// are `false`, never an error.
    async fn probe(&self, url: &str) -> bool;
}

/// GET probe that accepts any 2xx.
pub struct HttpProbe {
    http: reqwest::Client,
}

impl HttpProbe {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl LivenessProbe for HttpProbe {
    async fn probe(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(%url, error = %e, "Probe failed");
                false
            }
        }
    }
}

/// Repeats a probe on a fixed interval until it succeeds or time runs out.
#[derive(Clone)]
pub struct AvailabilityPoller {
    probe: Arc<dyn LivenessProbe>,
    interval: Duration,
}

impl AvailabilityPoller {
    pub fn new(probe: Arc<dyn LivenessProbe>, interval: Duration) -> Self {
        Self { probe, interval }
    }

    /// Number of probes that fit in `max_wait`: `ceil(max_wait / interval)`,
    /// and at least one.
    pub fn probe_budget(&self, max_wait: Duration) -> u32 {
        let interval = self.interval.as_millis().max(1);
        let budget = max_wait.as_millis().div_ceil(interval);
        u32::try_from(budget).unwrap_or(u32::MAX).max(1)
    }

    /// `true` as soon as a probe succeeds; `false` once the probe budget is
    /// spent or `max_wait` has elapsed, whichever comes first. Slow probes
    /// are cut off at the deadline.
    pub async fn await_live(&self, url: &str, max_wait: Duration) -> bool {
        let budget = self.probe_budget(max_wait);
        let start = Instant::now();
        let deadline = start + max_wait;

        for attempt in 1..=budget {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() && attempt > 1 {
                break;
            }
            // A zero wait still gets one probe, bounded by the interval.
            let limit = if remaining.is_zero() { self.interval } else { remaining };
            match tokio::time::timeout(limit, self.probe.probe(url)).await {
                Ok(true) => {
                    tracing::info!(%url, attempt, "Page is live");
                    return true;
                }
                Ok(false) => {}
                Err(_) => tracing::debug!(%url, attempt, "Probe cut off at the wait limit"),
            }
            tracing::info!(
                %url,
                elapsed_secs = start.elapsed().as_secs(),
                "Polling for page availability"
            );
            if attempt < budget {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                tokio::time::sleep(self.interval.min(remaining)).await;
            }
        }

        false
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails until the `succeed_on`-th call (1-based); never succeeds on 0.
    pub(crate) struct CountingProbe {
        pub(crate) calls: AtomicU32,
        succeed_on: u32,
    }

    impl CountingProbe {
        pub(crate) fn new(succeed_on: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                succeed_on,
            }
        }
    }

    #[async_trait]
    impl LivenessProbe for CountingProbe {
        async fn probe(&self, _url: &str) -> bool {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.succeed_on != 0 && n >= self.succeed_on
        }
    }

    #[tokio::test(start_paused = true)]
    async fn returns_true_on_first_success() {
        let probe = Arc::new(CountingProbe::new(3));
        let poller = AvailabilityPoller::new(probe.clone(), Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        assert!(poller.await_live("https://octocat.github.io/demo-round1/", Duration::from_secs(120)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_ceil_of_wait_over_interval() {
        let probe = Arc::new(CountingProbe::new(0));
        let poller = AvailabilityPoller::new(probe.clone(), Duration::from_secs(10));

        assert!(!poller.await_live("https://x.github.io/y/", Duration::from_secs(120)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 12);
    }

    #[tokio::test(start_paused = true)]
    async fn partial_interval_rounds_up() {
        let probe = Arc::new(CountingProbe::new(0));
        let poller = AvailabilityPoller::new(probe.clone(), Duration::from_secs(10));

        assert!(!poller.await_live("https://x.github.io/y/", Duration::from_secs(25)).await);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    /// Takes `delay` per probe and never succeeds.
    struct SlowProbe {
        delay: Duration,
        calls: AtomicU32,
    }

    #[async_trait]
    impl LivenessProbe for SlowProbe {
        async fn probe(&self, _url: &str) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            false
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_probes_do_not_stretch_past_max_wait() {
        let probe = Arc::new(SlowProbe {
            delay: Duration::from_secs(10),
            calls: AtomicU32::new(0),
        });
        let poller = AvailabilityPoller::new(probe.clone(), Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        assert!(!poller.await_live("https://x.github.io/y/", Duration::from_secs(120)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_is_cut_off_at_max_wait() {
        let probe = Arc::new(SlowProbe {
            delay: Duration::from_secs(3600),
            calls: AtomicU32::new(0),
        });
        let poller = AvailabilityPoller::new(probe.clone(), Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        assert!(!poller.await_live("https://x.github.io/y/", Duration::from_secs(120)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(120));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn budget_is_never_zero() {
        let poller = AvailabilityPoller::new(Arc::new(CountingProbe::new(0)), Duration::from_secs(10));
        assert_eq!(poller.probe_budget(Duration::ZERO), 1);
        assert_eq!(poller.probe_budget(Duration::from_secs(120)), 12);
        assert_eq!(poller.probe_budget(Duration::from_millis(120_001)), 13);
    }

    #[tokio::test]
    async fn http_probe_treats_connection_errors_as_not_live() {
        let probe = HttpProbe::new(Duration::from_secs(1));
        assert!(!probe.probe("http://127.0.0.1:9/").await);
    }
}
