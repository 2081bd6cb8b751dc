//! Evaluation webhook delivery.
//!
//! Retry policy, per attempt outcome:
//! - 2xx: delivered, stop.
//! - 5xx or a transport failure: wait `base * 2^(n-1)` and try again.
//! - any other status: the payload is wrong, stop without retrying.
//! - anything else (e.g. an unreadable error body): stop.

use std::time::Duration;

use serde::Serialize;

use crate::error::NotifyError;
use crate::publish::PublicationResult;
use crate::request::Correlation;

/// Body POSTed to the evaluation URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvaluationPayload {
    pub email: String,
    pub task: String,
    pub round: u32,
    pub nonce: String,
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

impl EvaluationPayload {
    pub fn new(correlation: Correlation, publication: &PublicationResult) -> Self {
        let Correlation {
            email,
            task,
            round,
            nonce,
        } = correlation;
        Self {
            email,
            task,
            round,
            nonce,
            repo_url: publication.repo_url.clone(),
            commit_sha: publication.commit_sha.clone(),
            pages_url: publication.pages_url.clone(),
        }
    }
}

/// A successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub attempts: u32,
}

enum Attempt {
    Delivered,
    Retry(String),
    Stop(NotifyError),
}

#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    max_retries: u32,
    backoff_base: Duration,
}

impl Notifier {
    pub fn new(max_retries: u32, backoff_base: Duration, request_timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            http,
            max_retries,
            backoff_base,
        }
    }

    /// Delay before retry `n` (1-based): base, 2·base, 4·base, …
    pub fn backoff(&self, retry: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(retry.saturating_sub(1)))
    }

    pub async fn notify(&self, url: &str, payload: &EvaluationPayload) -> Result<Delivery, NotifyError> {
        let body = serde_json::to_vec(payload)?;
        let total = self.max_retries + 1;
        let mut last_error = String::from("no attempt made");

        for attempt in 1..=total {
            if attempt > 1 {
                let delay = self.backoff(attempt - 1);
                let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
                tracing::info!(delay_ms, "Retrying notification");
                tokio::time::sleep(delay).await;
            }

            tracing::info!(attempt, %url, "Pinging evaluation endpoint");
            match self.attempt(url, &body).await {
                Attempt::Delivered => {
                    tracing::info!(attempt, "Evaluation endpoint acknowledged");
                    return Ok(Delivery { attempts: attempt });
                }
                Attempt::Retry(reason) => {
                    tracing::warn!(attempt, "Notification attempt failed: {reason}");
                    last_error = reason;
                }
                Attempt::Stop(err) => {
                    tracing::error!(attempt, error = %err, "Notification failed, not retrying");
                    return Err(err);
                }
            }
        }

        Err(NotifyError::Exhausted {
            attempts: total,
            last_error,
        })
    }

    async fn attempt(&self, url: &str, body: &[u8]) -> Attempt {
        let resp = match self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => {
                return Attempt::Retry(format!("network error: {e}"));
            }
            Err(e) => return Attempt::Stop(NotifyError::Aborted(e.to_string())),
        };

        let status = resp.status();
        if status.is_success() {
            return Attempt::Delivered;
        }

        let text = match resp.text().await {
            Ok(text) => text,
            Err(e) => {
                return Attempt::Stop(NotifyError::Aborted(format!(
                    "could not read {status} response: {e}"
                )));
            }
        };

        if status.is_server_error() {
            Attempt::Retry(format!("server error {}: {text}", status.as_u16()))
        } else {
            Attempt::Stop(NotifyError::Rejected {
                status: status.as_u16(),
                body: text,
            })
        }
    }
}
