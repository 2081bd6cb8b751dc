//! Error types for each pipeline stage.

use thiserror::Error;

/// Code generation failures. Never retried inside the generator.
#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    #[error("generation request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("generation API error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("generation API returned no choices")]
    EmptyResponse,
}

/// Failures talking to the hosting platform.
#[derive(Debug, Error)]
pub enum HostingError {
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    #[error("hosting request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("hosting API error {status} on {operation}: {message}")]
    Api {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("unexpected hosting response on {operation}: {detail}")]
    InvalidResponse {
        operation: &'static str,
        detail: String,
    },
}

impl HostingError {
    /// HTTP status of an API error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            HostingError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A failed publication, tagged with the step that broke.
#[derive(Debug, Error)]
#[error("publication failed while {step}")]
pub struct PublishError {
    pub step: &'static str,
    #[source]
    pub source: HostingError,
}

/// Webhook delivery outcomes that are not a 2xx.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// A 4xx (or other non-retryable status); the payload is presumed wrong.
    #[error("evaluation endpoint rejected the payload with {status}: {body}")]
    Rejected { status: u16, body: String },

    /// A failure that is neither a status nor a transport fault.
    #[error("notification aborted: {0}")]
    Aborted(String),

    #[error("notification failed after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: String },

    #[error("could not encode notification payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Anything that moves a pipeline run to `Failed`.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Generate(#[from] GenerateError),

    #[error(transparent)]
    Hosting(#[from] HostingError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Notify(#[from] NotifyError),
}

/// Why a request could not be handed to the worker.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("work queue is full")]
    Full,

    #[error("worker is not running")]
    Closed,
}
