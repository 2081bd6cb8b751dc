//! Intake routes. Requests are checked, queued and acknowledged; the
//! pipeline runs later on the worker.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use pagecraft_pipeline::DeploymentRequest;
use pagecraft_pipeline::dispatch::Dispatcher;
use serde_json::{Value, json};
use subtle::ConstantTimeEq;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;

/// Attachments arrive inline as data URIs.
pub const MAX_BODY_BYTES: usize = 50 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    secret: Arc<str>,
    dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(secret: impl Into<String>, dispatcher: Dispatcher) -> Self {
        Self {
            secret: Arc::from(secret.into()),
            dispatcher,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api-endpoint", post(api_endpoint))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn api_endpoint(
    State(state): State<AppState>,
    body: Result<Json<DeploymentRequest>, JsonRejection>,
) -> (StatusCode, Json<Value>) {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::warn!(error = %rejection, "Rejected malformed request body");
            return error(rejection.status(), &rejection.body_text());
        }
    };
    if !secret_matches(&state.secret, &request.secret) {
        tracing::warn!(email = %request.email, task = %request.task, "Rejected request with invalid secret");
        return error(StatusCode::BAD_REQUEST, "Invalid secret");
    }
    if let Err(reason) = request.validate() {
        tracing::warn!(task = %request.task, round = request.round, "Rejected request: {reason}");
        return error(StatusCode::BAD_REQUEST, reason);
    }

    tracing::info!(
        email = %request.email,
        task = %request.task,
        round = request.round,
        nonce = %request.nonce,
        attachments = request.attachments.len(),
        "Request received"
    );

    match state.dispatcher.submit(request) {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "received" }))),
        Err(e) => {
            tracing::error!(error = %e, "Could not queue request");
            error(StatusCode::SERVICE_UNAVAILABLE, &e.to_string())
        }
    }
}

fn secret_matches(expected: &str, given: &str) -> bool {
    let (expected, given) = (expected.as_bytes(), given.as_bytes());
    expected.len() == given.len() && bool::from(expected.ct_eq(given))
}

fn error(status: StatusCode, message: &str) -> (StatusCode, Json<Value>) {
    (status, Json(json!({ "status": "error", "error": message })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_must_match_exactly() {
        assert!(secret_matches("s3cret", "s3cret"));
        assert!(!secret_matches("s3cret", "s3creT"));
        assert!(!secret_matches("s3cret", "s3cre"));
        assert!(!secret_matches("s3cret", ""));
    }
}
