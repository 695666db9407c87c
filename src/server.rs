//! HTTP surface: `POST /webhook` and `GET /health`.
//!
//! The webhook handler only authenticates and parses; accepted events are
//! handed to a background task and acknowledged with 202 before the
//! pipeline starts.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

use crate::orchestrator::{Orchestrator, RunStage, Services};
use crate::webhook::{SIGNATURE_HEADERS, SignatureVerifier, parse_event};

pub struct AppState {
    services: Arc<Services>,
    verifier: SignatureVerifier,
    runs: TaskTracker,
}

impl AppState {
    pub fn new(services: Arc<Services>) -> Self {
        let verifier = SignatureVerifier::new(services.config.server.webhook_secret.clone());
        Self {
            services,
            verifier,
            runs: TaskTracker::new(),
        }
    }

    /// Background runs still in flight.
    pub fn runs(&self) -> &TaskTracker {
        &self.runs
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

fn signature_header(headers: &HeaderMap) -> Option<&str> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|value| value.to_str().ok())
}

async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(e) = state.verifier.verify(&body, signature_header(&headers)) {
        tracing::warn!(error = %e, stage = %RunStage::Verifying, "rejected webhook delivery");
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": e.to_string()})),
        )
            .into_response();
    }

    let event = match parse_event(&body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            tracing::debug!("ignoring unsupported event kind");
            return (StatusCode::OK, Json(json!({"status": "ignored"}))).into_response();
        }
        Err(e) => {
            tracing::warn!(error = %e, "malformed webhook payload");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": format!("invalid payload: {}", e)})),
            )
                .into_response();
        }
    };

    let orchestrator = Orchestrator::new(Arc::clone(&state.services));
    let run_id = orchestrator.run_id().to_string();
    state.runs.spawn(async move {
        let outcome = orchestrator.handle(event).await;
        tracing::debug!(?outcome, "run finished");
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({"status": "accepted", "run_id": run_id})),
    )
        .into_response()
}

/// Bind and serve until Ctrl-C or `services.shutdown` fires, then cancel
/// in-flight runs and wait for them to report and clean up.
pub async fn serve(services: Arc<Services>, bind_addr: &str) -> Result<()> {
    let shutdown = services.shutdown.clone();
    let state = Arc::new(AppState::new(services));
    let app = build_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "merge-agent listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .context("Server error")?;

    shutdown.cancel();
    state.runs.close();
    tracing::info!(in_flight = state.runs.len(), "waiting for in-flight runs");
    state.runs.wait().await;
    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!(error = %e, "failed to listen for Ctrl-C");
                token.cancelled().await;
            }
        }
        _ = token.cancelled() => {}
    }
    tracing::info!("shutting down");
}
