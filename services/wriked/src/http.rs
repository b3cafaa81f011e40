//! Local HTTP surface
//!
//! Endpoints:
//! - GET  /get             current token as JSON, retried briefly while not ready
//! - GET|POST /set-code    hand an authorization code (`code` param) to the manager
//! - GET  /health          token availability and uptime
//! - GET  /metrics         Prometheus text exposition

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Form, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Deserialize;
use tracing::{debug, info, warn};

use token_manager::{Token, TokenManager, TokenStatus};

use crate::error::ApiError;
use crate::metrics;

/// How `/get` waits for a token that is not ready yet.
#[derive(Debug, Clone, Copy)]
pub struct ReadRetry {
    /// Extra attempts after the first failed read
    pub retries: u32,
    pub interval: Duration,
}

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<TokenManager>,
    pub read_retry: ReadRetry,
    pub started_at: Instant,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// `max_connections` bounds requests in flight across all routes, including
/// `/get` calls sleeping between retries. The limit layer shares one
/// semaphore between the per-route copies axum makes of it.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/get", get(get_token))
        .route("/set-code", get(set_code).post(set_code))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(tower::limit::GlobalConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

/// GET /get: the current token, in the provider's JSON shape.
async fn get_token(State(state): State<AppState>) -> Response {
    match read_with_retry(&state.manager, state.read_retry).await {
        Ok(token) => {
            metrics::record_read("ok");
            axum::Json(token.as_ref()).into_response()
        }
        Err(e) => {
            metrics::record_read(e.kind());
            warn!(error = %e, "token requested but unavailable");
            ApiError::from(e).into_response()
        }
    }
}

/// Read the token, retrying at a constant interval while it is unavailable.
async fn read_with_retry(
    manager: &TokenManager,
    retry: ReadRetry,
) -> token_manager::Result<Arc<Token>> {
    let mut attempt = 0;
    loop {
        match manager.current_token().await {
            Ok(token) => return Ok(token),
            Err(e) if attempt < retry.retries => {
                attempt += 1;
                debug!(attempt, error = %e, "token not ready, retrying read");
                tokio::time::sleep(retry.interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SetCodeParams {
    #[serde(default)]
    code: String,
}

/// GET|POST /set-code: queue an authorization code for exchange.
///
/// GET reads `code` from the query string, POST from a form body.
async fn set_code(
    State(state): State<AppState>,
    Form(params): Form<SetCodeParams>,
) -> Result<impl IntoResponse, ApiError> {
    let code = params.code.trim();
    if code.is_empty() {
        metrics::record_code_submission("invalid_request");
        return Err(ApiError::BadRequest("code is required"));
    }

    if let Err(e) = state.manager.submit_code(code) {
        metrics::record_code_submission(e.kind());
        warn!(error = %e, "authorization code rejected");
        return Err(e.into());
    }

    metrics::record_code_submission("accepted");
    info!("authorization code accepted");
    Ok((
        StatusCode::ACCEPTED,
        [(header::CONTENT_TYPE, "application/json")],
        serde_json::json!({ "status": "accepted" }).to_string(),
    ))
}

/// GET /health: 200 while a valid token is held, 503 otherwise.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.started_at.elapsed().as_secs();
    let status = state.manager.status().await;

    let (status_code, body) = match status {
        TokenStatus::Ready { remaining } => (
            StatusCode::OK,
            serde_json::json!({
                "status": status.label(),
                "expires_in_seconds": remaining.as_secs(),
                "uptime_seconds": uptime,
            }),
        ),
        TokenStatus::Missing | TokenStatus::Expired => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": status.label(),
                "uptime_seconds": uptime,
            }),
        ),
    };

    (
        status_code,
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// GET /metrics: Prometheus text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        state.prometheus.render(),
    )
}
