//! Broker HTTP contract
//!
//! Three operations over the credential store:
//! - POST /create_user          — platform registers a login's credentials
//! - GET  /get_access_token/…   — environment looks up its access token
//! - GET  /get_new_access_token/… — environment asks for a refresh
//!
//! plus /health and /metrics. Registration is guarded by the shared
//! manager token; the lookup endpoints are guarded only by session token
//! unguessability, which is why malformed tokens are rejected before any
//! store access.
//!
//! Writers (register, refresh) serialize through one broker-wide lock held
//! across resolve + provider call + store update. Two overlapping refresh
//! attempts for the same user would otherwise both spend the stored
//! refresh token and the loser would persist a dead pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use common::SecretString;
use notebook_auth::store::CredentialStore;
use notebook_auth::{ProviderConfig, session};

use crate::metrics;

/// Counters surfaced on /health.
#[derive(Clone)]
pub struct BrokerMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

/// Shared application state accessible from all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CredentialStore>,
    pub provider: ProviderConfig,
    pub client: reqwest::Client,
    pub manager_token: SecretString,
    /// Serializes register and refresh; see module docs.
    pub write_lock: Arc<Mutex<()>>,
    pub metrics: BrokerMetrics,
    pub prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit layer bounds simultaneous requests from the many
/// notebook environments this broker serves.
pub fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/create_user", post(create_user))
        .route("/get_access_token/{session_token}", get(get_access_token))
        .route(
            "/get_new_access_token/{session_token}",
            get(get_new_access_token),
        )
        .route("/health", get(health))
        .route("/metrics", get(render_metrics))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

fn json_response(status: StatusCode, body: String) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body,
    )
        .into_response()
}

fn json_error(status: StatusCode, message: &str) -> Response {
    json_response(
        status,
        serde_json::json!({ "error": message }).to_string(),
    )
}

/// POST /create_user — register (or overwrite) a user's credential record.
///
/// Only the platform knows the manager token, so only the platform can
/// write. Missing fields get a 400 naming the field; a bad token gets 403
/// before anything touches the store.
async fn create_user(State(state): State<AppState>, axum::Json(body): axum::Json<Value>) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let request_id = Uuid::new_v4();

    for field in [
        "api_auth_token",
        "access_token",
        "refresh_token",
        "user_session_token",
        "username",
    ] {
        if body.get(field).and_then(Value::as_str).is_none() {
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_request("register", 400);
            return json_error(StatusCode::BAD_REQUEST, &format!("{field} not provided"));
        }
    }

    // Validated just above
    let caller_token = body["api_auth_token"].as_str().unwrap_or_default();
    if !state.manager_token.matches(caller_token) {
        warn!(%request_id, "registration with invalid manager token");
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_request("register", 403);
        return json_error(StatusCode::FORBIDDEN, "invalid api_auth_token");
    }

    let username = body["username"].as_str().unwrap_or_default().to_owned();
    let record = notebook_auth::CredentialRecord {
        access_token: body["access_token"].as_str().unwrap_or_default().to_owned(),
        refresh_token: body["refresh_token"].as_str().unwrap_or_default().to_owned(),
        user_session_token: body["user_session_token"]
            .as_str()
            .unwrap_or_default()
            .to_owned(),
    };

    let _write = state.write_lock.lock().await;
    if let Err(e) = state.store.register(username.clone(), record).await {
        warn!(%request_id, username, error = %e, "failed to persist credential record");
        state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_request("register", 500);
        return json_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to persist record");
    }

    info!(%request_id, username, "credential record registered");
    metrics::record_request("register", 200);
    StatusCode::OK.into_response()
}

/// GET /get_access_token/{session_token} — current access token for a session.
async fn get_access_token(
    State(state): State<AppState>,
    Path(session_token): Path<String>,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let request_id = Uuid::new_v4();

    if !session::is_valid_token(&session_token) {
        metrics::record_request("lookup", 404);
        return json_error(StatusCode::NOT_FOUND, "unknown session token");
    }

    match state.store.find_by_session(&session_token).await {
        Some((username, record)) => {
            info!(%request_id, username, "access token lookup");
            metrics::record_request("lookup", 200);
            json_response(
                StatusCode::OK,
                serde_json::json!({ "access_token": record.access_token }).to_string(),
            )
        }
        None => {
            metrics::record_request("lookup", 404);
            json_error(StatusCode::NOT_FOUND, "unknown session token")
        }
    }
}

/// GET /get_new_access_token/{session_token} — refresh a session's pair.
///
/// On provider success the store is updated and the new pair returned.
/// When the provider declines, its raw payload goes back byte for byte —
/// the caller needs the detail to tell "try again" from "log in again" —
/// and the store keeps the old record.
async fn get_new_access_token(
    State(state): State<AppState>,
    Path(session_token): Path<String>,
) -> Response {
    state.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
    let request_id = Uuid::new_v4();

    if !session::is_valid_token(&session_token) {
        metrics::record_request("refresh", 404);
        return json_error(StatusCode::NOT_FOUND, "unknown session token");
    }

    // Held until the new pair is persisted (or the attempt fails), so a
    // concurrent refresh for the same user waits instead of racing.
    let _write = state.write_lock.lock().await;

    let Some((username, record)) = state.store.find_by_session(&session_token).await else {
        metrics::record_request("refresh", 404);
        return json_error(StatusCode::NOT_FOUND, "unknown session token");
    };

    match notebook_auth::refresh_grant(&state.client, &state.provider, &record.refresh_token).await
    {
        Ok(grant) => {
            if let Err(e) = state
                .store
                .update_tokens(&username, grant.access_token.clone(), grant.refresh_token.clone())
                .await
            {
                warn!(%request_id, username, error = %e, "failed to persist refreshed pair");
                state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
                metrics::record_request("refresh", 500);
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "failed to persist refreshed tokens",
                );
            }
            info!(%request_id, username, "token pair refreshed");
            metrics::record_request("refresh", 200);
            json_response(
                StatusCode::OK,
                serde_json::json!({
                    "access_token": grant.access_token,
                    "refresh_token": grant.refresh_token,
                })
                .to_string(),
            )
        }
        Err(notebook_auth::Error::RefreshDenied(payload)) => {
            info!(%request_id, username, "provider declined refresh, passing payload through");
            metrics::record_provider_error("refresh");
            metrics::record_request("refresh", 200);
            json_response(StatusCode::OK, payload.to_string())
        }
        Err(e) => {
            warn!(%request_id, username, error = %e, "provider refresh call failed");
            state.metrics.errors_total.fetch_add(1, Ordering::Relaxed);
            metrics::record_provider_error("refresh");
            metrics::record_request("refresh", 502);
            json_error(StatusCode::BAD_GATEWAY, &format!("provider unreachable: {e}"))
        }
    }
}

/// Health endpoint: uptime, request counters, store size.
async fn health(State(state): State<AppState>) -> Response {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let records = state.store.len().await;

    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "healthy",
            "uptime_seconds": uptime,
            "requests_served": requests,
            "errors_total": errors,
            "records": records,
        })
        .to_string(),
    )
}

/// Prometheus text exposition.
async fn render_metrics(State(state): State<AppState>) -> Response {
    (StatusCode::OK, state.prometheus.render()).into_response()
}
