//! API v0 endpoints.
//!
//! Version 0 signals an unstable API -- breaking changes are expected
//! until the daemon reaches 1.0.

use axum::{Json, extract::State, http::StatusCode};
use utoipa_axum::{router::OpenApiRouter, routes};

use super::server::SharedState;
use crate::api_client::types::{RigState, RigStatus, WatchdogReport};

/// Build the v0 API routes with OpenAPI metadata.
pub fn routes() -> OpenApiRouter<SharedState> {
    OpenApiRouter::new()
        .routes(routes!(health))
        .routes(routes!(get_status))
        .routes(routes!(get_rig))
        .routes(routes!(get_watchdog))
}

/// Health check endpoint.
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = OK, description = "Server is running", body = String),
    ),
)]
async fn health() -> &'static str {
    "OK"
}

/// Return the latest full rig snapshot.
#[utoipa::path(
    get,
    path = "/status",
    tag = "status",
    responses(
        (status = OK, description = "Latest snapshot", body = RigStatus),
        (status = SERVICE_UNAVAILABLE, description = "No polling cycle has completed yet"),
    ),
)]
async fn get_status(State(state): State<SharedState>) -> Result<Json<RigStatus>, StatusCode> {
    state
        .latest()
        .map(|status| Json(RigStatus::clone(&status)))
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Return the compact rig summary.
#[utoipa::path(
    get,
    path = "/rig",
    tag = "status",
    responses(
        (status = OK, description = "Rig summary", body = RigState),
        (status = SERVICE_UNAVAILABLE, description = "No polling cycle has completed yet"),
    ),
)]
async fn get_rig(State(state): State<SharedState>) -> Result<Json<RigState>, StatusCode> {
    state
        .latest()
        .map(|status| Json(RigState::from(status.as_ref())))
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Return the watchdog's phase and per-watch verdicts.
#[utoipa::path(
    get,
    path = "/watchdog",
    tag = "watchdog",
    responses(
        (status = OK, description = "Watchdog report", body = WatchdogReport),
        (status = SERVICE_UNAVAILABLE, description = "No polling cycle has completed yet"),
    ),
)]
async fn get_watchdog(
    State(state): State<SharedState>,
) -> Result<Json<WatchdogReport>, StatusCode> {
    state
        .latest()
        .and_then(|status| status.watchdog.clone())
        .map(Json)
        .ok_or(StatusCode::SERVICE_UNAVAILABLE)
}
