use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use fleet_types::{ActionResponse, ServiceDescriptor, StatusResponse};
use serde::{Deserialize, Serialize};

use crate::{error::SupervisorError, request_id, state::AppState};

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
    version: &'static str,
    services: usize,
}

#[derive(Debug, Deserialize)]
struct LogsQuery {
    lines: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    // Accepted so pollers can pass their last token; the response is always a full snapshot.
    since: Option<String>,
}

fn action(resp: ActionResponse) -> Response {
    let code = if resp.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(resp)).into_response()
}

async fn healthz(State(state): State<AppState>) -> Json<HealthzResponse> {
    Json(HealthzResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        services: state.supervisor.registry().len(),
    })
}

async fn services(State(state): State<AppState>) -> Json<Vec<ServiceDescriptor>> {
    Json(state.supervisor.registry().descriptors())
}

async fn start_all(State(state): State<AppState>) -> Response {
    action(state.supervisor.start_all().await)
}

async fn stop_all(State(state): State<AppState>) -> Response {
    action(state.supervisor.stop_all().await)
}

async fn start_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, SupervisorError> {
    Ok(action(state.supervisor.start_one(&name).await?))
}

async fn stop_one(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Response, SupervisorError> {
    Ok(action(state.supervisor.stop_one(&name).await?))
}

async fn kill_port(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Response, SupervisorError> {
    let port = raw
        .trim()
        .parse::<u16>()
        .map_err(|_| SupervisorError::InvalidPort(raw.clone()))?;
    Ok(action(state.supervisor.kill_port(port).await?))
}

async fn logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(q): Query<LogsQuery>,
) -> Result<Response, SupervisorError> {
    let logs = state.supervisor.get_logs(&name, q.lines).await?;
    Ok(Json(logs).into_response())
}

async fn status(State(state): State<AppState>, Query(q): Query<StatusQuery>) -> Json<StatusResponse> {
    if let Some(since) = q.since.as_deref() {
        tracing::trace!(since, "status poll");
    }
    Json(state.supervisor.get_status().await)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/services", get(services))
        .route("/status", get(status))
        .route("/logs/:name", get(logs))
        .route("/start-all", post(start_all))
        .route("/stop-all", post(stop_all))
        .route("/start/:name", post(start_one))
        .route("/stop/:name", post(stop_one))
        .route("/kill-port/:port", post(kill_port))
        .layer(middleware::from_fn(request_id::request_id))
        .with_state(state)
}
