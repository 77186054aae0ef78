//! Request handlers.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

use super::error::{ApiError, Result};
use super::ApiState;
use crate::gitops::sync_scheduler::{Delivery, TriggerSource};
use crate::history::ReconciliationRun;
use crate::metrics;

/// Body of an accepted sync request.
#[derive(Debug, Serialize)]
pub struct SyncAccepted {
    pub status: Delivery,
}

/// `GET /latest`: the most recent sealed run, or 204 before the first one.
pub async fn latest(State(state): State<ApiState>) -> Response {
    match state.history.latest() {
        Some(run) => Json(run.as_ref()).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

/// `GET /history`: every retained run, oldest first.
pub async fn history(State(state): State<ApiState>) -> Response {
    let runs = state.history.snapshot();
    let body: Vec<&ReconciliationRun> = runs.iter().map(|run| run.as_ref()).collect();
    Json(body).into_response()
}

/// `POST /api/v1/sync`: fire-and-forget activation.
pub async fn trigger_sync(State(state): State<ApiState>) -> Result<(StatusCode, Json<SyncAccepted>)> {
    match state.trigger.fire(TriggerSource::Api) {
        Delivery::Closed => Err(ApiError::ServiceUnavailable(
            "reconciliation loop has terminated".to_string(),
        )),
        status => {
            log::info!("Sync requested through the API ({:?})", status);
            Ok((StatusCode::ACCEPTED, Json(SyncAccepted { status })))
        }
    }
}

/// `GET /metrics`: Prometheus text exposition.
pub async fn metrics(State(state): State<ApiState>) -> Result<Response> {
    let body = metrics::render(&state.registry).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}
