//! Session API Handlers
//!
//! Read-only view of the pipelines currently in flight.

use axum::{
    Json,
    extract::{Path, State},
};
use sluice_core::domain::session::SessionId;

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::registry::SessionSummary;

/// GET /sessions
/// List in-flight sessions, oldest first
pub async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(state.sessions.snapshot())
}

/// GET /sessions/{id}
/// Get one in-flight session
pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    tracing::debug!("Getting session: {}", id);

    let session = SessionId::parse(id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    state
        .sessions
        .get(&session)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session {} not in flight", session)))
}
