//! Health Check API Handler
//!
//! Health check endpoint for monitoring.

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub active_sessions: usize,
}

/// GET /health
/// Health check endpoint; also reports how many pipelines are in flight
pub async fn health_check(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        active_sessions: state.sessions.len(),
    })
}
