//! API Module
//!
//! HTTP surface of the worker: health, an operator view of in-flight
//! sessions, and the per-session WebSocket progress stream.

pub mod error;
pub mod health;
pub mod session;
pub mod ws;

use axum::{Router, routing::get};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::hub::SubscriberHub;
use crate::registry::ActiveSessions;

/// Shared state of every handler
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<SubscriberHub>,
    pub sessions: Arc<ActiveSessions>,
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Operator view
        .route("/sessions", get(session::list_sessions))
        .route("/sessions/{id}", get(session::get_session))
        // Live progress
        .route("/ws/{session_id}", get(ws::connect))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
