//! Live progress stream
//!
//! `GET /ws/{session_id}` upgrades to a WebSocket that receives the
//! session's progress lines as text frames. Inbound frames are ignored
//! apart from close.

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use sluice_core::domain::session::SessionId;
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::AppState;
use crate::api::error::{ApiError, ApiResult};
use crate::hub::SubscriberHub;

/// GET /ws/{session_id}
/// Subscribe to a session's progress lines
pub async fn connect(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    upgrade: WebSocketUpgrade,
) -> ApiResult<Response> {
    let session =
        SessionId::parse(session_id).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(upgrade.on_upgrade(move |socket| stream(socket, state.hub, session)))
}

async fn stream(mut socket: WebSocket, hub: Arc<SubscriberHub>, session: SessionId) {
    let (id, mut lines) = hub.subscribe(&session);
    info!(
        "UI connected for session {} ({} subscriber(s))",
        session,
        hub.subscriber_count(&session)
    );

    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if socket.send(Message::Text(line.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    hub.leave(&session, id);
    debug!("UI disconnected from session {}", session);
}
