//! Active session registry
//!
//! Tracks which sessions have a pipeline in flight and the state each one
//! last reached. Each session gets a cancellation token derived from the
//! process token, held by its guard. An entry lives
//! exactly as long as the [`SessionGuard`] returned when it was registered.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sluice_core::domain::pipeline::PipelineState;
use sluice_core::domain::request::PipelineRequest;
use sluice_core::domain::session::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug)]
struct Entry {
    state: PipelineState,
    started_at: DateTime<Utc>,
    /// Raw body of the request being run, once recorded
    request: Option<Vec<u8>>,
}

/// Point-in-time view of one in-flight session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub state: PipelineState,
    pub started_at: DateTime<Utc>,
}

/// Registry of in-flight pipelines
#[derive(Debug, Default)]
pub struct ActiveSessions {
    entries: Mutex<HashMap<SessionId, Entry>>,
}

impl ActiveSessions {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SessionId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a session, unless it already has a pipeline in flight
    ///
    /// # Arguments
    /// * `session` - Session starting a pipeline
    /// * `parent` - Process-wide token; cancelling it cancels the session
    pub fn begin(
        self: &Arc<Self>,
        session: &SessionId,
        parent: &CancellationToken,
    ) -> Option<SessionGuard> {
        let mut entries = self.lock();
        if entries.contains_key(session) {
            return None;
        }

        entries.insert(
            session.clone(),
            Entry {
                state: PipelineState::Received,
                started_at: Utc::now(),
                request: None,
            },
        );
        debug!("Session {} registered", session);

        Some(SessionGuard {
            registry: Arc::clone(self),
            session: session.clone(),
            cancel: parent.child_token(),
        })
    }

    #[cfg(test)]
    pub fn is_active(&self, session: &SessionId) -> bool {
        self.lock().contains_key(session)
    }

    /// Returns true if `request` is the one already running for its session
    ///
    /// A session whose request has not been recorded yet never matches.
    pub fn is_running(&self, request: &PipelineRequest) -> bool {
        self.lock()
            .get(request.session_id())
            .and_then(|entry| entry.request.as_deref())
            .is_some_and(|raw| request.matches_stored(raw))
    }

    pub fn get(&self, session: &SessionId) -> Option<SessionSummary> {
        self.lock().get(session).map(|entry| SessionSummary {
            session_id: session.clone(),
            state: entry.state.clone(),
            started_at: entry.started_at,
        })
    }

    /// All in-flight sessions, oldest first
    pub fn snapshot(&self) -> Vec<SessionSummary> {
        let mut sessions: Vec<SessionSummary> = self
            .lock()
            .iter()
            .map(|(session, entry)| SessionSummary {
                session_id: session.clone(),
                state: entry.state.clone(),
                started_at: entry.started_at,
            })
            .collect();
        sessions.sort_by_key(|s| s.started_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

/// Ownership of a registered session
///
/// Dropping the guard removes the session from the registry.
#[derive(Debug)]
pub struct SessionGuard {
    registry: Arc<ActiveSessions>,
    session: SessionId,
    cancel: CancellationToken,
}

impl SessionGuard {
    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Token cancelled when the session or the process shuts down
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Records the request this session is running
    pub fn record_request(&self, request: &PipelineRequest) {
        if let Some(entry) = self.registry.lock().get_mut(&self.session) {
            entry.request = Some(request.raw().to_vec());
        }
    }

    /// Records the state the pipeline just entered
    pub fn set_state(&self, state: PipelineState) {
        if let Some(entry) = self.registry.lock().get_mut(&self.session) {
            entry.state = state;
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.session);
        debug!("Session {} released", self.session);
    }
}
