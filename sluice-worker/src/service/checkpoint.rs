//! Payload and checkpoint persistence
//!
//! Writes the raw request before any job is triggered and keeps a checkpoint
//! of the pipeline's progress next to it, both in the object store.

use sluice_client::{ClientError, ObjectStore, Result};
use sluice_core::domain::checkpoint::{Checkpoint, ResumePoint, checkpoint_key, request_key};
use sluice_core::domain::request::PipelineRequest;
use sluice_core::domain::session::SessionId;
use std::sync::Arc;
use tracing::{debug, info, warn};

const JSON: &str = "application/json";

pub struct CheckpointStore {
    store: Arc<dyn ObjectStore>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Stores the request exactly as it was delivered
    pub async fn persist_request(&self, request: &PipelineRequest) -> Result<()> {
        let key = request_key(request.session_id());
        self.store.put(&key, request.raw().to_vec(), JSON).await?;
        info!("Saved payload for session {} to {}", request.session_id(), key);
        Ok(())
    }

    /// Loads a session's checkpoint
    ///
    /// A checkpoint that no longer parses is treated as absent.
    pub async fn load(&self, session: &SessionId) -> Result<Option<Checkpoint>> {
        let Some(bytes) = self.store.get(&checkpoint_key(session)).await? else {
            return Ok(None);
        };
        match serde_json::from_slice(&bytes) {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) => {
                warn!("Ignoring unreadable checkpoint for session {}: {}", session, e);
                Ok(None)
            }
        }
    }

    pub async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let body = serde_json::to_vec(checkpoint)
            .map_err(|e| ClientError::InvalidRequest(format!("Failed to encode checkpoint: {}", e)))?;
        self.store
            .put(&checkpoint_key(&checkpoint.session_id), body, JSON)
            .await?;
        debug!(
            "Checkpointed session {} at {}",
            checkpoint.session_id, checkpoint.state
        );
        Ok(())
    }

    pub async fn clear(&self, session: &SessionId) -> Result<()> {
        self.store.delete(&checkpoint_key(session)).await
    }

    /// Decides where a delivered request picks up
    ///
    /// The checkpoint only applies when the stored payload is the same
    /// request; a new request reusing the session starts fresh.
    pub async fn resume_point(&self, request: &PipelineRequest) -> Result<ResumePoint> {
        let session = request.session_id();
        let Some(checkpoint) = self.load(session).await? else {
            return Ok(ResumePoint::Fresh);
        };

        let stored = self.store.get(&request_key(session)).await?;
        if !stored.is_some_and(|bytes| request.matches_stored(&bytes)) {
            debug!("Session {} has a checkpoint for a different request", session);
            return Ok(ResumePoint::Fresh);
        }

        let point = checkpoint.resume_point();
        if point != ResumePoint::Fresh {
            info!(
                "Resuming session {} from checkpoint at {}",
                session, checkpoint.state
            );
        }
        Ok(point)
    }
}
