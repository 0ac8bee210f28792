//! Pipeline checkpoints
//!
//! A checkpoint records how far a session's pipeline got, so a redelivered
//! queue message can resume an outstanding stage instead of triggering the
//! same job a second time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::job::JobHandle;
use crate::domain::pipeline::PipelineState;
use crate::domain::session::SessionId;

/// Object-store key of the persisted request payload
pub fn request_key(session: &SessionId) -> String {
    format!("requests/{}.json", session)
}

/// Object-store key of the session's checkpoint
pub fn checkpoint_key(session: &SessionId) -> String {
    format!("checkpoints/{}.json", session)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub session_id: SessionId,
    pub state: PipelineState,
    /// Handle of the stage that was triggered but not yet finished
    pub outstanding: Option<JobHandle>,
    pub updated_at: DateTime<Utc>,
}

/// Where a pipeline picks up after a redelivery
#[derive(Debug, Clone, PartialEq)]
pub enum ResumePoint {
    /// Nothing worth resuming; run from the beginning
    Fresh,
    /// A stage was triggered; await its execution instead of re-triggering
    Await(JobHandle),
    /// The build finished; continue with the deploy trigger
    Deploy,
    /// The pipeline already succeeded
    Completed,
}

impl Checkpoint {
    pub fn new(session_id: SessionId, state: PipelineState, outstanding: Option<JobHandle>) -> Self {
        Self {
            session_id,
            state,
            outstanding,
            updated_at: Utc::now(),
        }
    }

    pub fn resume_point(&self) -> ResumePoint {
        match &self.state {
            PipelineState::Received
            | PipelineState::PayloadPersisted
            | PipelineState::Failed(_) => ResumePoint::Fresh,
            PipelineState::BuildTriggered
            | PipelineState::BuildRunning
            | PipelineState::DeployTriggered
            | PipelineState::DeployRunning => match &self.outstanding {
                Some(handle) => ResumePoint::Await(handle.clone()),
                // a triggered state without its handle cannot be awaited
                None if self.state == PipelineState::DeployTriggered
                    || self.state == PipelineState::DeployRunning =>
                {
                    ResumePoint::Deploy
                }
                None => ResumePoint::Fresh,
            },
            PipelineState::BuildSucceeded => ResumePoint::Deploy,
            PipelineState::DeploySucceeded => ResumePoint::Completed,
        }
    }
}
