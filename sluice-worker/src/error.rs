//! Pipeline stage errors
//!
//! Every error a stage can raise. They are caught at the flow boundary and
//! rendered into the failure line subscribers receive.

use sluice_client::ClientError;
use sluice_core::domain::pipeline::Stage;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    /// The job backend refused or failed the trigger call
    #[error("failed to trigger {stage} job {job_resource}: {source}")]
    Trigger {
        stage: Stage,
        job_resource: String,
        #[source]
        source: ClientError,
    },

    /// No execution carrying the session's labels appeared before the deadline
    #[error("no execution of {job_resource} found for session {session} after {elapsed:?}")]
    ExecutionNotFound {
        job_resource: String,
        session: String,
        elapsed: Duration,
    },

    /// The execution reached a failed terminal condition
    #[error("{stage} execution {execution} failed")]
    JobExecutionFailed { stage: Stage, execution: String },

    /// Reading or writing the object store failed
    #[error("failed to {action}: {source}")]
    Storage {
        action: &'static str,
        #[source]
        source: ClientError,
    },

    /// The local builder could not be run or exited unsuccessfully
    #[error("local builder {0}")]
    LocalBuild(String),

    /// The session was cancelled, usually by process shutdown
    #[error("pipeline cancelled")]
    Cancelled,
}

impl StageError {
    pub fn storage(action: &'static str, source: ClientError) -> Self {
        Self::Storage { action, source }
    }

    /// Returns true when the run was interrupted rather than failed
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
