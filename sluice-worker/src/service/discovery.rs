//! Execution discovery
//!
//! The trigger call returns before the backend lists the new execution, so
//! the execution is located afterwards by its labels. Matching both the
//! session and the per-trigger run label keeps concurrent sessions (and
//! earlier runs of the same session) apart.

use sluice_client::JobsBackend;
use sluice_core::domain::job::{JobHandle, RUN_LABEL, SESSION_LABEL};
use sluice_core::domain::session::SessionId;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::Timings;
use crate::error::StageError;

pub struct ExecutionDiscovery {
    jobs: Arc<dyn JobsBackend>,
    interval: Duration,
    deadline: Duration,
    page_size: u32,
}

impl ExecutionDiscovery {
    pub fn new(jobs: Arc<dyn JobsBackend>, timings: &Timings) -> Self {
        Self {
            jobs,
            interval: timings.discovery_interval,
            deadline: timings.discovery_deadline,
            page_size: timings.discovery_page_size,
        }
    }

    /// Finds the execution a trigger produced
    ///
    /// Lists recent executions of the handle's job until one carries both the
    /// session and the run label. Failed list calls are retried on the next
    /// interval.
    ///
    /// # Errors
    /// [`StageError::ExecutionNotFound`] once the deadline passes,
    /// [`StageError::Cancelled`] if the session is cancelled first.
    pub async fn discover(
        &self,
        handle: &JobHandle,
        session: &SessionId,
        cancel: &CancellationToken,
    ) -> Result<String, StageError> {
        let started = Instant::now();
        let deadline = started + self.deadline;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self
                .jobs
                .list_executions(&handle.job_resource, self.page_size)
                .await
            {
                Ok(executions) => {
                    let found = executions.into_iter().find(|e| {
                        e.label(SESSION_LABEL) == Some(session.as_str())
                            && e.label(RUN_LABEL) == Some(handle.run_id.as_str())
                    });
                    if let Some(execution) = found {
                        info!(
                            "Found {} execution {} for session {} after {} attempt(s)",
                            handle.stage, execution.name, session, attempts
                        );
                        return Ok(execution.name);
                    }
                    debug!(
                        "No {} execution for session {} yet (attempt {})",
                        handle.stage, session, attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Failed to list executions of {} (attempt {}): {}",
                        handle.job_resource, attempts, e
                    );
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(StageError::ExecutionNotFound {
                    job_resource: handle.job_resource.clone(),
                    session: session.to_string(),
                    elapsed: now - started,
                });
            }

            let wait = self.interval.min(deadline - now);
            tokio::select! {
                _ = cancel.cancelled() => return Err(StageError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
