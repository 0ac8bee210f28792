//! Pipeline flow
//!
//! The per-session state machine:
//!
//! ```text
//! Received -> PayloadPersisted -> BuildTriggered -> BuildRunning -> BuildSucceeded
//!          -> DeployTriggered -> DeployRunning -> DeploySucceeded
//! ```
//!
//! with `Failed(reason)` reachable from every non-terminal state. Each stage
//! triggers its job, discovers the execution, tails its logs and awaits the
//! execution's terminal condition. The completion poller decides the
//! outcome; the log tail only reports what the job printed.
//!
//! Every transition is checkpointed so a redelivered message resumes an
//! outstanding stage instead of triggering it again.

use sluice_core::domain::checkpoint::{Checkpoint, ResumePoint};
use sluice_core::domain::job::JobHandle;
use sluice_core::domain::log::LogCursor;
use sluice_core::domain::pipeline::{PipelineState, Stage};
use sluice_core::domain::request::PipelineRequest;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::checkpoint::CheckpointStore;
use super::completion::CompletionPoller;
use super::discovery::ExecutionDiscovery;
use super::local::LocalBuilder;
use super::log_tail::LogTailer;
use super::trigger::{ExecutionTrigger, stage_parameters};
use super::Backends;
use crate::context::PipelineContext;
use crate::error::StageError;
use crate::hub::SessionOutput;
use crate::registry::SessionGuard;

/// Terminal line sent when the pipeline completes
pub const SUCCESS_LINE: &str = "SUCCESS";

/// How a pipeline run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Succeeded,
    Failed(String),
    /// Interrupted before a terminal state; the checkpoint is kept
    Cancelled,
}

/// Runs pipelines for the sessions handed to it
pub struct PipelineFlow {
    context: Arc<PipelineContext>,
    trigger: ExecutionTrigger,
    discovery: ExecutionDiscovery,
    completion: CompletionPoller,
    tailer: Arc<LogTailer>,
    checkpoints: CheckpointStore,
    local: Option<LocalBuilder>,
}

impl PipelineFlow {
    pub fn new(context: Arc<PipelineContext>, backends: Backends) -> Self {
        let timings = context.timings;
        let local = context.local_builder.as_ref().map(LocalBuilder::new);
        Self {
            trigger: ExecutionTrigger::new(Arc::clone(&backends.jobs)),
            discovery: ExecutionDiscovery::new(Arc::clone(&backends.jobs), &timings),
            completion: CompletionPoller::new(backends.jobs, timings.completion_poll_interval),
            tailer: Arc::new(LogTailer::new(backends.logs, &timings)),
            checkpoints: CheckpointStore::new(backends.store),
            local,
            context,
        }
    }

    /// Replaces the local builder, e.g. to run it with another interpreter
    #[cfg(test)]
    pub fn with_local_builder(mut self, local: LocalBuilder) -> Self {
        self.local = Some(local);
        self
    }

    /// Drives one session's pipeline to a terminal outcome
    ///
    /// Subscribers receive progress lines followed by exactly one terminal
    /// line: `SUCCESS` or `Pipeline failed: <reason>`. Errors never escape;
    /// they end the run as [`FlowOutcome::Failed`].
    pub async fn run(
        &self,
        request: &PipelineRequest,
        guard: &SessionGuard,
        output: &SessionOutput,
    ) -> FlowOutcome {
        let session = request.session_id();
        output.send("Initializing session");

        let resume = if self.local.is_some() {
            ResumePoint::Fresh
        } else {
            match self.checkpoints.resume_point(request).await {
                Ok(point) => point,
                Err(e) => {
                    warn!("Failed to read checkpoint for session {}: {}", session, e);
                    ResumePoint::Fresh
                }
            }
        };

        let mut tracker = StateTracker::new(
            guard,
            (self.local.is_none()).then_some(&self.checkpoints),
        );

        let result = match resume {
            ResumePoint::Completed => {
                info!("Session {} already completed; not triggering again", session);
                Ok(())
            }
            ResumePoint::Fresh => self.run_fresh(request, &mut tracker, output).await,
            point => self.run_resumed(point, request, &mut tracker, output).await,
        };

        match result {
            Ok(()) => {
                info!("Pipeline for session {} succeeded", session);
                output.finish(SUCCESS_LINE);
                FlowOutcome::Succeeded
            }
            Err(e) if e.is_cancelled() => {
                warn!("Pipeline for session {} cancelled at {}", session, tracker.state);
                output.finish(format!("Pipeline failed: {}", e));
                FlowOutcome::Cancelled
            }
            Err(e) => {
                let reason = e.to_string();
                error!("Pipeline for session {} failed: {}", session, reason);
                tracker.fail(reason.clone()).await;
                output.finish(format!("Pipeline failed: {}", reason));
                FlowOutcome::Failed(reason)
            }
        }
    }

    async fn run_fresh(
        &self,
        request: &PipelineRequest,
        tracker: &mut StateTracker<'_>,
        output: &SessionOutput,
    ) -> Result<(), StageError> {
        self.checkpoints
            .persist_request(request)
            .await
            .map_err(|e| StageError::storage("persist request payload", e))?;
        tracker.enter(PipelineState::PayloadPersisted, None).await;
        output.send("Payload persisted");

        if let Some(local) = &self.local {
            // the local builder has no execution to discover
            tracker.enter(Stage::Build.triggered(), None).await;
            output.send(format!("{} started", Stage::Build));
            tracker.enter(Stage::Build.running(), None).await;
            local
                .run(request.session_id(), output, tracker.cancel())
                .await?;
            tracker.enter(Stage::Build.succeeded(), None).await;
            output.send(format!("{} completed", Stage::Build));
            return Ok(());
        }

        self.run_stage(Stage::Build, None, request, tracker, output)
            .await?;
        self.run_stage(Stage::Deploy, None, request, tracker, output)
            .await?;
        Ok(())
    }

    async fn run_resumed(
        &self,
        point: ResumePoint,
        request: &PipelineRequest,
        tracker: &mut StateTracker<'_>,
        output: &SessionOutput,
    ) -> Result<(), StageError> {
        match point {
            ResumePoint::Await(handle) => {
                let stage = handle.stage;
                tracker.restore(stage.triggered());
                output.send(format!("Resuming {} stage", stage));
                self.run_stage(stage, Some(handle), request, tracker, output)
                    .await?;
                if stage == Stage::Build {
                    self.run_stage(Stage::Deploy, None, request, tracker, output)
                        .await?;
                }
                Ok(())
            }
            ResumePoint::Deploy => {
                tracker.restore(Stage::Build.succeeded());
                output.send("Resuming deploy stage");
                self.run_stage(Stage::Deploy, None, request, tracker, output)
                    .await
            }
            ResumePoint::Fresh | ResumePoint::Completed => Ok(()),
        }
    }

    /// Runs one stage to its terminal state
    ///
    /// A `resumed` handle is awaited instead of triggering the job again.
    async fn run_stage(
        &self,
        stage: Stage,
        resumed: Option<JobHandle>,
        request: &PipelineRequest,
        tracker: &mut StateTracker<'_>,
        output: &SessionOutput,
    ) -> Result<(), StageError> {
        let session = request.session_id();
        let job = self.context.job(stage);

        let mut handle = match resumed {
            Some(handle) => handle,
            None => {
                let handle = self
                    .trigger
                    .trigger(job, session, stage_parameters(&self.context, stage, request))
                    .await?;
                tracker.enter(stage.triggered(), Some(&handle)).await;
                output.send(format!("{} started", stage));
                handle
            }
        };

        let cursor = LogCursor::new(session.clone(), job.job_name.clone(), handle.started_at);
        let tail = self
            .tailer
            .spawn(cursor, stage, output.clone(), tracker.cancel());

        let result = self.await_stage(&mut handle, tracker, output).await;

        // lines logged up to completion are delivered before the outcome
        tail.stop().await;
        result?;

        tracker.enter(stage.succeeded(), None).await;
        output.send(format!("{} completed", stage));
        Ok(())
    }

    async fn await_stage(
        &self,
        handle: &mut JobHandle,
        tracker: &mut StateTracker<'_>,
        output: &SessionOutput,
    ) -> Result<(), StageError> {
        let session = tracker.guard.session().clone();
        let execution = match &handle.execution_name {
            Some(name) => {
                debug!("Execution {} already known; skipping discovery", name);
                name.clone()
            }
            None => {
                let name = self
                    .discovery
                    .discover(handle, &session, tracker.cancel())
                    .await?;
                handle.execution_name = Some(name.clone());
                name
            }
        };

        tracker.enter(handle.stage.running(), Some(handle)).await;
        output.send(format!("{} running: {}", handle.stage, execution));

        self.completion
            .await_completion(handle.stage, &execution, tracker.cancel())
            .await
    }
}

/// The flow's view of the pipeline state
///
/// Mirrors every transition into the session registry and the checkpoint.
/// Checkpoint writes are best effort: a failed write is logged and the run
/// continues.
struct StateTracker<'a> {
    state: PipelineState,
    guard: &'a SessionGuard,
    checkpoints: Option<&'a CheckpointStore>,
}

impl<'a> StateTracker<'a> {
    fn new(guard: &'a SessionGuard, checkpoints: Option<&'a CheckpointStore>) -> Self {
        Self {
            state: PipelineState::Received,
            guard,
            checkpoints,
        }
    }

    fn cancel(&self) -> &'a CancellationToken {
        self.guard.cancel_token()
    }

    /// Adopts the state a resumed pipeline continues from, bypassing the
    /// transition check
    fn restore(&mut self, state: PipelineState) {
        self.guard.set_state(state.clone());
        self.state = state;
    }

    /// Moves to `next` and checkpoints it
    ///
    /// Re-entering the current state only refreshes the checkpoint, which
    /// records a newly resolved execution name.
    async fn enter(&mut self, next: PipelineState, outstanding: Option<&JobHandle>) {
        if next != self.state {
            if !self.state.can_transition_to(&next) {
                warn!(
                    "Ignoring invalid transition {} -> {} for session {}",
                    self.state,
                    next,
                    self.guard.session()
                );
                return;
            }
            debug!(
                "Session {}: {} -> {}",
                self.guard.session(),
                self.state,
                next
            );
            self.state = next;
            self.guard.set_state(self.state.clone());
        }

        if let Some(checkpoints) = self.checkpoints {
            let checkpoint = Checkpoint::new(
                self.guard.session().clone(),
                self.state.clone(),
                outstanding.cloned(),
            );
            if let Err(e) = checkpoints.save(&checkpoint).await {
                warn!(
                    "Failed to checkpoint session {} at {}: {}",
                    self.guard.session(),
                    self.state,
                    e
                );
            }
        }
    }

    /// Marks the run failed and drops its checkpoint so a redelivery restarts
    async fn fail(&mut self, reason: String) {
        let failed = PipelineState::Failed(reason);
        if self.state.can_transition_to(&failed) {
            self.state = failed;
            self.guard.set_state(self.state.clone());
        }
        if let Some(checkpoints) = self.checkpoints {
            if let Err(e) = checkpoints.clear(self.guard.session()).await {
                warn!(
                    "Failed to clear checkpoint of session {}: {}",
                    self.guard.session(),
                    e
                );
            }
        }
    }
}
