//! Execution completion poller
//!
//! Turns the backend's asynchronous execution lifecycle into a single
//! awaitable outcome. Only the `Succeeded` condition is consulted; anything
//! short of a terminal state there keeps the poll going.

use sluice_client::JobsBackend;
use sluice_core::domain::job::ExecutionStatus;
use sluice_core::domain::pipeline::Stage;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::StageError;

pub struct CompletionPoller {
    jobs: Arc<dyn JobsBackend>,
    interval: Duration,
}

impl CompletionPoller {
    pub fn new(jobs: Arc<dyn JobsBackend>, interval: Duration) -> Self {
        Self { jobs, interval }
    }

    /// Polls an execution until it reaches a terminal status
    ///
    /// There is no wall-clock bound. Failed status fetches are logged and
    /// the poll continues.
    ///
    /// # Errors
    /// [`StageError::JobExecutionFailed`] when the execution failed,
    /// [`StageError::Cancelled`] if the session is cancelled first.
    pub async fn await_completion(
        &self,
        stage: Stage,
        execution: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Err(StageError::Cancelled),
                _ = ticker.tick() => {}
            }

            let status = match self.jobs.get_execution(execution).await {
                Ok(found) => found.status(),
                Err(e) => {
                    warn!("Failed to fetch status of {}: {}", execution, e);
                    continue;
                }
            };

            match status {
                ExecutionStatus::Succeeded => {
                    info!("{} execution {} succeeded", stage, execution);
                    return Ok(());
                }
                ExecutionStatus::Failed => {
                    warn!("{} execution {} failed", stage, execution);
                    return Err(StageError::JobExecutionFailed {
                        stage,
                        execution: execution.to_string(),
                    });
                }
                ExecutionStatus::Running => {
                    debug!("{} execution {} still {}", stage, execution, status);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeJobs;
    use sluice_core::domain::job::{CONDITION_FAILED, CONDITION_SUCCEEDED};
    use sluice_core::dto::trigger::TriggerRequest;
    use std::collections::BTreeMap;

    /// Registers one builder execution and returns its name
    async fn started(jobs: &FakeJobs) -> String {
        let mut labels = BTreeMap::new();
        labels.insert("pipeline".to_string(), "builder".to_string());
        jobs.run_job(&TriggerRequest {
            job_resource: "projects/p/locations/r/jobs/b".to_string(),
            labels,
            env: Vec::new(),
        })
        .await
        .unwrap()
        .unwrap()
    }

    fn poller(jobs: &Arc<FakeJobs>) -> CompletionPoller {
        CompletionPoller::new(jobs.clone(), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_resolves_after_success() {
        let jobs = FakeJobs::new();
        jobs.script("builder", &["", "CONDITION_PENDING", CONDITION_SUCCEEDED]);
        let execution = started(&jobs).await;

        poller(&jobs)
            .await_completion(Stage::Build, &execution, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(jobs.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_failure_names_execution() {
        let jobs = FakeJobs::new();
        jobs.script("builder", &["CONDITION_RECONCILING", CONDITION_FAILED]);
        let execution = started(&jobs).await;

        let err = poller(&jobs)
            .await_completion(Stage::Build, &execution, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains(&execution));
    }

    #[tokio::test]
    async fn test_keeps_polling_without_terminal_condition() {
        let jobs = FakeJobs::new();
        jobs.script("builder", &["", "SOMETHING_NEW"]);
        let execution = started(&jobs).await;

        let cancel = CancellationToken::new();
        let poller = poller(&jobs);
        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            poller.await_completion(Stage::Build, &execution, &cancel),
        )
        .await;
        assert!(outcome.is_err(), "poll resolved without a terminal condition");
        assert!(jobs.get_calls() > 3);
    }

    #[tokio::test]
    async fn test_fetch_errors_are_transient() {
        let jobs = FakeJobs::new();
        jobs.script("builder", &[CONDITION_SUCCEEDED]);
        jobs.fail_next_gets(2);
        let execution = started(&jobs).await;

        poller(&jobs)
            .await_completion(Stage::Build, &execution, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(jobs.get_calls(), 3);
    }

    #[tokio::test]
    async fn test_cancellation() {
        let jobs = FakeJobs::new();
        let execution = started(&jobs).await;
        let cancel = CancellationToken::new();

        let poller = poller(&jobs);
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = poller
            .await_completion(Stage::Build, &execution, &cancel)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
    }
}
