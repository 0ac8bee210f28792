//! Log tailing cursor
//!
//! Turns the queryable log backend into an ordered stream of a session's
//! status lines. Each tick fetches entries strictly newer than the cursor,
//! forwards the session's STATUS messages in timestamp order and moves the
//! cursor past every entry it consumed, so nothing is delivered twice.
//!
//! A terminal marker from the job (`SUCCESS`, `ERROR`, `FAILED`) stops the
//! tail. It is forwarded as a stage-scoped line; the session's own terminal
//! line comes from the flow, which owns the pipeline state.

use sluice_client::{ClientError, LogBackend};
use sluice_core::domain::log::{LogCursor, is_terminal_marker};
use sluice_core::domain::pipeline::Stage;
use sluice_core::dto::log::LogQuery;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::Timings;
use crate::hub::SessionOutput;

/// Result of one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep tailing; carries the number of lines delivered
    Continue(usize),
    /// The job logged a terminal marker
    Terminal(String),
}

pub struct LogTailer {
    logs: Arc<dyn LogBackend>,
    interval: Duration,
    page_size: u32,
}

impl LogTailer {
    pub fn new(logs: Arc<dyn LogBackend>, timings: &Timings) -> Self {
        Self {
            logs,
            interval: timings.log_poll_interval,
            page_size: timings.log_page_size,
        }
    }

    /// Fetches and delivers the entries newer than the cursor
    ///
    /// # Arguments
    /// * `cursor` - Cursor of this stage's tail; advanced in place
    /// * `stage` - Stage whose job is being tailed
    /// * `output` - Where the session's lines go
    pub async fn tick(
        &self,
        cursor: &mut LogCursor,
        stage: Stage,
        output: &SessionOutput,
    ) -> Result<TickOutcome, ClientError> {
        let query = LogQuery::from_cursor(cursor, self.page_size);
        let mut entries = self.logs.list_entries(&query).await?;
        entries.sort_by_key(|e| e.timestamp);

        // entries sharing a timestamp all belong to this page; filter against
        // the bound the page was fetched with, not the moving cursor
        let floor = cursor.clone();
        let mut delivered = 0;
        for entry in entries {
            if !floor.admits(entry.timestamp) {
                continue;
            }
            // non-status entries are consumed too, so a page of noise cannot stall the cursor
            let message = entry.status_message(&cursor.session_id).map(str::to_string);
            cursor.advance_past(entry.timestamp);

            let Some(message) = message else {
                continue;
            };
            if is_terminal_marker(&message) {
                output.send(format!("{} job reported {}", stage, message));
                return Ok(TickOutcome::Terminal(message));
            }
            output.send(message);
            delivered += 1;
        }

        Ok(TickOutcome::Continue(delivered))
    }

    /// Starts tailing in a background task
    ///
    /// The task runs until the job logs a terminal marker, the session is
    /// cancelled, or [`TailHandle::stop`] is called.
    pub fn spawn(
        self: &Arc<Self>,
        cursor: LogCursor,
        stage: Stage,
        output: SessionOutput,
        cancel: &CancellationToken,
    ) -> TailHandle {
        let stop = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(self).run(
            cursor,
            stage,
            output,
            cancel.clone(),
            stop.clone(),
        ));
        TailHandle { stop, task }
    }

    async fn run(
        self: Arc<Self>,
        mut cursor: LogCursor,
        stage: Stage,
        output: SessionOutput,
        cancel: CancellationToken,
        stop: CancellationToken,
    ) -> LogCursor {
        debug!(
            "Tailing {} logs for session {} from {}",
            cursor.job_name,
            cursor.session_id,
            cursor.last_seen_timestamp()
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return cursor,
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(&mut cursor, stage, &output).await {
                Ok(TickOutcome::Terminal(marker)) => {
                    info!(
                        "{} job for session {} reported {}",
                        stage, cursor.session_id, marker
                    );
                    return cursor;
                }
                Ok(TickOutcome::Continue(_)) => {}
                Err(e) => {
                    warn!(
                        "Failed to fetch {} logs for session {}: {}",
                        stage, cursor.session_id, e
                    );
                }
            }
        }

        // the job finished; pick up lines written after the last tick
        if let Err(e) = self.tick(&mut cursor, stage, &output).await {
            warn!(
                "Final {} log fetch for session {} failed: {}",
                stage, cursor.session_id, e
            );
        }
        cursor
    }
}

/// Control over a running tail
pub struct TailHandle {
    stop: CancellationToken,
    task: JoinHandle<LogCursor>,
}

impl TailHandle {
    /// Stops the tail after a final fetch and returns its cursor
    ///
    /// Returns `None` if the tail task panicked.
    pub async fn stop(self) -> Option<LogCursor> {
        self.stop.cancel();
        match self.task.await {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                warn!("Log tail task failed: {}", e);
                None
            }
        }
    }

    #[cfg(test)]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}
