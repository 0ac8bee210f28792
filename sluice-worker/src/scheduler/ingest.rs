//! Ingestion
//!
//! Pulls queue messages and runs one pipeline per message in its own task.
//! A message is acknowledged only once its pipeline succeeded; failures and
//! malformed messages are rejected so the queue redelivers them. While a
//! pipeline runs its lease is extended periodically.

use anyhow::Result;
use sluice_client::{MessageQueue, QueueMessage};
use sluice_core::domain::request::PipelineRequest;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::{SessionOutput, SubscriberHub};
use crate::registry::ActiveSessions;
use crate::service::{FlowOutcome, PipelineFlow};

/// What happens to a message once it has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    Nack,
}

/// Queue consumer launching pipeline flows
pub struct Ingestor {
    queue: Arc<dyn MessageQueue>,
    flow: Arc<PipelineFlow>,
    hub: Arc<SubscriberHub>,
    sessions: Arc<ActiveSessions>,
    semaphore: Arc<Semaphore>,
    poll_interval: Duration,
    ack_extension: Duration,
    shutdown: CancellationToken,
}

impl Ingestor {
    /// Creates a new ingestor
    ///
    /// # Arguments
    /// * `max_parallel` - Pipelines allowed to run at once
    /// * `shutdown` - Process token; cancelling it stops pulling and cancels
    ///   every running pipeline
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        flow: Arc<PipelineFlow>,
        hub: Arc<SubscriberHub>,
        sessions: Arc<ActiveSessions>,
        max_parallel: usize,
        poll_interval: Duration,
        ack_extension: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            queue,
            flow,
            hub,
            sessions,
            semaphore: Arc::new(Semaphore::new(max_parallel)),
            poll_interval,
            ack_extension,
            shutdown,
        }
    }

    /// Runs the pull loop until shutdown, then drains running pipelines
    pub async fn run(self: Arc<Self>) -> Result<()> {
        info!(
            "Starting ingestion (poll interval: {:?})",
            self.poll_interval
        );

        let mut tasks = JoinSet::new();
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    warn!("Pipeline task panicked: {}", e);
                }
            }

            let available = self.semaphore.available_permits();
            if available == 0 {
                debug!("Max parallel pipelines reached, not pulling");
                continue;
            }

            match self.queue.pull(available as u32).await {
                Ok(messages) => {
                    if !messages.is_empty() {
                        info!("Pulled {} message(s)", messages.len());
                    }
                    for message in messages {
                        self.dispatch(&mut tasks, message).await;
                    }
                }
                Err(e) => {
                    error!("SUBSCRIPTION ERROR: {}", e);
                    self.hub.broadcast(format!("SUBSCRIPTION ERROR: {}", e));
                }
            }
        }

        info!("Ingestion stopped; draining {} pipeline task(s)", tasks.len());
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!("Pipeline task panicked: {}", e);
            }
        }
        Ok(())
    }

    async fn dispatch(self: &Arc<Self>, tasks: &mut JoinSet<()>, message: QueueMessage) {
        let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() else {
            // pulled more than fit; give it back right away
            self.settle(&message, Disposition::Nack).await;
            return;
        };

        let this = Arc::clone(self);
        tasks.spawn(async move {
            let _permit: OwnedSemaphorePermit = permit;
            let disposition = this.handle(&message).await;
            this.settle(&message, disposition).await;
        });
    }

    /// Handles one delivery and decides its disposition
    ///
    /// Malformed payloads are rejected before anything is stored or
    /// triggered. A redelivery of the request a session is already running
    /// is acknowledged without starting another pipeline; a different
    /// request for a busy session is rejected so it comes back once the
    /// running one is done.
    pub async fn handle(&self, message: &QueueMessage) -> Disposition {
        let request = match PipelineRequest::from_slice(&message.data) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting message {}: {}", message.message_id, e);
                return Disposition::Nack;
            }
        };
        let session = request.session_id().clone();

        let Some(guard) = self.sessions.begin(&session, &self.shutdown) else {
            if self.sessions.is_running(&request) {
                info!(
                    "Session {} is already running this request; acking duplicate message {}",
                    session, message.message_id
                );
                return Disposition::Ack;
            }
            info!(
                "Session {} is busy with another request; deferring message {}",
                session, message.message_id
            );
            return Disposition::Nack;
        };
        guard.record_request(&request);

        info!(
            "Received request for session {} (message {})",
            session, message.message_id
        );
        let output = SessionOutput::new(Arc::clone(&self.hub), session.clone());

        let lease_stop = CancellationToken::new();
        let lease = self.spawn_lease_extender(message.ack_id.clone(), lease_stop.clone());

        let outcome = self.flow.run(&request, &guard, &output).await;

        lease_stop.cancel();
        if let Err(e) = lease.await {
            warn!("Lease extender for session {} failed: {}", session, e);
        }

        match outcome {
            FlowOutcome::Succeeded => Disposition::Ack,
            FlowOutcome::Failed(_) | FlowOutcome::Cancelled => Disposition::Nack,
        }
    }

    async fn settle(&self, message: &QueueMessage, disposition: Disposition) {
        let result = match disposition {
            Disposition::Ack => self.queue.ack(&message.ack_id).await,
            Disposition::Nack => self.queue.nack(&message.ack_id).await,
        };
        match result {
            Ok(()) => debug!("Settled message {} ({:?})", message.message_id, disposition),
            Err(e) => error!(
                "Failed to settle message {} ({:?}): {}",
                message.message_id, disposition, e
            ),
        }
    }

    /// Keeps extending a delivery's lease at half its length
    fn spawn_lease_extender(&self, ack_id: String, stop: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let seconds = self.ack_extension.as_secs().max(1) as u32;
        let period = (self.ack_extension / 2).max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                if let Err(e) = queue.extend_deadline(&ack_id, seconds).await {
                    warn!("Failed to extend lease of {}: {}", ack_id, e);
                }
            }
        })
    }
}
