//! Subscriber hub
//!
//! Per-session registry of live output channels. Progress lines produced by a
//! pipeline are fanned out to every channel joined to its session; nothing is
//! buffered for subscribers that join later.

use sluice_core::domain::session::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;
use uuid::Uuid;

/// Identifies one channel within a session
pub type SubscriberId = Uuid;

type Channels = HashMap<SessionId, HashMap<SubscriberId, UnboundedSender<String>>>;

/// Registry of output channels keyed by session
///
/// Sends never block: channels are unbounded and a closed channel is pruned
/// the first time a send to it fails. Messages to one session are delivered
/// to each of its channels in send order.
#[derive(Debug, Default)]
pub struct SubscriberHub {
    sessions: Mutex<Channels>,
}

impl SubscriberHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, Channels> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a channel to a session
    ///
    /// # Arguments
    /// * `session` - Session the channel listens to
    /// * `channel` - Sending half of the subscriber's queue
    pub fn join(&self, session: &SessionId, channel: UnboundedSender<String>) -> SubscriberId {
        let id = Uuid::new_v4();
        self.lock()
            .entry(session.clone())
            .or_default()
            .insert(id, channel);
        debug!("Subscriber {} joined session {}", id, session);
        id
    }

    /// Creates a channel, joins it to a session, and returns its receiving half
    pub fn subscribe(&self, session: &SessionId) -> (SubscriberId, UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.join(session, tx), rx)
    }

    /// Removes a channel; unknown ids are ignored
    pub fn leave(&self, session: &SessionId, id: SubscriberId) {
        let mut sessions = self.lock();
        if let Some(channels) = sessions.get_mut(session) {
            channels.remove(&id);
            if channels.is_empty() {
                sessions.remove(session);
            }
        }
        debug!("Subscriber {} left session {}", id, session);
    }

    /// Sends a message to every live channel of a session
    ///
    /// Returns the number of channels that received it.
    pub fn send(&self, session: &SessionId, message: impl Into<String>) -> usize {
        let message = message.into();
        let mut sessions = self.lock();
        let Some(channels) = sessions.get_mut(session) else {
            return 0;
        };

        channels.retain(|_, tx| tx.send(message.clone()).is_ok());
        let delivered = channels.len();
        if delivered == 0 {
            sessions.remove(session);
        }
        delivered
    }

    /// Sends a message to every live channel of every session
    pub fn broadcast(&self, message: impl Into<String>) -> usize {
        let message = message.into();
        let mut sessions = self.lock();
        let mut delivered = 0;

        sessions.retain(|_, channels| {
            channels.retain(|_, tx| tx.send(message.clone()).is_ok());
            delivered += channels.len();
            !channels.is_empty()
        });
        delivered
    }

    /// Number of live channels joined to a session
    pub fn subscriber_count(&self, session: &SessionId) -> usize {
        self.lock().get(session).map_or(0, HashMap::len)
    }
}

/// Output of one session's pipeline
///
/// Once [`finish`](SessionOutput::finish) delivered the terminal line, any
/// further message is dropped so observers never see output past it.
#[derive(Debug, Clone)]
pub struct SessionOutput {
    hub: Arc<SubscriberHub>,
    session: SessionId,
    finished: Arc<AtomicBool>,
}

impl SessionOutput {
    pub fn new(hub: Arc<SubscriberHub>, session: SessionId) -> Self {
        Self {
            hub,
            session,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sends a progress line
    pub fn send(&self, message: impl Into<String>) {
        if self.is_finished() {
            return;
        }
        self.hub.send(&self.session, message);
    }

    /// Sends the terminal line; only the first call has any effect
    pub fn finish(&self, message: impl Into<String>) {
        if self
            .finished
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.hub.send(&self.session, message);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}
