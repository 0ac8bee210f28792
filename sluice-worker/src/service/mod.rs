//! Service layer
//!
//! Services contain the pipeline logic of the worker. Each one drives a
//! single backend protocol (triggering, discovery, completion polling, log
//! tailing, checkpointing, local builds) and the flow composes them into the
//! per-session state machine.
//!
//! Backends are injected as trait objects so every service can be exercised
//! against in-memory fakes.

mod checkpoint;
mod completion;
mod discovery;
mod flow;
mod local;
mod log_tail;
mod trigger;

pub use checkpoint::CheckpointStore;
pub use completion::CompletionPoller;
pub use discovery::ExecutionDiscovery;
pub use flow::{FlowOutcome, PipelineFlow};
pub use local::LocalBuilder;
pub use log_tail::{LogTailer, TailHandle, TickOutcome};
pub use trigger::ExecutionTrigger;

use sluice_client::{JobsBackend, LogBackend, ObjectStore};
use std::sync::Arc;

/// The backends a pipeline talks to
#[derive(Clone)]
pub struct Backends {
    pub jobs: Arc<dyn JobsBackend>,
    pub logs: Arc<dyn LogBackend>,
    pub store: Arc<dyn ObjectStore>,
}
