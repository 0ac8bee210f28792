//! Scheduler
//!
//! Pulls build requests from the queue and runs each one as an independent
//! pipeline task.

mod ingest;

pub use ingest::{Disposition, Ingestor};
