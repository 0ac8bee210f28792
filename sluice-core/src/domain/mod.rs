//! Core domain types
//!
//! This module contains the domain structures shared between the backend
//! client (which speaks the wire formats) and the worker (which drives
//! pipelines). Everything here is partitioned by [`session::SessionId`].

pub mod checkpoint;
pub mod job;
pub mod log;
pub mod pipeline;
pub mod request;
pub mod session;
