//! Data Transfer Objects for backend communication
//!
//! DTOs describe what the worker asks of the external job and log backends.
//! They are backend-agnostic; the client crate maps them onto concrete APIs.

pub mod log;
pub mod trigger;
