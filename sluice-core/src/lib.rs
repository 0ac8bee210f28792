//! Sluice Core
//!
//! Core types and abstractions for the Sluice build pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: sessions, pipeline requests and states, job handles,
//!   execution status, log entries and cursors, checkpoints
//! - DTOs: requests sent to the job and log backends

pub mod domain;
pub mod dto;
