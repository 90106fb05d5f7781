//! Gantry Core
//!
//! Core types for the Gantry build-pipeline orchestrator.
//!
//! This crate contains:
//! - Domain types: the declarative pipeline model (jobs, steps, commands,
//!   workflows) and the per-job run state machine
//! - Report types: the serializable run report handed back to callers

pub mod domain;
pub mod report;
