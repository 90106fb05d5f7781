//! Core domain types
//!
//! The declarative pipeline model and run-time state shared across Gantry
//! crates. The definition tree is parsed once per run by `gantry-config` and
//! is read-only thereafter; run state is owned by the `gantry-engine`
//! scheduler.

pub mod pipeline;
pub mod run;
pub mod trigger;
