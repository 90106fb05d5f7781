//! Gantry Config
//!
//! Loads the declarative YAML pipeline document, resolves command templates,
//! validates the definition (references, parameter completeness, DAG
//! acyclicity, workspace visibility), and produces the immutable execution
//! plan consumed by the engine.
//!
//! All errors here are structural: they are detected before any job starts
//! and abort the run with no side effects.

pub mod dag;
pub mod error;
pub mod parser;
pub mod plan;
pub mod registry;

pub use error::DefinitionError;
pub use parser::parse_pipeline;
pub use plan::{ExecutionPlan, FilterPolicy, PlanNode, PlanOptions, build_plan};
pub use registry::CommandRegistry;
