//! Pipeline document parser
//!
//! Parses the declarative YAML pipeline document into the strongly typed
//! definition tree and runs full structural validation, so that a
//! successfully parsed definition is safe to plan against.

use gantry_core::domain::pipeline::PipelineDefinition;

use crate::error::Result;
use crate::plan::validate_definition;

/// Parse and validate a pipeline definition from YAML source.
///
/// Validation covers the schema, job/command/workflow cross-references,
/// parameter completeness at every call site, branch-pattern syntax, DAG
/// acyclicity, and workspace visibility. A validation failure aborts the run
/// before any job starts.
pub fn parse_pipeline(source: &str) -> Result<PipelineDefinition> {
    let definition: PipelineDefinition = serde_yaml::from_str(source)?;
    validate_definition(&definition)?;
    Ok(definition)
}
