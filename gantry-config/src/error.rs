//! Structural pipeline-definition errors

use thiserror::Error;

/// Result type alias for definition loading and planning
pub type Result<T> = std::result::Result<T, DefinitionError>;

/// Errors in a pipeline definition
///
/// Every variant is fatal and detected before any job starts.
#[derive(Debug, Error)]
pub enum DefinitionError {
    /// The document is not valid YAML or does not match the schema
    #[error("failed to parse pipeline definition: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("workflow '{workflow}' not found")]
    UnknownWorkflow { workflow: String },

    #[error("workflow '{workflow}' references unknown job '{job}'")]
    UnknownJob { workflow: String, job: String },

    #[error("duplicate job reference '{reference}' in workflow '{workflow}'")]
    DuplicateReference { workflow: String, reference: String },

    #[error(
        "'{reference}' in workflow '{workflow}' requires unknown reference '{requires}'"
    )]
    DanglingRequire {
        workflow: String,
        reference: String,
        requires: String,
    },

    /// The workflow's dependency edges form a cycle
    #[error("dependency cycle in workflow '{workflow}' involving '{node}'")]
    CyclicDependency { workflow: String, node: String },

    #[error("unknown command '{command}'")]
    UnknownCommand { command: String },

    /// A declared parameter has no binding, or a template references a
    /// parameter that was never declared and therefore never bound
    #[error("command '{command}' has no binding for parameter '{parameter}'")]
    UnresolvedParameter { command: String, parameter: String },

    /// The call site supplied a binding the command does not declare
    #[error("command '{command}' does not declare parameter '{parameter}'")]
    UnknownParameter { command: String, parameter: String },

    #[error("recursive command invocation involving '{command}'")]
    RecursiveCommand { command: String },

    #[error("invalid branch pattern '{pattern}' in workflow '{workflow}': {source}")]
    InvalidBranchPattern {
        workflow: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A job attaches a workspace artifact that no transitive dependency
    /// persists
    #[error(
        "'{reference}' attaches workspace artifact '{artifact}' that no upstream job persists"
    )]
    WorkspaceNotVisible { reference: String, artifact: String },

    #[error("requested job '{job}' is not part of workflow '{workflow}'")]
    UnknownSelection { workflow: String, job: String },
}
