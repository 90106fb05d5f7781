//! Pipeline definition domain types
//!
//! The declarative document: named jobs, reusable parameterized commands, and
//! workflows wiring jobs into a dependency graph with branch filters. The
//! tree is plain data; nothing here executes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Pipeline definition
///
/// Immutable once loaded for a run. Job names are unique by construction
/// (maps keyed by name); cross-references are validated by `gantry-config`
/// before any execution begins.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineDefinition {
    #[serde(default)]
    pub jobs: HashMap<String, Job>,
    #[serde(default)]
    pub commands: HashMap<String, Command>,
    #[serde(default)]
    pub workflows: HashMap<String, Workflow>,
}

/// A named unit of sequential work executed in one environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Execution environment descriptor
    #[serde(default)]
    pub executor: ExecutorSpec,
    /// Steps execute strictly in declaration order
    pub steps: Vec<Step>,
    /// Names of trigger-level secret bindings this job receives.
    /// Secrets are injected only into jobs that declare them here.
    #[serde(default)]
    pub secrets: Vec<String>,
}

/// Execution environment descriptor for a job
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorSpec {
    /// Base container image (e.g. "docker.io/rust:1.80"). Required by the
    /// container step runner; ignored by the local runner.
    pub image: Option<String>,
    pub resource_class: Option<String>,
}

/// One action within a job
///
/// Either a raw command invocation, a cache directive, a workspace directive,
/// or an invocation of a named command with parameter bindings. Invocations
/// are expanded into concrete steps at plan-construction time, so the
/// executor never sees `Invoke`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Run(RunStep),
    RestoreCache(RestoreCacheStep),
    SaveCache(SaveCacheStep),
    AttachWorkspace(AttachWorkspaceStep),
    PersistToWorkspace(PersistToWorkspaceStep),
    Invoke(InvokeStep),
}

impl Step {
    /// Human-readable label used in step records and logs
    pub fn label(&self) -> String {
        match self {
            Step::Run(run) => run
                .name
                .clone()
                .unwrap_or_else(|| run.command.clone()),
            Step::RestoreCache(_) => "restore_cache".to_string(),
            Step::SaveCache(_) => "save_cache".to_string(),
            Step::AttachWorkspace(attach) => format!("attach_workspace {}", attach.from),
            Step::PersistToWorkspace(_) => "persist_to_workspace".to_string(),
            Step::Invoke(invoke) => format!("invoke {}", invoke.command),
        }
    }
}

/// A raw shell command invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStep {
    /// Display name; defaults to the command line itself
    #[serde(default)]
    pub name: Option<String>,
    pub command: String,
    /// Extra environment variables for this step only
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory relative to the job workspace
    #[serde(default)]
    pub working_dir: Option<String>,
    /// A tolerant step records its failure without aborting the job
    #[serde(default)]
    pub tolerant: bool,
}

/// Restore the first cache hit from an ordered list of key templates
///
/// Each key is tried as an exact match first, then as a prefix against
/// previously saved keys. A miss on every key is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreCacheStep {
    pub keys: Vec<String>,
}

/// Save declared paths to the cache under a resolved key
///
/// The resolved key receives a fresh discriminator so saves never collide
/// with or overwrite a prior save. Save failures are logged, not fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveCacheStep {
    pub key: String,
    pub paths: Vec<String>,
}

/// Attach an upstream job's persisted workspace artifact
///
/// `from` names the upstream workflow job reference. Attaching an artifact
/// that was never persisted is a fatal job error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachWorkspaceStep {
    pub from: String,
    /// Destination directory relative to the job workspace
    #[serde(default)]
    pub at: Option<String>,
}

/// Persist declared paths into the run-scoped workspace store
///
/// The artifact is stored under this job's workflow reference name and is
/// visible only to downstream jobs. Best-effort: failure is surfaced in the
/// run report but does not fail the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistToWorkspaceStep {
    /// Root directory the paths are relative to, itself relative to the job
    /// workspace
    #[serde(default)]
    pub root: Option<String>,
    pub paths: Vec<String>,
}

/// Invocation of a named command with parameter bindings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvokeStep {
    pub command: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

/// A reusable, parameterized sequence of steps
///
/// Step templates reference parameters as `<< parameters.NAME >>`; bindings
/// at each call site must cover exactly the declared parameter names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    #[serde(default)]
    pub parameters: Vec<String>,
    pub steps: Vec<Step>,
}

/// A named DAG of job references with dependency and branch-filter metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub jobs: Vec<WorkflowJobRef>,
}

/// One job reference within a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowJobRef {
    /// Name of the job to run
    pub job: String,
    /// Reference name; defaults to the job name. Must be unique within the
    /// workflow, which allows the same job to appear twice under aliases.
    #[serde(default)]
    pub name: Option<String>,
    /// Reference names this job depends on
    #[serde(default)]
    pub requires: Vec<String>,
    #[serde(default)]
    pub filters: Option<JobFilters>,
}

impl WorkflowJobRef {
    /// The name this reference is known by within its workflow
    pub fn ref_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.job)
    }
}

/// Conditional-execution filters for a workflow job reference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFilters {
    pub branches: BranchFilter,
}

/// Allow-list of branch patterns (anchored regexes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchFilter {
    pub only: Vec<String>,
}
