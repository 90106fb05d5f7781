//! Execution plan construction
//!
//! Turns a validated pipeline definition, a workflow name, and a trigger
//! context into an immutable plan: fully expanded steps per job, pruned to
//! the trigger's branch and job selection, in a deterministic topological
//! order. Everything structural fails here, before any job starts.

use std::collections::{HashMap, HashSet};

use gantry_core::domain::pipeline::{
    ExecutorSpec, PipelineDefinition, Step, Workflow, WorkflowJobRef,
};
use gantry_core::domain::trigger::TriggerContext;
use regex::Regex;

use crate::dag::DependencyGraph;
use crate::error::{DefinitionError, Result};
use crate::registry::CommandRegistry;

/// How a branch-filter mismatch is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterPolicy {
    /// Remove the reference and everything transitively depending on it from
    /// the plan entirely
    #[default]
    Exclude,
    /// Keep the reference as a pre-skipped entry that vacuously satisfies
    /// its dependents
    Inert,
}

/// Options controlling plan construction
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    pub filter_policy: FilterPolicy,
}

/// A validated, immutable execution plan for one workflow
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflow: String,
    pub branch: String,
    /// Schedulable nodes in deterministic topological order
    pub nodes: Vec<PlanNode>,
    /// References excluded from the plan by branch filters (directly or via
    /// an excluded dependency)
    pub excluded: Vec<String>,
}

impl ExecutionPlan {
    pub fn node(&self, name: &str) -> Option<&PlanNode> {
        self.nodes.iter().find(|node| node.name == name)
    }
}

/// One schedulable job with fully resolved steps
#[derive(Debug, Clone)]
pub struct PlanNode {
    /// Workflow reference name; also the workspace artifact name
    pub name: String,
    /// Underlying job name
    pub job: String,
    pub executor: ExecutorSpec,
    /// Steps with every command invocation expanded
    pub steps: Vec<Step>,
    /// Reference names this node waits on, pruned to planned nodes
    pub requires: Vec<String>,
    /// Secret binding names declared by the job
    pub secrets: Vec<String>,
    /// Under the inert filter policy: pre-skipped, never admitted
    pub filtered_out: bool,
}

/// Validate the whole definition before any execution begins.
///
/// Checks every workflow (references, cycles, branch patterns, workspace
/// visibility) and every job's command invocations (existence, parameter
/// completeness), including jobs not referenced by any workflow.
pub fn validate_definition(definition: &PipelineDefinition) -> Result<()> {
    let registry = CommandRegistry::from_definition(definition);

    let mut job_names: Vec<&String> = definition.jobs.keys().collect();
    job_names.sort_unstable();
    for name in job_names {
        registry.expand_steps(&definition.jobs[name].steps)?;
    }

    let mut workflow_names: Vec<&String> = definition.workflows.keys().collect();
    workflow_names.sort_unstable();
    for name in workflow_names {
        let workflow = &definition.workflows[name];
        analyze(definition, name, workflow, &registry)?;
        for job_ref in &workflow.jobs {
            compile_filters(name, job_ref)?;
        }
    }

    Ok(())
}

/// Build the execution plan for one workflow and trigger context.
pub fn build_plan(
    definition: &PipelineDefinition,
    workflow_name: &str,
    trigger: &TriggerContext,
    options: &PlanOptions,
) -> Result<ExecutionPlan> {
    let workflow =
        definition
            .workflows
            .get(workflow_name)
            .ok_or_else(|| DefinitionError::UnknownWorkflow {
                workflow: workflow_name.to_string(),
            })?;

    let registry = CommandRegistry::from_definition(definition);
    let analysis = analyze(definition, workflow_name, workflow, &registry)?;
    let order = analysis.graph.ordered();

    // Job-subset selection: requested references plus their transitive
    // dependencies.
    let selected: HashSet<&str> = if trigger.jobs.is_empty() {
        order.iter().copied().collect()
    } else {
        let mut selected = HashSet::new();
        for requested in &trigger.jobs {
            if !analysis.refs.contains_key(requested.as_str()) {
                return Err(DefinitionError::UnknownSelection {
                    workflow: workflow_name.to_string(),
                    job: requested.clone(),
                });
            }
            selected.insert(requested.as_str());
            selected.extend(analysis.graph.dependencies_of(requested));
        }
        selected
    };

    // Branch filters.
    let mut filtered: HashSet<&str> = HashSet::new();
    for name in &selected {
        let job_ref = analysis.refs[name];
        if !branch_matches(workflow_name, job_ref, &trigger.branch)? {
            filtered.insert(*name);
        }
    }

    let mut excluded_set: HashSet<&str> = HashSet::new();
    if options.filter_policy == FilterPolicy::Exclude {
        for name in &filtered {
            excluded_set.insert(*name);
            for dependent in analysis.graph.dependents_of(name) {
                if selected.contains(dependent) {
                    excluded_set.insert(dependent);
                }
            }
        }
    }

    let planned: HashSet<&str> = selected.difference(&excluded_set).copied().collect();

    let mut nodes = Vec::new();
    let mut excluded = Vec::new();
    for name in &order {
        if excluded_set.contains(name) {
            excluded.push(name.to_string());
            continue;
        }
        if !planned.contains(name) {
            continue;
        }

        let job_ref = analysis.refs[name];
        let job = &definition.jobs[&job_ref.job];
        nodes.push(PlanNode {
            name: name.to_string(),
            job: job_ref.job.clone(),
            executor: job.executor.clone(),
            steps: analysis.steps[name].clone(),
            requires: job_ref
                .requires
                .iter()
                .filter(|requires| planned.contains(requires.as_str()))
                .cloned()
                .collect(),
            secrets: job.secrets.clone(),
            filtered_out: filtered.contains(name),
        });
    }

    Ok(ExecutionPlan {
        workflow: workflow_name.to_string(),
        branch: trigger.branch.clone(),
        nodes,
        excluded,
    })
}

struct WorkflowAnalysis<'a> {
    graph: DependencyGraph<'a>,
    refs: HashMap<&'a str, &'a WorkflowJobRef>,
    steps: HashMap<&'a str, Vec<Step>>,
}

/// Shared structural validation: reference resolution, cycle detection,
/// command expansion, workspace visibility.
fn analyze<'a>(
    definition: &'a PipelineDefinition,
    workflow_name: &str,
    workflow: &'a Workflow,
    registry: &CommandRegistry,
) -> Result<WorkflowAnalysis<'a>> {
    for job_ref in &workflow.jobs {
        if !definition.jobs.contains_key(&job_ref.job) {
            return Err(DefinitionError::UnknownJob {
                workflow: workflow_name.to_string(),
                job: job_ref.job.clone(),
            });
        }
    }

    let graph = DependencyGraph::build(workflow_name, &workflow.jobs)?;

    let mut refs = HashMap::new();
    let mut steps = HashMap::new();
    for job_ref in &workflow.jobs {
        let name = job_ref.ref_name();
        refs.insert(name, job_ref);
        let job = &definition.jobs[&job_ref.job];
        steps.insert(name, registry.expand_steps(&job.steps)?);
    }

    // Workspace visibility is strictly downstream: an attach may only name a
    // transitive dependency that persists.
    for job_ref in &workflow.jobs {
        let name = job_ref.ref_name();
        let upstream = graph.dependencies_of(name);
        for step in &steps[name] {
            let Step::AttachWorkspace(attach) = step else {
                continue;
            };
            let visible = upstream.contains(attach.from.as_str())
                && steps[attach.from.as_str()]
                    .iter()
                    .any(|step| matches!(step, Step::PersistToWorkspace(_)));
            if !visible {
                return Err(DefinitionError::WorkspaceNotVisible {
                    reference: name.to_string(),
                    artifact: attach.from.clone(),
                });
            }
        }
    }

    Ok(WorkflowAnalysis { graph, refs, steps })
}

fn compile_filters(workflow_name: &str, job_ref: &WorkflowJobRef) -> Result<Vec<Regex>> {
    let Some(filters) = &job_ref.filters else {
        return Ok(Vec::new());
    };
    filters
        .branches
        .only
        .iter()
        .map(|pattern| {
            Regex::new(&format!("^(?:{pattern})$")).map_err(|source| {
                DefinitionError::InvalidBranchPattern {
                    workflow: workflow_name.to_string(),
                    pattern: pattern.clone(),
                    source,
                }
            })
        })
        .collect()
}

fn branch_matches(workflow_name: &str, job_ref: &WorkflowJobRef, branch: &str) -> Result<bool> {
    let patterns = compile_filters(workflow_name, job_ref)?;
    if job_ref.filters.is_none() {
        return Ok(true);
    }
    Ok(patterns.iter().any(|pattern| pattern.is_match(branch)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_pipeline;

    const PIPELINE: &str = r#"
jobs:
  build:
    steps:
      - run: { command: "cargo build" }
      - persist_to_workspace: { paths: ["target"] }
  test:
    steps:
      - attach_workspace: { from: build }
      - run: { command: "cargo test" }
  lint:
    steps:
      - run: { command: "cargo clippy" }
  deploy:
    secrets: [DEPLOY_TOKEN]
    steps:
      - attach_workspace: { from: build }
      - run: { command: "./publish.sh" }
workflows:
  commit:
    jobs:
      - job: build
      - job: test
        requires: [build]
      - job: lint
      - job: deploy
        requires: [build, test, lint]
        filters: { branches: { only: [main] } }
"#;

    fn plan_for(branch: &str) -> ExecutionPlan {
        let definition = parse_pipeline(PIPELINE).unwrap();
        build_plan(
            &definition,
            "commit",
            &TriggerContext::for_branch(branch),
            &PlanOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_plan_order_is_deterministic() {
        let plan = plan_for("main");
        let names: Vec<&str> = plan.nodes.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["build", "lint", "test", "deploy"]);
    }

    #[test]
    fn test_filtered_ref_is_excluded_on_other_branch() {
        let plan = plan_for("feature");
        let names: Vec<&str> = plan.nodes.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["build", "lint", "test"]);
        assert_eq!(plan.excluded, vec!["deploy".to_string()]);
    }

    #[test]
    fn test_exclusion_cascades_to_sole_dependents() {
        let source = r#"
jobs:
  gate: { steps: [ { run: { command: "true" } } ] }
  publish: { steps: [ { run: { command: "true" } } ] }
workflows:
  release:
    jobs:
      - job: gate
        filters: { branches: { only: [main] } }
      - job: publish
        requires: [gate]
"#;
        let definition = parse_pipeline(source).unwrap();
        let plan = build_plan(
            &definition,
            "release",
            &TriggerContext::for_branch("feature"),
            &PlanOptions::default(),
        )
        .unwrap();
        assert!(plan.nodes.is_empty());
        assert_eq!(plan.excluded.len(), 2);
    }

    #[test]
    fn test_inert_policy_keeps_filtered_refs() {
        let definition = parse_pipeline(PIPELINE).unwrap();
        let plan = build_plan(
            &definition,
            "commit",
            &TriggerContext::for_branch("feature"),
            &PlanOptions {
                filter_policy: FilterPolicy::Inert,
            },
        )
        .unwrap();
        let deploy = plan.node("deploy").unwrap();
        assert!(deploy.filtered_out);
        assert!(plan.excluded.is_empty());
    }

    #[test]
    fn test_subset_selection_pulls_in_dependencies() {
        let definition = parse_pipeline(PIPELINE).unwrap();
        let mut trigger = TriggerContext::for_branch("main");
        trigger.jobs = vec!["test".to_string()];
        let plan = build_plan(&definition, "commit", &trigger, &PlanOptions::default()).unwrap();
        let names: Vec<&str> = plan.nodes.iter().map(|node| node.name.as_str()).collect();
        assert_eq!(names, vec!["build", "test"]);
    }

    #[test]
    fn test_subset_selection_unknown_job() {
        let definition = parse_pipeline(PIPELINE).unwrap();
        let mut trigger = TriggerContext::for_branch("main");
        trigger.jobs = vec!["nope".to_string()];
        let err = build_plan(&definition, "commit", &trigger, &PlanOptions::default()).unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownSelection { .. }));
    }

    #[test]
    fn test_unknown_workflow() {
        let definition = parse_pipeline(PIPELINE).unwrap();
        let err = build_plan(
            &definition,
            "nightly",
            &TriggerContext::for_branch("main"),
            &PlanOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, DefinitionError::UnknownWorkflow { .. }));
    }

    #[test]
    fn test_workspace_visibility_requires_upstream_persist() {
        let source = r#"
jobs:
  build: { steps: [ { run: { command: "true" } } ] }
  test:
    steps:
      - attach_workspace: { from: build }
workflows:
  commit:
    jobs:
      - job: build
      - job: test
        requires: [build]
"#;
        // build never persists, so test's attach is statically invalid
        let err = parse_pipeline(source).unwrap_err();
        assert!(matches!(err, DefinitionError::WorkspaceNotVisible { .. }));
    }

    #[test]
    fn test_workspace_visibility_requires_dependency_edge() {
        let source = r#"
jobs:
  build:
    steps:
      - run: { command: "true" }
      - persist_to_workspace: { paths: ["out"] }
  test:
    steps:
      - attach_workspace: { from: build }
workflows:
  commit:
    jobs:
      - job: build
      - job: test
"#;
        let err = parse_pipeline(source).unwrap_err();
        assert!(matches!(err, DefinitionError::WorkspaceNotVisible { .. }));
    }

    #[test]
    fn test_invalid_branch_pattern() {
        let source = r#"
jobs:
  build: { steps: [ { run: { command: "true" } } ] }
workflows:
  commit:
    jobs:
      - job: build
        filters: { branches: { only: ["["] } }
"#;
        let err = parse_pipeline(source).unwrap_err();
        assert!(matches!(err, DefinitionError::InvalidBranchPattern { .. }));
    }

    #[test]
    fn test_branch_pattern_is_anchored() {
        let source = r#"
jobs:
  build: { steps: [ { run: { command: "true" } } ] }
workflows:
  commit:
    jobs:
      - job: build
        filters: { branches: { only: ["release/.*"] } }
"#;
        let definition = parse_pipeline(source).unwrap();
        let options = PlanOptions::default();

        let plan = build_plan(
            &definition,
            "commit",
            &TriggerContext::for_branch("release/1.2"),
            &options,
        )
        .unwrap();
        assert_eq!(plan.nodes.len(), 1);

        // "release" alone must not match the anchored pattern
        let plan = build_plan(
            &definition,
            "commit",
            &TriggerContext::for_branch("prerelease/1.2"),
            &options,
        )
        .unwrap();
        assert!(plan.nodes.is_empty());
    }
}
