//! Workflow scheduler
//!
//! Drives an execution plan to completion: admits jobs whose dependencies
//! have all succeeded, bounded by a fair semaphore modeling the available
//! executors, and propagates failure by skipping transitive dependents.
//!
//! The admission/completion loop is the sole mutator of the job-status
//! table; job runs report back over a channel, never by touching shared
//! state. Admission order is deterministic: plan order is topological with
//! ties broken by reference name, and the semaphore grants permits FIFO.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use gantry_config::plan::ExecutionPlan;
use gantry_core::domain::run::{FailureKind, JobState, SkipReason};
use gantry_core::report::{JobReport, RunReport, WorkflowResult};
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::executor::{JobExecutor, JobOutcome, RunEnv};
use crate::store::WorkspaceStore;

enum Event {
    Started(String),
    Finished(String, JobOutcome),
}

/// Drives one workflow run
pub struct WorkflowScheduler {
    plan: ExecutionPlan,
    executor: Arc<JobExecutor>,
    workspace: Arc<WorkspaceStore>,
    env: RunEnv,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl WorkflowScheduler {
    pub fn new(
        plan: ExecutionPlan,
        executor: Arc<JobExecutor>,
        workspace: Arc<WorkspaceStore>,
        env: RunEnv,
        max_parallel: usize,
    ) -> Self {
        Self {
            plan,
            executor,
            workspace,
            env,
            max_parallel,
            cancel: CancellationToken::new(),
        }
    }

    /// Token for external cancellation: running jobs abort promptly between
    /// steps, pending jobs never start.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the workflow to completion and build the run report.
    pub async fn run(self) -> RunReport {
        let started_at = Utc::now();
        info!(
            workflow = %self.plan.workflow,
            branch = %self.plan.branch,
            jobs = self.plan.nodes.len(),
            "starting workflow run"
        );

        let mut states: HashMap<String, JobState> = self
            .plan
            .nodes
            .iter()
            .map(|node| {
                let state = if node.filtered_out {
                    JobState::Skipped(SkipReason::FilteredOut)
                } else {
                    JobState::Pending
                };
                (node.name.clone(), state)
            })
            .collect();

        // Direct dependents, for failure propagation
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for node in &self.plan.nodes {
            for requires in &node.requires {
                dependents
                    .entry(requires.clone())
                    .or_default()
                    .push(node.name.clone());
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
        let mut outcomes: HashMap<String, JobOutcome> = HashMap::new();
        let mut first_failed: Option<String> = None;
        let mut cancel_seen = false;

        loop {
            if !cancel_seen {
                self.admit_ready(&mut states, &semaphore, &tx);
            }

            let all_terminal = states.values().all(JobState::is_terminal);
            let in_flight = states
                .values()
                .filter(|state| matches!(state, JobState::Admitted | JobState::Running))
                .count();
            if all_terminal || (cancel_seen && in_flight == 0) {
                break;
            }

            tokio::select! {
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    match event {
                        Event::Started(name) => {
                            states.insert(name, JobState::Running);
                        }
                        Event::Finished(name, outcome) => {
                            let failed = matches!(outcome.state, JobState::Failed(_));
                            states.insert(name.clone(), outcome.state);
                            outcomes.insert(name.clone(), outcome);
                            if failed {
                                if first_failed.is_none() {
                                    first_failed = Some(name.clone());
                                }
                                skip_dependents(&name, &dependents, &mut states);
                            }
                        }
                    }
                }
                _ = self.cancel.cancelled(), if !cancel_seen => {
                    warn!(workflow = %self.plan.workflow, "workflow run cancelled");
                    cancel_seen = true;
                }
            }
        }

        // Jobs still pending after a cancellation: anything whose upstream
        // already failed is a dependency skip; the rest were cancelled
        // before admission. Plan order is topological, so upstream entries
        // resolve first.
        for node in &self.plan.nodes {
            if states[&node.name] != JobState::Pending {
                continue;
            }
            let dependency_failed = node
                .requires
                .iter()
                .any(|requires| !states[requires].satisfies_dependency());
            let state = if dependency_failed {
                JobState::Skipped(SkipReason::DependencyFailed)
            } else {
                JobState::Failed(FailureKind::Cancelled)
            };
            states.insert(node.name.clone(), state);
        }

        if let Err(err) = self.workspace.clear(self.env.run_id) {
            warn!("failed to clear run workspace: {err}");
        }

        let result = if states.values().all(JobState::satisfies_dependency) {
            WorkflowResult::Succeeded
        } else {
            WorkflowResult::Failed
        };
        info!(workflow = %self.plan.workflow, ?result, "workflow run finished");

        let jobs = self
            .plan
            .nodes
            .iter()
            .map(|node| {
                let outcome = outcomes.remove(&node.name);
                let (started, finished, steps, logs, error) = match outcome {
                    Some(outcome) => (
                        Some(outcome.started_at),
                        Some(outcome.finished_at),
                        outcome.steps,
                        outcome.logs,
                        outcome.error,
                    ),
                    None => (None, None, vec![], vec![], None),
                };
                JobReport {
                    name: node.name.clone(),
                    job: node.job.clone(),
                    state: states[&node.name],
                    started_at: started,
                    finished_at: finished,
                    steps,
                    logs,
                    error,
                }
            })
            .collect();

        RunReport {
            run_id: self.env.run_id,
            workflow: self.plan.workflow.clone(),
            branch: self.plan.branch.clone(),
            result,
            started_at,
            finished_at: Utc::now(),
            jobs,
            first_failed,
            excluded: self.plan.excluded.clone(),
        }
    }

    /// Admit every pending job whose dependencies are satisfied, in plan
    /// order. Jobs beyond the concurrency limit queue on the fair semaphore
    /// in admission order.
    fn admit_ready(
        &self,
        states: &mut HashMap<String, JobState>,
        semaphore: &Arc<Semaphore>,
        tx: &mpsc::UnboundedSender<Event>,
    ) {
        let ready: Vec<_> = self
            .plan
            .nodes
            .iter()
            .filter(|node| {
                states[&node.name] == JobState::Pending
                    && node
                        .requires
                        .iter()
                        .all(|requires| states[requires].satisfies_dependency())
            })
            .cloned()
            .collect();

        for node in ready {
            states.insert(node.name.clone(), JobState::Admitted);
            info!(job = %node.name, "job admitted");

            let semaphore = Arc::clone(semaphore);
            let executor = Arc::clone(&self.executor);
            let env = self.env.clone();
            let cancel = self.cancel.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("scheduler semaphore closed");
                let name = node.name.clone();
                let _ = tx.send(Event::Started(name.clone()));
                let outcome = executor.execute(&node, &env, &cancel).await;
                let _ = tx.send(Event::Finished(name, outcome));
            });
        }
    }
}

/// Transition every transitive dependent still pending to
/// `Skipped(DependencyFailed)`.
fn skip_dependents(
    failed: &str,
    dependents: &HashMap<String, Vec<String>>,
    states: &mut HashMap<String, JobState>,
) {
    let mut stack = vec![failed.to_string()];
    while let Some(current) = stack.pop() {
        let Some(children) = dependents.get(&current) else {
            continue;
        };
        for child in children {
            if states[child] == JobState::Pending {
                states.insert(child.clone(), JobState::Skipped(SkipReason::DependencyFailed));
                info!(job = %child, "job skipped: dependency failed");
                stack.push(child.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as StdHashMap;
    use std::time::Duration;

    use gantry_config::plan::{FilterPolicy, PlanOptions, build_plan};
    use gantry_config::parser::parse_pipeline;
    use gantry_core::domain::trigger::TriggerContext;
    use uuid::Uuid;

    use crate::runner::testing::MockRunner;
    use crate::store::CacheStore;

    const PIPELINE: &str = r#"
jobs:
  build:
    steps: [ { run: { command: "cargo build" } } ]
  test:
    steps: [ { run: { command: "cargo test" } } ]
  lint:
    steps: [ { run: { command: "cargo clippy" } } ]
  deploy:
    steps: [ { run: { command: "./publish.sh" } } ]
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

    struct Fixture {
        runner: Arc<MockRunner>,
        scheduler: WorkflowScheduler,
        _dir: tempfile::TempDir,
    }

    fn fixture_with(
        source: &str,
        workflow: &str,
        branch: &str,
        runner: MockRunner,
        max_parallel: usize,
        policy: FilterPolicy,
    ) -> Fixture {
        let definition = parse_pipeline(source).unwrap();
        let plan = build_plan(
            &definition,
            workflow,
            &TriggerContext::for_branch(branch),
            &PlanOptions {
                filter_policy: policy,
            },
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(runner);
        let cache = Arc::new(CacheStore::open(dir.path().join("cache")).unwrap());
        let workspace = Arc::new(WorkspaceStore::open(dir.path().join("workspace")).unwrap());
        let executor = Arc::new(JobExecutor::new(runner.clone(), cache, workspace.clone()));
        let env = RunEnv {
            run_id: Uuid::new_v4(),
            branch: branch.to_string(),
            secrets: StdHashMap::new(),
            workdir_base: dir.path().join("runs"),
        };

        Fixture {
            runner,
            scheduler: WorkflowScheduler::new(plan, executor, workspace, env, max_parallel),
            _dir: dir,
        }
    }

    fn state_of<'a>(report: &'a RunReport, name: &str) -> &'a JobState {
        &report
            .jobs
            .iter()
            .find(|job| job.name == name)
            .unwrap_or_else(|| panic!("job '{name}' not in report"))
            .state
    }

    #[tokio::test]
    async fn test_dependent_admitted_only_after_all_dependencies() {
        let source = r#"
jobs:
  a: { steps: [ { run: { command: "a" } } ] }
  b: { steps: [ { run: { command: "b" } } ] }
  c: { steps: [ { run: { command: "c" } } ] }
workflows:
  w:
    jobs:
      - job: a
      - job: b
      - { job: c, requires: [a, b] }
"#;
        let fx = fixture_with(
            source,
            "w",
            "main",
            MockRunner::new().delay_job("a", Duration::from_millis(50)),
            4,
            FilterPolicy::Exclude,
        );
        let report = fx.scheduler.run().await;

        assert!(report.succeeded());
        let prepared = fx.runner.prepared();
        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared[2], "c", "c must be admitted last: {prepared:?}");

        let executed: Vec<String> = fx.runner.executed().into_iter().map(|(job, _)| job).collect();
        assert_eq!(executed[2], "c", "c must run after a and b: {executed:?}");
    }

    #[tokio::test]
    async fn test_admission_order_is_deterministic_with_one_executor() {
        let fx = fixture_with(
            PIPELINE,
            "commit",
            "main",
            MockRunner::new(),
            1,
            FilterPolicy::Exclude,
        );
        let report = fx.scheduler.run().await;

        assert!(report.succeeded());
        // Topological discovery order, ties broken by name
        assert_eq!(fx.runner.prepared(), vec!["build", "lint", "test", "deploy"]);
    }

    #[tokio::test]
    async fn test_failure_skips_transitive_dependents() {
        let source = r#"
jobs:
  a: { steps: [ { run: { command: "boom" } } ] }
  b: { steps: [ { run: { command: "b" } } ] }
  c: { steps: [ { run: { command: "c" } } ] }
  d: { steps: [ { run: { command: "d" } } ] }
workflows:
  w:
    jobs:
      - job: a
      - { job: b, requires: [a] }
      - { job: c, requires: [b] }
      - job: d
"#;
        let fx = fixture_with(
            source,
            "w",
            "main",
            MockRunner::new().fail_command("boom", 1),
            4,
            FilterPolicy::Exclude,
        );
        let report = fx.scheduler.run().await;

        assert!(!report.succeeded());
        assert_eq!(report.first_failed.as_deref(), Some("a"));
        assert_eq!(*state_of(&report, "a"), JobState::Failed(FailureKind::Step));
        assert_eq!(
            *state_of(&report, "b"),
            JobState::Skipped(SkipReason::DependencyFailed)
        );
        assert_eq!(
            *state_of(&report, "c"),
            JobState::Skipped(SkipReason::DependencyFailed)
        );
        // Unrelated concurrent jobs are never aborted
        assert_eq!(*state_of(&report, "d"), JobState::Succeeded);

        let skipped: Vec<&str> = report.skip_set();
        assert_eq!(skipped, vec!["b", "c"]);
        // Skipped jobs were never admitted
        assert!(!fx.runner.prepared().contains(&"b".to_string()));
        assert!(!fx.runner.prepared().contains(&"c".to_string()));
    }

    #[tokio::test]
    async fn test_feature_branch_scenario() {
        // deploy is filter-excluded on a feature branch; test fails; the
        // workflow fails citing test.
        let fx = fixture_with(
            PIPELINE,
            "commit",
            "feature",
            MockRunner::new().fail_command("cargo test", 101),
            4,
            FilterPolicy::Exclude,
        );
        let report = fx.scheduler.run().await;

        assert!(!report.succeeded());
        assert_eq!(report.first_failed.as_deref(), Some("test"));
        assert_eq!(report.excluded, vec!["deploy".to_string()]);
        assert!(report.jobs.iter().all(|job| job.name != "deploy"));
        assert_eq!(*state_of(&report, "build"), JobState::Succeeded);
        assert_eq!(*state_of(&report, "lint"), JobState::Succeeded);
        assert_eq!(
            *state_of(&report, "test"),
            JobState::Failed(FailureKind::Step)
        );
    }

    #[tokio::test]
    async fn test_all_filtered_workflow_succeeds_trivially() {
        let source = r#"
jobs:
  deploy: { steps: [ { run: { command: "./publish.sh" } } ] }
workflows:
  release:
    jobs:
      - job: deploy
        filters: { branches: { only: [main] } }
"#;
        let fx = fixture_with(
            source,
            "release",
            "feature",
            MockRunner::new(),
            4,
            FilterPolicy::Exclude,
        );
        let report = fx.scheduler.run().await;

        assert!(report.succeeded());
        assert!(report.jobs.is_empty());
        assert!(fx.runner.prepared().is_empty());
    }

    #[tokio::test]
    async fn test_inert_policy_reports_filtered_jobs_as_skipped() {
        let fx = fixture_with(
            PIPELINE,
            "commit",
            "feature",
            MockRunner::new(),
            4,
            FilterPolicy::Inert,
        );
        let report = fx.scheduler.run().await;

        assert!(report.succeeded());
        assert_eq!(
            *state_of(&report, "deploy"),
            JobState::Skipped(SkipReason::FilteredOut)
        );
        assert!(!fx.runner.prepared().contains(&"deploy".to_string()));
    }

    #[tokio::test]
    async fn test_cancellation_terminates_the_run() {
        let source = r#"
jobs:
  a:
    steps:
      - run: { command: "slow-1" }
      - run: { command: "slow-2" }
  b: { steps: [ { run: { command: "b" } } ] }
workflows:
  w:
    jobs:
      - job: a
      - { job: b, requires: [a] }
"#;
        let fx = fixture_with(
            source,
            "w",
            "main",
            MockRunner::new().delay_job("a", Duration::from_millis(100)),
            2,
            FilterPolicy::Exclude,
        );
        let cancel = fx.scheduler.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let report = fx.scheduler.run().await;

        assert!(!report.succeeded());
        // a aborts between its two steps
        assert_eq!(
            *state_of(&report, "a"),
            JobState::Failed(FailureKind::Cancelled)
        );
        assert_eq!(
            *state_of(&report, "b"),
            JobState::Skipped(SkipReason::DependencyFailed)
        );
    }
}
