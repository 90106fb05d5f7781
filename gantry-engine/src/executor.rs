//! Job executor
//!
//! Runs one admitted job's step sequence inside its declared environment.
//! Steps execute strictly sequentially with fail-fast semantics: the first
//! failing step aborts the job unless it is marked tolerant. Cache and
//! workspace directives are executed here against the shared stores; cache
//! misses and best-effort store failures never abort the job, while a
//! missing workspace artifact does.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use gantry_config::plan::PlanNode;
use gantry_core::domain::pipeline::Step;
use gantry_core::domain::run::{JobState, LogEntry, StepRecord, StepStatus};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::archive;
use crate::context::JobContext;
use crate::error::JobError;
use crate::key::{self, KeyContext};
use crate::runner::{StepCommand, StepRunner};
use crate::store::{CacheStore, WorkspaceStore};

/// Run-wide inputs shared by every job execution
#[derive(Debug, Clone)]
pub struct RunEnv {
    pub run_id: Uuid,
    pub branch: String,
    /// Trigger-level secret bindings; injected only into jobs declaring them
    pub secrets: HashMap<String, String>,
    /// Per-job working directories are created under this base
    pub workdir_base: PathBuf,
}

/// Terminal result of one job run
#[derive(Debug)]
pub struct JobOutcome {
    /// `Succeeded` or `Failed(kind)`
    pub state: JobState,
    pub steps: Vec<StepRecord>,
    pub logs: Vec<LogEntry>,
    pub error: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Executes one job's ordered steps against the shared stores
pub struct JobExecutor {
    runner: Arc<dyn StepRunner>,
    cache: Arc<CacheStore>,
    workspace: Arc<WorkspaceStore>,
}

impl JobExecutor {
    pub fn new(
        runner: Arc<dyn StepRunner>,
        cache: Arc<CacheStore>,
        workspace: Arc<WorkspaceStore>,
    ) -> Self {
        Self {
            runner,
            cache,
            workspace,
        }
    }

    /// Execute one admitted job to a terminal state. Never panics or
    /// returns early: every failure is folded into the outcome.
    pub async fn execute(
        &self,
        node: &PlanNode,
        env: &RunEnv,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        let started_at = Utc::now();
        let workdir = env
            .workdir_base
            .join(env.run_id.to_string())
            .join(&node.name);

        let mut job_env = Vec::with_capacity(node.secrets.len());
        for secret in &node.secrets {
            match env.secrets.get(secret) {
                Some(value) => job_env.push((secret.clone(), value.clone())),
                None => warn!(job = %node.name, secret, "declared secret has no binding"),
            }
        }

        let ctx = JobContext::new(
            env.run_id,
            node.name.clone(),
            node.executor.image.clone(),
            workdir,
            env.branch.clone(),
            job_env,
        );

        info!(job = %node.name, "starting job run");
        let mut steps = Vec::with_capacity(node.steps.len());

        let result = match self.runner.prepare(&ctx).await {
            Ok(()) => self.run_steps(node, &ctx, cancel, &mut steps).await,
            Err(err) => {
                ctx.log_error(format!("failed to prepare execution environment: {err:#}"));
                Err(JobError::Internal(err))
            }
        };

        if let Err(err) = self.runner.teardown(&ctx).await {
            ctx.log_warning(format!("failed to tear down execution environment: {err:#}"));
        }

        let (state, error) = match result {
            Ok(()) => (JobState::Succeeded, None),
            Err(err) => {
                ctx.log_error(err.to_string());
                (JobState::Failed(err.failure_kind()), Some(err.to_string()))
            }
        };

        info!(job = %node.name, ?state, "job run finished");
        JobOutcome {
            state,
            steps,
            logs: ctx.drain_logs(),
            error,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn run_steps(
        &self,
        node: &PlanNode,
        ctx: &JobContext,
        cancel: &CancellationToken,
        records: &mut Vec<StepRecord>,
    ) -> Result<(), JobError> {
        for step in &node.steps {
            if cancel.is_cancelled() {
                return Err(JobError::Cancelled);
            }

            let started_at = Utc::now();
            let result = self.execute_step(step, node, ctx, cancel).await;
            let status = match &result {
                Ok(status) => *status,
                Err(JobError::StepFailed { exit_code, .. }) => StepStatus::Failed {
                    exit_code: *exit_code,
                },
                Err(_) => StepStatus::Errored,
            };
            records.push(StepRecord {
                name: step.label(),
                status,
                started_at,
                finished_at: Utc::now(),
            });
            result?;
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        step: &Step,
        node: &PlanNode,
        ctx: &JobContext,
        cancel: &CancellationToken,
    ) -> Result<StepStatus, JobError> {
        match step {
            Step::Run(run) => {
                let mut env: Vec<(String, String)> = run
                    .env
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone()))
                    .collect();
                env.sort();

                let command = StepCommand {
                    script: run.command.clone(),
                    env,
                    subdir: run.working_dir.clone(),
                };
                let output = self.runner.run(ctx, &command, cancel).await?;

                if !output.stdout.is_empty() {
                    ctx.log_info(output.stdout.trim_end().to_string());
                }
                if !output.stderr.is_empty() {
                    ctx.log_warning(output.stderr.trim_end().to_string());
                }

                if output.success() {
                    Ok(StepStatus::Succeeded)
                } else if cancel.is_cancelled() {
                    Err(JobError::Cancelled)
                } else if run.tolerant {
                    ctx.log_warning(format!(
                        "tolerant step '{}' failed with exit code {} (continuing)",
                        step.label(),
                        output.exit_code
                    ));
                    Ok(StepStatus::Tolerated {
                        exit_code: output.exit_code,
                    })
                } else {
                    Err(JobError::StepFailed {
                        step: step.label(),
                        exit_code: output.exit_code,
                    })
                }
            }

            Step::RestoreCache(restore) => {
                let key_ctx = self.key_context(node, ctx);
                let mut store_failed = false;

                for template in &restore.keys {
                    let resolved = key::resolve_restore_key(template, &key_ctx)
                        .map_err(JobError::Internal)?;

                    match self.restore_one(&resolved, ctx) {
                        Ok(true) => return Ok(StepStatus::Succeeded),
                        Ok(false) => {}
                        Err(err) => {
                            // Restore is never fatal; fall through to the
                            // next key
                            ctx.log_warning(format!(
                                "cache restore for '{resolved}' failed: {err}"
                            ));
                            store_failed = true;
                        }
                    }
                }

                ctx.log_info("cache miss on every key; starting with an empty cache");
                if store_failed {
                    Ok(StepStatus::StoreFailed)
                } else {
                    Ok(StepStatus::Succeeded)
                }
            }

            Step::SaveCache(save) => {
                let key_ctx = self.key_context(node, ctx);
                let resolved =
                    key::resolve_save_key(&save.key, &key_ctx).map_err(JobError::Internal)?;

                let blob = match archive::pack(&ctx.workdir, &save.paths) {
                    Ok(blob) => blob,
                    Err(err) => {
                        ctx.log_warning(format!("cache save for '{resolved}' failed: {err}"));
                        return Ok(StepStatus::StoreFailed);
                    }
                };
                match self.cache.save(&resolved, &blob) {
                    Ok(()) => {
                        ctx.log_info(format!("saved cache key '{resolved}'"));
                        Ok(StepStatus::Succeeded)
                    }
                    Err(err) => {
                        ctx.log_warning(format!("cache save for '{resolved}' failed: {err}"));
                        Ok(StepStatus::StoreFailed)
                    }
                }
            }

            Step::AttachWorkspace(attach) => {
                let destination = match &attach.at {
                    Some(at) => ctx.workdir.join(at),
                    None => ctx.workdir.clone(),
                };
                self.workspace
                    .attach(ctx.run_id, &attach.from, &destination)?;
                ctx.log_info(format!("attached workspace artifact '{}'", attach.from));
                Ok(StepStatus::Succeeded)
            }

            Step::PersistToWorkspace(persist) => {
                let root = match &persist.root {
                    Some(root) => ctx.workdir.join(root),
                    None => ctx.workdir.clone(),
                };
                match self
                    .workspace
                    .persist(ctx.run_id, &ctx.name, &root, &persist.paths)
                {
                    Ok(()) => Ok(StepStatus::Succeeded),
                    Err(err) => {
                        ctx.log_warning(format!("workspace persist failed: {err}"));
                        Ok(StepStatus::StoreFailed)
                    }
                }
            }

            Step::Invoke(invoke) => Err(JobError::Internal(anyhow::anyhow!(
                "command invocation '{}' survived plan construction",
                invoke.command
            ))),
        }
    }

    /// Try one resolved key: exact match first, then the most specific
    /// previously saved key sharing it as a prefix.
    fn restore_one(&self, resolved: &str, ctx: &JobContext) -> Result<bool, crate::StoreError> {
        if let Some(blob) = self.cache.restore(resolved)? {
            archive::unpack(&ctx.workdir, &blob)?;
            ctx.log_info(format!("restored cache key '{resolved}'"));
            return Ok(true);
        }
        if let Some((matched, blob)) = self.cache.restore_by_prefix(resolved)? {
            archive::unpack(&ctx.workdir, &blob)?;
            ctx.log_info(format!(
                "restored cache key '{matched}' (partial match for '{resolved}')"
            ));
            return Ok(true);
        }
        Ok(false)
    }

    fn key_context<'a>(&self, node: &'a PlanNode, ctx: &'a JobContext) -> KeyContext<'a> {
        KeyContext {
            arch: std::env::consts::ARCH,
            branch: &ctx.branch,
            job: &node.job,
            workdir: &ctx.workdir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::testing::MockRunner;
    use gantry_core::domain::run::FailureKind;
    use gantry_core::domain::pipeline::{
        AttachWorkspaceStep, ExecutorSpec, InvokeStep, PersistToWorkspaceStep, RestoreCacheStep,
        RunStep, SaveCacheStep,
    };

    fn run_step(command: &str, tolerant: bool) -> Step {
        Step::Run(RunStep {
            name: None,
            command: command.to_string(),
            env: HashMap::new(),
            working_dir: None,
            tolerant,
        })
    }

    fn node(name: &str, steps: Vec<Step>) -> PlanNode {
        PlanNode {
            name: name.to_string(),
            job: name.to_string(),
            executor: ExecutorSpec::default(),
            steps,
            requires: vec![],
            secrets: vec![],
            filtered_out: false,
        }
    }

    struct Fixture {
        executor: JobExecutor,
        runner: Arc<MockRunner>,
        env: RunEnv,
        _dir: tempfile::TempDir,
    }

    fn fixture(runner: MockRunner) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(runner);
        let cache = Arc::new(CacheStore::open(dir.path().join("cache")).unwrap());
        let workspace = Arc::new(WorkspaceStore::open(dir.path().join("workspace")).unwrap());
        let env = RunEnv {
            run_id: Uuid::new_v4(),
            branch: "main".to_string(),
            secrets: HashMap::new(),
            workdir_base: dir.path().join("runs"),
        };
        Fixture {
            executor: JobExecutor::new(runner.clone(), cache, workspace),
            runner,
            env,
            _dir: dir,
        }
    }

    fn workdir(fixture: &Fixture, job: &str) -> PathBuf {
        fixture
            .env
            .workdir_base
            .join(fixture.env.run_id.to_string())
            .join(job)
    }

    #[tokio::test]
    async fn test_steps_run_in_order_and_fail_fast() {
        let fx = fixture(MockRunner::new().fail_command("boom", 2));
        let job = node(
            "build",
            vec![
                run_step("first", false),
                run_step("boom", false),
                run_step("never", false),
            ],
        );

        let outcome = fx
            .executor
            .execute(&job, &fx.env, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, JobState::Failed(FailureKind::Step));
        let scripts: Vec<String> = fx.runner.executed().into_iter().map(|(_, s)| s).collect();
        assert_eq!(scripts, vec!["first", "boom"]);
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].status, StepStatus::Succeeded);
        assert_eq!(outcome.steps[1].status, StepStatus::Failed { exit_code: 2 });
        assert!(outcome.error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_tolerant_step_failure_is_recorded_not_fatal() {
        let fx = fixture(MockRunner::new().fail_command("flaky", 1));
        let job = node(
            "lint",
            vec![run_step("flaky", true), run_step("after", false)],
        );

        let outcome = fx
            .executor
            .execute(&job, &fx.env, &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, JobState::Succeeded);
        assert_eq!(outcome.steps[0].status, StepStatus::Tolerated { exit_code: 1 });
        assert_eq!(outcome.steps[1].status, StepStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_attach_of_missing_artifact_fails_deterministically() {
        let fx = fixture(MockRunner::new());
        let job = node(
            "test",
            vec![Step::AttachWorkspace(AttachWorkspaceStep {
                from: "build".to_string(),
                at: None,
            })],
        );

        let outcome = fx
            .executor
            .execute(&job, &fx.env, &CancellationToken::new())
            .await;

        assert_eq!(
            outcome.state,
            JobState::Failed(FailureKind::MissingArtifact)
        );
        assert_eq!(outcome.steps[0].status, StepStatus::Errored);
    }

    #[tokio::test]
    async fn test_persist_then_attach_between_jobs() {
        let fx = fixture(MockRunner::new());

        let upstream = node(
            "build",
            vec![Step::PersistToWorkspace(PersistToWorkspaceStep {
                root: None,
                paths: vec!["out.txt".to_string()],
            })],
        );
        let build_dir = workdir(&fx, "build");
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::write(build_dir.join("out.txt"), b"artifact").unwrap();

        let outcome = fx
            .executor
            .execute(&upstream, &fx.env, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, JobState::Succeeded);

        let downstream = node(
            "test",
            vec![Step::AttachWorkspace(AttachWorkspaceStep {
                from: "build".to_string(),
                at: None,
            })],
        );
        let outcome = fx
            .executor
            .execute(&downstream, &fx.env, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, JobState::Succeeded);
        assert_eq!(
            std::fs::read(workdir(&fx, "test").join("out.txt")).unwrap(),
            b"artifact"
        );
    }

    #[tokio::test]
    async fn test_save_then_prefix_restore_between_jobs() {
        let fx = fixture(MockRunner::new());

        let saver = node(
            "build",
            vec![Step::SaveCache(SaveCacheStep {
                key: "deps-{{ branch }}".to_string(),
                paths: vec!["built.txt".to_string()],
            })],
        );
        let build_dir = workdir(&fx, "build");
        std::fs::create_dir_all(&build_dir).unwrap();
        std::fs::write(build_dir.join("built.txt"), b"cached").unwrap();

        let outcome = fx
            .executor
            .execute(&saver, &fx.env, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, JobState::Succeeded);

        // The save key carries a discriminator, so the restorer's resolved
        // key only matches as a prefix.
        let restorer = node(
            "test",
            vec![Step::RestoreCache(RestoreCacheStep {
                keys: vec!["deps-{{ branch }}".to_string()],
            })],
        );
        let outcome = fx
            .executor
            .execute(&restorer, &fx.env, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, JobState::Succeeded);
        assert_eq!(
            std::fs::read(workdir(&fx, "test").join("built.txt")).unwrap(),
            b"cached"
        );
    }

    #[tokio::test]
    async fn test_restore_miss_is_not_fatal() {
        let fx = fixture(MockRunner::new());
        let job = node(
            "build",
            vec![
                Step::RestoreCache(RestoreCacheStep {
                    keys: vec!["never-saved".to_string()],
                }),
                run_step("after", false),
            ],
        );

        let outcome = fx
            .executor
            .execute(&job, &fx.env, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, JobState::Succeeded);
        assert_eq!(outcome.steps.len(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_steps() {
        let fx = fixture(MockRunner::new());
        let job = node("build", vec![run_step("never", false)]);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = fx.executor.execute(&job, &fx.env, &cancel).await;

        assert_eq!(outcome.state, JobState::Failed(FailureKind::Cancelled));
        assert!(fx.runner.executed().is_empty());
    }

    #[tokio::test]
    async fn test_unresolved_invocation_is_internal_error() {
        let fx = fixture(MockRunner::new());
        let job = node(
            "build",
            vec![Step::Invoke(InvokeStep {
                command: "ghost".to_string(),
                params: HashMap::new(),
            })],
        );

        let outcome = fx
            .executor
            .execute(&job, &fx.env, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, JobState::Failed(FailureKind::Internal));
    }
}
