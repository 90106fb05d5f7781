//! `gantry run` — execute one workflow from a pipeline definition

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use gantry_config::plan::{FilterPolicy, PlanOptions, build_plan};
use gantry_config::parser::parse_pipeline;
use gantry_core::domain::run::{FailureKind, JobState, SkipReason};
use gantry_core::domain::trigger::TriggerContext;
use gantry_core::report::RunReport;
use gantry_engine::executor::{JobExecutor, RunEnv};
use gantry_engine::runner::podman::check_podman_available;
use gantry_engine::{
    CacheStore, EngineConfig, LocalRunner, PodmanRunner, StepRunner, WorkflowScheduler,
    WorkspaceStore,
};
use tracing::info;
use uuid::Uuid;

use crate::commands::parse_key_val;

/// Arguments for `gantry run`
#[derive(Args)]
pub struct RunArgs {
    /// Path to the pipeline YAML document
    pub pipeline: String,

    /// Workflow to run
    #[arg(short, long)]
    pub workflow: String,

    /// Trigger branch, evaluated against branch filters
    #[arg(short, long, default_value = "main")]
    pub branch: String,

    /// Restrict the run to these job references (plus their dependencies)
    #[arg(short, long)]
    pub job: Vec<String>,

    /// Secret bindings as KEY=value; injected only into jobs declaring them
    #[arg(short, long, value_parser = parse_key_val)]
    pub secret: Vec<(String, String)>,

    /// Number of concurrently executing jobs
    #[arg(long, default_value = "2")]
    pub concurrency: usize,

    /// Keep filter-excluded jobs in the plan as skipped entries
    #[arg(long)]
    pub inert_filters: bool,

    /// Execute steps in per-job podman containers
    #[arg(long)]
    pub podman: bool,

    /// Emit the run report as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn handle_run(args: RunArgs, data_dir: &str) -> Result<i32> {
    let source = std::fs::read_to_string(&args.pipeline)
        .with_context(|| format!("reading pipeline definition '{}'", args.pipeline))?;
    let definition = parse_pipeline(&source)
        .with_context(|| format!("invalid pipeline definition '{}'", args.pipeline))?;

    let mut trigger = TriggerContext::for_branch(&args.branch);
    trigger.jobs = args.job.clone();
    trigger.secrets = args.secret.iter().cloned().collect::<HashMap<_, _>>();

    let options = PlanOptions {
        filter_policy: if args.inert_filters {
            FilterPolicy::Inert
        } else {
            FilterPolicy::Exclude
        },
    };
    let plan = build_plan(&definition, &args.workflow, &trigger, &options)
        .context("failed to build execution plan")?;

    let config = EngineConfig::under(data_dir).with_max_parallel_jobs(args.concurrency);
    config.validate()?;

    let runner: Arc<dyn StepRunner> = if args.podman {
        check_podman_available().await?;
        Arc::new(PodmanRunner::new())
    } else {
        Arc::new(LocalRunner::new())
    };

    let cache = Arc::new(CacheStore::open(&config.cache_root)?);
    let workspace = Arc::new(WorkspaceStore::open(&config.workspace_root)?);
    let executor = Arc::new(JobExecutor::new(runner, cache, workspace.clone()));

    let env = RunEnv {
        run_id: Uuid::new_v4(),
        branch: args.branch.clone(),
        secrets: trigger.secrets.clone(),
        workdir_base: config.workdir_base.clone(),
    };
    info!(run_id = %env.run_id, workflow = %args.workflow, "run starting");

    let scheduler = WorkflowScheduler::new(
        plan,
        executor,
        workspace,
        env,
        config.max_parallel_jobs,
    );

    // Ctrl-C cancels the run: running jobs abort between steps, pending
    // jobs never start.
    let cancel = scheduler.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let report = scheduler.run().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(if report.succeeded() { 0 } else { 1 })
}

fn print_report(report: &RunReport) {
    println!();
    println!(
        "workflow {} on branch {} ({})",
        report.workflow.bold(),
        report.branch.bold(),
        report.run_id
    );

    for job in &report.jobs {
        let duration = match (job.started_at, job.finished_at) {
            (Some(started), Some(finished)) => {
                format!("{}ms", (finished - started).num_milliseconds())
            }
            _ => "-".to_string(),
        };
        println!("  {:<24} {:<28} {}", job.name, state_label(&job.state), duration);
        if let Some(error) = &job.error {
            println!("    {}", error.red());
        }
    }

    for name in &report.excluded {
        println!("  {:<24} {}", name, "excluded (branch filter)".dimmed());
    }

    let tolerated = report.tolerated_failures();
    if !tolerated.is_empty() {
        println!();
        println!("{}", "tolerated step failures:".yellow());
        for (job, step) in tolerated {
            println!("  {} / {}", job, step.name);
        }
    }

    println!();
    if report.succeeded() {
        println!("result: {}", "succeeded".green().bold());
    } else {
        match &report.first_failed {
            Some(first) => println!(
                "result: {} (first failure: {})",
                "failed".red().bold(),
                first.red()
            ),
            None => println!("result: {}", "failed".red().bold()),
        }
    }
}

fn state_label(state: &JobState) -> ColoredString {
    match state {
        JobState::Succeeded => "succeeded".green(),
        JobState::Failed(kind) => match kind {
            FailureKind::Step => "failed (step)".red(),
            FailureKind::MissingArtifact => "failed (missing artifact)".red(),
            FailureKind::Store => "failed (store)".red(),
            FailureKind::Cancelled => "failed (cancelled)".red(),
            FailureKind::Internal => "failed (internal)".red(),
        },
        JobState::Skipped(SkipReason::FilteredOut) => "skipped (filtered)".yellow(),
        JobState::Skipped(SkipReason::DependencyFailed) => {
            "skipped (dependency failed)".yellow()
        }
        JobState::Pending | JobState::Admitted | JobState::Running => "incomplete".dimmed(),
    }
}
