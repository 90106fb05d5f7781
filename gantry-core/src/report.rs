//! Run report types
//!
//! The serializable surface handed back to callers after a workflow run:
//! final workflow status, per-job terminal state with timestamps and step
//! records, the first failing job, and the set of references excluded from
//! the plan by branch filters.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::run::{FailureKind, JobState, LogEntry, StepRecord, StepStatus};

/// Final result of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowResult {
    Succeeded,
    Failed,
}

/// Final report for one workflow run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub workflow: String,
    pub branch: String,
    pub result: WorkflowResult,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
    /// Per-job reports in plan order
    pub jobs: Vec<JobReport>,
    /// First job to fail, if any
    pub first_failed: Option<String>,
    /// References excluded from the plan by branch filters
    pub excluded: Vec<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.result == WorkflowResult::Succeeded
    }

    /// Names of jobs skipped because an upstream dependency failed
    pub fn skip_set(&self) -> Vec<&str> {
        self.jobs
            .iter()
            .filter(|job| {
                matches!(
                    job.state,
                    JobState::Skipped(crate::domain::run::SkipReason::DependencyFailed)
                )
            })
            .map(|job| job.name.as_str())
            .collect()
    }

    /// Tolerated step failures across all jobs, surfaced for observability
    pub fn tolerated_failures(&self) -> Vec<(&str, &StepRecord)> {
        self.jobs
            .iter()
            .flat_map(|job| {
                job.steps
                    .iter()
                    .filter(|step| matches!(step.status, StepStatus::Tolerated { .. }))
                    .map(move |step| (job.name.as_str(), step))
            })
            .collect()
    }
}

/// Terminal report for one job run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    /// Workflow reference name
    pub name: String,
    /// Underlying job name (differs from `name` when the reference is
    /// aliased)
    pub job: String,
    pub state: JobState,
    pub started_at: Option<chrono::DateTime<chrono::Utc>>,
    pub finished_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    /// Causing error for non-succeeded terminal states
    pub error: Option<String>,
}

impl JobReport {
    /// The error kind for failed jobs, for exit-code style reporting
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self.state {
            JobState::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}
