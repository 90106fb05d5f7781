//! Run-time state for a workflow execution
//!
//! A `Job` in the definition tree is a template; one execution instance is a
//! job run with a run-scoped identity. These types track its lifecycle and
//! the per-step records that feed the run report.

use serde::{Deserialize, Serialize};

/// Job lifecycle state within a workflow run
///
/// `Pending -> Admitted -> Running -> {Succeeded, Failed}`, or
/// `Pending -> Skipped(..)`. Terminal states are `Succeeded`, `Failed`,
/// and `Skipped`. There are no whole-job retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Admitted,
    Running,
    Succeeded,
    Failed(FailureKind),
    Skipped(SkipReason),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed(_) | JobState::Skipped(_)
        )
    }

    /// True if this state satisfies a downstream dependency.
    ///
    /// A job filtered out under the inert policy is vacuously successful for
    /// dependency-satisfaction purposes only.
    pub fn satisfies_dependency(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Skipped(SkipReason::FilteredOut)
        )
    }
}

/// Why a job run ended in `Failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A non-tolerant step returned a non-zero exit code
    Step,
    /// A required workspace artifact was never persisted upstream
    MissingArtifact,
    /// A store failure during attach
    Store,
    /// The run was cancelled before or during this job
    Cancelled,
    /// Engine-internal failure (environment setup, key resolution, ...)
    Internal,
}

/// Why a job was skipped without executing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Branch filter did not match the trigger branch
    FilteredOut,
    /// An upstream dependency failed or was cancelled
    DependencyFailed,
}

/// Record of one executed step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub name: String,
    pub status: StepStatus,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    /// Step failed and aborted the job
    Failed { exit_code: i32 },
    /// Step failed but was marked tolerant; the job continued
    Tolerated { exit_code: i32 },
    /// The step hit a fatal non-command error (missing artifact, engine
    /// failure, cancellation) and aborted the job
    Errored,
    /// A best-effort store operation (cache save, workspace persist) failed;
    /// the job continued
    StoreFailed,
}

/// A log entry captured during job execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now(),
            level,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Succeeded.is_terminal());
        assert!(JobState::Failed(FailureKind::Step).is_terminal());
        assert!(JobState::Skipped(SkipReason::DependencyFailed).is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Admitted.is_terminal());
        assert!(!JobState::Running.is_terminal());
    }

    #[test]
    fn test_dependency_satisfaction() {
        assert!(JobState::Succeeded.satisfies_dependency());
        assert!(JobState::Skipped(SkipReason::FilteredOut).satisfies_dependency());
        assert!(!JobState::Skipped(SkipReason::DependencyFailed).satisfies_dependency());
        assert!(!JobState::Failed(FailureKind::Cancelled).satisfies_dependency());
        assert!(!JobState::Running.satisfies_dependency());
    }
}
