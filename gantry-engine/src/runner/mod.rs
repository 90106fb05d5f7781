//! Step runners
//!
//! The boundary to external collaborators: a step's command is handed a
//! working directory and environment, and the orchestrator observes only its
//! exit code. Two implementations ship: local processes and per-job podman
//! containers.

pub mod local;
pub mod podman;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::context::JobContext;

pub use local::LocalRunner;
pub use podman::PodmanRunner;

/// A concrete command to execute for one step
#[derive(Debug, Clone)]
pub struct StepCommand {
    /// Shell command line, executed via `sh -c`
    pub script: String,
    /// Step-level environment layered over the job environment
    pub env: Vec<(String, String)>,
    /// Working directory relative to the job workspace
    pub subdir: Option<String>,
}

/// Captured result of one step command
#[derive(Debug, Clone)]
pub struct StepOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Executes step commands inside a job's declared environment
///
/// `prepare` is called once before the first step (environment setup, e.g.
/// starting a container), `teardown` once after the last, regardless of job
/// outcome. Cancellation between steps is prompt; mid-step it is best-effort
/// (the runner kills the underlying process).
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn prepare(&self, ctx: &JobContext) -> anyhow::Result<()>;

    async fn run(
        &self,
        ctx: &JobContext,
        command: &StepCommand,
        cancel: &CancellationToken,
    ) -> anyhow::Result<StepOutput>;

    async fn teardown(&self, ctx: &JobContext) -> anyhow::Result<()>;
}
