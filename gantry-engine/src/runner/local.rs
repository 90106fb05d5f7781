//! Local process runner
//!
//! Runs step commands as host processes. The job's declared image is
//! ignored; isolation is the caller's concern (use the podman runner for
//! per-job containers).

use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::context::JobContext;
use crate::runner::{StepCommand, StepOutput, StepRunner};

/// Runner executing steps as local `sh -c` processes
#[derive(Debug, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StepRunner for LocalRunner {
    async fn prepare(&self, ctx: &JobContext) -> Result<()> {
        std::fs::create_dir_all(&ctx.workdir)
            .with_context(|| format!("creating workdir {}", ctx.workdir.display()))?;
        Ok(())
    }

    async fn run(
        &self,
        ctx: &JobContext,
        step: &StepCommand,
        cancel: &CancellationToken,
    ) -> Result<StepOutput> {
        let cwd = match &step.subdir {
            Some(subdir) => ctx.workdir.join(subdir),
            None => ctx.workdir.clone(),
        };

        debug!(job = %ctx.name, script = %step.script, "spawning step process");

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&step.script)
            .current_dir(&cwd)
            .envs(ctx.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .envs(step.env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command
            .spawn()
            .with_context(|| format!("spawning step '{}'", step.script))?;

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.with_context(|| format!("waiting for step '{}'", step.script))?
            }
            _ = cancel.cancelled() => {
                // Dropping the wait future drops the child; kill_on_drop
                // reaps the process.
                debug!(job = %ctx.name, "step killed by cancellation");
                return Ok(StepOutput {
                    exit_code: 130,
                    stdout: String::new(),
                    stderr: "cancelled".to_string(),
                });
            }
        };

        Ok(StepOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn teardown(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }
}
