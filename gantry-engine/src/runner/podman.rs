//! Podman container runner
//!
//! Gives each job the isolated environment its executor spec declares: a
//! detached container created from the job's image with the job workspace
//! mounted at /workspace, one `podman exec` per step, and a force-remove on
//! teardown.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::JobContext;
use crate::runner::{StepCommand, StepOutput, StepRunner};

/// Checks that podman is installed and answering
pub async fn check_podman_available() -> Result<()> {
    let output = Command::new("podman")
        .arg("--version")
        .output()
        .await
        .context("failed to execute 'podman --version'; is podman installed?")?;

    if !output.status.success() {
        anyhow::bail!("podman is not working correctly");
    }

    let version = String::from_utf8_lossy(&output.stdout);
    info!("podman is available: {}", version.trim());
    Ok(())
}

/// Runner executing steps inside per-job containers
#[derive(Debug, Default)]
pub struct PodmanRunner {
    /// job reference name -> container name
    containers: Mutex<HashMap<String, String>>,
}

impl PodmanRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn container_name(ctx: &JobContext) -> String {
        let run = ctx.run_id.simple().to_string();
        let job: String = ctx
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
            .collect();
        format!("gantry-{}-{job}", &run[..8])
    }
}

#[async_trait]
impl StepRunner for PodmanRunner {
    async fn prepare(&self, ctx: &JobContext) -> Result<()> {
        let image = ctx
            .image
            .as_deref()
            .with_context(|| format!("job '{}' declares no image; use the local runner", ctx.name))?;

        std::fs::create_dir_all(&ctx.workdir)
            .with_context(|| format!("creating workdir {}", ctx.workdir.display()))?;

        let name = Self::container_name(ctx);
        info!(job = %ctx.name, image, container = %name, "starting job container");

        // Entrypoint override handles images that define their own
        let output = Command::new("podman")
            .arg("run")
            .arg("-d")
            .arg("--name")
            .arg(&name)
            .arg("--entrypoint")
            .arg("/bin/sh")
            .arg("-v")
            .arg(format!("{}:/workspace", ctx.workdir.display()))
            .arg("-w")
            .arg("/workspace")
            .arg(image)
            .arg("-c")
            .arg("sleep infinity")
            .output()
            .await
            .context("failed to execute podman run")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "failed to start container for image {image}: exit_code={}, stderr='{}'",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }

        self.containers
            .lock()
            .unwrap()
            .insert(ctx.name.clone(), name);
        Ok(())
    }

    async fn run(
        &self,
        ctx: &JobContext,
        step: &StepCommand,
        cancel: &CancellationToken,
    ) -> Result<StepOutput> {
        let container = self
            .containers
            .lock()
            .unwrap()
            .get(&ctx.name)
            .cloned()
            .with_context(|| format!("no container prepared for job '{}'", ctx.name))?;

        let working_dir = match &step.subdir {
            Some(subdir) => format!("/workspace/{subdir}"),
            None => "/workspace".to_string(),
        };

        debug!(job = %ctx.name, container = %container, script = %step.script, "podman exec");

        let mut command = Command::new("podman");
        command.arg("exec").arg("-w").arg(&working_dir);
        for (key, value) in ctx.env.iter().chain(step.env.iter()) {
            command.arg("-e").arg(format!("{key}={value}"));
        }
        command
            .arg(&container)
            .arg("sh")
            .arg("-c")
            .arg(&step.script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = command.spawn().context("failed to execute podman exec")?;

        let output = tokio::select! {
            output = child.wait_with_output() => {
                output.context("waiting for podman exec")?
            }
            _ = cancel.cancelled() => {
                debug!(job = %ctx.name, "podman exec killed by cancellation");
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

    async fn teardown(&self, ctx: &JobContext) -> Result<()> {
        let Some(container) = self.containers.lock().unwrap().remove(&ctx.name) else {
            return Ok(());
        };

        debug!(job = %ctx.name, container = %container, "removing job container");
        let output = Command::new("podman")
            .arg("rm")
            .arg("-f")
            .arg(&container)
            .output()
            .await
            .context("failed to execute podman rm")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(container = %container, "failed to remove container: {}", stderr.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use uuid::Uuid;

    #[test]
    fn test_container_name_is_sanitized() {
        let ctx = JobContext::new(
            Uuid::new_v4(),
            "build/nightly x86",
            Some("docker.io/rust:1.80".to_string()),
            PathBuf::from("/tmp/work"),
            "main",
            vec![],
        );
        let name = PodmanRunner::container_name(&ctx);
        assert!(name.starts_with("gantry-"));
        assert!(name.ends_with("build-nightly-x86"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }

    #[tokio::test]
    async fn test_run_without_prepare_fails() {
        let runner = PodmanRunner::new();
        let ctx = JobContext::new(
            Uuid::new_v4(),
            "build",
            Some("docker.io/alpine".to_string()),
            PathBuf::from("/tmp/work"),
            "main",
            vec![],
        );
        let step = StepCommand {
            script: "true".to_string(),
            env: vec![],
            subdir: None,
        };
        let err = runner
            .run(&ctx, &step, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no container prepared"));
    }
}
