//! Per-job execution context
//!
//! State shared across one job run: the log buffer feeding the run report,
//! the job's working directory, and the environment assembled from trigger
//! secrets the job declared.

use std::path::PathBuf;
use std::sync::Mutex;

use gantry_core::domain::run::{LogEntry, LogLevel};
use uuid::Uuid;

/// Execution context for one job run
pub struct JobContext {
    /// Run identity shared by every job in the workflow run
    pub run_id: Uuid,
    /// Workflow reference name; doubles as the workspace artifact name
    pub name: String,
    /// Container image declared by the job, if any
    pub image: Option<String>,
    /// Host working directory for this job
    pub workdir: PathBuf,
    /// Trigger branch, used for cache-key resolution
    pub branch: String,
    /// Environment injected into every step (declared secrets only)
    pub env: Vec<(String, String)>,

    log_buffer: Mutex<Vec<LogEntry>>,
}

impl JobContext {
    pub fn new(
        run_id: Uuid,
        name: impl Into<String>,
        image: Option<String>,
        workdir: PathBuf,
        branch: impl Into<String>,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            run_id,
            name: name.into(),
            image,
            workdir,
            branch: branch.into(),
            env,
            log_buffer: Mutex::new(Vec::new()),
        }
    }

    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.push(entry);
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Debug, message));
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Info, message));
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Warning, message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Error, message));
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_buffer_drains() {
        let ctx = JobContext::new(
            Uuid::new_v4(),
            "build",
            None,
            PathBuf::from("/tmp/work"),
            "main",
            vec![],
        );

        ctx.log_info("starting");
        ctx.log_error("boom");

        let drained = ctx.drain_logs();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].level, LogLevel::Error);

        assert!(ctx.drain_logs().is_empty());
    }
}
