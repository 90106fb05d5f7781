//! Engine configuration
//!
//! Capacity and filesystem layout for one engine instance. All paths are
//! created on demand; the cache root outlives individual runs while the
//! workdir and workspace roots hold run-scoped state.

use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of concurrently executing job runs (available
    /// executors)
    pub max_parallel_jobs: usize,

    /// Base directory for per-job working directories
    pub workdir_base: PathBuf,

    /// Cache store root; survives across runs
    pub cache_root: PathBuf,

    /// Workspace store root; entries are run-scoped and cleared at run end
    pub workspace_root: PathBuf,
}

impl EngineConfig {
    /// Lays out all engine state under one data directory.
    pub fn under(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            max_parallel_jobs: 2,
            workdir_base: data_dir.join("runs"),
            cache_root: data_dir.join("cache"),
            workspace_root: data_dir.join("workspace"),
        }
    }

    pub fn with_max_parallel_jobs(mut self, max_parallel_jobs: usize) -> Self {
        self.max_parallel_jobs = max_parallel_jobs;
        self
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_under_data_dir() {
        let config = EngineConfig::under("/tmp/gantry");
        assert_eq!(config.cache_root, PathBuf::from("/tmp/gantry/cache"));
        assert_eq!(config.workdir_base, PathBuf::from("/tmp/gantry/runs"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig::under("/tmp/gantry").with_max_parallel_jobs(0);
        assert!(config.validate().is_err());
    }
}
