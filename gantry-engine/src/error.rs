//! Engine error types

use gantry_core::domain::run::FailureKind;
use thiserror::Error;

/// Failures inside the cache or workspace stores
#[derive(Debug, Error)]
pub enum StoreError {
    /// Saves never overwrite: a second save under the same key is rejected
    #[error("cache key '{0}' already exists")]
    KeyExists(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("store index corrupted: {0}")]
    Index(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failures attaching a workspace artifact
///
/// A missing artifact is distinct from an I/O failure in the store, but both
/// are fatal to the attaching job.
#[derive(Debug, Error)]
pub enum AttachError {
    #[error("workspace artifact '{0}' does not exist for this run")]
    Missing(String),

    #[error(transparent)]
    Store(StoreError),
}

/// Errors that terminate a job run
#[derive(Debug, Error)]
pub enum JobError {
    #[error("step '{step}' failed with exit code {exit_code}")]
    StepFailed { step: String, exit_code: i32 },

    #[error("workspace artifact '{0}' has not been persisted by any upstream job")]
    MissingWorkspaceArtifact(String),

    #[error("workspace attach failed: {0}")]
    Attach(#[source] StoreError),

    #[error("job was cancelled")]
    Cancelled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl JobError {
    /// Map to the failure kind recorded in the run report
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            JobError::StepFailed { .. } => FailureKind::Step,
            JobError::MissingWorkspaceArtifact(_) => FailureKind::MissingArtifact,
            JobError::Attach(_) => FailureKind::Store,
            JobError::Cancelled => FailureKind::Cancelled,
            JobError::Internal(_) => FailureKind::Internal,
        }
    }
}

impl From<AttachError> for JobError {
    fn from(err: AttachError) -> Self {
        match err {
            AttachError::Missing(artifact) => JobError::MissingWorkspaceArtifact(artifact),
            AttachError::Store(store) => JobError::Attach(store),
        }
    }
}
