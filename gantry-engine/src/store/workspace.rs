//! Workspace store
//!
//! Ephemeral, run-scoped artifact channel: one job persists selected output
//! paths under its reference name, downstream jobs attach them. Artifacts
//! are keyed by run identity and cleared when the run ends, regardless of
//! outcome.

use std::path::{Path, PathBuf};

use tracing::debug;
use uuid::Uuid;

use crate::error::{AttachError, StoreError};

/// Filesystem-backed workspace store
pub struct WorkspaceStore {
    root: PathBuf,
}

impl WorkspaceStore {
    /// Opens (or initializes) a store rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)
            .map_err(|err| StoreError::io(format!("creating {}", root.display()), err))?;
        Ok(Self { root })
    }

    fn artifact_dir(&self, run_id: Uuid, artifact: &str) -> PathBuf {
        self.root.join(run_id.to_string()).join(artifact)
    }

    /// Persist the declared paths (relative to `source_root`) under the
    /// job's artifact name.
    pub fn persist(
        &self,
        run_id: Uuid,
        artifact: &str,
        source_root: &Path,
        paths: &[String],
    ) -> Result<(), StoreError> {
        let dir = self.artifact_dir(run_id, artifact);
        for declared in paths {
            let source = source_root.join(declared);
            let destination = dir.join(declared);
            copy_tree(&source, &destination)?;
        }
        debug!(%run_id, artifact, count = paths.len(), "workspace artifact persisted");
        Ok(())
    }

    /// Attach a previously persisted artifact into `destination`.
    ///
    /// Attaching an artifact that was never persisted in this run is an
    /// error distinct from store I/O failures; both are fatal to the
    /// attaching job.
    pub fn attach(
        &self,
        run_id: Uuid,
        artifact: &str,
        destination: &Path,
    ) -> Result<(), AttachError> {
        let dir = self.artifact_dir(run_id, artifact);
        if !dir.is_dir() {
            return Err(AttachError::Missing(artifact.to_string()));
        }
        copy_tree(&dir, destination).map_err(AttachError::Store)?;
        debug!(%run_id, artifact, "workspace artifact attached");
        Ok(())
    }

    /// True if the artifact exists for this run.
    pub fn has_artifact(&self, run_id: Uuid, artifact: &str) -> bool {
        self.artifact_dir(run_id, artifact).is_dir()
    }

    /// Drop every artifact belonging to the run.
    pub fn clear(&self, run_id: Uuid) -> Result<(), StoreError> {
        let dir = self.root.join(run_id.to_string());
        if dir.exists() {
            std::fs::remove_dir_all(&dir)
                .map_err(|err| StoreError::io(format!("clearing {}", dir.display()), err))?;
        }
        Ok(())
    }
}

/// Recursively copy a file or directory tree.
fn copy_tree(source: &Path, destination: &Path) -> Result<(), StoreError> {
    let metadata = std::fs::metadata(source)
        .map_err(|err| StoreError::io(format!("reading {}", source.display()), err))?;

    if metadata.is_file() {
        if let Some(parent) = destination.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| StoreError::io(format!("creating {}", parent.display()), err))?;
        }
        std::fs::copy(source, destination)
            .map_err(|err| StoreError::io(format!("copying {}", source.display()), err))?;
        return Ok(());
    }

    std::fs::create_dir_all(destination)
        .map_err(|err| StoreError::io(format!("creating {}", destination.display()), err))?;
    let entries = std::fs::read_dir(source)
        .map_err(|err| StoreError::io(format!("reading {}", source.display()), err))?;
    for entry in entries {
        let entry =
            entry.map_err(|err| StoreError::io(format!("reading {}", source.display()), err))?;
        copy_tree(&entry.path(), &destination.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_then_attach() {
        let store_dir = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(job_dir.path().join("target/release")).unwrap();
        std::fs::write(job_dir.path().join("target/release/app"), b"bin").unwrap();

        let store = WorkspaceStore::open(store_dir.path()).unwrap();
        let run_id = Uuid::new_v4();
        store
            .persist(run_id, "build", job_dir.path(), &["target".to_string()])
            .unwrap();
        assert!(store.has_artifact(run_id, "build"));

        let downstream = tempfile::tempdir().unwrap();
        store.attach(run_id, "build", downstream.path()).unwrap();
        assert_eq!(
            std::fs::read(downstream.path().join("target/release/app")).unwrap(),
            b"bin"
        );
    }

    #[test]
    fn test_attach_missing_artifact() {
        let store_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(store_dir.path()).unwrap();

        let downstream = tempfile::tempdir().unwrap();
        let err = store
            .attach(Uuid::new_v4(), "build", downstream.path())
            .unwrap_err();
        assert!(matches!(err, AttachError::Missing(artifact) if artifact == "build"));
    }

    #[test]
    fn test_artifacts_are_run_scoped() {
        let store_dir = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::write(job_dir.path().join("out.txt"), b"x").unwrap();

        let store = WorkspaceStore::open(store_dir.path()).unwrap();
        let run_a = Uuid::new_v4();
        let run_b = Uuid::new_v4();
        store
            .persist(run_a, "build", job_dir.path(), &["out.txt".to_string()])
            .unwrap();

        // Another run never sees run A's artifacts
        assert!(!store.has_artifact(run_b, "build"));
    }

    #[test]
    fn test_clear_removes_run_artifacts() {
        let store_dir = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        std::fs::write(job_dir.path().join("out.txt"), b"x").unwrap();

        let store = WorkspaceStore::open(store_dir.path()).unwrap();
        let run_id = Uuid::new_v4();
        store
            .persist(run_id, "build", job_dir.path(), &["out.txt".to_string()])
            .unwrap();

        store.clear(run_id).unwrap();
        assert!(!store.has_artifact(run_id, "build"));
    }

    #[test]
    fn test_persist_missing_path_is_an_error() {
        let store_dir = tempfile::tempdir().unwrap();
        let job_dir = tempfile::tempdir().unwrap();
        let store = WorkspaceStore::open(store_dir.path()).unwrap();

        let err = store
            .persist(Uuid::new_v4(), "build", job_dir.path(), &["gone".to_string()])
            .unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
    }
}
