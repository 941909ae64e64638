//! Per-job scratch directories.
//!
//! Each job gets `<workdir>/tmp/<connection_id>-<job_id>`, holding only the
//! uploaded input and the converter's output. LibreOffice keeps its user
//! profile in the sibling `<connection_id>-<job_id>.profile`, so concurrent
//! converters never share a profile lock. Both directories are removed when
//! the job ends, on every path out of job handling.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::JobError;

/// Allocates workspaces beneath a common root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Deterministic workspace path for a job on a connection.
    pub fn path_for(&self, connection_id: &str, job_id: &str) -> PathBuf {
        self.root.join(format!("{connection_id}-{job_id}"))
    }

    /// Converter profile directory for a job. Created by the converter itself.
    pub fn profile_for(&self, connection_id: &str, job_id: &str) -> PathBuf {
        self.root.join(format!("{connection_id}-{job_id}.profile"))
    }

    /// Creates the workspace directory tree if absent.
    pub async fn allocate(&self, connection_id: &str, job_id: &str) -> io::Result<Workspace> {
        // Guard first so a partially created tree is still removed on failure
        let workspace = Workspace {
            path: self.path_for(connection_id, job_id),
            profile: self.profile_for(connection_id, job_id),
            released: false,
        };
        tokio::fs::create_dir_all(&workspace.path).await?;
        debug!(path = %workspace.path.display(), "Workspace allocated");
        Ok(workspace)
    }
}

/// An allocated job directory.
///
/// Call [`Workspace::release`] when the job is done. If the value is dropped
/// unreleased (panic, or the job task aborted on disconnect) the directory is
/// removed synchronously.
#[derive(Debug)]
pub struct Workspace {
    path: PathBuf,
    profile: PathBuf,
    released: bool,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Per-job converter profile, outside the workspace directory.
    pub fn profile_dir(&self) -> &Path {
        &self.profile
    }

    /// Writes the uploaded content verbatim to `<workspace>/<filename>`.
    pub async fn write_input(&self, filename: &str, content: &[u8]) -> io::Result<PathBuf> {
        let input = self.path.join(filename);
        tokio::fs::write(&input, content).await?;
        debug!(path = %input.display(), bytes = content.len(), "Input written");
        Ok(input)
    }

    /// Recursively removes the workspace and the converter profile. A
    /// directory that is already gone counts as released.
    pub async fn release(mut self) -> io::Result<()> {
        let profile = remove_tree(&self.profile).await;
        remove_tree(&self.path).await?;
        profile?;
        self.released = true;
        debug!(path = %self.path.display(), "Workspace released");
        Ok(())
    }
}

async fn remove_tree(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        for path in [&self.profile, &self.path] {
            match std::fs::remove_dir_all(path) {
                Ok(()) => debug!(path = %path.display(), "Removed on drop"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove workspace"),
            }
        }
    }
}

/// Rejects filenames that would escape or collide with the workspace.
pub fn validate_filename(filename: &str) -> Result<(), JobError> {
    let invalid = filename.is_empty()
        || filename == "."
        || filename == ".."
        || filename.contains(['/', '\\', '\0']);
    if invalid {
        return Err(JobError::InvalidFilename(filename.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_allocate_write_release() {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path().join("tmp"));

        let workspace = manager.allocate("conn", "job").await.unwrap();
        let path = workspace.path().to_path_buf();
        assert_eq!(path, dir.path().join("tmp").join("conn-job"));
        assert!(path.is_dir());

        let input = workspace.write_input("report.docx", b"hello").await.unwrap();
        assert_eq!(std::fs::read(&input).unwrap(), b"hello");

        workspace.release().await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_profile_sits_beside_workspace_and_is_released() {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path());

        let workspace = manager.allocate("conn", "job").await.unwrap();
        let profile = workspace.profile_dir().to_path_buf();
        assert_eq!(profile, dir.path().join("conn-job.profile"));
        assert!(!profile.starts_with(workspace.path()));
        assert!(!profile.exists());

        std::fs::create_dir_all(profile.join("user")).unwrap();
        workspace.release().await.unwrap();
        assert!(!profile.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_profile() {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path());

        let workspace = manager.allocate("conn", "job").await.unwrap();
        std::fs::create_dir_all(workspace.profile_dir()).unwrap();

        drop(workspace);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_allocate_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path());

        std::fs::create_dir_all(manager.path_for("conn", "job")).unwrap();
        let workspace = manager.allocate("conn", "job").await.unwrap();
        assert!(workspace.path().is_dir());
    }

    #[tokio::test]
    async fn test_release_when_already_removed() {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path());

        let workspace = manager.allocate("conn", "job").await.unwrap();
        std::fs::remove_dir_all(workspace.path()).unwrap();
        assert!(workspace.release().await.is_ok());
    }

    #[tokio::test]
    async fn test_drop_removes_unreleased_workspace() {
        let dir = TempDir::new().unwrap();
        let manager = WorkspaceManager::new(dir.path());

        let workspace = manager.allocate("conn", "job").await.unwrap();
        workspace.write_input("a.xlsx", b"data").await.unwrap();
        let path = workspace.path().to_path_buf();

        drop(workspace);
        assert!(!path.exists());
    }

    #[test]
    fn test_validate_filename() {
        assert!(validate_filename("report.docx").is_ok());
        assert!(validate_filename("Q3 results (final).xlsx").is_ok());

        for bad in ["", ".", "..", "../etc/passwd", "dir/file.doc", "dir\\file.doc", "a\0.doc"] {
            assert!(
                matches!(validate_filename(bad), Err(JobError::InvalidFilename(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
