use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use super::WORKSPACE_MOUNT;

/// Per-submission directory under the shared root, removed on drop.
#[derive(Debug)]
pub struct WorkDir {
    name: String,
    path: PathBuf,
}

impl WorkDir {
    pub async fn create(root: &Path) -> io::Result<Self> {
        let name = format!("job-{}", Uuid::new_v4());
        let path = root.join(&name);
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { name, path })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory as seen from a pooled container mounted on the shared root.
    pub fn pooled_dir(&self) -> String {
        format!("{WORKSPACE_MOUNT}/{}", self.name)
    }

    pub async fn write_file(&self, file_name: &str, contents: &str) -> io::Result<()> {
        tokio::fs::write(self.path.join(file_name), contents).await
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "Failed to remove work dir"),
        }
    }
}
