//! Workspace management
//!
//! A run owns one [`Workspace`]: the directory artifacts are fetched into and
//! a private kubeconfig the cluster-control commands are scoped to. The
//! kubeconfig is always temporary, so a run never touches the operator's
//! default credential state; the directory is temporary unless the caller
//! supplied a persistent output directory.

use std::path::{Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use tracing::{info, warn};

use crate::error::Result;

/// Filesystem scope owned by one pipeline run
pub struct Workspace {
    root: PathBuf,
    // Present only for temporary workspaces; dropping removes the directory.
    temp_dir: Option<TempDir>,
    kubeconfig: NamedTempFile,
}

impl Workspace {
    /// Acquire a workspace.
    ///
    /// With no output directory a fresh temp directory is created and removed
    /// on release. A supplied directory is created if needed, resolved to an
    /// absolute path, and left in place on release so artifacts already
    /// present there are reused and survive for audit.
    pub fn acquire(output_dir: Option<&Path>) -> Result<Self> {
        let (root, temp_dir) = match output_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (std::fs::canonicalize(dir)?, None)
            }
            None => {
                let temp = tempfile::tempdir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let kubeconfig = tempfile::Builder::new()
            .prefix("meshctl-kubeconfig-")
            .tempfile()?;

        info!("Workspace: {}", root.display());
        Ok(Self {
            root,
            temp_dir,
            kubeconfig,
        })
    }

    /// Root directory for fetched artifacts
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to the run-scoped kubeconfig
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig.path().to_path_buf()
    }

    /// Whether the root directory survives the run
    pub fn is_persistent(&self) -> bool {
        self.temp_dir.is_none()
    }

    /// Release the workspace: remove the scoped kubeconfig and, for temporary
    /// workspaces, the root directory. The pipeline calls this on every exit
    /// path; dropping without release cleans up the same way.
    pub fn release(self) {
        if let Err(e) = self.kubeconfig.close() {
            warn!("failed to remove scoped kubeconfig: {}", e);
        }
        if let Some(temp) = self.temp_dir {
            if let Err(e) = temp.close() {
                warn!("failed to remove temporary workspace: {}", e);
            }
        }
    }
}
