use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::controller::SnapshotSource;
use crate::snapshot::{parse_porcelain, Snapshot, Stamp};

/// Snapshot source backed by `git status` in a single work tree.
#[derive(Debug, Clone)]
pub struct GitStatus {
    root: PathBuf,
}

impl GitStatus {
    /// Locates the work tree containing `cwd`.
    ///
    /// Fails if `cwd` is not inside a git work tree or git cannot be run.
    pub async fn discover(cwd: &Path) -> Result<Self> {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(cwd)
            .output()
            .await
            .context("Failed to run git; is it installed?")?;

        if !output.status.success() {
            bail!("Current directory is not part of a git repository.");
        }

        let root = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if root.is_empty() {
            bail!("git rev-parse returned an empty work tree path");
        }
        Ok(Self {
            root: PathBuf::from(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl SnapshotSource for GitStatus {
    async fn snapshot(&mut self) -> Snapshot {
        let output = Command::new("git")
            // -uall lists files inside untracked directories; editing one of
            // them does not touch the directory's own mtime.
            .args(["status", "--porcelain", "-z", "--untracked-files=all"])
            .current_dir(&self.root)
            .output()
            .await;

        match output {
            Ok(out) if out.status.success() => {
                let root = &self.root;
                parse_porcelain(&out.stdout, |path| Stamp::of(&root.join(path)))
            }
            Ok(out) => {
                debug!(
                    status = %out.status,
                    stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                    "git status failed"
                );
                Snapshot::default()
            }
            Err(e) => {
                warn!("Failed to run git status: {e}");
                Snapshot::default()
            }
        }
    }
}
