use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use tracing::warn;

use super::ToolRunner;
use crate::error::{Result, SandboxError};

/// The git operations a sandbox is built from.
pub struct Git<'a> {
    runner: &'a dyn ToolRunner,
}

impl<'a> Git<'a> {
    pub fn new(runner: &'a dyn ToolRunner) -> Self {
        Self { runner }
    }

    /// Clone `url` into `target`, which must not exist yet. Its parent is created.
    ///
    /// The target directory is created here with a single `create_dir`, so
    /// exactly one caller can own it. If the clone fails the directory is
    /// removed again; on error nothing created by this call remains.
    pub fn clone_repo(&self, url: &str, target: &Path) -> Result<()> {
        let command = format!("git clone {} {}", url, target.display());
        let parent = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .map_err(|e| SandboxError::io(format!("Failed to create {}", parent.display()), e))?;

        match fs::create_dir(target) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(SandboxError::VersionControl {
                    message: format!("Target directory already exists: {}", target.display()),
                    command,
                    cwd: target.to_path_buf(),
                    stderr: String::new(),
                });
            }
            Err(e) => {
                return Err(SandboxError::io(
                    format!("Failed to create {}", target.display()),
                    e,
                ));
            }
        }

        let target_arg = target.to_string_lossy();
        if let Err(err) = self.runner.run_git(parent, &["clone", url, &target_arg]) {
            if let Err(e) = fs::remove_dir_all(target) {
                warn!("Failed to clean up {}: {}", target.display(), e);
            }
            return Err(describe(err, format!("Failed to clone {}", url)));
        }
        Ok(())
    }

    /// Full hash of the commit checked out in `repo`.
    pub fn head_commit(&self, repo: &Path) -> Result<String> {
        let out = self
            .runner
            .run_git(repo, &["rev-parse", "HEAD"])
            .map_err(|e| describe(e, "Failed to get commit hash".to_string()))?;
        Ok(out.trim().to_string())
    }

    /// Register `url` as a submodule of `repo` under `dir_name`.
    pub fn submodule_add(&self, repo: &Path, url: &str, dir_name: &str) -> Result<()> {
        self.runner
            .run_git(repo, &["submodule", "add", url, dir_name])
            .map_err(|e| describe(e, format!("Failed to add {} as submodule", dir_name)))?;
        Ok(())
    }

    pub fn submodule_update(&self, repo: &Path) -> Result<()> {
        self.runner
            .run_git(repo, &["submodule", "update", "--init", "--recursive"])
            .map_err(|e| describe(e, "Failed to initialize submodule".to_string()))?;
        Ok(())
    }

    /// Create `branch` in `repo` and switch to it.
    pub fn checkout_new_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.runner
            .run_git(repo, &["checkout", "-b", branch])
            .map_err(|e| describe(e, format!("Failed to create branch {}", branch)))?;
        Ok(())
    }
}

/// Replace the runner's generic message with what we were trying to do.
fn describe(err: SandboxError, message: String) -> SandboxError {
    match err {
        SandboxError::VersionControl {
            command,
            cwd,
            stderr,
            message: cause,
        } => SandboxError::VersionControl {
            message: format!("{} ({})", message, cause),
            command,
            cwd,
            stderr,
        },
        other => other,
    }
}
