mod git;
mod process;

use std::path::Path;

use crate::error::Result;

pub use git::Git;
pub use process::ProcessRunner;

/// External commands a sandbox needs: version control and the build step.
///
/// Resolved once at startup and handed to the lifecycle controller, so tests
/// can substitute a fake.
pub trait ToolRunner: Send + Sync {
    /// Run a version-control command in `cwd` and return its stdout.
    ///
    /// Fails with `SandboxError::VersionControl` on non-zero exit, timeout or
    /// a missing executable.
    fn run_git(&self, cwd: &Path, args: &[&str]) -> Result<String>;

    /// Run the build/install command in `cwd` and return its stdout.
    ///
    /// Fails with `SandboxError::Build` under the same conditions.
    fn run_build(&self, cwd: &Path) -> Result<String>;
}
