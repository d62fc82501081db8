use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Everything that can go wrong while managing sandboxes.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// Invalid sandbox name or missing required URL. Raised before any side effect.
    #[error("{0}")]
    Configuration(String),

    #[error("Sandbox '{0}' already exists")]
    SandboxExists(String),

    #[error("Sandbox '{0}' not found")]
    SandboxNotFound(String),

    /// A git command failed or could not be started.
    #[error("{message}\nCommand: {command}\nDirectory: {}\nError: {stderr}", cwd.display())]
    VersionControl {
        message: String,
        command: String,
        cwd: PathBuf,
        stderr: String,
    },

    /// The build/install command failed or could not be started.
    #[error("{message}\nCommand: {command}\nDirectory: {}\nError: {stderr}", cwd.display())]
    Build {
        message: String,
        command: String,
        cwd: PathBuf,
        stderr: String,
    },

    #[error("Failed to write sandbox metadata: {0}")]
    MetadataWrite(String),

    /// The state file exists but is not valid JSON.
    #[error("State file is corrupt")]
    CorruptState(#[source] serde_json::Error),

    /// The state file is valid JSON without the expected structure.
    #[error("Invalid state file format: {0}")]
    InvalidStateFormat(String),

    #[error("Failed to read state file {}", path.display())]
    StateRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write state file {}", path.display())]
    StateWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl SandboxError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T, E = SandboxError> = std::result::Result<T, E>;
