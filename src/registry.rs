//! Registry store: CRUD on `<workspace>/.sandbox-state.json`
//!
//! Every operation loads the document fresh and every mutation rewrites it in
//! full. Reads hold a shared lock on the state file; writes go to a sibling
//! temporary file under an exclusive lock and are renamed into place, so a
//! reader never observes a half-written document.
//!
//! Locks cover a single read or write, not a whole load-mutate-save sequence:
//! two processes adding different sandboxes at the same moment can still lose
//! one of the additions.

use std::fs::{self, File};
use std::io::{self, ErrorKind, Read, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use fs4::FileExt;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::STATE_FILE_NAME;
use crate::error::{Result, SandboxError};
use crate::model::{SandboxInfo, SandboxRegistry};

#[derive(Debug, Clone)]
pub struct RegistryStore {
    workspace_root: PathBuf,
    state_file: PathBuf,
}

impl RegistryStore {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let state_file = workspace_root.join(STATE_FILE_NAME);
        Self {
            workspace_root,
            state_file,
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn state_file(&self) -> &Path {
        &self.state_file
    }

    /// Load the registry, or an empty one if the state file doesn't exist.
    pub fn load(&self) -> Result<SandboxRegistry> {
        let file = match File::open(&self.state_file) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(SandboxRegistry::empty()),
            Err(e) => return Err(self.read_error(e)),
        };

        FileExt::lock_shared(&file).map_err(|e| self.read_error(e))?;
        let mut bytes = Vec::new();
        let read = (&file).read_to_end(&mut bytes);
        let _ = FileExt::unlock(&file);
        read.map_err(|e| self.read_error(e))?;

        let value = serde_json::from_slice(&bytes).map_err(SandboxError::CorruptState)?;
        SandboxRegistry::from_value(value)
    }

    /// Replace the state file with `registry`.
    ///
    /// On failure the temporary file is removed and the existing state file
    /// is left as it was.
    pub fn save(&self, registry: &SandboxRegistry) -> Result<()> {
        fs::create_dir_all(&self.workspace_root).map_err(|e| self.write_error(e))?;

        let mut builder = tempfile::Builder::new();
        builder.prefix(".sandbox-state.").suffix(".tmp");
        // 0o666 before the umask, like a plainly created file.
        #[cfg(unix)]
        builder.permissions(fs::Permissions::from_mode(0o666));
        let mut tmp = builder
            .tempfile_in(&self.workspace_root)
            .map_err(|e| self.write_error(e))?;

        // An existing state file keeps its mode across saves.
        if let Some(existing) = fs::metadata(&self.state_file).ok().filter(|m| m.is_file()) {
            tmp.as_file()
                .set_permissions(existing.permissions())
                .map_err(|e| self.write_error(e))?;
        }

        FileExt::lock_exclusive(tmp.as_file()).map_err(|e| self.write_error(e))?;
        let written = write_document(&mut tmp, registry);
        let _ = FileExt::unlock(tmp.as_file());
        written.map_err(|e| self.write_error(e))?;

        // Dropping the returned error's file handle deletes the temporary file.
        tmp.persist(&self.state_file)
            .map_err(|e| self.write_error(e.error))?;
        debug!(path = %self.state_file.display(), entries = registry.sandboxes.len(), "saved registry");
        Ok(())
    }

    /// Add a sandbox, failing if the name is taken.
    pub fn add_sandbox(&self, info: SandboxInfo) -> Result<()> {
        let mut registry = self.load()?;
        if registry.sandboxes.contains_key(&info.name) {
            return Err(SandboxError::SandboxExists(info.name));
        }
        registry.sandboxes.insert(info.name.clone(), info);
        self.save(&registry)
    }

    /// Remove a sandbox entry, failing if it isn't there.
    pub fn remove_sandbox(&self, name: &str) -> Result<()> {
        let mut registry = self.load()?;
        if registry.sandboxes.remove(name).is_none() {
            return Err(SandboxError::SandboxNotFound(name.to_string()));
        }
        self.save(&registry)
    }

    pub fn get_sandbox(&self, name: &str) -> Result<Option<SandboxInfo>> {
        Ok(self.load()?.sandboxes.remove(name))
    }

    /// All sandboxes, oldest first.
    pub fn list_sandboxes(&self) -> Result<Vec<SandboxInfo>> {
        Ok(self.load()?.sorted_by_creation())
    }

    pub fn sandbox_exists(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.sandboxes.contains_key(name))
    }

    fn read_error(&self, source: io::Error) -> SandboxError {
        SandboxError::StateRead {
            path: self.state_file.clone(),
            source,
        }
    }

    fn write_error(&self, source: io::Error) -> SandboxError {
        SandboxError::StateWrite {
            path: self.state_file.clone(),
            source,
        }
    }
}

fn write_document(tmp: &mut NamedTempFile, registry: &SandboxRegistry) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *tmp, registry)?;
    tmp.write_all(b"\n")?;
    tmp.flush()?;
    tmp.as_file().sync_all()
}
