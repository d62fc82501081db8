//! Sandbox lifecycle: create, remove, inspect.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use crate::error::{Result, SandboxError};
use crate::metadata::{MetadataTemplate, SandboxMetadata};
use crate::model::{SandboxConfig, SandboxInfo};
use crate::registry::RegistryStore;
use crate::tools::{Git, ToolRunner};

pub struct SandboxManager {
    store: RegistryStore,
    tools: Arc<dyn ToolRunner>,
    template: MetadataTemplate,
}

impl SandboxManager {
    pub fn new(store: RegistryStore, tools: Arc<dyn ToolRunner>) -> Self {
        Self {
            store,
            tools,
            template: MetadataTemplate::default(),
        }
    }

    pub fn with_template(mut self, template: MetadataTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn store(&self) -> &RegistryStore {
        &self.store
    }

    /// Create a sandbox and record it in the registry.
    ///
    /// Steps: validate, check the name is free, clone the base repository,
    /// attach the project as a submodule, create the feature branch, run the
    /// build, write `SANDBOX.md`, register. The clone step creates the
    /// sandbox directory and cleans up after itself; if anything after it
    /// fails, the directory is deleted and the original error is returned.
    /// A directory that was already there is never touched.
    pub fn create_sandbox(&self, config: &SandboxConfig) -> Result<SandboxInfo> {
        info!("Creating sandbox: {}", config.name);

        config.validate()?;

        if self.store.sandbox_exists(&config.name)? {
            return Err(SandboxError::SandboxExists(config.name.clone()));
        }

        let sandbox_path = std::path::absolute(config.sandbox_path()).map_err(|e| {
            SandboxError::io(
                format!("Failed to resolve {}", config.sandbox_path().display()),
                e,
            )
        })?;
        let created = Utc::now();

        info!("Cloning base repository to {}", sandbox_path.display());
        let git = Git::new(self.tools.as_ref());
        if let Err(err) = git.clone_repo(&config.base_repo_url, &sandbox_path) {
            error!("Sandbox creation failed: {}", err);
            return Err(err);
        }

        match self.provision(config, &sandbox_path, created) {
            Ok(info) => {
                info!("Sandbox '{}' created successfully", config.name);
                Ok(info)
            }
            Err(err) => {
                error!("Sandbox creation failed: {}", err);
                discard(&sandbox_path);
                Err(err)
            }
        }
    }

    /// Everything after the clone. The caller owns `sandbox_path`.
    fn provision(
        &self,
        config: &SandboxConfig,
        sandbox_path: &Path,
        created: DateTime<Utc>,
    ) -> Result<SandboxInfo> {
        let git = Git::new(self.tools.as_ref());
        let project_name = config.project_name();
        let branch_name = config.branch_name();

        let base_commit = git.head_commit(sandbox_path)?;

        info!("Adding {} as submodule", project_name);
        git.submodule_add(sandbox_path, &config.git_url, &project_name)?;
        git.submodule_update(sandbox_path)?;

        info!("Creating feature branch: {}", branch_name);
        git.checkout_new_branch(&sandbox_path.join(&project_name), &branch_name)?;

        info!("Running build in sandbox");
        self.tools.run_build(sandbox_path)?;

        info!("Writing sandbox metadata");
        let mut metadata = SandboxMetadata::new(config, created);
        metadata.sandbox_dir = sandbox_path.display().to_string();
        self.template.write(sandbox_path, &metadata)?;

        let info = SandboxInfo {
            name: config.name.clone(),
            created,
            project_name,
            git_url: config.git_url.clone(),
            branch_name,
            sandbox_path: sandbox_path.to_path_buf(),
            base_commit,
        };
        self.store.add_sandbox(info.clone())?;
        Ok(info)
    }

    /// Delete a sandbox directory and its registry entry.
    ///
    /// The directory goes first; a directory that is already gone is not an
    /// error.
    pub fn remove_sandbox(&self, name: &str) -> Result<()> {
        info!("Removing sandbox: {}", name);

        let info = self.get_sandbox_info(name)?;

        if info.sandbox_path.exists() {
            info!("Deleting sandbox directory: {}", info.sandbox_path.display());
            fs::remove_dir_all(&info.sandbox_path).map_err(|e| {
                SandboxError::io(
                    format!("Failed to delete {}", info.sandbox_path.display()),
                    e,
                )
            })?;
        } else {
            warn!("Sandbox directory not found: {}", info.sandbox_path.display());
        }

        self.store.remove_sandbox(name)?;
        info!("Sandbox '{}' removed successfully", name);
        Ok(())
    }

    pub fn get_sandbox_info(&self, name: &str) -> Result<SandboxInfo> {
        self.store
            .get_sandbox(name)?
            .ok_or_else(|| SandboxError::SandboxNotFound(name.to_string()))
    }

    /// All sandboxes, oldest first.
    pub fn list_sandboxes(&self) -> Result<Vec<SandboxInfo>> {
        self.store.list_sandboxes()
    }
}

fn discard(path: &Path) {
    if !path.exists() {
        return;
    }
    info!("Cleaning up failed sandbox directory {}", path.display());
    if let Err(e) = fs::remove_dir_all(path) {
        warn!("Failed to clean up {}: {}", path.display(), e);
    }
}
