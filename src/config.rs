use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the registry file inside the workspace root
pub const STATE_FILE_NAME: &str = ".sandbox-state.json";

/// Current registry format version
pub const STATE_VERSION: &str = "1.0";

/// Directory name prefix for default sandbox paths
pub const SANDBOX_PREFIX: &str = "amplifier-sandbox.";

/// Prefix of the feature branch created in the project checkout
pub const BRANCH_PREFIX: &str = "feature/";

/// Name of the rendered metadata file in the sandbox root
pub const METADATA_FILE_NAME: &str = "SANDBOX.md";

pub const DEFAULT_BASE_REPO_URL: &str = "https://github.com/qhanam/amplifier.git";

const DOCKER_WORKSPACE_ROOT: &str = "/workspace";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    #[serde(default)]
    pub repository: RepositoryConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub metadata: MetadataConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Workspace root; auto-detected when unset
    #[serde(default)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Base repository cloned into every sandbox
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Version-control executable
    #[serde(default = "default_git")]
    pub git: String,

    /// Build executable run in the sandbox root
    #[serde(default = "default_build")]
    pub build: String,

    /// Arguments passed to the build executable
    #[serde(default = "default_build_args")]
    pub build_args: Vec<String>,

    /// Seconds before an external command is killed (0 = wait forever)
    #[serde(default)]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Template file for SANDBOX.md; the built-in template is used when unset
    #[serde(default)]
    pub template: Option<PathBuf>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_REPO_URL.to_string()
}

fn default_git() -> String {
    "git".to_string()
}

fn default_build() -> String {
    "make".to_string()
}

fn default_build_args() -> Vec<String> {
    vec!["install".to_string()]
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            build: default_build(),
            build_args: default_build_args(),
            timeout_secs: 0,
        }
    }
}

impl ToolsConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Config {
    /// Load config from file, or return defaults if file doesn't exist
    pub fn load(path: &str) -> Result<Self> {
        let expanded_path = expand_tilde(path);

        if !expanded_path.exists() {
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&expanded_path).context("Failed to read config file")?;

        let mut config: Self = toml::from_str(&contents).context("Failed to parse config file")?;
        config.workspace.root = config
            .workspace
            .root
            .map(|root| expand_tilde(&root.to_string_lossy()));
        config.metadata.template = config
            .metadata
            .template
            .map(|template| expand_tilde(&template.to_string_lossy()));
        Ok(config)
    }

    /// Get the default config path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sandbox-env")
            .join("config.toml")
    }

    /// Workspace root: the configured one, `/workspace` inside Docker,
    /// otherwise `./workspace`.
    pub fn workspace_root(&self) -> PathBuf {
        if let Some(root) = &self.workspace.root {
            return root.clone();
        }
        if in_docker() {
            return PathBuf::from(DOCKER_WORKSPACE_ROOT);
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join("workspace")
    }
}

/// Detect whether we are running inside a Docker container
pub fn in_docker() -> bool {
    if Path::new("/.dockerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|cgroup| cgroup.contains("docker"))
        .unwrap_or(false)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
