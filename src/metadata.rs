//! Renders the `SANDBOX.md` file that describes a sandbox to whoever opens it.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use handlebars::Handlebars;
use serde::Serialize;

use crate::config::{MetadataConfig, METADATA_FILE_NAME};
use crate::error::{Result, SandboxError};
use crate::model::SandboxConfig;

const BUILTIN_TEMPLATE: &str = include_str!("../templates/SANDBOX.md.hbs");

pub const STATUS_ACTIVE: &str = "Active";

/// Values available to the template.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxMetadata {
    pub feature_name: String,
    pub git_url: String,
    pub branch_name: String,
    pub created_at: String,
    pub sandbox_dir: String,
    pub project_name: String,
    pub status: String,
}

impl SandboxMetadata {
    pub fn new(config: &SandboxConfig, created: DateTime<Utc>) -> Self {
        Self {
            feature_name: config.name.clone(),
            git_url: config.git_url.clone(),
            branch_name: config.branch_name(),
            created_at: created.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            sandbox_dir: config.sandbox_path().display().to_string(),
            project_name: config.project_name(),
            status: STATUS_ACTIVE.to_string(),
        }
    }
}

/// Where the template text comes from.
#[derive(Debug, Clone, Default)]
pub enum MetadataTemplate {
    #[default]
    Builtin,
    File(PathBuf),
}

impl MetadataTemplate {
    pub fn from_config(config: &MetadataConfig) -> Self {
        match &config.template {
            Some(path) => Self::File(path.clone()),
            None => Self::Builtin,
        }
    }

    fn source(&self) -> Result<Cow<'static, str>> {
        match self {
            Self::Builtin => Ok(Cow::Borrowed(BUILTIN_TEMPLATE)),
            Self::File(path) => {
                if !path.exists() {
                    return Err(SandboxError::MetadataWrite(format!(
                        "Template not found: {}",
                        path.display()
                    )));
                }
                fs::read_to_string(path).map(Cow::Owned).map_err(|e| {
                    SandboxError::MetadataWrite(format!(
                        "Failed to read template {}: {}",
                        path.display(),
                        e
                    ))
                })
            }
        }
    }

    /// Render the template. Unknown placeholders are an error, and values are
    /// inserted verbatim (no HTML escaping).
    pub fn render(&self, metadata: &SandboxMetadata) -> Result<String> {
        let source = self.source()?;
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(true);
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars
            .render_template(&source, metadata)
            .map_err(|e| SandboxError::MetadataWrite(format!("Failed to render template: {}", e)))
    }

    /// Render into `<dir>/SANDBOX.md` and return the written path.
    pub fn write(&self, dir: &Path, metadata: &SandboxMetadata) -> Result<PathBuf> {
        let content = self.render(metadata)?;
        let path = dir.join(METADATA_FILE_NAME);
        fs::write(&path, content).map_err(|e| {
            SandboxError::MetadataWrite(format!("Failed to write {}: {}", path.display(), e))
        })?;
        Ok(path)
    }
}
