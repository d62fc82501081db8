//! Sandbox records: the creation request, the persisted entry and the
//! registry document that holds them.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::config::{BRANCH_PREFIX, SANDBOX_PREFIX, STATE_VERSION};
use crate::error::{Result, SandboxError};

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("sandbox name pattern is valid"));

/// Parameters for creating a new sandbox.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Feature name, e.g. `add-tags`
    pub name: String,
    /// Project repository attached as a submodule
    pub git_url: String,
    /// Base repository cloned as the sandbox root
    pub base_repo_url: String,
    /// Parent directory of default sandbox paths
    pub workspace_root: PathBuf,
    /// Overrides the derived sandbox directory
    pub custom_path: Option<PathBuf>,
}

impl SandboxConfig {
    /// Directory name of the attached project, derived from `git_url`.
    pub fn project_name(&self) -> String {
        project_name_from_url(&self.git_url)
    }

    pub fn branch_name(&self) -> String {
        format!("{}{}", BRANCH_PREFIX, self.name)
    }

    pub fn sandbox_path(&self) -> PathBuf {
        match &self.custom_path {
            Some(path) => path.clone(),
            None => self
                .workspace_root
                .join(format!("{}{}", SANDBOX_PREFIX, self.name)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SandboxError::Configuration(
                "Sandbox name cannot be empty".to_string(),
            ));
        }
        if !NAME_PATTERN.is_match(&self.name) {
            return Err(SandboxError::Configuration(format!(
                "Sandbox name '{}' must contain only letters, digits, hyphens, and underscores",
                self.name
            )));
        }
        if self.git_url.is_empty() {
            return Err(SandboxError::Configuration(
                "Git URL cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Extract a repository name from a git URL.
///
/// `git@github.com:user/repo.git`, `https://github.com/user/repo.git` and
/// `https://github.com/user/repo/` all yield `repo`. Anything that cannot be
/// split is returned unchanged.
pub fn project_name_from_url(url: &str) -> String {
    let url = url.trim_end_matches('/');
    let url = url.strip_suffix(".git").unwrap_or(url);

    if let Some((_, last)) = url.rsplit_once('/') {
        return last.to_string();
    }
    if let Some((_, tail)) = url.rsplit_once(':') {
        if let Some((_, last)) = tail.rsplit_once('/') {
            return last.to_string();
        }
    }
    url.to_string()
}

/// A sandbox that was created successfully and recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SandboxInfoRecord")]
pub struct SandboxInfo {
    pub name: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub created: DateTime<Utc>,
    pub project_name: String,
    pub git_url: String,
    pub branch_name: String,
    pub sandbox_path: PathBuf,
    /// Commit of the base repository at creation time
    #[serde(rename = "amplifier_commit")]
    pub base_commit: String,
}

impl SandboxInfo {
    /// Whether the sandbox directory still exists on disk.
    pub fn is_present(&self) -> bool {
        self.sandbox_path.exists()
    }

    /// First eight characters of the base commit, for display.
    pub fn short_commit(&self) -> &str {
        let end = self
            .base_commit
            .char_indices()
            .nth(8)
            .map_or(self.base_commit.len(), |(i, _)| i);
        &self.base_commit[..end]
    }
}

/// On-disk shape of a sandbox entry, including the legacy `project_path` key.
#[derive(Deserialize)]
struct SandboxInfoRecord {
    name: String,
    created: String,
    project_name: String,
    #[serde(default)]
    git_url: Option<String>,
    #[serde(default)]
    project_path: Option<String>,
    branch_name: String,
    sandbox_path: PathBuf,
    amplifier_commit: String,
}

impl TryFrom<SandboxInfoRecord> for SandboxInfo {
    type Error = String;

    fn try_from(record: SandboxInfoRecord) -> std::result::Result<Self, Self::Error> {
        // Old state files stored a local path instead of a URL; keep it verbatim.
        let git_url = record.git_url.or(record.project_path).ok_or_else(|| {
            format!(
                "sandbox '{}' is missing both 'git_url' and 'project_path'",
                record.name
            )
        })?;
        let created = parse_timestamp(&record.created)
            .map_err(|e| format!("sandbox '{}' has invalid 'created': {}", record.name, e))?;

        Ok(Self {
            name: record.name,
            created,
            project_name: record.project_name,
            git_url,
            branch_name: record.branch_name,
            sandbox_path: record.sandbox_path,
            base_commit: record.amplifier_commit,
        })
    }
}

fn serialize_timestamp<S: Serializer>(
    ts: &DateTime<Utc>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Parse an RFC 3339 timestamp, or a naive ISO-8601 one which is taken as UTC.
pub fn parse_timestamp(s: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(s) {
        Ok(ts) => Ok(ts.with_timezone(&Utc)),
        Err(rfc_err) => NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|_| rfc_err),
    }
}

/// The persisted root document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRegistry {
    pub version: String,
    pub sandboxes: BTreeMap<String, SandboxInfo>,
}

impl Default for SandboxRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

impl SandboxRegistry {
    pub fn empty() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            sandboxes: BTreeMap::new(),
        }
    }

    /// Decode a parsed state document, checking its top-level structure first.
    pub fn from_value(value: Value) -> Result<Self> {
        let Some(object) = value.as_object() else {
            return Err(SandboxError::InvalidStateFormat(
                "state file must be a JSON object".to_string(),
            ));
        };
        if !object.contains_key("version") {
            return Err(SandboxError::InvalidStateFormat(
                "state file missing 'version' field".to_string(),
            ));
        }
        match object.get("sandboxes") {
            None => {
                return Err(SandboxError::InvalidStateFormat(
                    "state file missing 'sandboxes' field".to_string(),
                ))
            }
            Some(sandboxes) if !sandboxes.is_object() => {
                return Err(SandboxError::InvalidStateFormat(
                    "'sandboxes' field must be an object".to_string(),
                ))
            }
            Some(_) => {}
        }

        serde_json::from_value(value).map_err(|e| SandboxError::InvalidStateFormat(e.to_string()))
    }

    /// All entries, oldest first.
    pub fn sorted_by_creation(&self) -> Vec<SandboxInfo> {
        let mut entries: Vec<SandboxInfo> = self.sandboxes.values().cloned().collect();
        entries.sort_by_key(|info| info.created);
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn config(name: &str, git_url: &str) -> SandboxConfig {
        SandboxConfig {
            name: name.to_string(),
            git_url: git_url.to_string(),
            base_repo_url: "https://github.com/qhanam/amplifier.git".to_string(),
            workspace_root: PathBuf::from("/workspace"),
            custom_path: None,
        }
    }

    fn info(name: &str, created: DateTime<Utc>) -> SandboxInfo {
        SandboxInfo {
            name: name.to_string(),
            created,
            project_name: "my-website".to_string(),
            git_url: "git@github.com:user/my-website.git".to_string(),
            branch_name: format!("feature/{}", name),
            sandbox_path: PathBuf::from(format!("/workspace/amplifier-sandbox.{}", name)),
            base_commit: "0123456789abcdef0123456789abcdef01234567".to_string(),
        }
    }

    #[test]
    fn test_project_name_ssh() {
        assert_eq!(project_name_from_url("git@github.com:user/repo.git"), "repo");
    }

    #[test]
    fn test_project_name_https() {
        assert_eq!(project_name_from_url("https://github.com/user/repo.git"), "repo");
        assert_eq!(project_name_from_url("https://github.com/user/repo"), "repo");
        assert_eq!(project_name_from_url("https://github.com/user/repo/"), "repo");
        assert_eq!(project_name_from_url("https://github.com/user/repo.git/"), "repo");
    }

    #[test]
    fn test_project_name_fallback() {
        assert_eq!(project_name_from_url("justaname"), "justaname");
        assert_eq!(project_name_from_url("host:repo"), "host:repo");
    }

    #[test]
    fn test_project_name_idempotent() {
        for url in [
            "git@github.com:user/repo.git",
            "https://github.com/user/repo",
            "plain",
        ] {
            let once = project_name_from_url(url);
            assert_eq!(project_name_from_url(&once), once);
        }
    }

    #[test]
    fn test_derived_paths() {
        let cfg = config("add-tags", "git@github.com:user/my-website.git");
        assert_eq!(cfg.project_name(), "my-website");
        assert_eq!(cfg.branch_name(), "feature/add-tags");
        assert_eq!(
            cfg.sandbox_path(),
            PathBuf::from("/workspace/amplifier-sandbox.add-tags")
        );
    }

    #[test]
    fn test_custom_path_overrides_default() {
        let mut cfg = config("add-tags", "git@github.com:user/my-website.git");
        cfg.custom_path = Some(PathBuf::from("/tmp/elsewhere"));
        assert_eq!(cfg.sandbox_path(), PathBuf::from("/tmp/elsewhere"));
        assert_eq!(cfg.branch_name(), "feature/add-tags");
    }

    #[test]
    fn test_validate_accepts_good_names() {
        for name in ["add-tags", "feature_1", "ABC", "a-b_c-9"] {
            assert!(config(name, "https://x/y.git").validate().is_ok(), "{}", name);
        }
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        for name in ["", "has space", "dot.name", "slash/name", "ünïcode"] {
            let err = config(name, "https://x/y.git").validate().unwrap_err();
            assert!(matches!(err, SandboxError::Configuration(_)), "{}", name);
        }
        let err = config("ok", "").validate().unwrap_err();
        assert!(err.to_string().contains("Git URL cannot be empty"));
    }

    #[test]
    fn test_info_roundtrip_preserves_fields() {
        let created = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
            + chrono::Duration::microseconds(123_456);
        let original = info("add-tags", created);
        let json = serde_json::to_string(&original).unwrap();
        let decoded: SandboxInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.sandbox_path.to_str(), original.sandbox_path.to_str());
    }

    #[test]
    fn test_info_wire_keys() {
        let created = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let value = serde_json::to_value(info("add-tags", created)).unwrap();
        assert_eq!(value["created"], "2024-01-15T10:30:00Z");
        assert_eq!(value["git_url"], "git@github.com:user/my-website.git");
        assert_eq!(
            value["amplifier_commit"],
            "0123456789abcdef0123456789abcdef01234567"
        );
        assert!(value.get("project_path").is_none());
    }

    #[test]
    fn test_info_legacy_project_path() {
        let value = json!({
            "name": "old",
            "created": "2024-01-15T10:30:00",
            "project_name": "proj",
            "project_path": "/home/user/proj",
            "branch_name": "feature/old",
            "sandbox_path": "/workspace/amplifier-sandbox.old",
            "amplifier_commit": "abc123"
        });
        let decoded: SandboxInfo = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.git_url, "/home/user/proj");
        assert_eq!(
            decoded.created,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap()
        );

        let rewritten = serde_json::to_value(&decoded).unwrap();
        assert_eq!(rewritten["git_url"], "/home/user/proj");
        assert!(rewritten.get("project_path").is_none());
    }

    #[test]
    fn test_info_git_url_wins_over_project_path() {
        let value = json!({
            "name": "both",
            "created": "2024-01-15T10:30:00+00:00",
            "project_name": "proj",
            "git_url": "https://github.com/user/proj.git",
            "project_path": "/home/user/proj",
            "branch_name": "feature/both",
            "sandbox_path": "/workspace/amplifier-sandbox.both",
            "amplifier_commit": "abc123"
        });
        let decoded: SandboxInfo = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.git_url, "https://github.com/user/proj.git");
    }

    #[test]
    fn test_info_missing_url_fields() {
        let value = json!({
            "name": "none",
            "created": "2024-01-15T10:30:00Z",
            "project_name": "proj",
            "branch_name": "feature/none",
            "sandbox_path": "/workspace/amplifier-sandbox.none",
            "amplifier_commit": "abc123"
        });
        let err = serde_json::from_value::<SandboxInfo>(value).unwrap_err();
        assert!(err.to_string().contains("project_path"));
    }

    #[test]
    fn test_short_commit() {
        let created = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let mut entry = info("x", created);
        assert_eq!(entry.short_commit(), "01234567");
        entry.base_commit = "abc".to_string();
        assert_eq!(entry.short_commit(), "abc");
    }

    #[test]
    fn test_registry_roundtrip() {
        let mut registry = SandboxRegistry::empty();
        let created = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        registry
            .sandboxes
            .insert("a".to_string(), info("a", created));
        registry.sandboxes.insert(
            "b".to_string(),
            info("b", created + chrono::Duration::hours(1)),
        );

        let value = serde_json::to_value(&registry).unwrap();
        let decoded = SandboxRegistry::from_value(value).unwrap();
        assert_eq!(decoded, registry);

        let empty = SandboxRegistry::from_value(serde_json::to_value(SandboxRegistry::empty()).unwrap())
            .unwrap();
        assert_eq!(empty.version, "1.0");
        assert!(empty.sandboxes.is_empty());
    }

    #[test]
    fn test_registry_structure_errors() {
        let cases = [
            (json!([]), "JSON object"),
            (json!({"sandboxes": {}}), "'version'"),
            (json!({"version": "1.0"}), "'sandboxes'"),
            (json!({"version": "1.0", "sandboxes": []}), "must be an object"),
        ];
        for (value, needle) in cases {
            match SandboxRegistry::from_value(value) {
                Err(SandboxError::InvalidStateFormat(msg)) => {
                    assert!(msg.contains(needle), "{} not in {}", needle, msg)
                }
                other => panic!("expected InvalidStateFormat, got {:?}", other),
            }
        }
    }

    #[test]
    fn test_sorted_by_creation() {
        let base = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let mut registry = SandboxRegistry::empty();
        registry.sandboxes.insert("a".to_string(), info("a", base));
        registry.sandboxes.insert(
            "b".to_string(),
            info("b", base + chrono::Duration::hours(2)),
        );
        registry.sandboxes.insert(
            "c".to_string(),
            info("c", base + chrono::Duration::hours(1)),
        );

        let names: Vec<String> = registry
            .sorted_by_creation()
            .into_iter()
            .map(|i| i.name)
            .collect();
        assert_eq!(names, vec!["a", "c", "b"]);
    }
}
