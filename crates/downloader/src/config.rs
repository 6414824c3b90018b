//! Downloader configuration.
//!
//! Stored as camelCase JSON. Missing fields take their defaults; durations
//! are whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hfsync_manifest::{RepoKind, RepoRef};
use serde::{Deserialize, Serialize};

use crate::error::DownloadError;

pub const DEFAULT_BASE_URL: &str = "https://huggingface.co";
pub const DEFAULT_CONNECTIONS: usize = 5;
pub const MAX_CONNECTIONS: usize = 64;
pub const DEFAULT_BRANCH: &str = "main";

/// Everything a sync job needs to know.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DownloaderConfig {
    /// `org/name` identifier on the hub.
    pub repo_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Parallel range requests per large object.
    pub connections: usize,
    pub branch: String,
    /// Base directory the repository folder is created in.
    pub destination: PathBuf,
    pub dataset: bool,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Trust matching sizes and skip SHA-256 verification.
    pub skip_hash_check: bool,
    /// Re-download files that already verify.
    pub force: bool,
    /// Nest as `org/name` instead of the flattened `org_name`.
    pub tree_layout: bool,
    #[serde(with = "seconds")]
    pub request_timeout: Duration,
    #[serde(with = "seconds")]
    pub idle_timeout: Duration,
    pub max_attempts: u32,
    #[serde(with = "seconds")]
    pub retry_interval: Duration,
    pub base_url: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            repo_id: String::new(),
            auth_token: None,
            connections: DEFAULT_CONNECTIONS,
            branch: DEFAULT_BRANCH.into(),
            destination: PathBuf::from("."),
            dataset: false,
            include: Vec::new(),
            exclude: Vec::new(),
            skip_hash_check: false,
            force: false,
            tree_layout: false,
            request_timeout: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_interval: Duration::from_secs(5),
            base_url: DEFAULT_BASE_URL.into(),
        }
    }
}

impl DownloaderConfig {
    pub fn new(repo_id: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            ..Self::default()
        }
    }

    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, DownloadError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| DownloadError::Config(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.repo_id.trim().is_empty() {
            return Err(DownloadError::Config("repository id is required".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(DownloadError::Config("branch must not be empty".into()));
        }
        if self.connections == 0 {
            return Err(DownloadError::Config("connections must be at least 1".into()));
        }
        if self.connections > MAX_CONNECTIONS {
            return Err(DownloadError::Config(format!(
                "connections must be at most {MAX_CONNECTIONS}"
            )));
        }
        if self.max_attempts == 0 {
            return Err(DownloadError::Config("maxAttempts must be at least 1".into()));
        }
        if self.idle_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(DownloadError::Config("timeouts must be non-zero".into()));
        }
        Ok(())
    }

    pub fn repo_kind(&self) -> RepoKind {
        if self.dataset {
            RepoKind::Dataset
        } else {
            RepoKind::Model
        }
    }

    pub fn repo_ref(&self) -> RepoRef {
        RepoRef::new(&self.repo_id, &self.branch, self.repo_kind())
    }

    /// Directory the repository with `repo_id` is synced into.
    pub fn local_root(&self, repo_id: &str) -> PathBuf {
        let folder = if self.tree_layout {
            repo_id.to_string()
        } else {
            repo_id.replace('/', "_")
        };
        self.destination.join(folder)
    }
}

/// `Duration` as whole seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
