//! Manifest data model and the hub's JSON wire shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Whether a repository is a model or a dataset.
///
/// The two live under different API and content prefixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoKind {
    #[default]
    Model,
    Dataset,
}

impl RepoKind {
    /// Segment used by the metadata API (`/api/models/...`).
    pub fn api_segment(self) -> &'static str {
        match self {
            RepoKind::Model => "models",
            RepoKind::Dataset => "datasets",
        }
    }

    /// Prefix of raw and resolve URLs (models have none).
    pub fn content_prefix(self) -> &'static str {
        match self {
            RepoKind::Model => "",
            RepoKind::Dataset => "/datasets",
        }
    }
}

/// Identifies one branch of one repository on the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub id: String,
    pub branch: String,
    pub kind: RepoKind,
}

impl RepoRef {
    pub fn new(id: impl Into<String>, branch: impl Into<String>, kind: RepoKind) -> Self {
        Self {
            id: id.into(),
            branch: branch.into(),
            kind,
        }
    }
}

/// Type of a manifest entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    #[default]
    File,
    Directory,
}

/// One entry of a remote manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Repo-relative path, `/` separated.
    pub path: String,
    /// Authoritative size in bytes. For large objects this is the object
    /// size, never the pointer-file size.
    pub size: u64,
    /// Lowercase hex SHA-256, present only for large objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub is_large_object: bool,
    #[serde(default)]
    pub kind: EntryKind,
}

impl RemoteFile {
    /// A regular file stored inline in the repository.
    pub fn regular(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            content_hash: None,
            is_large_object: false,
            kind: EntryKind::File,
        }
    }

    /// A large object fetched from the content-addressed backend.
    pub fn large_object(
        path: impl Into<String>,
        size: u64,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            size,
            content_hash: Some(content_hash.into().to_ascii_lowercase()),
            is_large_object: true,
            kind: EntryKind::File,
        }
    }

    /// A directory node as listed by the tree API.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: 0,
            content_hash: None,
            is_large_object: false,
            kind: EntryKind::Directory,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Last path component, used for naming temporary chunk files.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Immutable description of a remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub last_modified: DateTime<Utc>,
    pub files: Vec<RemoteFile>,
}

impl Repository {
    /// Non-directory entries in manifest order.
    pub fn regular_files(&self) -> impl Iterator<Item = &RemoteFile> {
        self.files.iter().filter(|f| !f.is_directory())
    }
}

// ---------------------------------------------------------------------------
// Wire shapes returned by the hub API.
// ---------------------------------------------------------------------------

/// `GET /api/{models|datasets}/{id}?revision=...`
#[derive(Debug, Deserialize)]
pub(crate) struct RepoInfoWire {
    pub id: String,
    #[serde(default, rename = "lastModified")]
    pub last_modified: DateTime<Utc>,
}

/// One node of `GET /api/{models|datasets}/{id}/tree/{branch}[/{folder}]`.
#[derive(Debug, Deserialize)]
pub(crate) struct TreeEntryWire {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub size: u64,
    pub path: String,
    #[serde(default)]
    pub lfs: Option<LfsWire>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LfsWire {
    #[serde(default)]
    pub oid: String,
    #[serde(default)]
    pub size: u64,
}

impl From<TreeEntryWire> for RemoteFile {
    fn from(entry: TreeEntryWire) -> Self {
        if entry.kind == "directory" {
            return RemoteFile::directory(entry.path);
        }
        match entry.lfs {
            Some(lfs) if !lfs.oid.is_empty() => {
                RemoteFile::large_object(entry.path, lfs.size, lfs.oid)
            }
            _ => RemoteFile::regular(entry.path, entry.size),
        }
    }
}
