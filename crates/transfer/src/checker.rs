use std::path::Path;

use hfsync_manifest::RemoteFile;
use hfsync_progress::{FileProgress, Phase, ProgressReporter};
use serde::Serialize;
use tracing::{debug, warn};

use crate::VerifyError;
use crate::checksum::hash_file;

/// Outcome of checking one local file against its manifest entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validation {
    pub valid: bool,
    pub reason: CheckReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CheckReason {
    Missing,
    SizeMismatch,
    HashMismatch,
    HashVerified,
    SizeVerified,
}

/// How a file was confirmed to match the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VerificationMethod {
    Hash,
    SizeOnly,
}

impl From<VerificationMethod> for CheckReason {
    fn from(method: VerificationMethod) -> Self {
        match method {
            VerificationMethod::Hash => CheckReason::HashVerified,
            VerificationMethod::SizeOnly => CheckReason::SizeVerified,
        }
    }
}

/// Decides whether a local file already matches its remote entry.
#[derive(Debug, Clone, Default)]
pub struct LocalStateChecker {
    skip_hash_check: bool,
    reporter: ProgressReporter,
}

impl LocalStateChecker {
    pub fn new(skip_hash_check: bool, reporter: ProgressReporter) -> Self {
        Self {
            skip_hash_check,
            reporter,
        }
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    /// Classifies the local copy. An unreadable file counts as missing.
    pub async fn validate(&self, local_path: &Path, remote: &RemoteFile) -> Validation {
        match self.verify(local_path, remote).await {
            Ok(method) => Validation {
                valid: true,
                reason: method.into(),
            },
            Err(err) => {
                let reason = match err {
                    VerifyError::Missing => CheckReason::Missing,
                    VerifyError::SizeMismatch { .. } => CheckReason::SizeMismatch,
                    VerifyError::HashMismatch { .. } => CheckReason::HashMismatch,
                    VerifyError::Io(e) => {
                        warn!(
                            path = %local_path.display(),
                            error = %e,
                            "cannot read local file, treating as missing"
                        );
                        CheckReason::Missing
                    }
                };
                Validation {
                    valid: false,
                    reason,
                }
            }
        }
    }

    /// Checks size and, for large objects, content hash.
    ///
    /// Hashing streams the file and emits throttled `verifying` events.
    pub async fn verify(
        &self,
        local_path: &Path,
        remote: &RemoteFile,
    ) -> Result<VerificationMethod, VerifyError> {
        let meta = match tokio::fs::metadata(local_path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(VerifyError::Missing),
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            debug!(path = %local_path.display(), "local path is not a regular file");
            return Err(VerifyError::Missing);
        }
        if meta.len() != remote.size {
            return Err(VerifyError::SizeMismatch {
                expected: remote.size,
                actual: meta.len(),
            });
        }

        let Some(expected) = self.hash_to_check(remote) else {
            return Ok(VerificationMethod::SizeOnly);
        };

        let progress =
            FileProgress::new(self.reporter.clone(), &remote.path, Phase::Verifying, remote.size);
        progress.start();
        let actual = hash_file(local_path, Some(&progress)).await?;
        check_hash(expected, actual)
    }

    /// Checks a digest computed inline while writing `written` bytes.
    pub fn compare_digest(
        &self,
        remote: &RemoteFile,
        digest: &str,
        written: u64,
    ) -> Result<VerificationMethod, VerifyError> {
        if written != remote.size {
            return Err(VerifyError::SizeMismatch {
                expected: remote.size,
                actual: written,
            });
        }
        match self.hash_to_check(remote) {
            Some(expected) => check_hash(expected, digest.to_string()),
            None => Ok(VerificationMethod::SizeOnly),
        }
    }

    fn hash_to_check<'a>(&self, remote: &'a RemoteFile) -> Option<&'a str> {
        if self.skip_hash_check || !remote.is_large_object {
            return None;
        }
        remote.content_hash.as_deref().filter(|h| !h.is_empty())
    }
}

fn check_hash(expected: &str, actual: String) -> Result<VerificationMethod, VerifyError> {
    if actual.eq_ignore_ascii_case(expected) {
        Ok(VerificationMethod::Hash)
    } else {
        Err(VerifyError::HashMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
