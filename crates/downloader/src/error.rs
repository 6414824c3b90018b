//! Download error types and the retry taxonomy.

use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use hfsync_manifest::ApiError;
use hfsync_transfer::{PathError, PlanError, VerifyError};

/// Errors produced while syncing a repository.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("planning failed: {0}")]
    Plan(#[from] PlanError),

    #[error("verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("refusing to write: {0}")]
    UnsafePath(#[from] PathError),

    #[error("no data received for {0:?}")]
    IdleTimeout(Duration),

    #[error("server ignored range request (status {status})")]
    RangeNotSupported { status: u16 },

    #[error("range delivered {actual} bytes, expected {expected}")]
    RangeLength { expected: u64, actual: u64 },

    #[error("chunk {index} failed: {source}")]
    Chunk {
        index: usize,
        source: Box<DownloadError>,
    },

    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,

    #[error("{0}")]
    Job(JobFailure),
}

impl DownloadError {
    /// Errors that abort the job and are never retried.
    pub fn is_fatal(&self) -> bool {
        match self {
            DownloadError::Api(e) => e.is_fatal(),
            DownloadError::Plan(PlanError::Cancelled) | DownloadError::Cancelled => true,
            DownloadError::Config(_) => true,
            DownloadError::Chunk { source, .. } => source.is_fatal(),
            _ => false,
        }
    }

    /// Errors a fresh attempt of the whole job may get past.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Api(e) => e.is_transient(),
            DownloadError::Http(e) => {
                e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
            }
            DownloadError::Io(e) => !matches!(
                e.kind(),
                ErrorKind::PermissionDenied
                    | ErrorKind::InvalidInput
                    | ErrorKind::Unsupported
                    | ErrorKind::StorageFull
            ),
            DownloadError::IdleTimeout(_) | DownloadError::RangeLength { .. } => true,
            DownloadError::Chunk { source, .. } => source.is_retryable(),
            DownloadError::Job(failure) => failure.is_retryable(),
            _ => false,
        }
    }
}

/// One file that could not be transferred.
#[derive(Debug)]
pub struct FileFailure {
    pub path: String,
    pub error: DownloadError,
}

/// Aggregate outcome of a job in which at least one file failed.
#[derive(Debug)]
pub struct JobFailure {
    /// Files transferred and verified.
    pub succeeded: usize,
    pub failures: Vec<FileFailure>,
}

impl JobFailure {
    /// Nothing was transferred.
    pub fn is_total(&self) -> bool {
        self.succeeded == 0
    }

    pub fn is_partial(&self) -> bool {
        self.succeeded > 0
    }

    /// Every failure is one a new attempt may fix.
    pub fn is_retryable(&self) -> bool {
        !self.failures.is_empty() && self.failures.iter().all(|f| f.error.is_retryable())
    }

    pub fn failed_paths(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|f| f.path.as_str())
    }
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} files failed ({} succeeded)",
            self.failures.len(),
            self.failures.len() + self.succeeded,
            self.succeeded
        )?;
        for failure in &self.failures {
            write!(f, "\n  - {}: {}", failure.path, failure.error)?;
        }
        Ok(())
    }
}
