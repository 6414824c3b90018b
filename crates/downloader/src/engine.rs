//! Plan execution.
//!
//! Files are transferred one after another. Small files and regular files
//! take one GET whose body is hashed while it is written; large objects are
//! split into byte ranges fetched concurrently into private chunk files and
//! concatenated afterwards.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use hfsync_manifest::{Client, RemoteFile, RepoRef};
use hfsync_progress::{FileProgress, Phase, ProgressEvent, ProgressReporter};
use hfsync_transfer::{
    ByteRange, LocalStateChecker, TransferPlan, VerificationMethod, chunk_path, merge_chunks,
    resolve_within, split_ranges, use_multi_stream,
};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DEFAULT_CONNECTIONS;
use crate::error::{DownloadError, FileFailure, JobFailure};
use crate::idle::IdleTimeout;

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// One successfully transferred file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: String,
    pub bytes: u64,
    pub method: VerificationMethod,
    pub multi_stream: bool,
}

/// Result of a job in which every planned file was transferred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub files: Vec<FileReport>,
    pub skipped: usize,
    pub bytes_transferred: u64,
}

impl JobReport {
    fn push(&mut self, file: FileReport) {
        self.bytes_transferred += file.bytes;
        self.files.push(file);
    }
}

/// Executes transfer plans against one repository.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: Client,
    repo: RepoRef,
    checker: LocalStateChecker,
    reporter: ProgressReporter,
    connections: usize,
    idle_timeout: Duration,
}

impl TransferEngine {
    pub fn new(client: Client, repo: RepoRef, checker: LocalStateChecker) -> Self {
        let reporter = checker.reporter().clone();
        Self {
            client,
            repo,
            checker,
            reporter,
            connections: DEFAULT_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    pub fn idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Transfers every file in `plan.to_transfer`.
    ///
    /// A failing file is recorded and the job moves on; the failures are
    /// returned together as [`DownloadError::Job`]. Fatal errors (auth,
    /// cancellation) abort the job at once.
    pub async fn execute(
        &self,
        plan: &TransferPlan,
        cancel: &CancellationToken,
    ) -> Result<JobReport, DownloadError> {
        let mut report = JobReport {
            skipped: plan.to_skip.len(),
            ..JobReport::default()
        };
        if plan.is_empty() {
            info!(repo = %plan.repository.id, "all files up to date");
            return Ok(report);
        }

        tokio::fs::create_dir_all(&plan.local_root).await?;
        // Removed on drop, including every chunk directory below it.
        let job_dir = tempfile::Builder::new()
            .prefix(".hfsync-")
            .tempdir_in(&plan.local_root)?;

        info!(
            repo = %plan.repository.id,
            files = plan.to_transfer.len(),
            bytes = plan.total_transfer_bytes,
            "starting transfer"
        );

        let mut failures = Vec::new();
        for decision in &plan.to_transfer {
            if cancel.is_cancelled() {
                return Err(DownloadError::Cancelled);
            }
            let file = &decision.file;
            debug!(
                path = %file.path,
                size = file.size,
                reason = %decision.reason,
                "transferring file"
            );

            match self.transfer_file(&plan.local_root, file, job_dir.path(), cancel).await {
                Ok(done) => report.push(done),
                Err(e) if e.is_fatal() => {
                    error!(path = %file.path, error = %e, "aborting job");
                    return Err(e);
                }
                Err(e) => {
                    warn!(path = %file.path, error = %e, "file transfer failed");
                    failures.push(FileFailure {
                        path: file.path.clone(),
                        error: e,
                    });
                }
            }
        }

        if failures.is_empty() {
            info!(
                files = report.files.len(),
                bytes = report.bytes_transferred,
                "transfer complete"
            );
            Ok(report)
        } else {
            Err(DownloadError::Job(JobFailure {
                succeeded: report.files.len(),
                failures,
            }))
        }
    }

    async fn transfer_file(
        &self,
        local_root: &Path,
        file: &RemoteFile,
        job_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<FileReport, DownloadError> {
        let dest = resolve_within(local_root, &file.path)?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let url = self.client.resolve_transfer_location(&self.repo, file).await?;
        let progress =
            FileProgress::new(self.reporter.clone(), &file.path, Phase::Transferring, file.size);
        progress.start();

        let multi_stream = use_multi_stream(file, self.connections);
        let verified = if multi_stream {
            let chunk_dir = tempfile::Builder::new().prefix("chunks-").tempdir_in(job_dir)?;
            self.multi_stream(&url, file, &dest, chunk_dir.path(), &progress, cancel)
                .await?;
            self.reporter
                .report(ProgressEvent::new(&file.path, Phase::Done, file.size, file.size));
            self.checker.verify(&dest, file).await
        } else {
            let (written, digest) = self.single_stream(&url, &dest, &progress, cancel).await?;
            self.reporter
                .report(ProgressEvent::new(&file.path, Phase::Done, written, file.size));
            self.checker.compare_digest(file, &digest, written)
        };

        let method = match verified {
            Ok(method) => method,
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&dest).await {
                    debug!(path = %dest.display(), error = %rm, "could not remove rejected file");
                }
                return Err(e.into());
            }
        };

        if method == VerificationMethod::Hash {
            let event = ProgressEvent::new(&file.path, Phase::Verified, file.size, file.size);
            self.reporter.report(event.with_note("sha256"));
        }
        Ok(FileReport {
            path: file.path.clone(),
            bytes: file.size,
            method,
            multi_stream,
        })
    }

    /// One GET streamed to `dest` while hashed. Returns bytes written and
    /// the hex digest.
    async fn single_stream(
        &self,
        url: &str,
        dest: &Path,
        progress: &FileProgress,
        cancel: &CancellationToken,
    ) -> Result<(u64, String), DownloadError> {
        let resp = self.client.open(url, None).await?;
        let mut body = IdleTimeout::new(Box::pin(resp.bytes_stream()), self.idle_timeout);
        let mut out = tokio::fs::File::create(dest).await?;
        let mut hasher = Sha256::new();
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            hasher.update(&chunk);
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.advance(chunk.len() as u64);
        }
        out.flush().await?;

        Ok((written, hex::encode(hasher.finalize())))
    }

    /// Fetches all ranges concurrently, then merges them into `dest`.
    ///
    /// The first worker to fail cancels its siblings.
    async fn multi_stream(
        &self,
        url: &str,
        file: &RemoteFile,
        dest: &Path,
        chunk_dir: &Path,
        progress: &FileProgress,
        cancel: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let ranges = split_ranges(file.size, self.connections);
        debug!(path = %file.path, ranges = ranges.len(), "multi-stream transfer");

        let workers = cancel.child_token();
        let mut set = JoinSet::new();
        for range in ranges.iter().copied() {
            let fetch = RangeFetch {
                client: self.client.clone(),
                url: url.to_string(),
                range,
                object_size: file.size,
                path: chunk_path(chunk_dir, file.file_name(), range.index),
                progress: progress.clone(),
                cancel: workers.clone(),
                idle_timeout: self.idle_timeout,
            };
            set.spawn(async move {
                fetch.run().await.map_err(|e| DownloadError::Chunk {
                    index: range.index,
                    source: Box::new(e),
                })
            });
        }

        let mut first_err = None;
        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(DownloadError::from).and_then(|r| r);
            if let Err(e) = result
                && first_err.is_none()
            {
                workers.cancel();
                first_err = Some(e);
            }
        }
        if cancel.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }
        if let Some(e) = first_err {
            return Err(e);
        }

        let chunks: Vec<_> = ranges
            .iter()
            .map(|r| chunk_path(chunk_dir, file.file_name(), r.index))
            .collect();
        merge_chunks(dest, &chunks).await?;
        Ok(())
    }
}

/// Everything one range worker owns.
struct RangeFetch {
    client: Client,
    url: String,
    range: ByteRange,
    object_size: u64,
    path: std::path::PathBuf,
    progress: FileProgress,
    cancel: CancellationToken,
    idle_timeout: Duration,
}

impl RangeFetch {
    async fn run(self) -> Result<(), DownloadError> {
        let resp = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
            resp = self.client.open(&self.url, Some(self.range.as_inclusive())) => resp?,
        };

        let status = resp.status();
        let whole_object = self.range.start == 0 && self.range.len() == self.object_size;
        if status != StatusCode::PARTIAL_CONTENT && !(status == StatusCode::OK && whole_object) {
            return Err(DownloadError::RangeNotSupported {
                status: status.as_u16(),
            });
        }

        let expected = self.range.len();
        let mut body = IdleTimeout::new(Box::pin(resp.bytes_stream()), self.idle_timeout);
        let mut out = tokio::fs::File::create(&self.path).await?;
        let mut received = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(DownloadError::Cancelled),
                next = body.next() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;
            let len = chunk.len() as u64;
            if received + len > expected {
                return Err(DownloadError::RangeLength {
                    expected,
                    actual: received + len,
                });
            }
            out.write_all(&chunk).await?;
            received += len;
            self.progress.advance(len);
        }
        out.flush().await?;

        if received != expected {
            return Err(DownloadError::RangeLength {
                expected,
                actual: received,
            });
        }
        Ok(())
    }
}
