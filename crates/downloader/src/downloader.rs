//! Sync capability trait and its production implementation.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use hfsync_manifest::{Client, Repository};
use hfsync_progress::{ProgressEvent, ProgressReporter};
use hfsync_transfer::{FileFilter, LocalStateChecker, PlanBuilder, TransferPlan};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::DownloaderConfig;
use crate::engine::{JobReport, TransferEngine};
use crate::error::DownloadError;
use crate::retry::RetryPolicy;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// The three steps of a sync job.
///
/// `Downloader` talks to the real hub; tests and alternative front ends can
/// supply their own implementation and still reuse [`run_job`].
pub trait RepositorySync: Send + Sync {
    /// Fetches the remote manifest.
    fn fetch_repository(&self) -> BoxFuture<'_, Result<Repository, DownloadError>>;

    /// Diffs the manifest against local state.
    fn build_plan<'a>(
        &'a self,
        repository: &'a Repository,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<TransferPlan, DownloadError>>;

    /// Transfers every file the plan selects.
    fn execute<'a>(
        &'a self,
        plan: &'a TransferPlan,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<JobReport, DownloadError>>;
}

/// Fetch and plan once, then execute the plan, re-running only the execute
/// call on retryable failures. Fetch and plan errors are returned as is.
pub async fn run_job(
    sync: &dyn RepositorySync,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> Result<JobReport, DownloadError> {
    let repository = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
        repository = sync.fetch_repository() => repository?,
    };
    let plan = sync.build_plan(&repository, cancel).await?;
    let plan = &plan;

    retry
        .run(cancel, |attempt| async move {
            debug!(attempt, "executing plan");
            sync.execute(plan, cancel).await
        })
        .await
}

/// Syncs one hub repository into a local directory.
pub struct Downloader {
    config: DownloaderConfig,
    client: Client,
    planner: PlanBuilder,
    engine: TransferEngine,
    progress_rx: Mutex<Option<mpsc::Receiver<ProgressEvent>>>,
}

impl Downloader {
    pub fn builder(repo_id: impl Into<String>) -> DownloaderBuilder {
        DownloaderBuilder {
            config: DownloaderConfig::new(repo_id),
            progress_capacity: None,
        }
    }

    /// Creates a downloader that reports no progress.
    pub fn from_config(config: DownloaderConfig) -> Result<Self, DownloadError> {
        Self::with_reporter(config, ProgressReporter::disabled(), None)
    }

    fn with_reporter(
        config: DownloaderConfig,
        reporter: ProgressReporter,
        progress_rx: Option<mpsc::Receiver<ProgressEvent>>,
    ) -> Result<Self, DownloadError> {
        config.validate()?;

        let client = Client::new(config.auth_token.as_deref(), config.request_timeout)?
            .with_base_url(&config.base_url);
        let filter = FileFilter::new(&config.include, &config.exclude)
            .map_err(|e| DownloadError::Config(format!("invalid file pattern: {e}")))?;
        let checker = LocalStateChecker::new(config.skip_hash_check, reporter);

        let planner = PlanBuilder::new(checker.clone())
            .filter(filter)
            .force(config.force);
        let engine = TransferEngine::new(client.clone(), config.repo_ref(), checker)
            .connections(config.connections)
            .idle_timeout(config.idle_timeout);

        Ok(Self {
            config,
            client,
            planner,
            engine,
            progress_rx: Mutex::new(progress_rx),
        })
    }

    pub fn config(&self) -> &DownloaderConfig {
        &self.config
    }

    /// Takes the progress event receiver. Returns `None` if no channel was
    /// requested or it was already taken.
    pub fn progress(&self) -> Option<mpsc::Receiver<ProgressEvent>> {
        self.progress_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Directory the repository with `repo_id` is synced into.
    pub fn local_root(&self, repo_id: &str) -> PathBuf {
        self.config.local_root(repo_id)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.config.max_attempts, self.config.retry_interval)
    }

    /// Runs the whole job under the configured retry policy.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<JobReport, DownloadError> {
        info!(repo = %self.config.repo_id, branch = %self.config.branch, "sync started");
        run_job(self, self.retry_policy(), cancel).await
    }

    async fn plan(
        &self,
        repository: &Repository,
        cancel: &CancellationToken,
    ) -> Result<TransferPlan, DownloadError> {
        let root = self.local_root(&repository.id);
        debug!(root = %root.display(), "building plan");
        Ok(self.planner.build(repository, &root, cancel).await?)
    }
}

impl RepositorySync for Downloader {
    fn fetch_repository(&self) -> BoxFuture<'_, Result<Repository, DownloadError>> {
        Box::pin(async move { Ok(self.client.fetch_repository(&self.config.repo_ref()).await?) })
    }

    fn build_plan<'a>(
        &'a self,
        repository: &'a Repository,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<TransferPlan, DownloadError>> {
        Box::pin(self.plan(repository, cancel))
    }

    fn execute<'a>(
        &'a self,
        plan: &'a TransferPlan,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<JobReport, DownloadError>> {
        Box::pin(self.engine.execute(plan, cancel))
    }
}

/// Fluent construction of a [`Downloader`].
#[derive(Debug, Clone)]
pub struct DownloaderBuilder {
    config: DownloaderConfig,
    progress_capacity: Option<usize>,
}

impl DownloaderBuilder {
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn connections(mut self, connections: usize) -> Self {
        self.config.connections = connections;
        self
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.config.branch = branch.into();
        self
    }

    pub fn destination(mut self, destination: impl Into<PathBuf>) -> Self {
        self.config.destination = destination.into();
        self
    }

    pub fn dataset(mut self, dataset: bool) -> Self {
        self.config.dataset = dataset;
        self
    }

    pub fn include<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.include = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn exclude<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.exclude = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn skip_hash_check(mut self, skip: bool) -> Self {
        self.config.skip_hash_check = skip;
        self
    }

    pub fn force(mut self, force: bool) -> Self {
        self.config.force = force;
        self
    }

    pub fn tree_layout(mut self, tree_layout: bool) -> Self {
        self.config.tree_layout = tree_layout;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn retry(mut self, max_attempts: u32, interval: Duration) -> Self {
        self.config.max_attempts = max_attempts;
        self.config.retry_interval = interval;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    /// Delivers progress events over a bounded channel; see
    /// [`Downloader::progress`].
    pub fn progress_channel(mut self, capacity: usize) -> Self {
        self.progress_capacity = Some(capacity);
        self
    }

    pub fn build(self) -> Result<Downloader, DownloadError> {
        match self.progress_capacity {
            Some(capacity) => {
                let (reporter, rx) = ProgressReporter::channel(capacity);
                Downloader::with_reporter(self.config, reporter, Some(rx))
            }
            None => Downloader::from_config(self.config),
        }
    }
}
