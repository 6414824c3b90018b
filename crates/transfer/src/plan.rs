use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use hfsync_manifest::{RemoteFile, Repository};
use hfsync_progress::{Phase, ProgressEvent};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::PlanError;
use crate::checker::{CheckReason, LocalStateChecker};
use crate::filter::FileFilter;
use crate::validation::resolve_within;

/// Why a file is (or is not) transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferReason {
    Missing,
    SizeMismatch,
    HashMismatch,
    Forced,
    FilteredSkip,
    ValidSkip,
    UnsafePath,
}

impl TransferReason {
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            TransferReason::FilteredSkip | TransferReason::ValidSkip | TransferReason::UnsafePath
        )
    }

    /// Whether a skip with this reason is included in `total_skip_bytes`.
    pub fn counts_toward_totals(self) -> bool {
        !matches!(self, TransferReason::FilteredSkip | TransferReason::UnsafePath)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferReason::Missing => "missing",
            TransferReason::SizeMismatch => "size-mismatch",
            TransferReason::HashMismatch => "hash-mismatch",
            TransferReason::Forced => "forced",
            TransferReason::FilteredSkip => "filtered-skip",
            TransferReason::ValidSkip => "valid-skip",
            TransferReason::UnsafePath => "unsafe-path",
        }
    }
}

impl fmt::Display for TransferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CheckReason> for TransferReason {
    fn from(reason: CheckReason) -> Self {
        match reason {
            CheckReason::Missing => TransferReason::Missing,
            CheckReason::SizeMismatch => TransferReason::SizeMismatch,
            CheckReason::HashMismatch => TransferReason::HashMismatch,
            CheckReason::HashVerified | CheckReason::SizeVerified => TransferReason::ValidSkip,
        }
    }
}

/// A manifest entry with the decision taken for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferDecision {
    pub file: RemoteFile,
    pub reason: TransferReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TransferDecision {
    fn new(file: &RemoteFile, reason: TransferReason) -> Self {
        Self {
            file: file.clone(),
            reason,
            note: None,
        }
    }
}

/// The full set of decisions for one job.
///
/// Every non-directory manifest entry appears in exactly one of
/// `to_transfer` and `to_skip`, in manifest order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferPlan {
    pub repository: Repository,
    pub local_root: PathBuf,
    pub to_transfer: Vec<TransferDecision>,
    pub to_skip: Vec<TransferDecision>,
    pub total_transfer_bytes: u64,
    pub total_skip_bytes: u64,
}

impl TransferPlan {
    fn new(
        repository: Repository,
        local_root: PathBuf,
        to_transfer: Vec<TransferDecision>,
        to_skip: Vec<TransferDecision>,
    ) -> Self {
        let mut plan = Self {
            repository,
            local_root,
            to_transfer,
            to_skip,
            total_transfer_bytes: 0,
            total_skip_bytes: 0,
        };
        plan.recompute_totals();
        plan
    }

    fn recompute_totals(&mut self) {
        self.total_transfer_bytes = self.to_transfer.iter().map(|d| d.file.size).sum();
        self.total_skip_bytes = self
            .to_skip
            .iter()
            .filter(|d| d.reason.counts_toward_totals())
            .map(|d| d.file.size)
            .sum();
    }

    /// Nothing left to transfer.
    pub fn is_empty(&self) -> bool {
        self.to_transfer.is_empty()
    }

    /// Files with no local copy.
    pub fn missing(&self) -> impl Iterator<Item = &TransferDecision> {
        self.to_transfer
            .iter()
            .filter(|d| d.reason == TransferReason::Missing)
    }

    /// Files whose local copy failed the size or hash check.
    pub fn invalid(&self) -> impl Iterator<Item = &TransferDecision> {
        self.to_transfer
            .iter()
            .filter(|d| {
                matches!(d.reason, TransferReason::SizeMismatch | TransferReason::HashMismatch)
            })
    }

    /// Moves every valid-skipped file into `to_transfer` as `forced`.
    ///
    /// Filtered and unsafe entries stay skipped. Manifest order is kept.
    pub fn force_all(self) -> Self {
        let TransferPlan {
            repository,
            local_root,
            mut to_transfer,
            to_skip,
            ..
        } = self;

        let (forced, to_skip): (Vec<_>, Vec<_>) = to_skip
            .into_iter()
            .partition(|d| d.reason == TransferReason::ValidSkip);
        to_transfer.extend(forced.into_iter().map(|mut d| {
            d.reason = TransferReason::Forced;
            d
        }));

        {
            let order: HashMap<&str, usize> = repository
                .files
                .iter()
                .enumerate()
                .map(|(i, f)| (f.path.as_str(), i))
                .collect();
            to_transfer.sort_by_key(|d| order.get(d.file.path.as_str()).copied());
        }

        Self::new(repository, local_root, to_transfer, to_skip)
    }
}

/// Diffs a manifest against the local destination tree.
#[derive(Debug, Clone, Default)]
pub struct PlanBuilder {
    filter: FileFilter,
    force: bool,
    checker: LocalStateChecker,
}

impl PlanBuilder {
    pub fn new(checker: LocalStateChecker) -> Self {
        Self {
            checker,
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: FileFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Transfer every admitted file regardless of local state.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Classifies every non-directory entry of `repository`.
    ///
    /// Fails only when `cancel` fires; partial results are discarded.
    pub async fn build(
        &self,
        repository: &Repository,
        local_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferPlan, PlanError> {
        let reporter = self.checker.reporter();
        let mut to_transfer = Vec::new();
        let mut to_skip = Vec::new();

        for file in repository.regular_files() {
            if cancel.is_cancelled() {
                return Err(PlanError::Cancelled);
            }

            let decision = self.decide(file, local_root, cancel).await?;
            if decision.reason.is_skip() {
                let note = decision.note.as_deref().unwrap_or(decision.reason.as_str());
                let event = ProgressEvent::new(&file.path, Phase::Skipped, file.size, file.size);
                reporter.report(event.with_note(note));
                to_skip.push(decision);
            } else {
                to_transfer.push(decision);
            }
        }

        let plan =
            TransferPlan::new(repository.clone(), local_root.to_path_buf(), to_transfer, to_skip);
        info!(
            repo = %repository.id,
            transfer = plan.to_transfer.len(),
            skip = plan.to_skip.len(),
            transfer_bytes = plan.total_transfer_bytes,
            "transfer plan built"
        );
        Ok(plan)
    }

    async fn decide(
        &self,
        file: &RemoteFile,
        local_root: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferDecision, PlanError> {
        if !self.filter.allows(&file.path) {
            debug!(path = %file.path, "excluded by filter");
            return Ok(TransferDecision::new(file, TransferReason::FilteredSkip));
        }

        let local_path = match resolve_within(local_root, &file.path) {
            Ok(path) => path,
            Err(e) => {
                warn!(path = %file.path, error = %e, "refusing unsafe path");
                let mut decision = TransferDecision::new(file, TransferReason::UnsafePath);
                decision.note = Some(e.to_string());
                return Ok(decision);
            }
        };

        if self.force {
            return Ok(TransferDecision::new(file, TransferReason::Forced));
        }

        let validation = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PlanError::Cancelled),
            v = self.checker.validate(&local_path, file) => v,
        };
        debug!(path = %file.path, reason = ?validation.reason, "local state checked");
        Ok(TransferDecision::new(file, validation.reason.into()))
    }
}
