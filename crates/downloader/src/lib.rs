//! Repository sync engine.
//!
//! [`Downloader`] mirrors a model or dataset repository from the hub into a
//! local directory: it fetches the manifest, plans which files need a
//! transfer, and executes the plan with per-file error isolation. Large
//! objects are fetched over several concurrent byte-range requests and
//! reassembled; every body read is guarded by an idle timeout, and the job
//! as a whole is retried on transient failures.
//!
//! ```no_run
//! # async fn demo() -> Result<(), hfsync_downloader::DownloadError> {
//! use hfsync_downloader::Downloader;
//! use tokio_util::sync::CancellationToken;
//!
//! let downloader = Downloader::builder("org/model")
//!     .destination("./models")
//!     .include(["*.json", "*.safetensors"])
//!     .progress_channel(256)
//!     .build()?;
//! let report = downloader.run(&CancellationToken::new()).await?;
//! println!("{} files, {} bytes", report.files.len(), report.bytes_transferred);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod downloader;
pub mod engine;
pub mod error;
pub mod idle;
pub mod retry;

pub use config::DownloaderConfig;
pub use downloader::{Downloader, DownloaderBuilder, RepositorySync, run_job};
pub use engine::{FileReport, JobReport, TransferEngine};
pub use error::{DownloadError, FileFailure, JobFailure};
pub use idle::IdleTimeout;
pub use retry::RetryPolicy;

pub use hfsync_manifest::{RemoteFile, RepoKind, Repository};
pub use hfsync_progress::{Phase, ProgressEvent, ProgressTally};
pub use hfsync_transfer::{TransferDecision, TransferPlan, TransferReason, VerificationMethod};
