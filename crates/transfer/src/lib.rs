//! Transfer planning for repository sync.
//!
//! Compares a remote [`Repository`](hfsync_manifest::Repository) manifest
//! with the local destination tree and decides, per file, whether it must be
//! fetched and why. Also provides the building blocks the transfer engine
//! uses: byte-range splitting, chunk merging and content hashing.

mod checker;
mod checksum;
mod chunked;
mod filter;
mod plan;
mod validation;

pub use checker::{CheckReason, LocalStateChecker, Validation, VerificationMethod};
pub use checksum::{checksum_bytes, hash_file};
pub use chunked::{
    ByteRange, MULTI_STREAM_UNIT, chunk_path, merge_chunks, split_ranges, use_multi_stream,
};
pub use filter::FileFilter;
pub use plan::{PlanBuilder, TransferDecision, TransferPlan, TransferReason};
pub use validation::resolve_within;

/// Errors produced while building a plan.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("planning cancelled")]
    Cancelled,
}

/// Errors produced by post-transfer verification.
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("file not found")]
    Missing,

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A repo-relative path that would land outside the destination root.
#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("empty path")]
    Empty,

    #[error("path escapes destination root: {0}")]
    Escapes(String),

    #[error("cannot determine working directory: {0}")]
    Io(#[from] std::io::Error),
}
