use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use hfsync_manifest::RemoteFile;
use tokio::io::AsyncWriteExt;

/// Per-connection size floor for multi-stream transfers: 1 MiB.
pub const MULTI_STREAM_UNIT: u64 = 1024 * 1024;

/// Whether `file` is large enough to be split across `connections` streams.
///
/// Only large objects qualify; regular files are small enough that the
/// extra round trips would dominate.
pub fn use_multi_stream(file: &RemoteFile, connections: usize) -> bool {
    let floor = (connections.max(1) as u64).saturating_mul(MULTI_STREAM_UNIT);
    file.is_large_object && file.size >= floor
}

/// Inclusive byte range `[start, end]` fetched by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub index: usize,
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn as_inclusive(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

/// Splits `[0, size)` into `parts` contiguous ranges.
///
/// All ranges have `size / parts` bytes except the last, which absorbs the
/// remainder. `parts` is clamped to `1..=size`; a zero-size object yields no
/// ranges.
pub fn split_ranges(size: u64, parts: usize) -> Vec<ByteRange> {
    if size == 0 {
        return Vec::new();
    }
    let parts = (parts.max(1) as u64).min(size);
    let chunk = size / parts;

    (0..parts)
        .map(|i| {
            let start = i * chunk;
            let end = if i == parts - 1 { size - 1 } else { start + chunk - 1 };
            ByteRange {
                index: i as usize,
                start,
                end,
            }
        })
        .collect()
}

/// Location of the temporary file holding range `index` of `file_name`.
pub fn chunk_path(dir: &Path, file_name: &str, index: usize) -> PathBuf {
    dir.join(format!("{file_name}_{index}.tmp"))
}

/// Concatenates `chunks` in order into `dest`, removing each chunk after it
/// is copied. Returns the number of bytes written.
pub async fn merge_chunks(dest: &Path, chunks: &[PathBuf]) -> std::io::Result<u64> {
    let mut out = tokio::fs::File::create(dest).await?;
    let mut written = 0;
    for chunk in chunks {
        let mut input = tokio::fs::File::open(chunk).await?;
        written += tokio::io::copy(&mut input, &mut out).await?;
        drop(input);
        tokio::fs::remove_file(chunk).await?;
    }
    out.flush().await?;
    out.sync_all().await?;
    Ok(written)
}
