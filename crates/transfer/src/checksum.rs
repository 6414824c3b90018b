use std::path::Path;

use hfsync_progress::FileProgress;
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

const HASH_BUFFER: usize = 64 * 1024;

/// Computes SHA-256 of `data` and returns the hex-encoded digest.
pub fn checksum_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Streams a file through SHA-256, advancing `progress` per buffer.
pub async fn hash_file(path: &Path, progress: Option<&FileProgress>) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; HASH_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        if let Some(progress) = progress {
            progress.advance(n as u64);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}
