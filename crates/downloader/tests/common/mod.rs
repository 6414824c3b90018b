//! In-process mock of the hub: metadata API, large-object resolver with a
//! redirect to a blob endpoint, raw file endpoint, and `Range` support.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One file served by the mock hub.
#[derive(Debug, Clone)]
pub struct MockFile {
    pub path: String,
    pub content: Vec<u8>,
    pub large: bool,
    /// Hash advertised in the tree listing instead of the real one.
    pub advertised_hash: Option<String>,
    /// Send half the body, then go silent.
    pub stall: bool,
    /// Answer ranged requests with `200` and the whole body.
    pub ignore_range: bool,
}

impl MockFile {
    pub fn regular(path: &str, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            content: content.to_vec(),
            large: false,
            advertised_hash: None,
            stall: false,
            ignore_range: false,
        }
    }

    pub fn large(path: &str, content: &[u8]) -> Self {
        Self {
            large: true,
            ..Self::regular(path, content)
        }
    }

    pub fn with_hash(mut self, hash: &str) -> Self {
        self.advertised_hash = Some(hash.into());
        self
    }

    pub fn stalling(mut self) -> Self {
        self.stall = true;
        self
    }

    pub fn ignoring_range(mut self) -> Self {
        self.ignore_range = true;
        self
    }

    fn hash(&self) -> String {
        self.advertised_hash
            .clone()
            .unwrap_or_else(|| hex::encode(Sha256::digest(&self.content)))
    }
}

#[derive(Debug, Default)]
pub struct Stats {
    pub requests: AtomicUsize,
    pub content_requests: AtomicUsize,
    pub range_requests: AtomicUsize,
}

struct HubState {
    repo_id: String,
    files: Vec<MockFile>,
    unauthorized: bool,
    stats: Arc<Stats>,
}

/// Running mock hub. Stops accepting connections when dropped.
pub struct MockHub {
    pub url: String,
    pub stats: Arc<Stats>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockHub {
    pub async fn start(repo_id: &str, files: Vec<MockFile>) -> Self {
        Self::spawn(repo_id, files, false).await
    }

    /// A hub that answers every request with 401.
    pub async fn unauthorized(repo_id: &str) -> Self {
        Self::spawn(repo_id, Vec::new(), true).await
    }

    async fn spawn(repo_id: &str, files: Vec<MockFile>, unauthorized: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let stats = Arc::new(Stats::default());
        let state = Arc::new(HubState {
            repo_id: repo_id.into(),
            files,
            unauthorized,
            stats: Arc::clone(&stats),
        });

        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&state)));
            }
        });

        Self { url, stats, handle }
    }

    pub fn requests(&self) -> usize {
        self.stats.requests.load(Ordering::SeqCst)
    }

    pub fn content_requests(&self) -> usize {
        self.stats.content_requests.load(Ordering::SeqCst)
    }

    pub fn range_requests(&self) -> usize {
        self.stats.range_requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockHub {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Request {
    path: String,
    range: Option<(u64, u64)>,
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let head = String::from_utf8_lossy(&buf).to_string();
    let mut lines = head.lines();
    let target = lines.next()?.split_whitespace().nth(1)?.to_string();
    let path = target.split('?').next().unwrap_or("/").to_string();

    let range = lines.find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if !name.trim().eq_ignore_ascii_case("range") {
            return None;
        }
        let bytes = value.trim().strip_prefix("bytes=")?;
        let (start, end) = bytes.split_once('-')?;
        Some((start.parse().ok()?, end.parse().ok()?))
    });

    Some(Request { path, range })
}

async fn serve(mut stream: TcpStream, state: Arc<HubState>) {
    let Some(req) = read_request(&mut stream).await else {
        return;
    };
    state.stats.requests.fetch_add(1, Ordering::SeqCst);

    if state.unauthorized {
        respond(&mut stream, 401, &[], b"unauthorized").await;
        return;
    }

    let repo = &state.repo_id;
    let info = format!("/api/models/{repo}");
    let tree = format!("/api/models/{repo}/tree/main");
    let resolve = format!("/{repo}/resolve/main/");
    let raw = format!("/{repo}/raw/main/");
    let find = |path: &str| state.files.iter().find(|f| f.path == path);

    if req.path == info {
        let body = format!(r#"{{"id":"{repo}","lastModified":"2024-05-01T12:00:00.000Z"}}"#);
        respond(&mut stream, 200, &[], body.as_bytes()).await;
    } else if req.path == tree {
        respond(&mut stream, 200, &[], tree_listing(&state.files, "").as_bytes()).await;
    } else if let Some(folder) = req.path.strip_prefix(&format!("{tree}/")) {
        respond(&mut stream, 200, &[], tree_listing(&state.files, folder).as_bytes()).await;
    } else if let Some(file) = req.path.strip_prefix(&resolve).and_then(find) {
        let location = format!("/cdn/{}", file.path);
        respond(&mut stream, 302, &[("Location", location)], b"").await;
    } else if let Some(file) = req.path.strip_prefix(&raw).and_then(find) {
        serve_content(&mut stream, &state.stats, file, req.range).await;
    } else if let Some(file) = req.path.strip_prefix("/cdn/").and_then(find) {
        serve_content(&mut stream, &state.stats, file, req.range).await;
    } else {
        respond(&mut stream, 404, &[], b"not found").await;
    }
}

async fn serve_content(
    stream: &mut TcpStream,
    stats: &Stats,
    file: &MockFile,
    range: Option<(u64, u64)>,
) {
    stats.content_requests.fetch_add(1, Ordering::SeqCst);
    let total = file.content.len() as u64;

    let (status, body, headers) = match range {
        Some((start, end)) if total > 0 && start < total && !file.ignore_range => {
            stats.range_requests.fetch_add(1, Ordering::SeqCst);
            let end = end.min(total - 1);
            let body = &file.content[start as usize..=end as usize];
            let content_range = format!("bytes {start}-{end}/{total}");
            (206, body, vec![("Content-Range", content_range)])
        }
        _ => (200, file.content.as_slice(), Vec::new()),
    };

    if file.stall {
        let head = head(status, &headers, body.len());
        let _ = stream.write_all(head.as_bytes()).await;
        let _ = stream.write_all(&body[..body.len() / 2]).await;
        let _ = stream.flush().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        return;
    }
    respond(stream, status, &headers, body).await;
}

fn head(status: u16, headers: &[(&str, String)], len: usize) -> String {
    let mut head = format!("HTTP/1.1 {status} X\r\n");
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str(&format!("Content-Length: {len}\r\nConnection: close\r\n\r\n"));
    head
}

async fn respond(stream: &mut TcpStream, status: u16, headers: &[(&str, String)], body: &[u8]) {
    let head = head(status, headers, body.len());
    let _ = stream.write_all(head.as_bytes()).await;
    let _ = stream.write_all(body).await;
    let _ = stream.shutdown().await;
}

/// Directory a file is listed under. Paths that climb out of the root are
/// listed at the top level, as a hostile manifest would.
fn parent_dir(path: &str) -> &str {
    match path.rsplit_once('/') {
        Some((parent, _)) if !parent.split('/').any(|c| c == "..") => parent,
        _ => "",
    }
}

fn tree_listing(files: &[MockFile], folder: &str) -> String {
    let mut dirs = BTreeSet::new();
    for file in files {
        let mut dir = parent_dir(&file.path);
        while !dir.is_empty() {
            dirs.insert(dir.to_string());
            dir = parent_dir(dir);
        }
    }

    let mut entries = Vec::new();
    for dir in dirs.iter().filter(|d| parent_dir(d) == folder) {
        let entry = serde_json::json!({"type": "directory", "path": dir, "size": 0, "oid": "d"});
        entries.push(entry);
    }
    for file in files.iter().filter(|f| parent_dir(&f.path) == folder) {
        let size = file.content.len();
        let entry = if file.large {
            serde_json::json!({
                "type": "file", "path": file.path, "size": 134, "oid": "p",
                "lfs": {"oid": file.hash(), "size": size, "pointerSize": 134}
            })
        } else {
            serde_json::json!({"type": "file", "path": file.path, "size": size, "oid": "r"})
        };
        entries.push(entry);
    }
    serde_json::Value::Array(entries).to_string()
}
