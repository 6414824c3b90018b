//! Hub metadata API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication.
//! Redirects are never followed automatically: large-object downloads go
//! through a resolver endpoint whose `Location` header is the blob-storage
//! URL used for every sub-request of that file.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::time::Duration;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, LOCATION, RANGE};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::error::ApiError;
use crate::types::{RemoteFile, RepoInfoWire, RepoRef, Repository, TreeEntryWire};

const DEFAULT_BASE_URL: &str = "https://huggingface.co";

/// Timeout for establishing a TCP/TLS connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on waiting for response headers.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Characters left unescaped inside a single path segment.
const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Hub API client.
#[derive(Debug, Clone)]
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl Client {
    /// Creates a client. An empty or absent token sends no `Authorization`.
    pub fn new(auth_token: Option<&str>, request_timeout: Duration) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = auth_token.filter(|t| !t.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|_| ApiError::InvalidToken)?,
            );
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .pool_max_idle_per_host(10)
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout,
        })
    }

    /// Points the client at another hub (mirrors, tests).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetches repository metadata and the complete, flattened file tree.
    pub async fn fetch_repository(&self, repo: &RepoRef) -> Result<Repository, ApiError> {
        info!(repo = %repo.id, branch = %repo.branch, "fetching remote repository info");

        let info: RepoInfoWire = self.get_json(&self.info_url(repo)).await?;
        let files = self.fetch_tree(repo).await?;

        debug!(repo = %info.id, entries = files.len(), "manifest fetched");
        let id = if info.id.is_empty() {
            repo.id.clone()
        } else {
            info.id
        };
        Ok(Repository {
            id,
            last_modified: info.last_modified,
            files,
        })
    }

    /// Lists every entry below the repository root, descending into
    /// directories. Directory nodes are kept in the result.
    pub async fn fetch_tree(&self, repo: &RepoRef) -> Result<Vec<RemoteFile>, ApiError> {
        let mut files = Vec::new();
        let mut visited = HashSet::new();
        let mut pending = vec![String::new()];

        while let Some(folder) = pending.pop() {
            if !visited.insert(folder.clone()) {
                continue;
            }
            let entries: Vec<TreeEntryWire> = self.get_json(&self.tree_url(repo, &folder)).await?;
            for entry in entries {
                let file = RemoteFile::from(entry);
                if file.is_directory() {
                    pending.push(file.path.clone());
                }
                files.push(file);
            }
        }

        Ok(files)
    }

    /// Returns the URL the content of `file` should be fetched from.
    ///
    /// Regular files are served from the raw endpoint directly. Large objects
    /// cost one round trip to the resolver, which answers with a redirect to
    /// blob storage.
    pub async fn resolve_transfer_location(
        &self,
        repo: &RepoRef,
        file: &RemoteFile,
    ) -> Result<String, ApiError> {
        if !file.is_large_object {
            return Ok(self.raw_url(repo, &file.path));
        }

        let url = self.resolve_url(repo, &file.path);
        let resp = self
            .http
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = resp.status();
        if !(status.is_success() || status.is_redirection()) {
            return Err(status_error(status, &url));
        }

        resp.headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| self.absolutize(v))
            .ok_or_else(|| ApiError::MissingRedirect(file.path.clone()))
    }

    /// Opens a plain or ranged GET on a content URL.
    ///
    /// Only the wait for response headers is bounded by the request timeout;
    /// body reads are guarded by the caller.
    pub async fn open(
        &self,
        url: &str,
        range: Option<RangeInclusive<u64>>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.http.get(url);
        if let Some(range) = &range {
            request = request.header(RANGE, format!("bytes={}-{}", range.start(), range.end()));
        }

        let resp = tokio::time::timeout(self.request_timeout, request.send())
            .await
            .map_err(|_| ApiError::Timeout(url.to_string()))??;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }
        Ok(resp)
    }

    /// Performs a GET and decodes the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ApiError> {
        debug!(%url, "GET");
        let resp = self
            .http
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(status_error(status, url));
        }
        let body = resp.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn info_url(&self, repo: &RepoRef) -> String {
        format!(
            "{}/api/{}/{}?revision={}",
            self.base_url,
            repo.kind.api_segment(),
            encode_path(&repo.id),
            encode_segment(&repo.branch)
        )
    }

    fn tree_url(&self, repo: &RepoRef, folder: &str) -> String {
        let mut url = format!(
            "{}/api/{}/{}/tree/{}",
            self.base_url,
            repo.kind.api_segment(),
            encode_path(&repo.id),
            encode_segment(&repo.branch)
        );
        if !folder.is_empty() {
            url.push('/');
            url.push_str(&encode_path(folder));
        }
        url
    }

    fn raw_url(&self, repo: &RepoRef, path: &str) -> String {
        self.content_url(repo, "raw", path)
    }

    fn resolve_url(&self, repo: &RepoRef, path: &str) -> String {
        self.content_url(repo, "resolve", path)
    }

    fn content_url(&self, repo: &RepoRef, endpoint: &str, path: &str) -> String {
        format!(
            "{}{}/{}/{endpoint}/{}/{}",
            self.base_url,
            repo.kind.content_prefix(),
            encode_path(&repo.id),
            encode_segment(&repo.branch),
            encode_path(path)
        )
    }

    /// Joins a relative redirect target onto the base URL.
    fn absolutize(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            location.to_string()
        } else if location.starts_with('/') {
            format!("{}{location}", self.base_url)
        } else {
            format!("{}/{location}", self.base_url)
        }
    }
}

/// Maps a non-success status to the error taxonomy.
fn status_error(status: StatusCode, url: &str) -> ApiError {
    match status {
        StatusCode::UNAUTHORIZED => ApiError::Authentication,
        StatusCode::FORBIDDEN => ApiError::Forbidden,
        StatusCode::NOT_FOUND => ApiError::NotFound,
        other => ApiError::Status {
            status: other.as_u16(),
            url: url.to_string(),
        },
    }
}

fn encode_segment(segment: &str) -> String {
    utf8_percent_encode(segment, PATH_SEGMENT).to_string()
}

/// Escapes each `/`-separated segment, keeping the separators.
fn encode_path(path: &str) -> String {
    path.split('/')
        .map(encode_segment)
        .collect::<Vec<_>>()
        .join("/")
}
