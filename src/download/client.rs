//! HTTP client wrapper for verified single-file transfers.
//!
//! This module provides the `HttpClient` struct which streams one resource
//! into a hidden staging file, hashes it on the way, and only then renames it
//! onto its final name. `file://` URLs are read from local disk through the
//! same staging path so local imports get identical guarantees.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RETRY_AFTER;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tracing::{debug, instrument};
use url::Url;

use super::constants::{CONNECT_TIMEOUT_SECS, PART_SUFFIX, READ_TIMEOUT_SECS};
use super::error::DownloadError;
use crate::checksum::{Checksum, ChecksumHasher, ChecksumType};
use crate::user_agent;

const FILE_READ_BUFFER: usize = 64 * 1024;

/// HTTP client for repository transfers.
///
/// Created once per mirror run and cloned freely; clones share the
/// underlying connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

/// Outcome of one successful transfer.
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// Final on-disk path.
    pub path: PathBuf,
    /// Bytes written.
    pub bytes: u64,
}

/// Everything a single transfer needs.
#[derive(Debug, Clone, Copy)]
pub struct TransferRequest<'a> {
    /// Absolute source URL (`http`, `https` or `file`).
    pub url: &'a Url,
    /// Final destination path.
    pub destination: &'a Path,
    /// Relative location, used in error messages.
    pub location: &'a str,
    /// Checksum the bytes must hash to, when known.
    pub expected: Option<&'a Checksum>,
    /// Bearer credential for HTTP requests.
    pub auth_token: Option<&'a str>,
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient {
    /// Creates a new HTTP client with default timeouts.
    ///
    /// Default configuration:
    /// - Connect timeout: 30 seconds
    /// - Request timeout: 5 minutes (per attempt)
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the static
    /// configuration. This should never happen in practice.
    #[must_use]
    pub fn new() -> Self {
        Self::new_with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a new HTTP client with explicit timeout values.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client builder fails to build with the supplied
    /// timeout configuration.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn new_with_timeouts(connect_timeout_secs: u64, read_timeout_secs: u64) -> Self {
        Self::try_new_with_timeouts(connect_timeout_secs, read_timeout_secs)
            .expect("failed to build HTTP client with static configuration")
    }

    /// Fallible variant of [`new_with_timeouts`](Self::new_with_timeouts).
    ///
    /// # Errors
    ///
    /// Returns the reqwest builder error (e.g. TLS backend initialisation).
    pub fn try_new_with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .timeout(Duration::from_secs(read_timeout_secs))
            .no_gzip()
            .user_agent(user_agent::default_mirror_user_agent())
            .build()?;
        Ok(Self { client })
    }

    /// Transfers one resource to `request.destination`.
    ///
    /// Bytes are streamed into a hidden `.part` sibling while being hashed.
    /// When a checksum is expected and does not match, the staging file is
    /// deleted and [`DownloadError::Integrity`] is returned; the destination
    /// name is only ever created by renaming a fully written (and, when a
    /// checksum was given, verified) file.
    ///
    /// # Errors
    ///
    /// Returns `DownloadError` if:
    /// - The request fails (network error, timeout)
    /// - The server returns an error status (4xx, 5xx)
    /// - A `file://` source cannot be read
    /// - Writing to disk fails
    /// - The checksum does not match
    #[instrument(skip(self, request), fields(url = %request.url, location = request.location))]
    pub async fn transfer(
        &self,
        request: TransferRequest<'_>,
    ) -> Result<TransferResult, DownloadError> {
        debug!("starting transfer");

        let destination = request.destination;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let staging = StagingFile::new(part_path_for(destination));
        let part_path = staging.path();
        let checksum_type = request.expected.map(Checksum::checksum_type);

        let (bytes, digest) = match request.url.scheme() {
            "file" => self.stage_local(request.url, part_path, checksum_type).await?,
            "http" | "https" => {
                self.stage_remote(request.url, request.auth_token, part_path, checksum_type)
                    .await?
            }
            _ => return Err(DownloadError::invalid_url(request.url.as_str())),
        };

        if let (Some(expected), Some(actual)) = (request.expected, digest)
            && actual != expected.value()
        {
            debug!(path = %part_path.display(), "discarding file with checksum mismatch");
            return Err(DownloadError::integrity(
                request.location,
                expected.clone(),
                actual,
            ));
        }

        tokio::fs::rename(part_path, destination)
            .await
            .map_err(|e| DownloadError::io(destination, e))?;
        staging.committed();

        debug!(path = %destination.display(), bytes, "transfer complete");
        Ok(TransferResult {
            path: destination.to_path_buf(),
            bytes,
        })
    }

    async fn stage_remote(
        &self,
        url: &Url,
        auth_token: Option<&str>,
        part_path: &Path,
        checksum_type: Option<ChecksumType>,
    ) -> Result<(u64, Option<String>), DownloadError> {
        let response = self.send_request(url, auth_token).await?;

        let file = File::create(part_path)
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut hasher = checksum_type.map(ChecksumHasher::new);
        let mut stream = response.bytes_stream();
        let mut bytes_written: u64 = 0;

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| map_reqwest_error(url, e))?;
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&chunk);
            }
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(part_path, e))?;
            bytes_written += chunk.len() as u64;
        }

        finish_writer(writer, part_path).await?;
        Ok((bytes_written, hasher.map(ChecksumHasher::finalize_hex)))
    }

    async fn stage_local(
        &self,
        url: &Url,
        part_path: &Path,
        checksum_type: Option<ChecksumType>,
    ) -> Result<(u64, Option<String>), DownloadError> {
        let source_path = url
            .to_file_path()
            .map_err(|()| DownloadError::invalid_url(url.as_str()))?;
        let mut source = File::open(&source_path)
            .await
            .map_err(|e| DownloadError::io(&source_path, e))?;

        let file = File::create(part_path)
            .await
            .map_err(|e| DownloadError::io(part_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut hasher = checksum_type.map(ChecksumHasher::new);
        let mut buffer = vec![0u8; FILE_READ_BUFFER];
        let mut bytes_written: u64 = 0;

        loop {
            let read = source
                .read(&mut buffer)
                .await
                .map_err(|e| DownloadError::io(&source_path, e))?;
            if read == 0 {
                break;
            }
            if let Some(hasher) = hasher.as_mut() {
                hasher.update(&buffer[..read]);
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|e| DownloadError::io(part_path, e))?;
            bytes_written += read as u64;
        }

        finish_writer(writer, part_path).await?;
        Ok((bytes_written, hasher.map(ChecksumHasher::finalize_hex)))
    }

    async fn send_request(
        &self,
        url: &Url,
        auth_token: Option<&str>,
    ) -> Result<reqwest::Response, DownloadError> {
        let mut request = self.client.get(url.clone());
        if let Some(token) = auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| map_reqwest_error(url, e))?;

        if !response.status().is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(std::string::ToString::to_string);
            return Err(DownloadError::http_status_with_retry_after(
                url.as_str(),
                response.status().as_u16(),
                retry_after,
            ));
        }

        Ok(response)
    }

    /// Returns a reference to the underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

fn map_reqwest_error(url: &Url, error: reqwest::Error) -> DownloadError {
    if error.is_timeout() {
        DownloadError::timeout(url.as_str())
    } else {
        DownloadError::network(url.as_str(), error)
    }
}

async fn finish_writer(mut writer: BufWriter<File>, part_path: &Path) -> Result<(), DownloadError> {
    writer
        .flush()
        .await
        .map_err(|e| DownloadError::io(part_path, e))?;
    writer
        .into_inner()
        .sync_all()
        .await
        .map_err(|e| DownloadError::io(part_path, e))
}

/// Hidden, uniquely named staging path next to `destination`.
fn part_path_for(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let nonce: u32 = rand::random();
    destination.with_file_name(format!(".{name}.{nonce:08x}.{PART_SUFFIX}"))
}

/// Staging file removed on drop unless committed.
///
/// Dropping covers error returns as well as a transfer future being
/// aborted mid-stream.
pub(crate) struct StagingFile {
    path: PathBuf,
    committed: bool,
}

impl StagingFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn committed(mut self) {
        self.committed = true;
    }
}

impl Drop for StagingFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            debug!(path = %self.path.display(), error = %e, "failed to remove staging file");
        }
    }
}
