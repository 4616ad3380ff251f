//! Verified fetch engine with retries and bounded-parallel batches.
//!
//! This module provides the [`Downloader`], a stateless engine: every call
//! receives an immutable [`FetchSource`] describing where to read from and
//! where to write, so concurrent callers cannot disturb each other.
//!
//! # Example
//!
//! ```no_run
//! use mirror_core::download::{Downloader, FetchSource, HttpClient, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(HttpClient::new(), RetryPolicy::default(), 10)?;
//! let source = FetchSource::parse("https://example.com/repo/", "/srv/mirror/repo")?;
//! let path = downloader.fetch(&source, "repodata/repomd.xml", None).await?;
//! println!("Fetched: {}", path.display());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::client::{HttpClient, TransferRequest};
use super::retry::{RetryDecision, RetryPolicy, classify_error, retry_after_delay};
use super::{DownloadError, FetchSource};
use crate::checksum::Checksum;
use crate::metadata::FileReference;

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Error type for downloader construction.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },
}

/// Result of one entry of a batch.
#[derive(Debug)]
pub struct FetchOutcome {
    /// The reference that was requested.
    pub reference: FileReference,
    /// Local path on success, typed failure otherwise.
    pub result: Result<PathBuf, DownloadError>,
    /// Attempts made (0 when the entry never reached the network).
    pub attempts: u32,
}

impl FetchOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Verified, retrying fetch engine.
///
/// Holds only the HTTP client, retry policy and batch concurrency; all
/// per-repository settings arrive through [`FetchSource`].
#[derive(Debug, Clone)]
pub struct Downloader {
    client: HttpClient,
    retry_policy: RetryPolicy,
    concurrency: usize,
}

impl Downloader {
    /// Creates a downloader.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidConcurrency`] if `concurrency` is
    /// outside 1-100.
    #[instrument(level = "debug", skip(client, retry_policy))]
    pub fn new(
        client: HttpClient,
        retry_policy: RetryPolicy,
        concurrency: usize,
    ) -> Result<Self, EngineError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        debug!(
            concurrency,
            max_attempts = retry_policy.max_attempts(),
            "creating downloader"
        );

        Ok(Self {
            client,
            retry_policy,
            concurrency,
        })
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Fetches `location` from `source` into its destination root.
    ///
    /// With an `expected` checksum the bytes are verified before they appear
    /// under their final name, and a verified copy under the source's
    /// fallback root is reused without network access.
    ///
    /// # Errors
    ///
    /// - [`DownloadError::UnsafePath`] if `location` escapes the destination
    /// - [`DownloadError::Integrity`] if the bytes do not match `expected`
    /// - network/HTTP errors once the retry policy is exhausted
    #[instrument(skip(self, source, expected), fields(base = %source.base_url()))]
    pub async fn fetch(
        &self,
        source: &FetchSource,
        location: &str,
        expected: Option<&Checksum>,
    ) -> Result<PathBuf, DownloadError> {
        self.fetch_counting(source, location, expected)
            .await
            .map(|(path, _)| path)
            .map_err(|(e, _)| e)
    }

    /// Fetches every reference, at most `concurrency` at a time.
    ///
    /// One entry failing never stops the others. The returned outcomes are
    /// in the same order as `references`.
    #[instrument(skip(self, source, references), fields(base = %source.base_url(), count = references.len()))]
    pub async fn fetch_batch(
        &self,
        source: &FetchSource,
        references: Vec<FileReference>,
    ) -> Vec<FetchOutcome> {
        let total = references.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut slots: Vec<Option<FetchOutcome>> = (0..total).map(|_| None).collect();

        info!(total, "starting batch fetch");

        for (index, reference) in references.iter().enumerate() {
            // The semaphore lives for this whole call and is never closed.
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };

            let reference = reference.clone();
            let downloader = self.clone();
            let source = source.clone();

            tasks.spawn(async move {
                let _permit = permit;
                let fetched = downloader
                    .fetch_counting(&source, reference.location(), Some(reference.checksum()))
                    .await;
                let (result, attempts) = match fetched {
                    Ok((path, attempts)) => (Ok(path), attempts),
                    Err((e, attempts)) => (Err(e), attempts),
                };
                (
                    index,
                    FetchOutcome {
                        reference,
                        result,
                        attempts,
                    },
                )
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    if let Err(e) = &outcome.result {
                        warn!(location = outcome.reference.location(), error = %e, "fetch failed");
                    }
                    slots[index] = Some(outcome);
                }
                Err(e) => warn!(error = %e, "fetch task panicked"),
            }
        }

        let outcomes: Vec<FetchOutcome> = references
            .into_iter()
            .zip(slots)
            .map(|(reference, slot)| {
                slot.unwrap_or_else(|| FetchOutcome {
                    result: Err(DownloadError::io(
                        source.destination_root(),
                        std::io::Error::other(format!(
                            "fetch task for {} did not complete",
                            reference.location()
                        )),
                    )),
                    reference,
                    attempts: 0,
                })
            })
            .collect();

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            total,
            completed = total - failed,
            failed,
            "batch fetch complete"
        );
        outcomes
    }

    /// Single fetch with retry, returning the attempt count on both paths.
    async fn fetch_counting(
        &self,
        source: &FetchSource,
        location: &str,
        expected: Option<&Checksum>,
    ) -> Result<(PathBuf, u32), (DownloadError, u32)> {
        let destination = source.local_path_for(location).map_err(|e| (e, 0))?;
        let url = source.url_for(location).map_err(|e| (e, 0))?;

        if let Some(expected) = expected
            && let Some(path) = self
                .reuse_fallback(source, location, &destination, expected)
                .await
        {
            return Ok((path, 0));
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(location, attempt, "attempting fetch");

            let request = TransferRequest {
                url: &url,
                destination: &destination,
                location,
                expected,
                auth_token: source.auth_token(),
            };

            match self.client.transfer(request).await {
                Ok(result) => return Ok((result.path, attempt)),
                Err(e) => match self.retry_policy.should_retry(classify_error(&e), attempt) {
                    RetryDecision::Retry {
                        delay: backoff_delay,
                        attempt: next_attempt,
                    } => {
                        let server_delay = retry_after_delay(&e);
                        let delay = server_delay.unwrap_or(backoff_delay);
                        info!(
                            url = %url,
                            attempt = next_attempt,
                            max_attempts = self.retry_policy.max_attempts(),
                            delay_ms = delay.as_millis(),
                            using_retry_after = server_delay.is_some(),
                            error = %e,
                            "retrying fetch"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RetryDecision::DoNotRetry { reason } => {
                        debug!(url = %url, %reason, "not retrying fetch");
                        return Err((e, attempt));
                    }
                },
            }
        }
    }

    /// Copies a verified fallback file into place, if one exists.
    async fn reuse_fallback(
        &self,
        source: &FetchSource,
        location: &str,
        destination: &std::path::Path,
        expected: &Checksum,
    ) -> Option<PathBuf> {
        let fallback = source.fallback_path_for(location).ok().flatten()?;
        if fallback == destination || !tokio::fs::try_exists(&fallback).await.unwrap_or(false) {
            return None;
        }
        let url = Url::from_file_path(&fallback).ok()?;

        let request = TransferRequest {
            url: &url,
            destination,
            location,
            expected: Some(expected),
            auth_token: None,
        };
        match self.client.transfer(request).await {
            Ok(result) => {
                debug!(location, fallback = %fallback.display(), "reused verified local copy");
                Some(result.path)
            }
            Err(e) => {
                debug!(location, error = %e, "local copy unusable, fetching from source");
                None
            }
        }
    }
}
