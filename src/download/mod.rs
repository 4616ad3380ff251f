//! Verified fetching of repository files.
//!
//! This module fetches single files or whole batches from an `http(s)://`
//! or `file://` repository into a local tree.
//!
//! # Features
//!
//! - Streaming transfers hashed on the fly (memory-efficient for large packages)
//! - Checksum verification before a file appears under its final name
//! - Retries with exponential backoff and Retry-After support
//! - Bounded-parallel batches that report a typed outcome per entry
//! - Rejection of metadata locations that escape the destination root
//!
//! # Example
//!
//! ```no_run
//! use mirror_core::download::{Downloader, FetchSource, HttpClient, RetryPolicy};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let downloader = Downloader::new(HttpClient::new(), RetryPolicy::default(), 10)?;
//! let source = FetchSource::parse("https://example.com/repo/", "./mirror/repo")?;
//! let index = downloader.fetch(&source, "repodata/repomd.xml", None).await?;
//! println!("Fetched: {}", index.display());
//! # Ok(())
//! # }
//! ```

mod client;
mod constants;
mod engine;
mod error;
mod retry;
mod source;

pub(crate) use client::StagingFile;
pub use client::{HttpClient, TransferRequest, TransferResult};
pub use constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
pub use engine::{DEFAULT_CONCURRENCY, Downloader, EngineError, FetchOutcome};
pub use error::DownloadError;
pub use retry::{
    DEFAULT_MAX_RETRIES, FailureType, RetryDecision, RetryPolicy, classify_error,
    parse_retry_after, retry_after_delay,
};
pub use source::{FetchSource, resolve_local_path};
