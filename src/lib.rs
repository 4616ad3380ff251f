//! Repository mirroring core.
//!
//! This library mirrors RPM-MD repositories (`repodata/repomd.xml` plus the
//! primary and delta listings it references) onto local storage, fetching
//! only what is missing and sharing identical content across repositories
//! through a checksum-addressed store.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`checksum`] - Digest algorithms declared by metadata and streaming hashing
//! - [`download`] - Verified, retrying fetch engine with bounded-parallel batches
//! - [`metadata`] - Streaming parsers for index, primary and delta documents
//! - [`dedup`] - Content-addressed store lookup and linking
//! - [`mirror`] - The phase orchestrator tying the above together

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod checksum;
pub mod dedup;
pub mod download;
pub mod metadata;
pub mod mirror;
#[cfg(test)]
pub mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use checksum::{Checksum, ChecksumError, ChecksumType};
pub use dedup::{ContentStore, DedupError, Deduplicator, LinkMode, Materialized};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadError, Downloader, EngineError,
    FetchOutcome, FetchSource, HttpClient, RetryPolicy,
};
pub use metadata::{
    FileKind, FileReference, MetadataError, parse_deltainfo, parse_primary, parse_repomd,
};
pub use mirror::{
    FailurePolicy, Mirror, MirrorCause, MirrorFailure, MirrorOptions, MirrorPhase, MirrorReport,
    RepositoryTarget,
};
pub use tokio_util::sync::CancellationToken;
