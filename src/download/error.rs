//! Error types for the download module.
//!
//! This module defines structured errors for all fetch operations,
//! carrying the URL or path the failure relates to.

use std::path::PathBuf;

use thiserror::Error;

use crate::checksum::Checksum;

/// Errors that can occur while fetching a repository file.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, TLS errors, etc.)
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
        /// The Retry-After header value, if present (for 429/503 responses).
        retry_after: Option<String>,
    },

    /// File system error while staging or placing a file.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The repository URL or a joined location is malformed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// A metadata location would resolve outside the destination root.
    #[error("refusing location '{location}': it escapes the destination root")]
    UnsafePath {
        /// The offending relative location.
        location: String,
    },

    /// Fetched bytes do not hash to the checksum declared by metadata.
    #[error("integrity check failed for {location}: expected {expected}, got {actual}")]
    Integrity {
        /// Relative location that failed verification.
        location: String,
        /// Declared checksum.
        expected: Checksum,
        /// Hex digest of the bytes actually received.
        actual: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after: None,
        }
    }

    /// Creates an HTTP status error with a Retry-After header value.
    pub fn http_status_with_retry_after(
        url: impl Into<String>,
        status: u16,
        retry_after: Option<String>,
    ) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
            retry_after,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an unsafe path error.
    pub fn unsafe_path(location: impl Into<String>) -> Self {
        Self::UnsafePath {
            location: location.into(),
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(location: impl Into<String>, expected: Checksum, actual: String) -> Self {
        Self::Integrity {
            location: location.into(),
            expected,
            actual,
        }
    }

    /// Returns `true` for transport-level failures: connection errors,
    /// timeouts and HTTP error statuses.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::Timeout { .. } | Self::HttpStatus { .. }
        )
    }

    /// Returns `true` when the server reported the file as missing.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::HttpStatus { status, .. } => *status == 404 || *status == 410,
            Self::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

// Variants carry context (url, path, location) that `reqwest::Error` and
// `std::io::Error` don't provide, so there are no blanket `From` impls; use
// the constructors above.
