//! Error types for metadata document parsing.

use std::path::PathBuf;

use thiserror::Error;

use crate::checksum::ChecksumError;

/// Errors that can occur while decoding a repository metadata document.
///
/// Every variant is fatal for the mirror cycle that owns the document.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// Document could not be opened, read or decompressed.
    #[error("cannot read metadata document {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying I/O or decompression error.
        #[source]
        source: std::io::Error,
    },

    /// Document is not well-formed XML.
    #[error("malformed XML in {path} at byte {position}: {source}")]
    Xml {
        /// Document path.
        path: PathBuf,
        /// Byte offset in the decoded stream.
        position: u64,
        /// Parser error.
        #[source]
        source: quick_xml::Error,
    },

    /// A data/package/delta entry lacks its location or checksum.
    #[error("<{element}> entry #{entry} in {path} is missing its {field}")]
    MissingField {
        /// Document path.
        path: PathBuf,
        /// Element name of the incomplete entry.
        element: &'static str,
        /// 1-based ordinal of the entry within the document.
        entry: usize,
        /// Missing field (`location` or `checksum`).
        field: &'static str,
    },

    /// A checksum attribute names an unknown algorithm or carries a bad digest.
    #[error("bad checksum on <{element}> entry #{entry} in {path}: {source}")]
    Checksum {
        /// Document path.
        path: PathBuf,
        /// Element name of the entry.
        element: &'static str,
        /// 1-based ordinal of the entry within the document.
        entry: usize,
        /// Checksum validation error.
        #[source]
        source: ChecksumError,
    },

    /// Document ended before its root element was closed (or never opened one).
    #[error("metadata document {path} is truncated: {open_elements} element(s) still open at end of input")]
    Truncated {
        /// Document path.
        path: PathBuf,
        /// Elements opened but not closed when input ran out.
        open_elements: usize,
    },

    /// A value could not be interpreted (e.g. a non-numeric size).
    #[error("invalid value in {path}: {reason}")]
    InvalidValue {
        /// Document path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },
}

impl MetadataError {
    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an XML error.
    pub fn xml(path: impl Into<PathBuf>, position: u64, source: impl Into<quick_xml::Error>) -> Self {
        Self::Xml {
            path: path.into(),
            position,
            source: source.into(),
        }
    }

    /// Creates a missing-field error.
    pub fn missing_field(
        path: impl Into<PathBuf>,
        element: &'static str,
        entry: usize,
        field: &'static str,
    ) -> Self {
        Self::MissingField {
            path: path.into(),
            element,
            entry,
            field,
        }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
