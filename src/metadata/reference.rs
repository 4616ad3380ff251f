//! File references produced by the metadata parsers.

use std::fmt;

use crate::checksum::Checksum;

/// What a referenced file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    /// `primary` entry of the index: the package listing.
    PrimaryMetadata,
    /// `deltainfo`/`prestodelta` entry of the index: the delta listing.
    DeltainfoMetadata,
    /// Any other index entry (filelists, updateinfo, ...). Fetched, not parsed.
    OtherMetadata,
    /// A package named by the primary listing.
    Package,
    /// A delta package named by the delta listing.
    Delta,
    /// Detached signature of the index.
    Signature,
    /// Public key published next to the index.
    Key,
    /// Product license file.
    License,
}

impl FileKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PrimaryMetadata => "primary-metadata",
            Self::DeltainfoMetadata => "deltainfo-metadata",
            Self::OtherMetadata => "other-metadata",
            Self::Package => "package",
            Self::Delta => "delta",
            Self::Signature => "signature",
            Self::Key => "key",
            Self::License => "license",
        }
    }

    /// Maps a repomd `<data type>` to a kind.
    #[must_use]
    pub fn from_index_type(data_type: &str) -> Self {
        match data_type {
            "primary" => Self::PrimaryMetadata,
            "deltainfo" | "prestodelta" => Self::DeltainfoMetadata,
            _ => Self::OtherMetadata,
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A file named by repository metadata, with the checksum it must match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReference {
    location: String,
    checksum: Checksum,
    size: Option<u64>,
    kind: FileKind,
}

impl FileReference {
    #[must_use]
    pub fn new(
        location: impl Into<String>,
        checksum: Checksum,
        size: Option<u64>,
        kind: FileKind,
    ) -> Self {
        Self {
            location: location.into(),
            checksum,
            size,
            kind,
        }
    }

    /// Path relative to the repository root.
    #[must_use]
    pub fn location(&self) -> &str {
        &self.location
    }

    #[must_use]
    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Size in bytes declared by the metadata, when present.
    #[must_use]
    pub fn size(&self) -> Option<u64> {
        self.size
    }

    #[must_use]
    pub fn kind(&self) -> FileKind {
        self.kind
    }
}
