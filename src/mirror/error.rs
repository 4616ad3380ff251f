//! Failure types for a mirror cycle.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::download::DownloadError;
use crate::metadata::MetadataError;

/// Phases of one mirror cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorPhase {
    /// Destination tree, scratch directory and target lock.
    Init,
    /// Product license files; never fatal.
    LicenseBestEffort,
    /// Index plus every metadata document it references.
    MetadataRequired,
    /// Packages and deltas named by the listings.
    DataFetch,
    /// Swap of the staged metadata into place.
    PublishAtomic,
}

impl MirrorPhase {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::LicenseBestEffort => "license",
            Self::MetadataRequired => "metadata",
            Self::DataFetch => "data",
            Self::PublishAtomic => "publish",
        }
    }
}

impl fmt::Display for MirrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a phase failed.
#[derive(Debug, Error)]
pub enum MirrorCause {
    /// Destination or scratch directory could not be prepared.
    #[error("cannot prepare directory {path}: {source}")]
    Directory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another cycle holds the target lock.
    #[error("destination is locked by another mirror run ({path})")]
    Locked { path: PathBuf },

    /// A required file could not be fetched or verified.
    #[error("failed to fetch {location}: {source}")]
    Download {
        location: String,
        #[source]
        source: DownloadError,
    },

    /// A metadata document could not be decoded.
    #[error(transparent)]
    Parse(MetadataError),

    /// Staged metadata could not be swapped into place.
    #[error("cannot publish metadata at {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Some packages failed under the abort policy.
    #[error("{failed} file(s) could not be mirrored")]
    IncompleteData { failed: usize },
}

impl MirrorCause {
    pub fn directory(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Directory {
            path: path.into(),
            source,
        }
    }

    pub fn download(location: impl Into<String>, source: DownloadError) -> Self {
        Self::Download {
            location: location.into(),
            source,
        }
    }

    pub fn publish(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Publish {
            path: path.into(),
            source,
        }
    }
}

/// Terminal failure of a mirror cycle.
///
/// Cancellation is kept apart from failures so callers can tell an operator
/// interrupt from a broken repository.
#[derive(Debug, Error)]
pub enum MirrorFailure {
    #[error("mirror failed during {phase} phase: {cause}")]
    Failed {
        phase: MirrorPhase,
        #[source]
        cause: MirrorCause,
    },

    #[error("mirror cancelled during {phase} phase")]
    Cancelled { phase: MirrorPhase },
}

impl MirrorFailure {
    pub fn failed(phase: MirrorPhase, cause: MirrorCause) -> Self {
        Self::Failed { phase, cause }
    }

    #[must_use]
    pub fn phase(&self) -> MirrorPhase {
        match self {
            Self::Failed { phase, .. } | Self::Cancelled { phase } => *phase,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
