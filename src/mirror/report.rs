//! Per-cycle results.

use std::path::PathBuf;
use std::time::Duration;

use crate::download::DownloadError;
use crate::metadata::FileKind;

/// Result of a best-effort fetch of a single auxiliary file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactStatus {
    Fetched,
    /// The source does not publish this file.
    Absent,
    /// The file exists upstream (or might) but could not be fetched.
    Failed { reason: String },
}

impl ArtifactStatus {
    pub(crate) fn from_result(result: &Result<PathBuf, DownloadError>) -> Self {
        match result {
            Ok(_) => Self::Fetched,
            Err(e) if e.is_not_found() => Self::Absent,
            Err(e) => Self::Failed {
                reason: e.to_string(),
            },
        }
    }

    #[must_use]
    pub fn is_fetched(&self) -> bool {
        matches!(self, Self::Fetched)
    }
}

/// What the license phase achieved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseOutcome {
    /// The `directory.yast` manifest.
    pub manifest: ArtifactStatus,
    /// License files fetched.
    pub fetched: usize,
    /// Locations listed by the manifest that could not be fetched.
    pub failed: Vec<String>,
}

impl LicenseOutcome {
    pub(crate) fn without_manifest(manifest: ArtifactStatus) -> Self {
        Self {
            manifest,
            fetched: 0,
            failed: Vec::new(),
        }
    }
}

/// Detached key and signature of the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureOutcome {
    /// `repodata/repomd.xml.key`
    pub key: ArtifactStatus,
    /// `repodata/repomd.xml.asc`
    pub signature: ArtifactStatus,
}

impl SignatureOutcome {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.key.is_fetched() && self.signature.is_fetched()
    }
}

/// A package or delta that could not be mirrored.
#[derive(Debug)]
pub struct FileFailure {
    pub location: String,
    pub kind: FileKind,
    pub error: DownloadError,
}

/// Counters and outcomes of one successful cycle.
#[derive(Debug)]
pub struct MirrorReport {
    /// Index plus referenced metadata documents staged.
    pub metadata_files: usize,
    /// References whose destination already existed.
    pub already_present: usize,
    /// References satisfied from the content store.
    pub deduplicated: usize,
    /// References fetched from the source.
    pub downloaded: usize,
    /// Per-file failures in discovery order.
    pub failures: Vec<FileFailure>,
    pub license: LicenseOutcome,
    pub signature: SignatureOutcome,
    pub elapsed: Duration,
}

impl MirrorReport {
    #[must_use]
    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Whether every referenced file is now present.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}
