//! State owned by a single mirror cycle.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tempfile::TempDir;
use tracing::{debug, warn};

use super::error::MirrorCause;
use super::target::RepositoryTarget;
use crate::metadata::FileReference;

/// Lock file created inside every destination.
pub const LOCK_FILE_NAME: &str = ".repo-mirror.lock";

const SCRATCH_PREFIX: &str = ".repo-mirror-";

/// Exclusive advisory lock on a destination, released on drop.
#[derive(Debug)]
struct TargetLock {
    file: File,
    path: PathBuf,
}

impl TargetLock {
    fn acquire(destination: &Path) -> Result<Self, MirrorCause> {
        let path = destination.join(LOCK_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| MirrorCause::directory(&path, e))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Self { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                Err(MirrorCause::Locked { path })
            }
            Err(e) => Err(MirrorCause::directory(&path, e)),
        }
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            warn!(path = %self.path.display(), error = %e, "failed to release target lock");
        }
    }
}

/// Scratch space, lock and discovered metadata for one cycle.
///
/// The scratch directory is removed when the session drops, whichever way
/// the cycle ends.
#[derive(Debug)]
pub struct MirrorSession {
    target: RepositoryTarget,
    scratch: TempDir,
    primary: Vec<FileReference>,
    deltainfo: Vec<FileReference>,
    // Declared last so it is released after the scratch directory is gone.
    _lock: TargetLock,
}

impl MirrorSession {
    /// Prepares the destination, takes the target lock and creates a fresh
    /// scratch directory beneath `scratch_base`.
    ///
    /// Without a base the scratch directory is created inside the
    /// destination itself, which keeps the publish rename on one filesystem.
    pub(crate) fn open(
        target: &RepositoryTarget,
        scratch_base: Option<&Path>,
    ) -> Result<Self, MirrorCause> {
        let destination = target.destination();
        std::fs::create_dir_all(destination).map_err(|e| MirrorCause::directory(destination, e))?;
        let lock = TargetLock::acquire(destination)?;

        let base = scratch_base.unwrap_or(destination).to_path_buf();
        std::fs::create_dir_all(&base).map_err(|e| MirrorCause::directory(&base, e))?;
        let scratch = tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(&base)
            .map_err(|e| MirrorCause::directory(&base, e))?;

        debug!(scratch = %scratch.path().display(), "mirror session opened");
        Ok(Self {
            target: target.clone(),
            scratch,
            primary: Vec::new(),
            deltainfo: Vec::new(),
            _lock: lock,
        })
    }

    pub fn target(&self) -> &RepositoryTarget {
        &self.target
    }

    pub fn scratch(&self) -> &Path {
        self.scratch.path()
    }

    pub(crate) fn add_primary(&mut self, reference: FileReference) {
        self.primary.push(reference);
    }

    pub(crate) fn add_deltainfo(&mut self, reference: FileReference) {
        self.deltainfo.push(reference);
    }

    /// Listing documents in processing order: deltas first, then packages.
    pub fn listings(&self) -> impl Iterator<Item = &FileReference> {
        self.deltainfo.iter().chain(self.primary.iter())
    }
}
