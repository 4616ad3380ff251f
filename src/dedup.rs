//! Content-addressed store and deduplication.
//!
//! The store is a directory tree keyed by checksum:
//! `<root>/<algorithm>/<first two hex digits>/<hex>`. Files enter it only by
//! link (or copy) creation and are never rewritten or removed, so any number
//! of mirror cycles may read and extend it at once.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::checksum::Checksum;
use crate::download::StagingFile;

/// How store entries are placed into repositories (and vice versa).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkMode {
    /// Hard link, falling back to a copy across filesystems.
    #[default]
    HardLink,
    /// Always copy the bytes.
    Copy,
}

impl std::str::FromStr for LinkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hardlink" => Ok(Self::HardLink),
            "copy" => Ok(Self::Copy),
            other => Err(format!("unknown link mode '{other}' (expected 'hardlink' or 'copy')")),
        }
    }
}

/// Errors from store lookups and link creation.
#[derive(Debug, Error)]
pub enum DedupError {
    /// A store entry exists for the checksum but its size disagrees with the
    /// size declared by metadata. The entry is left untouched.
    #[error("store entry {candidate} for {checksum} is {actual} bytes, metadata declares {expected}")]
    Mismatch {
        checksum: Checksum,
        candidate: PathBuf,
        expected: u64,
        actual: u64,
    },

    /// Filesystem error while inspecting or linking.
    #[error("store I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl DedupError {
    fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result of [`Deduplicator::materialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialized {
    /// Destination now holds the stored bytes.
    Linked,
    /// Nothing stored under this checksum.
    Absent,
}

/// Checksum-addressed file store rooted at a directory.
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Slot path for `checksum`.
    #[must_use]
    pub fn path_for(&self, checksum: &Checksum) -> PathBuf {
        let hex = checksum.value();
        let shard = hex.get(..2).unwrap_or(hex);
        self.root
            .join(checksum.checksum_type().as_str())
            .join(shard)
            .join(hex)
    }
}

/// Looks up and materializes content from a [`ContentStore`].
#[derive(Debug, Clone)]
pub struct Deduplicator {
    store: ContentStore,
    mode: LinkMode,
}

impl Deduplicator {
    pub fn new(store: ContentStore, mode: LinkMode) -> Self {
        Self { store, mode }
    }

    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    #[must_use]
    pub fn mode(&self) -> LinkMode {
        self.mode
    }

    /// Places stored content for `checksum` at `destination`.
    ///
    /// Without a `declared_size` the checksum alone identifies the content.
    /// An existing destination counts as linked.
    ///
    /// # Errors
    ///
    /// - [`DedupError::Mismatch`] when the stored size differs from `declared_size`
    /// - [`DedupError::Io`] when the store or destination cannot be accessed
    #[instrument(level = "debug", skip(self), fields(checksum = %checksum))]
    pub async fn materialize(
        &self,
        checksum: &Checksum,
        declared_size: Option<u64>,
        destination: &Path,
    ) -> Result<Materialized, DedupError> {
        let candidate = self.store.path_for(checksum);
        let metadata = match tokio::fs::metadata(&candidate).await {
            Ok(metadata) if metadata.is_file() => metadata,
            Ok(_) => return Ok(Materialized::Absent),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Materialized::Absent),
            Err(e) => return Err(DedupError::io(&candidate, e)),
        };

        if let Some(expected) = declared_size
            && metadata.len() != expected
        {
            return Err(DedupError::Mismatch {
                checksum: checksum.clone(),
                candidate,
                expected,
                actual: metadata.len(),
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DedupError::io(parent, e))?;
        }
        place(&candidate, destination, self.mode).await?;
        debug!(destination = %destination.display(), "linked from store");
        Ok(Materialized::Linked)
    }

    /// Adds a verified file to the store under `checksum`.
    ///
    /// Returns `false` when the slot was already taken; the existing entry
    /// is kept as is.
    ///
    /// # Errors
    ///
    /// Returns [`DedupError::Io`] if the slot cannot be created.
    #[instrument(level = "debug", skip(self), fields(checksum = %checksum))]
    pub async fn register(&self, checksum: &Checksum, path: &Path) -> Result<bool, DedupError> {
        let slot = self.store.path_for(checksum);
        if tokio::fs::try_exists(&slot)
            .await
            .map_err(|e| DedupError::io(&slot, e))?
        {
            trace!(slot = %slot.display(), "store slot already filled");
            return Ok(false);
        }
        if let Some(parent) = slot.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DedupError::io(parent, e))?;
        }
        place(path, &slot, self.mode).await?;
        Ok(true)
    }
}

/// Links or copies `from` to `to`; an existing `to` is left alone.
async fn place(from: &Path, to: &Path, mode: LinkMode) -> Result<(), DedupError> {
    if mode == LinkMode::HardLink {
        match tokio::fs::hard_link(from, to).await {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DedupError::io(from, e));
            }
            Err(e) => {
                debug!(from = %from.display(), to = %to.display(), error = %e, "hard link failed, copying");
            }
        }
    }

    if tokio::fs::try_exists(to).await.unwrap_or(false) {
        return Ok(());
    }
    // Runs to completion even if the caller is cancelled, so the staging
    // file is always either renamed or removed.
    let (from, to) = (from.to_path_buf(), to.to_path_buf());
    let target = to.clone();
    tokio::task::spawn_blocking(move || copy_into_place(&from, &to))
        .await
        .map_err(|e| DedupError::io(target, io::Error::other(format!("copy task failed: {e}"))))?
}

/// Copies under a private name so `to` never holds partial bytes.
fn copy_into_place(from: &Path, to: &Path) -> Result<(), DedupError> {
    let staging = StagingFile::new(staging_path(to));
    std::fs::copy(from, staging.path()).map_err(|e| DedupError::io(from, e))?;
    std::fs::rename(staging.path(), to).map_err(|e| DedupError::io(to, e))?;
    staging.committed();
    Ok(())
}

fn staging_path(to: &Path) -> PathBuf {
    let name = to
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    to.with_file_name(format!(".{name}.{:08x}.link", rand::random::<u32>()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::checksum::{ChecksumType, digest_file};

    async fn stored_file(store: &ContentStore, content: &[u8]) -> Checksum {
        let dir = tempfile::TempDir::new().unwrap();
        let source = dir.path().join("blob");
        tokio::fs::write(&source, content).await.unwrap();
        let digest = digest_file(&source, ChecksumType::Sha256).await.unwrap();
        let checksum = Checksum::new(ChecksumType::Sha256, &digest).unwrap();
        let slot = store.path_for(&checksum);
        tokio::fs::create_dir_all(slot.parent().unwrap()).await.unwrap();
        tokio::fs::write(&slot, content).await.unwrap();
        checksum
    }

    #[test]
    fn test_store_path_layout() {
        let store = ContentStore::new("/srv/store");
        let checksum = Checksum::new(ChecksumType::Sha256, &"ab".repeat(32)).unwrap();
        assert_eq!(
            store.path_for(&checksum),
            PathBuf::from("/srv/store/sha256/ab").join("ab".repeat(32))
        );
    }

    #[test]
    fn test_link_mode_from_str() {
        assert_eq!("hardlink".parse::<LinkMode>().unwrap(), LinkMode::HardLink);
        assert_eq!("Copy".parse::<LinkMode>().unwrap(), LinkMode::Copy);
        assert!("symlink".parse::<LinkMode>().is_err());
    }

    #[tokio::test]
    async fn test_materialize_absent_when_not_stored() {
        let temp = tempfile::TempDir::new().unwrap();
        let dedup = Deduplicator::new(ContentStore::new(temp.path().join("store")), LinkMode::HardLink);
        let checksum = Checksum::new(ChecksumType::Sha256, &"0".repeat(64)).unwrap();

        let destination = temp.path().join("repo/a.rpm");
        let result = dedup.materialize(&checksum, Some(10), &destination).await.unwrap();
        assert_eq!(result, Materialized::Absent);
        assert!(!destination.exists());
    }

    #[tokio::test]
    async fn test_materialize_links_and_is_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::new(temp.path().join("store"));
        let checksum = stored_file(&store, b"package bytes").await;
        let dedup = Deduplicator::new(store, LinkMode::HardLink);

        let destination = temp.path().join("repo/x86_64/a.rpm");
        for _ in 0..2 {
            let result = dedup.materialize(&checksum, Some(13), &destination).await.unwrap();
            assert_eq!(result, Materialized::Linked);
        }
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"package bytes");
    }

    #[tokio::test]
    async fn test_materialize_size_mismatch_leaves_store_untouched() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::new(temp.path().join("store"));
        let checksum = stored_file(&store, b"package bytes").await;
        let slot = store.path_for(&checksum);
        let dedup = Deduplicator::new(store, LinkMode::HardLink);

        let destination = temp.path().join("repo/a.rpm");
        let result = dedup.materialize(&checksum, Some(999), &destination).await;
        assert!(matches!(
            result,
            Err(DedupError::Mismatch { expected: 999, actual: 13, .. })
        ));
        assert!(!destination.exists());
        assert_eq!(tokio::fs::read(&slot).await.unwrap(), b"package bytes");
    }

    #[tokio::test]
    async fn test_materialize_without_declared_size_trusts_checksum() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::new(temp.path().join("store"));
        let checksum = stored_file(&store, b"abc").await;
        let dedup = Deduplicator::new(store, LinkMode::Copy);

        let destination = temp.path().join("repo/a.rpm");
        let result = dedup.materialize(&checksum, None, &destination).await.unwrap();
        assert_eq!(result, Materialized::Linked);
        assert_eq!(tokio::fs::read(&destination).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_register_adds_once() {
        let temp = tempfile::TempDir::new().unwrap();
        let dedup = Deduplicator::new(ContentStore::new(temp.path().join("store")), LinkMode::HardLink);
        let file = temp.path().join("downloaded.rpm");
        tokio::fs::write(&file, b"fresh").await.unwrap();
        let digest = digest_file(&file, ChecksumType::Sha256).await.unwrap();
        let checksum = Checksum::new(ChecksumType::Sha256, &digest).unwrap();

        assert!(dedup.register(&checksum, &file).await.unwrap());
        assert!(!dedup.register(&checksum, &file).await.unwrap());
        let slot = dedup.store().path_for(&checksum);
        assert_eq!(tokio::fs::read(&slot).await.unwrap(), b"fresh");
    }

    fn staging_files(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".link"))
            .collect()
    }

    #[test]
    fn test_copy_failure_removes_staging_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let from = temp.path().join("blob");
        std::fs::write(&from, b"bytes").unwrap();
        // A non-empty directory cannot be replaced by a rename.
        let to = temp.path().join("occupied");
        std::fs::create_dir_all(to.join("child")).unwrap();

        let result = copy_into_place(&from, &to);
        assert!(matches!(result, Err(DedupError::Io { .. })));
        assert!(staging_files(temp.path()).is_empty());
    }

    #[tokio::test]
    async fn test_interrupted_copy_leaves_no_staging_file() {
        let temp = tempfile::TempDir::new().unwrap();
        let store = ContentStore::new(temp.path().join("store"));
        let content = vec![0x5a_u8; 8 * 1024 * 1024];
        let checksum = stored_file(&store, &content).await;
        let dedup = Deduplicator::new(store, LinkMode::Copy);

        let repo = temp.path().join("repo");
        let destination = repo.join("big.rpm");
        let _ = tokio::time::timeout(
            std::time::Duration::from_millis(1),
            dedup.materialize(&checksum, Some(content.len() as u64), &destination),
        )
        .await;

        // The copy finishes or unwinds on its blocking thread after the
        // caller has gone away.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while repo.exists() && !staging_files(&repo).is_empty() {
            assert!(std::time::Instant::now() < deadline, "staging file left behind");
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        if destination.exists() {
            assert_eq!(tokio::fs::read(&destination).await.unwrap(), content);
        }
    }
}
