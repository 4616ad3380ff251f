//! The mirror cycle: license, metadata, data, publish.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::error::{MirrorCause, MirrorFailure, MirrorPhase};
use super::report::{ArtifactStatus, FileFailure, LicenseOutcome, MirrorReport, SignatureOutcome};
use super::session::MirrorSession;
use super::target::RepositoryTarget;
use crate::dedup::{DedupError, Deduplicator, Materialized};
use crate::download::{Downloader, FetchSource, resolve_local_path};
use crate::metadata::{
    FileKind, FileReference, MetadataError, parse_deltainfo, parse_primary, parse_repomd,
};

const INDEX_LOCATION: &str = "repodata/repomd.xml";
const INDEX_KEY_LOCATION: &str = "repodata/repomd.xml.key";
const INDEX_SIGNATURE_LOCATION: &str = "repodata/repomd.xml.asc";
const REPODATA_DIR: &str = "repodata";
const OLD_REPODATA_DIR: &str = ".old_repodata";
const LICENSE_DIR: &str = "product.license";
const LICENSE_MANIFEST: &str = "directory.yast";

/// What to do when some packages cannot be mirrored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Publish metadata anyway and report the failures.
    #[default]
    Continue,
    /// Fail the cycle; the previous metadata stays published.
    Abort,
}

/// Settings shared by every cycle a [`Mirror`] runs.
#[derive(Debug, Clone, Default)]
pub struct MirrorOptions {
    /// Parent of per-cycle scratch directories; each destination when
    /// `None`. Must be on the same filesystem as the destinations for
    /// publishing to succeed.
    pub scratch_base: Option<PathBuf>,
    pub failure_policy: FailurePolicy,
}

/// Counters accumulated while fetching packages and deltas.
#[derive(Debug, Default)]
struct DataStats {
    already_present: usize,
    deduplicated: usize,
    downloaded: usize,
    failures: Vec<FileFailure>,
}

/// Runs mirror cycles.
///
/// Cheap to clone; clones may mirror different targets concurrently.
#[derive(Debug, Clone)]
pub struct Mirror {
    downloader: Downloader,
    dedup: Deduplicator,
    options: MirrorOptions,
}

impl Mirror {
    #[must_use]
    pub fn new(downloader: Downloader, dedup: Deduplicator, options: MirrorOptions) -> Self {
        Self {
            downloader,
            dedup,
            options,
        }
    }

    /// Mirrors `target` once.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorFailure::Failed`] naming the phase that failed. The
    /// published metadata is only replaced when every required phase
    /// succeeded.
    pub async fn mirror(&self, target: &RepositoryTarget) -> Result<MirrorReport, MirrorFailure> {
        self.mirror_with_cancellation(target, CancellationToken::new())
            .await
    }

    /// Mirrors `target`, stopping early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`MirrorFailure::Cancelled`] when interrupted and
    /// [`MirrorFailure::Failed`] otherwise. Either way the scratch directory
    /// is removed and the published metadata is left as it was.
    #[instrument(
        skip(self, target, cancel),
        fields(source = %target.source_url(), destination = %target.destination().display())
    )]
    pub async fn mirror_with_cancellation(
        &self,
        target: &RepositoryTarget,
        cancel: CancellationToken,
    ) -> Result<MirrorReport, MirrorFailure> {
        let started = Instant::now();
        info!("mirroring repository");

        ensure_active(&cancel, MirrorPhase::Init)?;
        let mut session = MirrorSession::open(target, self.options.scratch_base.as_deref())
            .map_err(|cause| MirrorFailure::failed(MirrorPhase::Init, cause))?;

        ensure_active(&cancel, MirrorPhase::LicenseBestEffort)?;
        let license = guarded(&cancel, MirrorPhase::LicenseBestEffort, self.mirror_license(target))
            .await?;

        ensure_active(&cancel, MirrorPhase::MetadataRequired)?;
        let (metadata_files, signature) = self
            .mirror_metadata(&mut session, &cancel)
            .await
            .map_err(|e| e.into_failure(MirrorPhase::MetadataRequired))?;

        ensure_active(&cancel, MirrorPhase::DataFetch)?;
        let stats = self
            .mirror_data(&session, &cancel)
            .await
            .map_err(|e| e.into_failure(MirrorPhase::DataFetch))?;

        ensure_active(&cancel, MirrorPhase::PublishAtomic)?;
        publish(&session)
            .await
            .map_err(|cause| MirrorFailure::failed(MirrorPhase::PublishAtomic, cause))?;
        drop(session);

        let report = MirrorReport {
            metadata_files,
            already_present: stats.already_present,
            deduplicated: stats.deduplicated,
            downloaded: stats.downloaded,
            failures: stats.failures,
            license,
            signature,
            elapsed: started.elapsed(),
        };
        info!(
            metadata = report.metadata_files,
            present = report.already_present,
            deduplicated = report.deduplicated,
            downloaded = report.downloaded,
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis(),
            "repository mirrored"
        );
        Ok(report)
    }

    /// Fetches the product license files listed by `directory.yast`.
    ///
    /// Licenses live beside the repository and are fetched without the
    /// repository's token. Nothing here fails the cycle.
    async fn mirror_license(&self, target: &RepositoryTarget) -> LicenseOutcome {
        let Some(source) = license_source(target) else {
            debug!("repository URL has no parent for product licenses");
            return LicenseOutcome::without_manifest(ArtifactStatus::Absent);
        };

        let manifest = self.downloader.fetch(&source, LICENSE_MANIFEST, None).await;
        let manifest_path = match manifest {
            Ok(path) => path,
            Err(e) => {
                info!(error = %e, "no product license found");
                return LicenseOutcome::without_manifest(ArtifactStatus::from_result(&Err(e)));
            }
        };

        let listing = match tokio::fs::read_to_string(&manifest_path).await {
            Ok(listing) => listing,
            Err(e) => {
                warn!(path = %manifest_path.display(), error = %e, "cannot read license manifest");
                return LicenseOutcome::without_manifest(ArtifactStatus::Failed {
                    reason: e.to_string(),
                });
            }
        };

        let mut outcome = LicenseOutcome::without_manifest(ArtifactStatus::Fetched);
        for name in listing
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != LICENSE_MANIFEST)
        {
            match self.downloader.fetch(&source, name, None).await {
                Ok(_) => outcome.fetched += 1,
                Err(e) => {
                    warn!(file = name, error = %e, "failed to fetch license file");
                    outcome.failed.push(name.to_string());
                }
            }
        }
        debug!(fetched = outcome.fetched, failed = outcome.failed.len(), "licenses mirrored");
        outcome
    }

    /// Stages the index and every document it references in scratch.
    async fn mirror_metadata(
        &self,
        session: &mut MirrorSession,
        cancel: &CancellationToken,
    ) -> Result<(usize, SignatureOutcome), PhaseError> {
        let target = session.target().clone();
        let source = FetchSource::new(target.source_url().clone(), session.scratch())
            .with_fallback_root(target.destination())
            .with_auth_token(target.auth_token().map(str::to_string));

        let index = guarded(cancel, MirrorPhase::MetadataRequired, async {
            self.downloader.fetch(&source, INDEX_LOCATION, None).await
        })
        .await?
        .map_err(|e| MirrorCause::download(INDEX_LOCATION, e))?;

        let key = guarded(
            cancel,
            MirrorPhase::MetadataRequired,
            self.downloader.fetch(&source, INDEX_KEY_LOCATION, None),
        )
        .await?;
        let asc = guarded(
            cancel,
            MirrorPhase::MetadataRequired,
            self.downloader.fetch(&source, INDEX_SIGNATURE_LOCATION, None),
        )
        .await?;
        let signature = SignatureOutcome {
            key: ArtifactStatus::from_result(&key),
            signature: ArtifactStatus::from_result(&asc),
        };
        if !signature.is_complete() {
            info!(?signature, "repository metadata signatures are missing");
        }

        let references = parse_blocking(index, |path| parse_repomd(&path)).await?;
        let document_count = references.len();

        let outcomes = guarded(
            cancel,
            MirrorPhase::MetadataRequired,
            self.downloader.fetch_batch(&source, references),
        )
        .await?;

        for outcome in outcomes {
            if let Err(e) = outcome.result {
                return Err(MirrorCause::download(outcome.reference.location(), e).into());
            }
            match outcome.reference.kind() {
                FileKind::PrimaryMetadata => session.add_primary(outcome.reference),
                FileKind::DeltainfoMetadata => session.add_deltainfo(outcome.reference),
                _ => {}
            }
        }

        info!(documents = document_count, "metadata staged");
        Ok((document_count + 1, signature))
    }

    /// Fetches packages and deltas named by the staged listings.
    async fn mirror_data(
        &self,
        session: &MirrorSession,
        cancel: &CancellationToken,
    ) -> Result<DataStats, PhaseError> {
        let target = session.target();
        let source = FetchSource::new(target.source_url().clone(), target.destination())
            .with_auth_token(target.auth_token().map(str::to_string));
        let mut stats = DataStats::default();

        for listing in session.listings() {
            let path = resolve_local_path(session.scratch(), listing.location())
                .map_err(|e| MirrorCause::download(listing.location(), e))?;
            let include_source = target.mirror_src();
            let references = match listing.kind() {
                FileKind::DeltainfoMetadata => {
                    parse_blocking(path, move |path| parse_deltainfo(&path, include_source)).await?
                }
                _ => parse_blocking(path, move |path| parse_primary(&path, include_source)).await?,
            };

            let queue = guarded(
                cancel,
                MirrorPhase::DataFetch,
                self.select_missing(target.destination(), references, &mut stats),
            )
            .await?;
            if queue.is_empty() {
                continue;
            }

            let outcomes = guarded(
                cancel,
                MirrorPhase::DataFetch,
                self.downloader.fetch_batch(&source, queue),
            )
            .await?;

            for outcome in outcomes {
                match outcome.result {
                    Ok(path) => {
                        stats.downloaded += 1;
                        if let Err(e) = self.dedup.register(outcome.reference.checksum(), &path).await {
                            warn!(path = %path.display(), error = %e, "failed to add file to content store");
                        }
                    }
                    Err(error) => stats.failures.push(FileFailure {
                        location: outcome.reference.location().to_string(),
                        kind: outcome.reference.kind(),
                        error,
                    }),
                }
            }

            if self.options.failure_policy == FailurePolicy::Abort && !stats.failures.is_empty() {
                return Err(MirrorCause::IncompleteData {
                    failed: stats.failures.len(),
                }
                .into());
            }
        }

        Ok(stats)
    }

    /// Drops references already present or satisfiable from the store.
    async fn select_missing(
        &self,
        root: &Path,
        references: Vec<FileReference>,
        stats: &mut DataStats,
    ) -> Vec<FileReference> {
        let mut queue = Vec::new();
        for reference in references {
            let destination = match resolve_local_path(root, reference.location()) {
                Ok(destination) => destination,
                Err(error) => {
                    warn!(location = reference.location(), error = %error, "rejecting unsafe location");
                    stats.failures.push(FileFailure {
                        location: reference.location().to_string(),
                        kind: reference.kind(),
                        error,
                    });
                    continue;
                }
            };

            if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
                stats.already_present += 1;
                continue;
            }

            match self
                .dedup
                .materialize(reference.checksum(), reference.size(), &destination)
                .await
            {
                Ok(Materialized::Linked) => {
                    info!(location = reference.location(), "deduplicated");
                    stats.deduplicated += 1;
                }
                Ok(Materialized::Absent) => queue.push(reference),
                Err(e @ DedupError::Mismatch { .. }) => {
                    debug!(location = reference.location(), error = %e, "deduplication ignored");
                    queue.push(reference);
                }
                Err(e) => {
                    warn!(location = reference.location(), error = %e, "deduplication failed");
                    queue.push(reference);
                }
            }
        }
        queue
    }
}

/// Failure inside a phase before the phase tag is attached.
enum PhaseError {
    Cause(MirrorCause),
    Cancelled(MirrorPhase),
}

impl PhaseError {
    fn into_failure(self, phase: MirrorPhase) -> MirrorFailure {
        match self {
            Self::Cause(cause) => MirrorFailure::failed(phase, cause),
            Self::Cancelled(phase) => MirrorFailure::Cancelled { phase },
        }
    }
}

impl From<MirrorCause> for PhaseError {
    fn from(cause: MirrorCause) -> Self {
        Self::Cause(cause)
    }
}

impl From<MirrorFailure> for PhaseError {
    fn from(failure: MirrorFailure) -> Self {
        match failure {
            MirrorFailure::Cancelled { phase } => Self::Cancelled(phase),
            MirrorFailure::Failed { cause, .. } => Self::Cause(cause),
        }
    }
}

fn ensure_active(cancel: &CancellationToken, phase: MirrorPhase) -> Result<(), MirrorFailure> {
    if cancel.is_cancelled() {
        info!(%phase, "mirror cancelled");
        return Err(MirrorFailure::Cancelled { phase });
    }
    Ok(())
}

/// Runs `future` unless `cancel` fires first; the future is dropped then.
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    phase: MirrorPhase,
    future: F,
) -> Result<F::Output, MirrorFailure> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => {
            info!(%phase, "mirror cancelled");
            Err(MirrorFailure::Cancelled { phase })
        }
        output = future => Ok(output),
    }
}

/// Runs a synchronous parser off the async runtime.
async fn parse_blocking<F>(path: PathBuf, parse: F) -> Result<Vec<FileReference>, MirrorCause>
where
    F: FnOnce(PathBuf) -> Result<Vec<FileReference>, MetadataError> + Send + 'static,
{
    let task_path = path.clone();
    match tokio::task::spawn_blocking(move || parse(task_path)).await {
        Ok(parsed) => parsed.map_err(MirrorCause::Parse),
        Err(e) => Err(MirrorCause::Parse(MetadataError::io(
            path,
            std::io::Error::other(format!("parser task failed: {e}")),
        ))),
    }
}

/// Source and destination of the product license directory next to the
/// repository.
fn license_source(target: &RepositoryTarget) -> Option<FetchSource> {
    let url = target.source_url().join(&format!("../{LICENSE_DIR}/")).ok()?;
    let root = target.destination().parent()?.join(LICENSE_DIR);
    Some(FetchSource::new(url, root))
}

/// Swaps staged `repodata` into the destination, keeping the previous
/// generation as `.old_repodata`.
async fn publish(session: &MirrorSession) -> Result<(), MirrorCause> {
    let destination = session.target().destination();
    let live = destination.join(REPODATA_DIR);
    let old = destination.join(OLD_REPODATA_DIR);
    let staged = session.scratch().join(REPODATA_DIR);

    if tokio::fs::try_exists(&old).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(&old)
            .await
            .map_err(|e| MirrorCause::publish(&old, e))?;
    }
    let had_live = tokio::fs::try_exists(&live).await.unwrap_or(false);
    if had_live {
        tokio::fs::rename(&live, &old)
            .await
            .map_err(|e| MirrorCause::publish(&live, e))?;
    }
    if let Err(e) = tokio::fs::rename(&staged, &live).await {
        if had_live && let Err(restore) = tokio::fs::rename(&old, &live).await {
            warn!(error = %restore, "failed to restore previous metadata");
        }
        return Err(MirrorCause::publish(&live, e));
    }

    info!(path = %live.display(), "metadata published");
    Ok(())
}
