//! Mirror cycle orchestration.
//!
//! A [`Mirror`] composes the downloader, the metadata parsers and the
//! deduplicator into one repeatable cycle per [`RepositoryTarget`]:
//!
//! 1. **Init**: create the destination, take its lock, open a scratch directory
//! 2. **License**: best-effort fetch of `../product.license/`
//! 3. **Metadata**: stage the index and every referenced document in scratch
//! 4. **Data**: fetch deltas and packages not already present or stored
//! 5. **Publish**: rename staged `repodata` into place, keeping `.old_repodata`
//!
//! Published metadata only changes in step 5, so a failed or cancelled cycle
//! leaves the previous generation untouched.

mod error;
mod orchestrator;
mod report;
mod session;
mod target;

pub use error::{MirrorCause, MirrorFailure, MirrorPhase};
pub use orchestrator::{FailurePolicy, Mirror, MirrorOptions};
pub use report::{ArtifactStatus, FileFailure, LicenseOutcome, MirrorReport, SignatureOutcome};
pub use session::LOCK_FILE_NAME;
pub use target::RepositoryTarget;
