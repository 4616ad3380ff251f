//! Repository metadata parsers.
//!
//! Each parser is a pure transform from a document on disk to an ordered
//! list of [`FileReference`]s. Documents may be plain or compressed with
//! gzip, xz, zstd or bzip2; the compression is chosen from the extension.

mod deltainfo;
mod document;
mod error;
mod primary;
mod reference;
mod repomd;

pub use deltainfo::parse_deltainfo;
pub use document::{Compression, open_document};
pub use error::MetadataError;
pub use primary::parse_primary;
pub use reference::{FileKind, FileReference};
pub use repomd::parse_repomd;
