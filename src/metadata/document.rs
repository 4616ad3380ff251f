//! Shared streaming plumbing for the metadata parsers.
//!
//! Documents are opened through a decompressing buffered reader chosen by
//! file extension and walked event by event, so memory use stays flat no
//! matter how many packages a listing holds.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use quick_xml::Reader;
use quick_xml::events::{BytesStart, BytesText, Event};
use tracing::debug;

use super::{FileKind, FileReference, MetadataError};
use crate::checksum::Checksum;

const READ_BUFFER: usize = 128 * 1024;

/// Compression applied to a metadata document, derived from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    Xz,
    Zstd,
    Bzip2,
}

impl Compression {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("gz") => Self::Gzip,
            Some("xz") => Self::Xz,
            Some("zst") => Self::Zstd,
            Some("bz2") => Self::Bzip2,
            _ => Self::None,
        }
    }
}

/// Opens `path` as a decompressed, buffered byte stream.
///
/// # Errors
///
/// Returns [`MetadataError::Io`] if the file cannot be opened or the
/// decompressor cannot be initialised.
pub fn open_document(path: &Path) -> Result<Box<dyn BufRead + Send>, MetadataError> {
    let file = File::open(path).map_err(|e| MetadataError::io(path, e))?;
    let compression = Compression::from_path(path);
    debug!(path = %path.display(), ?compression, "opening metadata document");

    let reader: Box<dyn BufRead + Send> = match compression {
        Compression::None => Box::new(BufReader::with_capacity(READ_BUFFER, file)),
        Compression::Gzip => Box::new(BufReader::with_capacity(
            READ_BUFFER,
            flate2::read::MultiGzDecoder::new(file),
        )),
        Compression::Xz => Box::new(BufReader::with_capacity(
            READ_BUFFER,
            xz2::read::XzDecoder::new_multi_decoder(file),
        )),
        Compression::Zstd => Box::new(BufReader::with_capacity(
            READ_BUFFER,
            zstd::stream::read::Decoder::new(file).map_err(|e| MetadataError::io(path, e))?,
        )),
        Compression::Bzip2 => Box::new(BufReader::with_capacity(
            READ_BUFFER,
            bzip2::read::MultiBzDecoder::new(file),
        )),
    };
    Ok(reader)
}

/// XML reader over a metadata document plus the path for error context.
pub struct Document {
    path: PathBuf,
    reader: Reader<Box<dyn BufRead + Send>>,
    open_elements: usize,
    seen_root: bool,
}

impl Document {
    /// Opens `path` for streaming.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Io`] if the document cannot be opened.
    pub fn open(path: &Path) -> Result<Self, MetadataError> {
        let mut reader = Reader::from_reader(open_document(path)?);
        reader.config_mut().trim_text(true);
        Ok(Self {
            path: path.to_path_buf(),
            reader,
            open_elements: 0,
            seen_root: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the next event into `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::Xml`] for malformed input,
    /// [`MetadataError::Io`] for read or decompression failures and
    /// [`MetadataError::Truncated`] when input ends inside an element or
    /// before any root element.
    pub fn next_event<'b>(&mut self, buf: &'b mut Vec<u8>) -> Result<Event<'b>, MetadataError> {
        let event = match self.reader.read_event_into(buf) {
            Ok(event) => event,
            Err(e) => return Err(self.xml_error(e)),
        };
        match &event {
            Event::Start(_) => {
                self.open_elements += 1;
                self.seen_root = true;
            }
            Event::Empty(_) => self.seen_root = true,
            Event::End(_) => self.open_elements = self.open_elements.saturating_sub(1),
            Event::Eof if self.open_elements > 0 || !self.seen_root => {
                return Err(MetadataError::Truncated {
                    path: self.path.clone(),
                    open_elements: self.open_elements,
                });
            }
            _ => {}
        }
        Ok(event)
    }

    /// Wraps a parser error with the current position.
    pub fn xml_error(&self, source: impl Into<quick_xml::Error>) -> MetadataError {
        let source = source.into();
        // Decompression failures surface as I/O errors inside quick-xml.
        if let quick_xml::Error::Io(io) = &source {
            return MetadataError::io(
                &self.path,
                std::io::Error::new(io.kind(), io.to_string()),
            );
        }
        let position = u64::try_from(self.reader.buffer_position()).unwrap_or(u64::MAX);
        MetadataError::xml(&self.path, position, source)
    }

    /// Unescaped value of attribute `name`, if present.
    pub fn attribute(&self, element: &BytesStart<'_>, name: &[u8]) -> Result<Option<String>, MetadataError> {
        match element.try_get_attribute(name) {
            Ok(Some(attr)) => attr
                .unescape_value()
                .map(|v| Some(v.into_owned()))
                .map_err(|e| self.xml_error(e)),
            Ok(None) => Ok(None),
            Err(e) => Err(self.xml_error(e)),
        }
    }

    /// Unescaped text content.
    pub fn text(&self, text: &BytesText<'_>) -> Result<String, MetadataError> {
        text.unescape()
            .map(std::borrow::Cow::into_owned)
            .map_err(|e| self.xml_error(e))
    }

    /// Parses a decimal size value.
    pub fn size(&self, raw: &str) -> Result<u64, MetadataError> {
        raw.trim().parse::<u64>().map_err(|_| {
            MetadataError::invalid_value(&self.path, format!("size '{raw}' is not a byte count"))
        })
    }
}

/// Fields of one entry collected while its element is open.
#[derive(Debug, Default)]
pub struct EntryFields {
    pub location: Option<String>,
    pub checksum_type: Option<String>,
    pub checksum_value: String,
    pub size: Option<u64>,
}

impl EntryFields {
    /// Validates the collected fields into a reference.
    ///
    /// # Errors
    ///
    /// Returns [`MetadataError::MissingField`] for an absent location or
    /// checksum and [`MetadataError::Checksum`] for an unusable checksum.
    pub fn build(
        self,
        path: &Path,
        element: &'static str,
        entry: usize,
        kind: FileKind,
    ) -> Result<FileReference, MetadataError> {
        let location = self
            .location
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| MetadataError::missing_field(path, element, entry, "location"))?;
        if self.checksum_value.trim().is_empty() {
            return Err(MetadataError::missing_field(path, element, entry, "checksum"));
        }
        let checksum = Checksum::from_attributes(self.checksum_type.as_deref(), &self.checksum_value)
            .map_err(|source| MetadataError::Checksum {
                path: path.to_path_buf(),
                element,
                entry,
                source,
            })?;
        Ok(FileReference::new(location.trim(), checksum, self.size, kind))
    }
}

/// Ordered reference list that keeps the first entry per location.
#[derive(Debug, Default)]
pub struct ReferenceList {
    seen: HashSet<String>,
    references: Vec<FileReference>,
}

impl ReferenceList {
    pub fn push(&mut self, reference: FileReference) {
        if self.seen.insert(reference.location().to_string()) {
            self.references.push(reference);
        } else {
            debug!(location = reference.location(), "dropping duplicate location");
        }
    }

    pub fn into_vec(self) -> Vec<FileReference> {
        self.references
    }
}

/// Architectures that mark source packages.
pub fn is_source_arch(arch: &str) -> bool {
    matches!(arch.trim(), "src" | "nosrc")
}
