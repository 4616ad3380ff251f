//! Delta listing parser: one delta reference per `<delta>` inside
//! `<newpackage>`.

use std::path::Path;

use quick_xml::events::Event;
use tracing::{debug, instrument};

use super::document::{Document, EntryFields, ReferenceList, is_source_arch};
use super::{FileKind, FileReference, MetadataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Filename,
    Checksum,
    Size,
}

struct DeltaEntry {
    fields: EntryFields,
    depth: usize,
    field: Option<Field>,
}

/// Parses a delta listing into delta references.
///
/// The source filter applies to the `arch` attribute of the owning
/// `<newpackage>`.
///
/// # Errors
///
/// Returns a [`MetadataError`] on unreadable or malformed input, or when a
/// delta lacks its filename or checksum.
#[instrument(fields(path = %path.display()))]
pub fn parse_deltainfo(path: &Path, include_source: bool) -> Result<Vec<FileReference>, MetadataError> {
    let mut doc = Document::open(path)?;
    let mut buf = Vec::new();
    let mut references = ReferenceList::default();
    // Arch of the enclosing <newpackage>, if inside one.
    let mut package_arch: Option<String> = None;
    let mut entry: Option<DeltaEntry> = None;
    let mut ordinal = 0usize;
    let mut skipped = 0usize;

    loop {
        match doc.next_event(&mut buf)? {
            Event::Start(e) => match entry.as_mut() {
                Some(current) => {
                    current.depth += 1;
                    if current.depth == 2 {
                        current.field = match e.local_name().as_ref() {
                            b"filename" => Some(Field::Filename),
                            b"size" => Some(Field::Size),
                            b"checksum" => {
                                current.fields.checksum_type = doc.attribute(&e, b"type")?;
                                Some(Field::Checksum)
                            }
                            _ => None,
                        };
                    }
                }
                None => match e.local_name().as_ref() {
                    b"newpackage" => {
                        package_arch = Some(doc.attribute(&e, b"arch")?.unwrap_or_default());
                    }
                    b"delta" if package_arch.is_some() => {
                        ordinal += 1;
                        entry = Some(DeltaEntry {
                            fields: EntryFields::default(),
                            depth: 1,
                            field: None,
                        });
                    }
                    _ => {}
                },
            },
            Event::Text(t) => {
                if let Some(current) = entry.as_mut()
                    && let Some(field) = current.field
                {
                    let text = doc.text(&t)?;
                    match field {
                        Field::Filename => {
                            current
                                .fields
                                .location
                                .get_or_insert_with(String::new)
                                .push_str(&text);
                        }
                        Field::Checksum => current.fields.checksum_value.push_str(&text),
                        Field::Size => current.fields.size = Some(doc.size(&text)?),
                    }
                }
            }
            Event::End(e) => match entry.as_mut() {
                Some(current) => {
                    current.depth -= 1;
                    current.field = None;
                    if current.depth == 0
                        && let Some(done) = entry.take()
                    {
                        let arch = package_arch.as_deref().unwrap_or_default();
                        if is_source_arch(arch) && !include_source {
                            skipped += 1;
                        } else {
                            references.push(done.fields.build(
                                doc.path(),
                                "delta",
                                ordinal,
                                FileKind::Delta,
                            )?);
                        }
                    }
                }
                None => {
                    if e.local_name().as_ref() == b"newpackage" {
                        package_arch = None;
                    }
                }
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let references = references.into_vec();
    debug!(deltas = references.len(), skipped, "parsed delta listing");
    Ok(references)
}
