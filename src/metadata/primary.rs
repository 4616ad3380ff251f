//! Primary listing parser: one package reference per `<package>`.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use tracing::{debug, instrument};

use super::document::{Document, EntryFields, ReferenceList, is_source_arch};
use super::{FileKind, FileReference, MetadataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Arch,
    Checksum,
}

#[derive(Default)]
struct PackageEntry {
    arch: String,
    fields: EntryFields,
    depth: usize,
    field: Option<Field>,
}

/// Parses a primary listing into package references.
///
/// Packages whose `<arch>` is `src` or `nosrc` are skipped unless
/// `include_source` is set. Nested `<format>` content is not inspected.
///
/// # Errors
///
/// Returns a [`MetadataError`] on unreadable or malformed input, or when a
/// package lacks its location or checksum.
#[instrument(fields(path = %path.display()))]
pub fn parse_primary(path: &Path, include_source: bool) -> Result<Vec<FileReference>, MetadataError> {
    let mut doc = Document::open(path)?;
    let mut buf = Vec::new();
    let mut references = ReferenceList::default();
    let mut entry: Option<PackageEntry> = None;
    let mut ordinal = 0usize;
    let mut skipped = 0usize;

    loop {
        match doc.next_event(&mut buf)? {
            Event::Start(e) => match entry.as_mut() {
                None if e.local_name().as_ref() == b"package" => {
                    ordinal += 1;
                    entry = Some(PackageEntry {
                        depth: 1,
                        ..PackageEntry::default()
                    });
                }
                None => {}
                Some(current) => {
                    current.depth += 1;
                    if current.depth == 2 {
                        current.field = child_start(&doc, &e, &mut current.fields)?;
                    }
                }
            },
            Event::Empty(e) => {
                if let Some(current) = entry.as_mut()
                    && current.depth == 1
                {
                    child_start(&doc, &e, &mut current.fields)?;
                }
            }
            Event::Text(t) => {
                if let Some(current) = entry.as_mut()
                    && let Some(field) = current.field
                {
                    let text = doc.text(&t)?;
                    match field {
                        Field::Arch => current.arch.push_str(&text),
                        Field::Checksum => current.fields.checksum_value.push_str(&text),
                    }
                }
            }
            Event::End(_) => {
                if let Some(current) = entry.as_mut() {
                    current.depth -= 1;
                    current.field = None;
                    if current.depth == 0
                        && let Some(done) = entry.take()
                    {
                        if is_source_arch(&done.arch) && !include_source {
                            skipped += 1;
                        } else {
                            references.push(done.fields.build(
                                doc.path(),
                                "package",
                                ordinal,
                                FileKind::Package,
                            )?);
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let references = references.into_vec();
    debug!(packages = references.len(), skipped, "parsed primary listing");
    Ok(references)
}

fn child_start(
    doc: &Document,
    element: &BytesStart<'_>,
    fields: &mut EntryFields,
) -> Result<Option<Field>, MetadataError> {
    match element.local_name().as_ref() {
        b"arch" => Ok(Some(Field::Arch)),
        b"checksum" => {
            fields.checksum_type = doc.attribute(element, b"type")?;
            Ok(Some(Field::Checksum))
        }
        b"location" => {
            fields.location = doc.attribute(element, b"href")?;
            Ok(None)
        }
        b"size" => {
            if let Some(raw) = doc.attribute(element, b"package")? {
                fields.size = Some(doc.size(&raw)?);
            }
            Ok(None)
        }
        _ => Ok(None),
    }
}
