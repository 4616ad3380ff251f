//! Index document (`repodata/repomd.xml`) parser.

use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use tracing::{debug, instrument};

use super::document::{Document, EntryFields, ReferenceList};
use super::{FileKind, FileReference, MetadataError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Checksum,
    Size,
}

struct DataEntry {
    data_type: String,
    fields: EntryFields,
    depth: usize,
    field: Option<Field>,
}

/// Parses an index document into one reference per `<data>` entry.
///
/// Only `<checksum>`, `<location href>` and `<size>` are read; the
/// `open-checksum`/`open-size` pair describing the decompressed document
/// is ignored.
///
/// # Errors
///
/// Returns a [`MetadataError`] on unreadable or malformed input, or when an
/// entry lacks its location or checksum.
#[instrument(fields(path = %path.display()))]
pub fn parse_repomd(path: &Path) -> Result<Vec<FileReference>, MetadataError> {
    let mut doc = Document::open(path)?;
    let mut buf = Vec::new();
    let mut references = ReferenceList::default();
    let mut entry: Option<DataEntry> = None;
    let mut ordinal = 0usize;

    loop {
        match doc.next_event(&mut buf)? {
            Event::Start(e) => match entry.as_mut() {
                None if e.local_name().as_ref() == b"data" => {
                    ordinal += 1;
                    entry = Some(open_entry(&doc, &e)?);
                }
                None => {}
                Some(current) => {
                    current.depth += 1;
                    if current.depth == 2 {
                        current.field = child_start(&doc, &e, &mut current.fields)?;
                    }
                }
            },
            Event::Empty(e) => match entry.as_mut() {
                None if e.local_name().as_ref() == b"data" => {
                    ordinal += 1;
                    let current = open_entry(&doc, &e)?;
                    references.push(finish_entry(&doc, current, ordinal)?);
                }
                None => {}
                Some(current) if current.depth == 1 => {
                    child_start(&doc, &e, &mut current.fields)?;
                }
                Some(_) => {}
            },
            Event::Text(t) => {
                if let Some(current) = entry.as_mut()
                    && let Some(field) = current.field
                {
                    let text = doc.text(&t)?;
                    match field {
                        Field::Checksum => current.fields.checksum_value.push_str(&text),
                        Field::Size => current.fields.size = Some(doc.size(&text)?),
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
                        references.push(finish_entry(&doc, done, ordinal)?);
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    let references = references.into_vec();
    debug!(entries = references.len(), "parsed index document");
    Ok(references)
}

fn open_entry(doc: &Document, element: &BytesStart<'_>) -> Result<DataEntry, MetadataError> {
    Ok(DataEntry {
        data_type: doc.attribute(element, b"type")?.unwrap_or_default(),
        fields: EntryFields::default(),
        depth: 1,
        field: None,
    })
}

/// Records a direct child of `<data>`; returns the field its text fills.
fn child_start(
    doc: &Document,
    element: &BytesStart<'_>,
    fields: &mut EntryFields,
) -> Result<Option<Field>, MetadataError> {
    match element.local_name().as_ref() {
        b"checksum" => {
            fields.checksum_type = doc.attribute(element, b"type")?;
            Ok(Some(Field::Checksum))
        }
        b"location" => {
            fields.location = doc.attribute(element, b"href")?;
            Ok(None)
        }
        b"size" => Ok(Some(Field::Size)),
        _ => Ok(None),
    }
}

fn finish_entry(
    doc: &Document,
    entry: DataEntry,
    ordinal: usize,
) -> Result<FileReference, MetadataError> {
    let kind = FileKind::from_index_type(&entry.data_type);
    entry.fields.build(doc.path(), "data", ordinal, kind)
}
