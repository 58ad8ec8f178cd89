use std::collections::BTreeSet;
use std::path::Path;

use encoding_rs::Encoding as Codec;

use super::container::MobiContainer;
use super::exth::{
    parse_date, EXTH_AUTHOR, EXTH_DESCRIPTION, EXTH_ISBN, EXTH_LANGUAGE, EXTH_PUBLISHER,
    EXTH_SUBJECT, EXTH_UPDATED_TITLE,
};
use super::langcodes::mobi_to_iana;
use crate::error::Result;
use crate::io::ContainerStream;
use crate::metadata::{CoverData, ImageFormat, Metadata};

/// Author reported when the book names none.
pub const UNKNOWN_AUTHOR: &str = "Unknown";

/// Read metadata from a MOBI file on disk.
pub fn read_metadata_from_path<P: AsRef<Path>>(path: P) -> Result<Metadata> {
    let mut file = std::fs::File::open(path)?;
    read_metadata(&mut file)
}

/// Read metadata from any container stream. Never writes to the stream.
pub fn read_metadata<S: ContainerStream + ?Sized>(stream: &mut S) -> Result<Metadata> {
    read_metadata_with_encoding(stream, None)
}

/// Like [`read_metadata`], decoding text with `user_encoding` when the
/// header names a codepage this crate does not know.
pub fn read_metadata_with_encoding<S: ContainerStream + ?Sized>(
    stream: &mut S,
    user_encoding: Option<&'static Codec>,
) -> Result<Metadata> {
    let container = MobiContainer::load(stream, user_encoding)?;
    extract_metadata(&container, stream)
}

pub(crate) fn extract_metadata<S: ContainerStream + ?Sized>(
    container: &MobiContainer,
    stream: &mut S,
) -> Result<Metadata> {
    let exth = container.exth();
    let text = |id: u32| exth.get(id).map(|data| container.decode(data));

    // Title priority: EXTH 503 > MOBI header > PDB name
    let title = text(EXTH_UPDATED_TITLE)
        .filter(|t| !t.is_empty())
        .or_else(|| {
            container
                .header
                .title_bytes(&container.record0)
                .ok()
                .map(|bytes| container.decode(bytes))
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| container.table.name.clone());

    let mut authors: Vec<String> = exth
        .get_all(EXTH_AUTHOR)
        .map(|data| container.decode(data).trim().to_string())
        .filter(|a| !a.is_empty())
        .collect();
    if authors.is_empty() {
        authors.push(UNKNOWN_AUTHOR.to_string());
    }

    let tags: BTreeSet<String> = exth
        .get_all(EXTH_SUBJECT)
        .flat_map(|data| {
            container
                .decode(data)
                .split(';')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
        })
        .collect();

    let pubdate = exth
        .timestamp()
        .and_then(|raw| parse_date(&container.decode(raw)));

    let language = text(EXTH_LANGUAGE)
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .or_else(|| mobi_to_iana(container.header.language))
        .unwrap_or_default();

    Ok(Metadata {
        title,
        authors,
        author_sort: None,
        publisher: text(EXTH_PUBLISHER).map(|p| p.trim().to_string()),
        comments: text(EXTH_DESCRIPTION),
        isbn: text(EXTH_ISBN).map(|isbn| isbn.trim().replace('-', "")),
        tags,
        pubdate,
        timestamp: None,
        language,
        cover_data: read_cover(container, stream)?,
    })
}

/// The cover record, if it holds a recognisable image.
fn read_cover<S: ContainerStream + ?Sized>(
    container: &MobiContainer,
    stream: &mut S,
) -> Result<Option<CoverData>> {
    let index = match container.exth().cover_offset() {
        Some(offset) => container.image_record(offset),
        None => container.image_base(),
    };
    let Some(index) = index else {
        return Ok(None);
    };

    let data = container.table.read_record(stream, index)?;
    Ok(ImageFormat::detect(&data).map(|format| CoverData { format, data }))
}
