//! In-place metadata updates for MOBI containers.
//!
//! An update rebuilds record 0 with a fresh EXTH block and the original
//! title bytes, shifts every later record by the size difference, and
//! rewrites cover and thumbnail records inside their existing slots. The
//! complete new image is staged in memory and re-validated before a single
//! byte reaches the stream.

use std::fs;
use std::io::Write;
use std::path::Path;

use encoding_rs::Encoding as Codec;
use tempfile::NamedTempFile;

use super::be::write_u32_be;
use super::container::MobiContainer;
use super::cover::{rescale_image, MAX_THUMB_DIMEN};
use super::exth::{ExthBlock, ImageSlots};
use super::headers::{
    MobiHeader, EXTH_FLAG, EXTH_FLAGS_POS, HEADER_LENGTH_POS, LANGUAGE_POS, PALMDOC_HEADER_LEN,
    TITLE_LENGTH_POS, TITLE_OFFSET_POS,
};
use super::langcodes::iana_to_mobi;
use super::pdb::{BookType, PdbRecordTable, RECORD_TABLE_OFFSET};
use super::reader::extract_metadata;
use crate::error::{Error, Result};
use crate::io::{ContainerStream, RecordSlice};
use crate::metadata::{Metadata, UpdateOptions};

/// Header length written by older tools, one word short of the primary
/// index pointer.
const SHORT_HEADER_LENGTH: u32 = 0xE4;
const EXTENDED_HEADER_LENGTH: u32 = 0xE8;
const PRIMARY_INDEX_POS: usize = 0xF4;

/// A fully rebuilt container image, validated and ready to commit.
#[derive(Debug, Clone)]
pub struct StagedImage {
    bytes: Vec<u8>,
    delta: i64,
}

impl StagedImage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Size change of record 0, which every later record shifts by.
    pub fn delta(&self) -> i64 {
        self.delta
    }
}

/// Reads and rewrites the metadata of one open container.
///
/// Opening parses the record table, record 0 and the EXTH block (an empty
/// one is synthesized in memory when the book has none) without writing.
/// [`MetadataUpdater::update`] is the only operation that touches the
/// stream.
pub struct MetadataUpdater<S: ContainerStream> {
    stream: S,
    container: MobiContainer,
    user_encoding: Option<&'static Codec>,
}

impl<S: ContainerStream> MetadataUpdater<S> {
    pub fn open(stream: S) -> Result<Self> {
        Self::open_with_encoding(stream, None)
    }

    /// Open with a fallback codec for unknown codepages.
    pub fn open_with_encoding(mut stream: S, user_encoding: Option<&'static Codec>) -> Result<Self> {
        let container = MobiContainer::load(&mut stream, user_encoding)?;
        Ok(Self {
            stream,
            container,
            user_encoding,
        })
    }

    pub fn header(&self) -> &MobiHeader {
        &self.container.header
    }

    pub fn exth(&self) -> &ExthBlock {
        self.container.exth()
    }

    pub fn table(&self) -> &PdbRecordTable {
        &self.container.table
    }

    /// True when the container had no EXTH block on disk.
    pub fn exth_synthesized(&self) -> bool {
        self.container.exth.is_synthesized()
    }

    /// Metadata currently stored in the container.
    pub fn metadata(&mut self) -> Result<Metadata> {
        extract_metadata(&self.container, &mut self.stream)
    }

    /// Build the updated container image without writing it.
    pub fn stage(&mut self, mi: &Metadata, options: &UpdateOptions) -> Result<StagedImage> {
        let container = &self.container;
        let table = &container.table;
        let header = &container.header;

        if table.book_type != BookType::Mobi {
            return Err(Error::UnsupportedFormat(format!(
                "Setting metadata only supported for MOBI files of type 'BOOK', not {:?}",
                String::from_utf8_lossy(table.book_type.tag())
            )));
        }
        if header.encryption != 0 {
            return Err(Error::DrmProtected {
                encryption: header.encryption,
            });
        }
        let header_length = header.header_length as usize;
        if header_length < EXTH_FLAGS_POS + 4 - PALMDOC_HEADER_LEN
            || container.record0.len() < header.exth_offset()
        {
            return Err(Error::MissingExth(format!(
                "record 0 ({} bytes, header length {:#x}) has no room for an EXTH block",
                container.record0.len(),
                header_length
            )));
        }

        let slots = ImageSlots {
            cover: container.cover_slot(&mut self.stream)?,
            thumbnail: container.thumbnail_slot(),
        };
        let exth = ExthBlock::for_update(mi, container.exth(), slots, container.codec, *options)
            .encode();
        let title = header.title_bytes(&container.record0)?;
        let record0 = rebuild_record0(container, &exth, title, &mi.language);

        // Every record after 0 keeps its length and moves by the same delta.
        let mut lengths = Vec::with_capacity(table.len());
        lengths.push(record0.len() as u64);
        for i in 1..table.len() {
            lengths.push(table.record_len(i)?);
        }
        let mut offsets = Vec::with_capacity(table.len());
        let mut offset = table.records[0].offset as u64;
        for len in &lengths {
            offsets.push(u32::try_from(offset).map_err(|_| {
                Error::structural("record table", format!("offset {offset} overflows"))
            })?);
            offset += len;
        }
        let delta = record0.len() as i64 - table.record_len(0)? as i64;
        tracing::debug!(
            "Record 0 grows from {} to {} bytes (delta {delta})",
            table.record_len(0)?,
            record0.len()
        );

        let mut bytes = Vec::with_capacity(offset as usize);
        bytes.extend(RecordSlice::new(0, table.records[0].offset as u64).read_all(&mut self.stream)?);
        bytes[RECORD_TABLE_OFFSET..table.table_end()].copy_from_slice(&table.encode_table(&offsets)?);
        bytes.extend_from_slice(&record0);
        for i in 1..table.len() {
            bytes.extend(table.read_record(&mut self.stream, i)?);
        }

        if let Some(cover) = &mi.cover_data {
            let image_records = [(slots.cover, None), (slots.thumbnail, Some(MAX_THUMB_DIMEN))];
            for (slot, dimen) in image_records {
                let Some(index) = slot.and_then(|offset| container.image_record(offset)) else {
                    continue;
                };
                let start = offsets[index] as usize;
                let size = lengths[index] as usize;
                if size == 0 {
                    tracing::warn!("Image record {index} is empty, not writing cover");
                    continue;
                }
                let mut image = rescale_image(&cover.data, size, dimen)?;
                image.resize(size, 0);
                bytes[start..start + size].copy_from_slice(&image);
                tracing::debug!("Wrote {size} byte image into record {index}");
            }
        }

        validate_image(&bytes, &lengths)?;
        Ok(StagedImage { bytes, delta })
    }

    /// Rewrite the container with `mi`.
    ///
    /// All failures before the commit leave the stream untouched. The commit
    /// itself is one truncate-and-write of the whole stream.
    pub fn update(&mut self, mi: &Metadata, options: &UpdateOptions) -> Result<()> {
        let staged = self.stage(mi, options)?;
        RecordSlice::whole(&mut self.stream)?.update(&mut self.stream, &[staged.as_bytes()])?;
        tracing::info!(
            "Updated metadata of {:?} ({} bytes, record 0 delta {})",
            self.container.table.name,
            staged.as_bytes().len(),
            staged.delta()
        );

        self.container = MobiContainer::load(&mut self.stream, self.user_encoding)?;
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Replace the metadata of an open container.
pub fn set_metadata<S: ContainerStream>(stream: S, mi: &Metadata) -> Result<()> {
    MetadataUpdater::open(stream)?.update(mi, &UpdateOptions::default())
}

/// Replace the metadata of a file on disk.
///
/// The new image is written to a temporary file next to `path` and renamed
/// over it, so a failure at any point leaves the original intact.
pub fn update_file<P: AsRef<Path>>(path: P, mi: &Metadata, options: &UpdateOptions) -> Result<()> {
    let path = path.as_ref();
    let file = fs::File::open(path)?;
    let permissions = file.metadata()?.permissions();
    let staged = MetadataUpdater::open(file)?.stage(mi, options)?;

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(staged.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.as_file().set_permissions(permissions)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::info!("Updated metadata of {}", path.display());
    Ok(())
}

/// New record 0: the MOBI header with patched fields, then the EXTH block,
/// then the title, then 1-4 NUL bytes.
fn rebuild_record0(container: &MobiContainer, exth: &[u8], title: &[u8], language: &str) -> Vec<u8> {
    let mut header_length = container.header.header_length;
    let mut head = container.record0[..container.header.exth_offset()].to_vec();

    if header_length == SHORT_HEADER_LENGTH {
        header_length = EXTENDED_HEADER_LENGTH;
        let end = PALMDOC_HEADER_LEN + header_length as usize;
        head = container.record0[..end.min(container.record0.len())].to_vec();
        head.resize(end, 0);
        write_u32_be(&mut head, HEADER_LENGTH_POS, header_length);
        write_u32_be(&mut head, PRIMARY_INDEX_POS, 0xFFFF_FFFF);
    }

    let flags = container.header.exth_flags | EXTH_FLAG;
    write_u32_be(&mut head, EXTH_FLAGS_POS, flags);
    let title_offset = (head.len() + exth.len()) as u32;
    write_u32_be(&mut head, TITLE_OFFSET_POS, title_offset);
    write_u32_be(&mut head, TITLE_LENGTH_POS, title.len() as u32);
    if !language.is_empty() {
        write_u32_be(&mut head, LANGUAGE_POS, iana_to_mobi(language));
    }

    let mut record0 = head;
    record0.extend_from_slice(exth);
    record0.extend_from_slice(title);
    let pad = 4 - record0.len() % 4;
    record0.resize(record0.len() + pad, 0);
    record0
}

/// Re-parse a staged image and check that every record starts where the
/// previous one ends and the last one ends at the end of the image.
fn validate_image(bytes: &[u8], lengths: &[u64]) -> Result<()> {
    let table = PdbRecordTable::parse(bytes)?;
    if table.len() != lengths.len() {
        return Err(Error::structural(
            "record table",
            format!("staged {} records, expected {}", table.len(), lengths.len()),
        ));
    }
    for (i, &expected) in lengths.iter().enumerate() {
        let (start, end) = table.record_range(i)?;
        if end - start != expected {
            return Err(Error::structural(
                format!("record {i}"),
                format!("staged length {} differs from {expected}", end - start),
            ));
        }
        if i > 0 && start != table.record_range(i - 1)?.1 {
            return Err(Error::structural(format!("record {i}"), "not contiguous"));
        }
    }

    let record0 = &bytes[table.record_range(0)?.0 as usize..table.record_range(0)?.1 as usize];
    let header = MobiHeader::parse(record0)?;
    let exth = record0
        .get(header.exth_offset()..)
        .ok_or_else(|| Error::MissingExth("staged EXTH offset past record 0".into()))?;
    ExthBlock::parse(exth)?;
    header.title_bytes(record0)?;
    Ok(())
}
