//! Parsed view of an open MOBI container: record table, record 0, the MOBI
//! header and the EXTH block.

use encoding_rs::Encoding as Codec;

use super::exth::ExthBlock;
use super::headers::{MobiHeader, NULL_INDEX};
use super::pdb::PdbRecordTable;
use crate::error::{Error, Result};
use crate::io::ContainerStream;

/// End-of-file marker record written by Kindle tooling.
const EOF_RECORD: &[u8] = b"\xe9\x8e\r\n";

/// EXTH state after opening.
///
/// A container without an EXTH block gets an empty one in memory. It is
/// only ever written out as part of an update.
#[derive(Debug, Clone)]
pub enum ExthState {
    OnDisk(ExthBlock),
    Synthesized(ExthBlock),
}

impl ExthState {
    pub fn block(&self) -> &ExthBlock {
        match self {
            ExthState::OnDisk(block) | ExthState::Synthesized(block) => block,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, ExthState::Synthesized(_))
    }
}

#[derive(Debug, Clone)]
pub struct MobiContainer {
    pub table: PdbRecordTable,
    pub record0: Vec<u8>,
    pub header: MobiHeader,
    pub exth: ExthState,
    pub codec: &'static Codec,
}

impl MobiContainer {
    /// Read and validate the record table and record 0. Reads nothing past
    /// record 0 and never writes.
    pub fn load<S: ContainerStream + ?Sized>(
        stream: &mut S,
        user_encoding: Option<&'static Codec>,
    ) -> Result<Self> {
        let table = PdbRecordTable::read(stream)?;
        if table.is_empty() {
            return Err(Error::InvalidMobi("container has no records".into()));
        }

        let record0 = table.read_record(stream, 0)?;
        let header = MobiHeader::parse(&record0)?;
        let codec = header.encoding.codec(user_encoding);

        let exth = if header.has_exth() && header.header_length > 0 {
            match record0.get(header.exth_offset()..).map(ExthBlock::parse) {
                Some(Ok(block)) => ExthState::OnDisk(block),
                Some(Err(e)) => {
                    tracing::warn!("Ignoring unreadable EXTH block: {e}");
                    ExthState::Synthesized(ExthBlock::empty())
                }
                None => {
                    tracing::warn!(
                        "EXTH offset {} lies past the end of record 0 ({} bytes)",
                        header.exth_offset(),
                        record0.len()
                    );
                    ExthState::Synthesized(ExthBlock::empty())
                }
            }
        } else {
            ExthState::Synthesized(ExthBlock::empty())
        };

        tracing::debug!(
            "Opened {:?}: {} records, record 0 is {} bytes, header length {:#x}, EXTH {}",
            table.name,
            table.len(),
            record0.len(),
            header.header_length,
            if exth.is_synthesized() { "synthesized" } else { "present" }
        );

        Ok(Self {
            table,
            record0,
            header,
            exth,
            codec,
        })
    }

    pub fn exth(&self) -> &ExthBlock {
        self.exth.block()
    }

    /// Index of the first image record, when it names a real record.
    pub fn image_base(&self) -> Option<usize> {
        let base = self.header.first_image_index;
        (base != NULL_INDEX && (base as usize) < self.table.len()).then_some(base as usize)
    }

    /// Absolute record index for an offset relative to the image base.
    pub fn image_record(&self, offset: u32) -> Option<usize> {
        let index = self.image_base()?.checked_add(offset as usize)?;
        (index < self.table.len()).then_some(index)
    }

    /// Cover record offset relative to the image base.
    ///
    /// EXTH 201 wins. Without it the first image record is used, provided
    /// it is non-empty and not one of the structural trailer records.
    pub fn cover_slot<S: ContainerStream + ?Sized>(&self, stream: &mut S) -> Result<Option<u32>> {
        if let Some(offset) = self.exth().cover_offset() {
            return Ok(self.image_record(offset).map(|_| offset));
        }

        let Some(base) = self.image_base() else {
            return Ok(None);
        };
        let slice = self.table.slice(base)?;
        if slice.is_empty() {
            return Ok(None);
        }
        let magic = slice.read(stream, 0..8, 1)?;
        Ok((!is_structural_record(&magic)).then_some(0))
    }

    /// Thumbnail record offset relative to the image base (EXTH 202).
    pub fn thumbnail_slot(&self) -> Option<u32> {
        self.exth()
            .thumbnail_offset()
            .filter(|&offset| self.image_record(offset).is_some())
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        self.codec.decode_without_bom_handling(bytes).0.into_owned()
    }
}

/// Check if a record is metadata or structure rather than an image, from
/// its 4-byte signature.
pub fn is_structural_record(data: &[u8]) -> bool {
    if data.len() < 4 {
        return false;
    }
    matches!(
        &data[..4],
        b"FLIS" | b"FCIS" | b"SRCS" | b"BOUN" | b"FDST" | b"DATP"
        | b"AUDI" | b"VIDE" | b"RESC" | b"CMET" | b"PAGE" | b"CONT"
        | b"CRES" | b"FONT" | b"INDX"
    ) || data.starts_with(EOF_RECORD)
}
