use encoding_rs::{Encoding as Codec, UTF_8, WINDOWS_1252};

use super::be::{read_u16_be, read_u32_be};
use crate::error::{Error, Result};

pub const NULL_INDEX: u32 = 0xFFFFFFFF;

/// Size of the PalmDOC header that precedes the MOBI header in record 0.
pub const PALMDOC_HEADER_LEN: usize = 16;

/// Bit in the flags word at 0x80 that marks an EXTH block as present.
pub const EXTH_FLAG: u32 = 0x40;

pub const TITLE_OFFSET_POS: usize = 0x54;
pub const TITLE_LENGTH_POS: usize = 0x58;
pub const LANGUAGE_POS: usize = 0x5C;
pub const EXTH_FLAGS_POS: usize = 0x80;
pub const HEADER_LENGTH_POS: usize = 0x14;

/// MOBI Header (Record 0)
#[derive(Debug, Clone)]
#[allow(dead_code)] // Mirrors the on-disk layout; not every field is consumed
pub struct MobiHeader {
    pub compression: Compression,
    pub text_length: u32,
    pub text_record_count: u16,
    pub text_record_size: u16,
    pub encryption: u16,
    pub mobi_type: u32,
    pub encoding: Encoding,
    pub unique_id: u32,
    pub mobi_version: u32,
    pub first_image_index: u32,
    pub title_offset: u32,
    pub title_length: u32,
    pub language: u32,
    pub exth_flags: u32,
    pub extra_data_flags: u16,
    // HUFF/CDIC indices (for Huffman compression)
    pub huff_record_index: u32,
    pub huff_record_count: u32,
    // KF8 indices
    pub skel_index: u32,
    pub div_index: u32,
    pub datp_index: u32,
    pub oth_index: u32,
    pub fdst_index: u32,
    pub fdst_count: u32,
    pub ncx_index: u32,
    /// Length of the MOBI header proper; EXTH starts 16 bytes past it.
    pub header_length: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Compression {
    None,
    PalmDoc,
    Huffman,
    Unknown(u16),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Encoding {
    Cp1252,
    Utf8,
    Unknown(u32),
}

impl Encoding {
    pub fn from_codepage(codepage: u32) -> Self {
        match codepage {
            1252 => Encoding::Cp1252,
            65001 => Encoding::Utf8,
            n => Encoding::Unknown(n),
        }
    }

    /// The text codec for this codepage.
    ///
    /// Unknown codepages are common in the wild; they fall back to
    /// `fallback` (CP-1252 when not given) with a warning instead of failing.
    pub fn codec(&self, fallback: Option<&'static Codec>) -> &'static Codec {
        match self {
            Encoding::Utf8 => UTF_8,
            Encoding::Cp1252 => WINDOWS_1252,
            Encoding::Unknown(n) => {
                let codec = fallback.unwrap_or(WINDOWS_1252);
                tracing::warn!("Unknown codepage {n}. Assuming {}", codec.name());
                codec
            }
        }
    }
}

impl MobiHeader {
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PALMDOC_HEADER_LEN {
            return Err(Error::InvalidMobi("MOBI header too short".into()));
        }

        let u32_at = |offset: usize| read_u32_be(data, offset);

        let compression = match read_u16_be(data, 0).unwrap_or(0) {
            1 => Compression::None,
            2 => Compression::PalmDoc,
            0x4448 => Compression::Huffman, // "DH"
            n => Compression::Unknown(n),
        };

        let text_length = u32_at(4).unwrap_or(0);
        let text_record_count = read_u16_be(data, 8).unwrap_or(0);
        let text_record_size = read_u16_be(data, 10).unwrap_or(0);
        let encryption = read_u16_be(data, 12).unwrap_or(0);

        // Check if this is a minimal header
        if data.len() <= PALMDOC_HEADER_LEN {
            return Ok(Self {
                compression,
                text_length,
                text_record_count,
                text_record_size,
                encryption,
                mobi_type: 0,
                encoding: Encoding::Cp1252,
                unique_id: 0,
                mobi_version: 1,
                first_image_index: NULL_INDEX,
                title_offset: 0,
                title_length: 0,
                language: 0,
                exth_flags: 0,
                extra_data_flags: 0,
                huff_record_index: NULL_INDEX,
                huff_record_count: 0,
                skel_index: NULL_INDEX,
                div_index: NULL_INDEX,
                datp_index: NULL_INDEX,
                oth_index: NULL_INDEX,
                fdst_index: NULL_INDEX,
                fdst_count: 0,
                ncx_index: NULL_INDEX,
                header_length: 0,
            });
        }

        let header_length = u32_at(HEADER_LENGTH_POS).unwrap_or(0);
        let mobi_type = u32_at(24).unwrap_or(0);
        let encoding = Encoding::from_codepage(u32_at(28).unwrap_or(1252));
        let unique_id = u32_at(32).unwrap_or(0);

        // Title offset and length at 0x54-0x5C
        let title_offset = u32_at(TITLE_OFFSET_POS).unwrap_or(0);
        let title_length = u32_at(TITLE_LENGTH_POS).unwrap_or(0);
        let language = u32_at(LANGUAGE_POS).unwrap_or(0);
        let mobi_version = u32_at(0x68).unwrap_or(1);
        let first_image_index = u32_at(0x6C).unwrap_or(NULL_INDEX);

        // HUFF/CDIC indices at 0x70 and 0x74
        let huff_record_index = u32_at(0x70).unwrap_or(NULL_INDEX);
        let huff_record_count = u32_at(0x74).unwrap_or(0);

        let exth_flags = u32_at(EXTH_FLAGS_POS).unwrap_or(0);

        let extra_data_flags = if header_length >= 0xE4 {
            read_u16_be(data, 0xF2).unwrap_or(0)
        } else {
            0
        };

        // KF8 indices (MOBI version 8)
        let kf8 = mobi_version == 8;
        let kf8_index = |offset: usize| {
            if kf8 {
                u32_at(offset).unwrap_or(NULL_INDEX)
            } else {
                NULL_INDEX
            }
        };
        let fdst_index = kf8_index(0xC0);
        let fdst_count = if kf8 { u32_at(0xC4).unwrap_or(0) } else { 0 };
        let div_index = kf8_index(0xF8);
        let skel_index = kf8_index(0xFC);
        let datp_index = kf8_index(0x100);
        let oth_index = kf8_index(0x104);

        let ncx_index = u32_at(0xF4).unwrap_or(NULL_INDEX);

        Ok(Self {
            compression,
            text_length,
            text_record_count,
            text_record_size,
            encryption,
            mobi_type,
            encoding,
            unique_id,
            mobi_version,
            first_image_index,
            title_offset,
            title_length,
            language,
            exth_flags,
            extra_data_flags,
            huff_record_index,
            huff_record_count,
            skel_index,
            div_index,
            datp_index,
            oth_index,
            fdst_index,
            fdst_count,
            ncx_index,
            header_length,
        })
    }

    pub fn has_exth(&self) -> bool {
        self.exth_flags & EXTH_FLAG != 0
    }

    pub fn is_kf8(&self) -> bool {
        self.mobi_version == 8
    }

    /// Offset of the EXTH block within record 0.
    pub fn exth_offset(&self) -> usize {
        PALMDOC_HEADER_LEN + self.header_length as usize
    }

    /// The raw title bytes, after checking that the title offset and length
    /// actually fall inside record 0.
    pub fn title_bytes<'a>(&self, record0: &'a [u8]) -> Result<&'a [u8]> {
        let start = self.title_offset as usize;
        let end = start.checked_add(self.title_length as usize);
        match end {
            Some(end) if end <= record0.len() => Ok(&record0[start..end]),
            _ => Err(Error::structural(
                "record 0",
                format!(
                    "title at {}+{} exceeds record length {}",
                    self.title_offset,
                    self.title_length,
                    record0.len()
                ),
            )),
        }
    }
}
