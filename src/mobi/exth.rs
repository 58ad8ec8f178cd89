//! EXTH (extended header) metadata block.
//!
//! Layout: `"EXTH"`, header length (u32), entry count (u32), then `count`
//! entries of `(id: u32, size: u32, payload: size - 8 bytes)`. The block is
//! NUL-padded to a 4-byte boundary; the length field excludes the padding.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use encoding_rs::Encoding as Codec;

use super::be::{read_u32_be, write_u32_be};
use super::headers::NULL_INDEX;
use crate::error::{Error, Result};
use crate::metadata::{Metadata, UpdateOptions};

pub const EXTH_AUTHOR: u32 = 100;
pub const EXTH_PUBLISHER: u32 = 101;
pub const EXTH_DESCRIPTION: u32 = 103;
pub const EXTH_ISBN: u32 = 104;
pub const EXTH_SUBJECT: u32 = 105;
pub const EXTH_PUBDATE: u32 = 106;
pub const EXTH_ASIN: u32 = 113;
pub const EXTH_KF8_BOUNDARY: u32 = 121;
pub const EXTH_COVER_OFFSET: u32 = 201;
pub const EXTH_THUMBNAIL_OFFSET: u32 = 202;
pub const EXTH_FAKE_COVER: u32 = 203;
pub const EXTH_UPDATED_TITLE: u32 = 503;
pub const EXTH_LANGUAGE: u32 = 524;

/// Entry ids the updater regenerates. Everything else is carried over.
const MANAGED_IDS: &[u32] = &[
    EXTH_AUTHOR,
    EXTH_PUBLISHER,
    EXTH_DESCRIPTION,
    EXTH_ISBN,
    EXTH_SUBJECT,
    EXTH_PUBDATE,
    EXTH_COVER_OFFSET,
    EXTH_THUMBNAIL_OFFSET,
    EXTH_FAKE_COVER,
    EXTH_UPDATED_TITLE,
    EXTH_LANGUAGE,
];

const EXTH_PREAMBLE_LEN: usize = 12;
const ENTRY_HEADER_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExthRecord {
    pub id: u32,
    pub data: Vec<u8>,
}

/// A parsed EXTH block. Entries keep their on-disk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExthBlock {
    pub records: Vec<ExthRecord>,
}

impl ExthBlock {
    /// An EXTH block with no entries.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse an EXTH block from `data`, which must start at the magic.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < EXTH_PREAMBLE_LEN {
            return Err(Error::MissingExth("EXTH header too short".into()));
        }
        if &data[0..4] != b"EXTH" {
            return Err(Error::MissingExth("Invalid EXTH signature".into()));
        }

        let header_length = read_u32_be(data, 4).unwrap_or(0) as usize;
        let record_count = read_u32_be(data, 8).unwrap_or(0);
        let end = if (EXTH_PREAMBLE_LEN..=data.len()).contains(&header_length) {
            header_length
        } else {
            data.len()
        };

        let mut records = Vec::new();
        let mut pos = EXTH_PREAMBLE_LEN;
        for i in 0..record_count {
            let (Some(id), Some(size)) = (read_u32_be(data, pos), read_u32_be(data, pos + 4)) else {
                tracing::warn!("EXTH entry {i} of {record_count} truncated, ignoring the rest");
                break;
            };
            let size = size as usize;
            if size < ENTRY_HEADER_LEN || pos + size > end {
                tracing::warn!("EXTH entry {i} (id {id}) has invalid size {size}, ignoring the rest");
                break;
            }
            records.push(ExthRecord {
                id,
                data: data[pos + ENTRY_HEADER_LEN..pos + size].to_vec(),
            });
            pos += size;
        }

        Ok(Self { records })
    }

    /// Serialize the block, padded to a 4-byte boundary.
    pub fn encode(&self) -> Vec<u8> {
        let entries_len: usize = self
            .records
            .iter()
            .map(|r| ENTRY_HEADER_LEN + r.data.len())
            .sum();
        let header_length = EXTH_PREAMBLE_LEN + entries_len;
        let padded = header_length.next_multiple_of(4);

        let mut exth = vec![0u8; padded];
        exth[0..4].copy_from_slice(b"EXTH");
        write_u32_be(&mut exth, 4, header_length as u32);
        write_u32_be(&mut exth, 8, self.records.len() as u32);

        let mut pos = EXTH_PREAMBLE_LEN;
        for record in &self.records {
            write_u32_be(&mut exth, pos, record.id);
            write_u32_be(&mut exth, pos + 4, (ENTRY_HEADER_LEN + record.data.len()) as u32);
            let start = pos + ENTRY_HEADER_LEN;
            exth[start..start + record.data.len()].copy_from_slice(&record.data);
            pos = start + record.data.len();
        }

        exth
    }

    pub fn push(&mut self, id: u32, data: impl Into<Vec<u8>>) {
        self.records.push(ExthRecord {
            id,
            data: data.into(),
        });
    }

    /// First payload with the given id.
    pub fn get(&self, id: u32) -> Option<&[u8]> {
        self.records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.data.as_slice())
    }

    /// Every payload with the given id, in order.
    pub fn get_all(&self, id: u32) -> impl Iterator<Item = &[u8]> {
        self.records
            .iter()
            .filter(move |r| r.id == id)
            .map(|r| r.data.as_slice())
    }

    pub fn get_u32(&self, id: u32) -> Option<u32> {
        self.get(id).and_then(|data| read_u32_be(data, 0))
    }

    /// Raw EXTH 106 payload.
    pub fn timestamp(&self) -> Option<&[u8]> {
        self.get(EXTH_PUBDATE)
    }

    /// Cover record, relative to the first image record.
    pub fn cover_offset(&self) -> Option<u32> {
        self.get_u32(EXTH_COVER_OFFSET)
            .filter(|&offset| offset != NULL_INDEX && offset < 10_000_000)
    }

    /// Thumbnail record, relative to the first image record.
    pub fn thumbnail_offset(&self) -> Option<u32> {
        self.get_u32(EXTH_THUMBNAIL_OFFSET)
            .filter(|&offset| offset != NULL_INDEX)
    }

    pub fn has_fake_cover(&self) -> bool {
        self.get_u32(EXTH_FAKE_COVER).is_none_or(|flag| flag != 0)
    }

    /// Record index of the KF8 header in joint MOBI7/KF8 files.
    pub fn kf8_boundary(&self) -> Option<u32> {
        self.get_u32(EXTH_KF8_BOUNDARY)
            .filter(|&index| index != NULL_INDEX)
    }

    /// Build the replacement block for a metadata update.
    ///
    /// Entries are emitted in the order Kindle readers expect: authors,
    /// publisher, comments, isbn, subjects, date, title, language, then the
    /// cover and thumbnail pointers, then any pre-existing entries this
    /// crate does not manage, unchanged.
    pub fn for_update(
        mi: &Metadata,
        previous: &ExthBlock,
        slots: ImageSlots,
        codec: &'static Codec,
        options: UpdateOptions,
    ) -> Self {
        let encode = |s: &str| codec.encode(s).0.into_owned();
        let mut exth = ExthBlock::empty();

        match &mi.author_sort {
            Some(sort) if options.prefer_author_sort && !sort.is_empty() => {
                exth.push(EXTH_AUTHOR, encode(sort));
            }
            _ => {
                for author in &mi.authors {
                    exth.push(EXTH_AUTHOR, encode(author));
                }
            }
        }
        if let Some(publisher) = &mi.publisher {
            exth.push(EXTH_PUBLISHER, encode(publisher));
        }
        if let Some(comments) = &mi.comments {
            exth.push(EXTH_DESCRIPTION, encode(comments));
        }
        if let Some(isbn) = &mi.isbn {
            exth.push(EXTH_ISBN, encode(isbn));
        }
        if !mi.tags.is_empty() {
            let subjects = mi.tags.iter().map(String::as_str).collect::<Vec<_>>().join("; ");
            exth.push(EXTH_SUBJECT, encode(&subjects));
        }

        let date = match (mi.pubdate.or(mi.timestamp), previous.timestamp()) {
            (Some(date), _) => encode(&format_date(&date)),
            (None, Some(raw)) => raw.to_vec(),
            (None, None) => encode(&format_date(&Utc::now())),
        };
        exth.push(EXTH_PUBDATE, date);

        if !mi.title.is_empty() {
            exth.push(EXTH_UPDATED_TITLE, encode(&mi.title));
        }
        if !mi.language.is_empty() {
            exth.push(EXTH_LANGUAGE, encode(&mi.language));
        }

        if let Some(cover) = slots.cover {
            exth.push(EXTH_COVER_OFFSET, cover.to_be_bytes());
            exth.push(EXTH_FAKE_COVER, 0u32.to_be_bytes());
        }
        if let Some(thumbnail) = slots.thumbnail {
            exth.push(EXTH_THUMBNAIL_OFFSET, thumbnail.to_be_bytes());
        }

        exth.records.extend(
            previous
                .records
                .iter()
                .filter(|r| !MANAGED_IDS.contains(&r.id))
                .cloned(),
        );

        exth
    }
}

/// Cover and thumbnail record offsets (relative to the first image record)
/// to advertise in a rewritten EXTH block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageSlots {
    pub cover: Option<u32>,
    pub thumbnail: Option<u32>,
}

pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339()
}

/// Parse an EXTH 106 date. Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS[.f]`
/// and bare `YYYY-MM-DD`.
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(date.and_utc());
    }
    // Some producers append a time or zone after the date; keep the date part.
    let day = text.get(..10).unwrap_or(text);
    NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
}
