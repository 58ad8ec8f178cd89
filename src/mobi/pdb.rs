//! Palm Database header and record offset table.

use std::io::SeekFrom;

use super::be::{read_u16_be, read_u24_be, read_u32_be, write_u24_be, write_u32_be};
use crate::error::{Error, Result};
use crate::io::{ContainerStream, RecordSlice};

/// Offset of the record table within the container.
pub const RECORD_TABLE_OFFSET: usize = 78;
/// Size of one record table entry.
pub const RECORD_ENTRY_SIZE: usize = 8;

/// The 8-byte type/creator tag at bytes 60..68.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookType {
    /// `BOOKMOBI`
    Mobi,
    /// `TEXtREAd` (plain PalmDOC)
    TextRead,
}

impl BookType {
    pub fn from_tag(tag: &[u8]) -> Result<Self> {
        if tag == b"BOOKMOBI" {
            Ok(BookType::Mobi)
        } else if tag.eq_ignore_ascii_case(b"TEXTREAD") {
            Ok(BookType::TextRead)
        } else {
            Err(Error::UnsupportedFormat(format!(
                "Unknown book type: {:?}",
                String::from_utf8_lossy(tag)
            )))
        }
    }

    pub fn tag(&self) -> &'static [u8; 8] {
        match self {
            BookType::Mobi => b"BOOKMOBI",
            BookType::TextRead => b"TEXtREAd",
        }
    }
}

/// One entry of the record table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdbRecord {
    pub offset: u32,
    pub attributes: u8,
    pub unique_id: u32,
}

/// PDB (Palm Database) header info and record offsets.
#[derive(Debug, Clone)]
pub struct PdbRecordTable {
    pub name: String,
    pub book_type: BookType,
    pub records: Vec<PdbRecord>,
    /// Length of the container the table was read from.
    pub stream_len: u64,
}

impl PdbRecordTable {
    /// Parse the PDB header from the start of a container image.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_TABLE_OFFSET {
            return Err(Error::InvalidMobi("PDB header too short".into()));
        }

        let num_records = read_u16_be(data, 76).unwrap_or(0) as usize;
        if data.len() < RECORD_TABLE_OFFSET + num_records * RECORD_ENTRY_SIZE {
            return Err(Error::InvalidMobi("PDB record table truncated".into()));
        }

        let table = Self::parse_unchecked(data)?;
        table.validate()?;
        Ok(table)
    }

    /// Read the header and record table from a stream without touching
    /// anything past the table.
    pub fn read<S: ContainerStream + ?Sized>(stream: &mut S) -> Result<Self> {
        let stream_len = stream.stream_len()?;
        let mut header = vec![0u8; RECORD_TABLE_OFFSET];
        stream.seek(SeekFrom::Start(0))?;
        stream
            .read_exact(&mut header)
            .map_err(|_| Error::InvalidMobi("File too short for PDB header".into()))?;

        // Reject foreign files before trusting the record count.
        BookType::from_tag(&header[60..68])?;

        let num_records = read_u16_be(&header, 76).unwrap_or(0) as usize;
        header.resize(RECORD_TABLE_OFFSET + num_records * RECORD_ENTRY_SIZE, 0);
        stream
            .read_exact(&mut header[RECORD_TABLE_OFFSET..])
            .map_err(|_| Error::InvalidMobi("PDB record table truncated".into()))?;

        let mut table = Self::parse_unchecked(&header)?;
        table.stream_len = stream_len;
        table.validate()?;
        Ok(table)
    }

    fn parse_unchecked(data: &[u8]) -> Result<Self> {
        // Bytes 0-31: Database name (null-terminated)
        let name_end = data[..32].iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&data[..name_end]).to_string();
        let book_type = BookType::from_tag(&data[60..68])?;
        let num_records = read_u16_be(data, 76).unwrap_or(0) as usize;

        let records = (0..num_records)
            .map(|i| {
                let pos = RECORD_TABLE_OFFSET + i * RECORD_ENTRY_SIZE;
                PdbRecord {
                    offset: read_u32_be(data, pos).unwrap_or(0),
                    attributes: data.get(pos + 4).copied().unwrap_or(0),
                    unique_id: read_u24_be(data, pos + 5).unwrap_or(0),
                }
            })
            .collect();

        Ok(Self {
            name,
            book_type,
            records,
            stream_len: data.len() as u64,
        })
    }

    /// Offsets must be non-decreasing, start after the table, and stay
    /// inside the stream.
    fn validate(&self) -> Result<()> {
        let table_end = self.table_end() as u64;
        let mut previous = table_end;
        for (i, record) in self.records.iter().enumerate() {
            let offset = record.offset as u64;
            if offset < previous {
                return Err(Error::structural(
                    format!("record {i}"),
                    format!("offset {offset} precedes previous boundary {previous}"),
                ));
            }
            if offset > self.stream_len {
                return Err(Error::structural(
                    format!("record {i}"),
                    format!("offset {offset} beyond end of file ({})", self.stream_len),
                ));
            }
            previous = offset;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Byte position just past the record table.
    pub fn table_end(&self) -> usize {
        RECORD_TABLE_OFFSET + self.records.len() * RECORD_ENTRY_SIZE
    }

    /// Get the byte range for a record.
    pub fn record_range(&self, index: usize) -> Result<(u64, u64)> {
        let record = self
            .records
            .get(index)
            .ok_or_else(|| Error::InvalidMobi(format!("non-existent record {index}")))?;
        let start = record.offset as u64;
        let end = self
            .records
            .get(index + 1)
            .map(|next| next.offset as u64)
            .unwrap_or(self.stream_len);
        Ok((start, end))
    }

    pub fn record_len(&self, index: usize) -> Result<u64> {
        let (start, end) = self.record_range(index)?;
        Ok(end - start)
    }

    /// A [`RecordSlice`] over record `index`.
    pub fn slice(&self, index: usize) -> Result<RecordSlice> {
        let (start, end) = self.record_range(index)?;
        Ok(RecordSlice::new(start, end))
    }

    /// Read a whole record from the stream.
    pub fn read_record<S: ContainerStream + ?Sized>(&self, stream: &mut S, index: usize) -> Result<Vec<u8>> {
        self.slice(index)?.read_all(stream)
    }

    /// Serialize the record table with replacement offsets, keeping each
    /// record's attributes and unique id.
    pub fn encode_table(&self, offsets: &[u32]) -> Result<Vec<u8>> {
        if offsets.len() != self.records.len() {
            return Err(Error::LengthMismatch {
                expected: self.records.len(),
                found: offsets.len(),
            });
        }
        let mut table = vec![0u8; self.records.len() * RECORD_ENTRY_SIZE];
        for (i, (record, &offset)) in self.records.iter().zip(offsets).enumerate() {
            let pos = i * RECORD_ENTRY_SIZE;
            write_u32_be(&mut table, pos, offset);
            table[pos + 4] = record.attributes;
            write_u24_be(&mut table, pos + 5, record.unique_id);
        }
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(offsets: &[u32], tag: &[u8; 8]) -> Vec<u8> {
        let mut data = vec![0u8; RECORD_TABLE_OFFSET];
        data[..4].copy_from_slice(b"Test");
        data[60..68].copy_from_slice(tag);
        data[76..78].copy_from_slice(&(offsets.len() as u16).to_be_bytes());
        for (i, offset) in offsets.iter().enumerate() {
            data.extend_from_slice(&offset.to_be_bytes());
            data.push(0);
            data.extend_from_slice(&((2 * i) as u32).to_be_bytes()[1..]);
        }
        data.extend_from_slice(&[0, 0]);
        data
    }

    #[test]
    fn test_parse_record_table() {
        let mut data = header(&[104, 108, 118], b"BOOKMOBI");
        data.resize(128, 0);

        let table = PdbRecordTable::parse(&data).unwrap();
        assert_eq!(table.name, "Test");
        assert_eq!(table.book_type, BookType::Mobi);
        assert_eq!(table.len(), 3);
        assert_eq!(table.records[2].unique_id, 4);
        assert_eq!(table.record_range(0).unwrap(), (104, 108));
        assert_eq!(table.record_range(2).unwrap(), (118, 128));
        assert_eq!(table.record_len(1).unwrap(), 10);
        assert!(table.record_range(3).is_err());
    }

    #[test]
    fn test_textread_tag_is_case_insensitive() {
        let mut data = header(&[88], b"TEXtREAd");
        data.resize(96, 0);
        assert_eq!(PdbRecordTable::parse(&data).unwrap().book_type, BookType::TextRead);
    }

    #[test]
    fn test_unknown_type_tag() {
        let mut data = header(&[88], b"DATAXXXX");
        data.resize(96, 0);
        assert!(matches!(
            PdbRecordTable::parse(&data),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_decreasing_offsets_are_rejected() {
        let mut data = header(&[100, 96], b"BOOKMOBI");
        data.resize(120, 0);
        assert!(matches!(
            PdbRecordTable::parse(&data),
            Err(Error::StructuralInconsistency { .. })
        ));
    }

    #[test]
    fn test_encode_table_keeps_ids() {
        let mut data = header(&[96, 100], b"BOOKMOBI");
        data[78 + 4] = 0x40;
        data.resize(110, 0);
        let table = PdbRecordTable::parse(&data).unwrap();

        let encoded = table.encode_table(&[96, 104]).unwrap();
        assert_eq!(&encoded[0..8], &[0, 0, 0, 96, 0x40, 0, 0, 0]);
        assert_eq!(&encoded[8..16], &[0, 0, 0, 104, 0, 0, 0, 2]);
        assert!(table.encode_table(&[96]).is_err());
    }
}
