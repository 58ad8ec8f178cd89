//! Text record extraction.

use super::headers::{Compression, MobiHeader, NULL_INDEX};
use super::huffcdic::HuffCdicReader;
use super::palmdoc;
use super::pdb::PdbRecordTable;
use crate::error::{Error, Result};
use crate::io::ContainerStream;

/// Decompress and concatenate the text records that follow the header
/// record at `base`.
///
/// Text records are `base + 1 ..= base + text_record_count`; HUFF/CDIC
/// record indices are likewise relative to `base`.
pub fn extract_text<S: ContainerStream + ?Sized>(
    stream: &mut S,
    table: &PdbRecordTable,
    header: &MobiHeader,
    base: usize,
) -> Result<Vec<u8>> {
    let mut huff = match header.compression {
        Compression::Huffman => Some(load_huffcdic(stream, table, header, base)?),
        _ => None,
    };

    let mut text = Vec::with_capacity(header.text_length as usize);
    for i in 1..=header.text_record_count as usize {
        let index = base + i;
        if index >= table.len() {
            return Err(Error::structural(
                format!("text record {i}"),
                format!("record {index} does not exist ({} records)", table.len()),
            ));
        }

        let record = table.read_record(stream, index)?;
        let record = strip_trailing_data(&record, header.extra_data_flags);

        match header.compression {
            Compression::PalmDoc => text.extend(palmdoc::decompress(record)),
            Compression::None => text.extend_from_slice(record),
            Compression::Huffman => match huff.as_mut() {
                Some(reader) => text.extend(reader.decompress(record)?),
                None => {
                    return Err(Error::UnsupportedFormat(
                        "Huffman reader not initialized".into(),
                    ));
                }
            },
            Compression::Unknown(n) => {
                return Err(Error::UnsupportedFormat(format!(
                    "Unknown compression type: {n}"
                )));
            }
        }
    }

    tracing::debug!(
        "Extracted {} bytes of text from {} records",
        text.len(),
        header.text_record_count
    );
    Ok(text)
}

fn load_huffcdic<S: ContainerStream + ?Sized>(
    stream: &mut S,
    table: &PdbRecordTable,
    header: &MobiHeader,
    base: usize,
) -> Result<HuffCdicReader> {
    if header.huff_record_index == NULL_INDEX || header.huff_record_count == 0 {
        return Err(Error::InvalidMobi(
            "Huffman compression but no HUFF/CDIC records".into(),
        ));
    }

    let first = base + header.huff_record_index as usize;
    let huff = table.read_record(stream, first)?;
    let cdics = (1..header.huff_record_count as usize)
        .map(|i| table.read_record(stream, first + i))
        .collect::<Result<Vec<_>>>()?;
    let cdic_refs: Vec<&[u8]> = cdics.iter().map(Vec::as_slice).collect();

    HuffCdicReader::new(&huff, &cdic_refs)
}

/// Strip trailing entries from a text record.
///
/// Bits 1-15 of `flags` each mark a trailing entry whose size is stored as
/// a backward variable-width integer at the current end. Bit 0 marks
/// multibyte overlap bytes, removed last.
pub fn strip_trailing_data(record: &[u8], flags: u16) -> &[u8] {
    if flags == 0 || record.is_empty() {
        return record;
    }

    let mut end = record.len();
    let mut shifted_flags = flags >> 1;
    while shifted_flags != 0 {
        if shifted_flags & 1 != 0 {
            if end == 0 {
                break;
            }
            let size = backward_vwi(&record[..end]);
            if size > 0 && size <= end {
                end -= size;
            }
        }
        shifted_flags >>= 1;
    }

    if flags & 1 != 0 && end > 0 {
        let overlap = (record[end - 1] & 3) as usize + 1;
        if overlap <= end {
            end -= overlap;
        }
    }

    &record[..end]
}

/// Variable-width integer read backwards from the end of `data`. The high
/// bit marks the first byte of the number.
fn backward_vwi(data: &[u8]) -> usize {
    let mut size = 0usize;
    let mut shift = 0;
    for &byte in data.iter().rev() {
        size |= ((byte & 0x7F) as usize) << shift;
        shift += 7;
        if byte & 0x80 != 0 || shift >= 28 {
            break;
        }
    }
    size
}
