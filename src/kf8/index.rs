//! KF8 index tables (INDX, TAGX, IDXT, CNCX).
//!
//! A KF8 book carries several indices:
//! - Skeleton index: one entry per output file (HTML part)
//! - Fragment index: content chunks to insert into skeletons
//! - NCX index: table of contents
//! - Guide index: landmark references (cover, toc, text start)
//!
//! An index is a header record (INDX header, then TAGX) followed by
//! `count` data records, each holding entries located through an IDXT
//! offset table, then optional CNCX string records.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use encoding_rs::Encoding as Codec;
use memchr::memmem;
use quick_xml::escape::unescape;

use crate::error::{Error, Result};
use crate::mobi::be::{read_u16_be, read_u32_be};

const INDX_HEADER_LEN: usize = 192;

/// Variable-width integer decoding (forward).
/// Each byte carries 7 bits; the high bit marks the last byte.
pub fn decint(data: &[u8]) -> (u32, usize) {
    let mut val: u32 = 0;
    let mut consumed = 0;

    for &byte in data {
        consumed += 1;
        val = (val << 7) | ((byte & 0x7F) as u32);
        if byte & 0x80 != 0 {
            break;
        }
    }

    (val, consumed)
}

/// TAGX entry: how to read one tag from an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagXEntry {
    pub tag: u8,
    pub num_values: u8,
    pub bitmask: u8,
    pub eof: u8,
}

#[derive(Debug)]
struct IndxHeader {
    idxt_start: u32,
    count: u32,
    num_cncx: u32,
    tagx_offset: u32,
}

impl IndxHeader {
    fn parse(data: &[u8], record: usize) -> Result<Self> {
        if data.len() < INDX_HEADER_LEN || &data[0..4] != b"INDX" {
            return Err(Error::structural(
                format!("index record {record}"),
                "invalid INDX header",
            ));
        }

        let u32_at = |offset: usize| read_u32_be(data, offset).unwrap_or(0);
        Ok(Self {
            idxt_start: u32_at(20),
            count: u32_at(24),
            num_cncx: u32_at(52),
            tagx_offset: u32_at(180),
        })
    }
}

fn parse_tagx(data: &[u8], record: usize) -> Result<(usize, Vec<TagXEntry>)> {
    if data.len() < 12 || &data[0..4] != b"TAGX" {
        return Err(Error::structural(
            format!("index record {record}"),
            "invalid TAGX section",
        ));
    }

    let block_len = read_u32_be(data, 4).unwrap_or(0) as usize;
    let control_byte_count = read_u32_be(data, 8).unwrap_or(0) as usize;

    let tags = data[12..block_len.clamp(12, data.len())]
        .chunks_exact(4)
        .map(|t| TagXEntry {
            tag: t[0],
            num_values: t[1],
            bitmask: t[2],
            eof: t[3],
        })
        .collect();

    Ok((control_byte_count, tags))
}

/// Decode the tag values of one index entry.
fn get_tag_map(control_byte_count: usize, tagx: &[TagXEntry], data: &[u8]) -> BTreeMap<u8, Vec<u32>> {
    let mut result = BTreeMap::new();
    if data.len() < control_byte_count {
        return result;
    }

    let control_bytes = &data[..control_byte_count];
    let mut pos = control_byte_count;
    let mut control_idx = 0;

    // (tag, value count, value byte count, values per entry)
    let mut pending: Vec<(u8, Option<u32>, Option<u32>, u8)> = Vec::new();

    for entry in tagx {
        if entry.eof == 0x01 {
            control_idx += 1;
            continue;
        }
        let Some(&control) = control_bytes.get(control_idx) else {
            break;
        };

        let value = control & entry.bitmask;
        if value == 0 {
            continue;
        }
        if value == entry.bitmask && entry.bitmask.count_ones() > 1 {
            // Byte length of the values follows as a varint
            let (value_bytes, consumed) = decint(data.get(pos..).unwrap_or(&[]));
            pos += consumed;
            pending.push((entry.tag, None, Some(value_bytes), entry.num_values));
        } else {
            let count = (value >> entry.bitmask.trailing_zeros()) as u32;
            pending.push((entry.tag, Some(count), None, entry.num_values));
        }
    }

    for (tag, value_count, value_bytes, num_values) in pending {
        let mut values = Vec::new();
        if let Some(count) = value_count {
            for _ in 0..count * num_values as u32 {
                if pos >= data.len() {
                    break;
                }
                let (v, consumed) = decint(&data[pos..]);
                pos += consumed;
                values.push(v);
            }
        } else if let Some(total) = value_bytes {
            let mut consumed_total = 0;
            while consumed_total < total as usize && pos < data.len() {
                let (v, consumed) = decint(&data[pos..]);
                pos += consumed;
                consumed_total += consumed;
                values.push(v);
            }
        }
        result.insert(tag, values);
    }

    result
}

/// CNCX (compiled NCX) string table. Keys are offsets, with each
/// successive record starting at a multiple of 0x10000.
#[derive(Debug, Default, Clone)]
pub struct Cncx {
    strings: HashMap<u32, String>,
}

impl Cncx {
    pub fn parse(records: &[Vec<u8>], codec: &'static Codec) -> Self {
        let mut strings = HashMap::new();

        for (i, raw) in records.iter().enumerate() {
            let record_offset = (i as u32) << 16;
            let mut pos = 0;
            while pos < raw.len() {
                let (length, consumed) = decint(&raw[pos..]);
                let start = pos + consumed;
                let end = start + length as usize;
                if end > raw.len() {
                    break;
                }
                if length > 0 {
                    let text = codec.decode_without_bom_handling(&raw[start..end]).0;
                    strings.insert(record_offset + pos as u32, text.into_owned());
                }
                pos = end;
            }
        }

        Self { strings }
    }

    pub fn get(&self, offset: u32) -> Option<&str> {
        self.strings.get(&offset).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

/// Index table entry (generic)
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub name: String,
    pub tags: BTreeMap<u8, Vec<u32>>,
}

impl IndexEntry {
    fn first(&self, tag: u8) -> Option<u32> {
        self.tags.get(&tag).and_then(|v| v.first()).copied()
    }

    fn pair(&self, tag: u8) -> Option<(u32, u32)> {
        let values = self.tags.get(&tag)?;
        Some((values.first().copied()?, values.get(1).copied().unwrap_or(0)))
    }
}

/// A decoded index: its entries plus its CNCX strings.
#[derive(Debug, Clone, Default)]
pub struct Index {
    pub entries: Vec<IndexEntry>,
    pub cncx: Cncx,
}

/// Read a complete index table starting at `index_record`.
///
/// `read_record` maps a record number to its bytes. Missing or malformed
/// records are reported with the record number.
pub fn read_index(
    read_record: &mut dyn FnMut(usize) -> Result<Vec<u8>>,
    index_record: usize,
    codec: &'static Codec,
) -> Result<Index> {
    let header_data = read_record(index_record)?;
    let header = IndxHeader::parse(&header_data, index_record)?;

    let tagx_start = if header.tagx_offset > 0 && (header.tagx_offset as usize) < header_data.len() {
        header.tagx_offset as usize
    } else {
        memmem::find(&header_data, b"TAGX").ok_or_else(|| {
            Error::structural(format!("index record {index_record}"), "TAGX not found")
        })?
    };
    let (control_byte_count, tagx) = parse_tagx(&header_data[tagx_start..], index_record)?;

    let cncx_start = index_record + header.count as usize + 1;
    let cncx_records = (0..header.num_cncx as usize)
        .map(|i| read_record(cncx_start + i))
        .collect::<Result<Vec<_>>>()?;
    let cncx = Cncx::parse(&cncx_records, codec);

    let mut entries = Vec::new();
    for i in 0..header.count as usize {
        let record = index_record + 1 + i;
        let data = read_record(record)?;
        let rec_header = IndxHeader::parse(&data, record)?;

        let idxt = rec_header.idxt_start as usize;
        if data.get(idxt..idxt + 4) != Some(b"IDXT".as_slice()) {
            return Err(Error::structural(
                format!("index record {record}"),
                format!("no IDXT at offset {idxt}"),
            ));
        }

        let mut positions = (0..rec_header.count as usize)
            .map(|j| {
                read_u16_be(&data, idxt + 4 + j * 2)
                    .map(usize::from)
                    .ok_or_else(|| Error::structural(format!("index record {record}"), "IDXT truncated"))
            })
            .collect::<Result<Vec<_>>>()?;
        positions.push(idxt);

        for (j, window) in positions.windows(2).enumerate() {
            let (start, end) = (window[0], window[1]);
            if start >= end || end > data.len() {
                return Err(Error::structural(
                    format!("index record {record}"),
                    format!("entry {j} spans {start}..{end}"),
                ));
            }

            let entry = &data[start..end];
            let name_len = entry[0] as usize;
            let name_bytes = entry.get(1..1 + name_len).ok_or_else(|| {
                Error::structural(format!("index record {record}"), format!("entry {j} name truncated"))
            })?;
            let name = codec.decode_without_bom_handling(name_bytes).0.into_owned();
            let tags = get_tag_map(control_byte_count, &tagx, &entry[1 + name_len..]);
            entries.push(IndexEntry { name, tags });
        }
    }

    tracing::debug!(
        "Index at record {index_record}: {} entries, {} CNCX strings",
        entries.len(),
        cncx.len()
    );
    Ok(Index { entries, cncx })
}

/// Skeleton entry: the frame of one output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkelEntry {
    pub file_number: usize,
    pub name: String,
    pub chunk_count: u32,
    pub start_pos: u32,
    pub length: u32,
}

/// Fragment entry: a chunk of text inserted into a skeleton.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub insert_pos: u32,
    pub selector: Option<String>,
    pub file_number: u32,
    pub sequence_number: u32,
    pub start_pos: u32,
    pub length: u32,
}

/// NCX entry for the table of contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NcxEntry {
    pub index: usize,
    pub name: String,
    pub text: String,
    pub pos: u32,
    pub length: u32,
    pub level: Option<u32>,
    pub parent: Option<usize>,
    pub pos_fid: Option<(u32, u32)>,
}

/// Guide (landmark) entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuideEntry {
    pub ref_type: String,
    pub title: Option<String>,
    pub pos_fid: Option<(u32, u32)>,
}

/// Skeleton index: tag 1 = chunk count, tag 6 = [start, length]. Writers
/// repeat both values; the first copy is authoritative.
pub fn parse_skel_index(index: &Index) -> Vec<SkelEntry> {
    index
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let (start_pos, length) = entry.pair(6).unwrap_or((0, 0));
            SkelEntry {
                file_number: i,
                name: entry.name.clone(),
                chunk_count: entry.first(1).unwrap_or(0),
                start_pos,
                length,
            }
        })
        .collect()
}

/// Fragment index: the entry name is the insert position; tag 2 = CNCX
/// selector, 3 = file number, 4 = sequence number, 6 = [start, length].
pub fn parse_fragment_index(index: &Index) -> Result<Vec<Fragment>> {
    index
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let insert_pos = entry.name.trim().parse().map_err(|_| {
                Error::structural(
                    "fragment index",
                    format!("entry {i} has non-numeric insert position {:?}", entry.name),
                )
            })?;
            let (start_pos, length) = entry.pair(6).unwrap_or((0, 0));
            Ok(Fragment {
                insert_pos,
                selector: entry
                    .first(2)
                    .and_then(|off| index.cncx.get(off))
                    .map(str::to_string),
                file_number: entry.first(3).unwrap_or(0),
                sequence_number: entry.first(4).unwrap_or(0),
                start_pos,
                length,
            })
        })
        .collect()
}

/// NCX index: tag 1 = position, 2 = length, 3 = CNCX label, 4 = depth,
/// 6 = pos_fid, 21 = parent.
pub fn parse_ncx_index(index: &Index) -> Vec<NcxEntry> {
    index
        .entries
        .iter()
        .enumerate()
        .map(|(i, entry)| NcxEntry {
            index: i,
            name: entry.name.clone(),
            text: entry
                .first(3)
                .and_then(|off| index.cncx.get(off))
                .map(str::to_string)
                .unwrap_or_else(|| entry.name.clone()),
            pos: entry.first(1).unwrap_or(0),
            length: entry.first(2).unwrap_or(0),
            level: entry.first(4),
            parent: entry.first(21).map(|p| p as usize),
            pos_fid: entry.pair(6),
        })
        .collect()
}

/// Guide index: entry name = reference type, tag 1 = CNCX title,
/// tag 6 = pos_fid (older files use tag 3 with a single position).
pub fn parse_guide_index(index: &Index) -> Vec<GuideEntry> {
    index
        .entries
        .iter()
        .map(|entry| GuideEntry {
            ref_type: entry.name.clone(),
            title: entry
                .first(1)
                .and_then(|off| index.cncx.get(off))
                .map(str::to_string),
            pos_fid: entry.pair(6).or_else(|| entry.first(3).map(|pos| (pos, 0))),
        })
        .collect()
}

/// A table of contents node.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct TocNode {
    pub title: String,
    pub file_number: Option<u32>,
    pub children: Vec<TocNode>,
}

/// Build the TOC hierarchy from parent links. Labels are XML-unescaped.
pub fn build_toc(ncx: &[NcxEntry]) -> Vec<TocNode> {
    let mut nodes: Vec<Option<TocNode>> = ncx
        .iter()
        .map(|entry| {
            Some(TocNode {
                title: unescape(&entry.text)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| entry.text.clone()),
                file_number: entry.pos_fid.map(|(fid, _)| fid),
                children: Vec::new(),
            })
        })
        .collect();

    let mut roots = Vec::new();
    let mut children: HashMap<usize, Vec<usize>> = HashMap::new();
    for entry in ncx {
        match entry.parent {
            Some(parent) if parent < ncx.len() && parent != entry.index => {
                children.entry(parent).or_default().push(entry.index)
            }
            _ => roots.push(entry.index),
        }
    }

    fn take_with_children(
        idx: usize,
        nodes: &mut [Option<TocNode>],
        children: &HashMap<usize, Vec<usize>>,
    ) -> Option<TocNode> {
        let mut node = nodes.get_mut(idx)?.take()?;
        for &child in children.get(&idx).into_iter().flatten() {
            if let Some(child) = take_with_children(child, nodes, children) {
                node.children.push(child);
            }
        }
        Some(node)
    }

    roots
        .into_iter()
        .filter_map(|idx| take_with_children(idx, &mut nodes, &children))
        .collect()
}

impl fmt::Display for SkelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Skeleton {:>4} {:<12} chunks={:<4} start={:<8} length={}",
            self.file_number, self.name, self.chunk_count, self.start_pos, self.length
        )
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Fragment insert={:<8} file={:<4} seq={:<4} start={:<8} length={:<6} selector={}",
            self.insert_pos,
            self.file_number,
            self.sequence_number,
            self.start_pos,
            self.length,
            self.selector.as_deref().unwrap_or("-")
        )
    }
}

impl fmt::Display for NcxEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NCX {:>4} pos={:<8} length={:<6} depth={:<3} parent={:<5} pos_fid={:?} {:?}",
            self.index,
            self.pos,
            self.length,
            self.level.map_or("-".into(), |l| l.to_string()),
            self.parent.map_or("-".into(), |p| p.to_string()),
            self.pos_fid,
            self.text
        )
    }
}

impl fmt::Display for GuideEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Guide {:<12} pos_fid={:?} {:?}",
            self.ref_type,
            self.pos_fid,
            self.title.as_deref().unwrap_or("")
        )
    }
}
