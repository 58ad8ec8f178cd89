use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use super::fdst::Fdst;
use super::index::{
    build_toc, parse_fragment_index, parse_guide_index, parse_ncx_index, parse_skel_index,
    read_index, Fragment, GuideEntry, Index, NcxEntry, SkelEntry, TocNode,
};
use crate::error::{Error, Result};
use crate::io::ContainerStream;
use crate::mobi::container::MobiContainer;
use crate::mobi::headers::{MobiHeader, NULL_INDEX};
use crate::mobi::text::extract_text;

/// One reassembled output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub file_number: usize,
    pub skeleton: Vec<u8>,
    /// Fragment bytes in insertion order.
    pub sections: Vec<Vec<u8>>,
    pub text: Vec<u8>,
}

impl Part {
    pub fn name(&self) -> String {
        format!("part{:04}", self.file_number)
    }
}

/// Counts and navigation of a decoded book.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Kf8Summary {
    pub name: String,
    pub records: usize,
    pub kf8_header_record: usize,
    pub text_length: usize,
    pub flows: usize,
    pub parts: usize,
    pub fragments: usize,
    pub toc: Vec<TocNode>,
    pub guide: Vec<(String, Option<String>)>,
}

/// The structure of a KF8 (AZW3) book, decoded for inspection.
#[derive(Debug, Clone)]
pub struct Kf8Book {
    pub name: String,
    pub record_count: usize,
    /// Record holding the KF8 MOBI header. Every KF8 record index is
    /// relative to it.
    pub base: usize,
    pub header: MobiHeader,
    pub text: Vec<u8>,
    pub fdst: Option<Fdst>,
    pub skeletons: Vec<SkelEntry>,
    pub fragments: Vec<Fragment>,
    pub ncx: Vec<NcxEntry>,
    pub guide: Vec<GuideEntry>,
    pub parts: Vec<Part>,
}

impl Kf8Book {
    /// Decode the KF8 half of a container. Joint MOBI/KF8 files are located
    /// through EXTH 121.
    pub fn open<S: ContainerStream + ?Sized>(stream: &mut S) -> Result<Self> {
        let container = MobiContainer::load(stream, None)?;
        let table = &container.table;

        let (base, header) = if container.header.is_kf8() {
            (0, container.header.clone())
        } else if let Some(boundary) = container.exth().kf8_boundary() {
            let base = boundary as usize;
            let record = table.read_record(stream, base).map_err(|_| {
                Error::structural("EXTH 121", format!("KF8 header record {base} does not exist"))
            })?;
            let header = MobiHeader::parse(&record)?;
            if !header.is_kf8() {
                return Err(Error::structural(
                    format!("record {base}"),
                    format!("expected a KF8 header, found version {}", header.mobi_version),
                ));
            }
            (base, header)
        } else {
            return Err(Error::UnsupportedFormat(format!(
                "not a KF8 book (MOBI version {})",
                container.header.mobi_version
            )));
        };
        tracing::debug!("KF8 header at record {base}");

        let codec = header.encoding.codec(None);
        let text = extract_text(stream, table, &header, base)?;

        let mut read_record = |i: usize| table.read_record(stream, base + i);

        let fdst = if header.fdst_index != NULL_INDEX {
            let record = header.fdst_index as usize;
            let fdst = Fdst::parse(&read_record(record)?, base + record)?;
            if fdst.sections.len() != header.fdst_count as usize {
                return Err(Error::structural(
                    format!("FDST record {}", base + record),
                    format!(
                        "{} sections but the header declares {}",
                        fdst.sections.len(),
                        header.fdst_count
                    ),
                ));
            }
            Some(fdst)
        } else {
            None
        };

        let mut index = |record: u32| -> Result<Index> {
            if record == NULL_INDEX {
                Ok(Index::default())
            } else {
                read_index(&mut read_record, record as usize, codec)
            }
        };
        let skel = index(header.skel_index)?;
        let frag = index(header.div_index)?;
        let ncx = index(header.ncx_index)?;
        let guide = index(header.oth_index)?;

        let skeletons = parse_skel_index(&skel);
        let fragments = parse_fragment_index(&frag)?;
        let parts = assemble_parts(&text, &skeletons, &fragments)?;

        Ok(Self {
            name: table.name.clone(),
            record_count: table.len(),
            base,
            header,
            text,
            fdst,
            skeletons,
            fragments,
            ncx: parse_ncx_index(&ncx),
            guide: parse_guide_index(&guide),
            parts,
        })
    }

    /// Text of each flow. Without an FDST the whole text is one flow.
    pub fn flows(&self) -> Result<Vec<&[u8]>> {
        let Some(fdst) = &self.fdst else {
            return Ok(vec![self.text.as_slice()]);
        };
        fdst.sections
            .iter()
            .enumerate()
            .map(|(i, &(start, end))| {
                self.text.get(start as usize..end as usize).ok_or_else(|| {
                    Error::structural(
                        format!("FDST record {}", self.base + self.header.fdst_index as usize),
                        format!("flow {i} ({start}..{end}) outside text of {} bytes", self.text.len()),
                    )
                })
            })
            .collect()
    }

    pub fn toc(&self) -> Vec<TocNode> {
        build_toc(&self.ncx)
    }

    pub fn summary(&self) -> Kf8Summary {
        Kf8Summary {
            name: self.name.clone(),
            records: self.record_count,
            kf8_header_record: self.base,
            text_length: self.text.len(),
            flows: self.fdst.as_ref().map_or(1, |f| f.sections.len()),
            parts: self.parts.len(),
            fragments: self.fragments.len(),
            toc: self.toc(),
            guide: self
                .guide
                .iter()
                .map(|g| (g.ref_type.clone(), g.title.clone()))
                .collect(),
        }
    }

    /// Write the decoded structure under `dir`: the raw text, one text
    /// summary per index, each reassembled part with its skeleton and
    /// fragments, and each flow.
    pub fn dump(&self, dir: &Path) -> Result<()> {
        let files_dir = dir.join("files");
        let flows_dir = dir.join("flows");
        fs::create_dir_all(&files_dir)?;
        fs::create_dir_all(&flows_dir)?;

        fs::write(dir.join("header.txt"), self.header_report())?;
        fs::write(dir.join("raw_text.html"), &self.text)?;
        if let Some(fdst) = &self.fdst {
            fs::write(dir.join("fdst.record"), fdst.to_string())?;
        }
        fs::write(dir.join("skel.record"), lines(&self.skeletons))?;
        fs::write(dir.join("chunks.record"), lines(&self.fragments))?;
        fs::write(dir.join("ncx.record"), lines(&self.ncx))?;
        fs::write(dir.join("guide.record"), lines(&self.guide))?;

        for part in &self.parts {
            fs::write(files_dir.join(format!("{}.html", part.name())), &part.text)?;
            let parts_dir = files_dir.join(format!("{}-parts", part.name()));
            fs::create_dir_all(&parts_dir)?;
            fs::write(parts_dir.join("skeleton.html"), &part.skeleton)?;
            for (i, section) in part.sections.iter().enumerate() {
                fs::write(parts_dir.join(format!("sect-{i:04}.html")), section)?;
            }
        }

        for (i, flow) in self.flows()?.into_iter().enumerate() {
            fs::write(flows_dir.join(format!("flow{i:04}.txt")), flow)?;
        }

        tracing::info!("Dumped {} parts to {}", self.parts.len(), dir.display());
        Ok(())
    }

    fn header_report(&self) -> String {
        let h = &self.header;
        let mut out = String::new();
        let _ = writeln!(out, "Name: {}", self.name);
        let _ = writeln!(out, "Records: {}", self.record_count);
        let _ = writeln!(out, "KF8 header record: {}", self.base);
        let _ = writeln!(out, "MOBI version: {}", h.mobi_version);
        let _ = writeln!(out, "Header length: {:#x}", h.header_length);
        let _ = writeln!(out, "Compression: {:?}", h.compression);
        let _ = writeln!(out, "Encoding: {:?}", h.encoding);
        let _ = writeln!(out, "Text length: {}", h.text_length);
        let _ = writeln!(out, "Text records: {}", h.text_record_count);
        let _ = writeln!(out, "Extra data flags: {:#06b}", h.extra_data_flags);
        for (label, value) in [
            ("FDST index", h.fdst_index),
            ("Skeleton index", h.skel_index),
            ("Fragment index", h.div_index),
            ("NCX index", h.ncx_index),
            ("Guide index", h.oth_index),
            ("DATP index", h.datp_index),
        ] {
            if value == NULL_INDEX {
                let _ = writeln!(out, "{label}: none");
            } else {
                let _ = writeln!(out, "{label}: {value}");
            }
        }
        out
    }
}

fn lines<T: std::fmt::Display>(items: &[T]) -> String {
    items.iter().map(|item| format!("{item}\n")).collect()
}

/// Reassemble each skeleton with its fragments.
///
/// A skeleton's fragments are stored right after it in the text; each one
/// is spliced in at `insert_pos - skeleton.start_pos`, in ascending insert
/// position so earlier insertions shift later ones into place.
pub fn assemble_parts(text: &[u8], skeletons: &[SkelEntry], fragments: &[Fragment]) -> Result<Vec<Part>> {
    skeletons
        .iter()
        .map(|skel| {
            let skel_start = skel.start_pos as usize;
            let skel_end = skel_start + skel.length as usize;
            let skeleton = text.get(skel_start..skel_end).ok_or_else(|| {
                Error::structural(
                    format!("skeleton {}", skel.file_number),
                    format!("bytes {skel_start}..{skel_end} outside text of {} bytes", text.len()),
                )
            })?;

            let mut frags: Vec<&Fragment> = fragments
                .iter()
                .filter(|f| f.file_number as usize == skel.file_number)
                .collect();
            frags.sort_by_key(|f| f.insert_pos);

            let mut assembled = skeleton.to_vec();
            let mut sections = Vec::with_capacity(frags.len());
            for (j, frag) in frags.into_iter().enumerate() {
                let record = || format!("skeleton {} fragment {j}", skel.file_number);
                let start = skel_end + frag.start_pos as usize;
                let end = start + frag.length as usize;
                let bytes = text.get(start..end).ok_or_else(|| {
                    Error::structural(
                        record(),
                        format!("bytes {start}..{end} outside text of {} bytes", text.len()),
                    )
                })?;
                let insert = (frag.insert_pos as usize)
                    .checked_sub(skel_start)
                    .filter(|&pos| pos <= assembled.len())
                    .ok_or_else(|| {
                        Error::structural(
                            record(),
                            format!(
                                "insert position {} outside skeleton at {skel_start} ({} bytes assembled)",
                                frag.insert_pos,
                                assembled.len()
                            ),
                        )
                    })?;
                assembled.splice(insert..insert, bytes.iter().copied());
                sections.push(bytes.to_vec());
            }

            Ok(Part {
                file_number: skel.file_number,
                skeleton: skeleton.to_vec(),
                sections,
                text: assembled,
            })
        })
        .collect()
}
