use std::fmt;

use crate::error::{Error, Result};
use crate::mobi::be::read_u32_be;

/// Offset of the section table in every FDST record seen in the wild.
const SECTION_TABLE_OFFSET: u32 = 12;

/// FDST (flow descriptor table): `(start, end)` byte ranges of each flow
/// in the KF8 text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fdst {
    pub sections: Vec<(u32, u32)>,
}

impl Fdst {
    /// Parse an FDST record. Anything unusual (foreign magic, extra header
    /// fields, trailing bytes) is rejected rather than guessed at.
    pub fn parse(raw: &[u8], record: usize) -> Result<Self> {
        let err = |reason: String| Error::structural(format!("FDST record {record}"), reason);

        if raw.len() < 12 || &raw[0..4] != b"FDST" {
            return Err(err("not a valid FDST record".into()));
        }
        let sec_off = read_u32_be(raw, 4).unwrap_or(0);
        let num_sections = read_u32_be(raw, 8).unwrap_or(0) as usize;
        if sec_off != SECTION_TABLE_OFFSET {
            return Err(err(format!("unknown extra fields (section offset {sec_off})")));
        }

        let table_end = num_sections
            .checked_mul(8)
            .and_then(|len| len.checked_add(sec_off as usize))
            .filter(|&end| end <= raw.len())
            .ok_or_else(|| err(format!("{num_sections} sections do not fit in {} bytes", raw.len())))?;
        if table_end != raw.len() {
            return Err(err(format!("{} bytes of trailing data", raw.len() - table_end)));
        }

        let sections = (0..num_sections)
            .map(|i| {
                let pos = sec_off as usize + i * 8;
                (
                    read_u32_be(raw, pos).unwrap_or(0),
                    read_u32_be(raw, pos + 4).unwrap_or(0),
                )
            })
            .collect();

        Ok(Self { sections })
    }
}

impl fmt::Display for Fdst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "FDST record")?;
        writeln!(f, "Offset to sections: {SECTION_TABLE_OFFSET}")?;
        writeln!(f, "Number of section records: {}", self.sections.len())?;
        writeln!(f, "**** {} Sections ****", self.sections.len())?;
        for (start, end) in &self.sections {
            writeln!(f, "Start: {start:>20} End: {end}")?;
        }
        Ok(())
    }
}
