//! HUFF/CDIC decompression
//!
//! Some MOBI files use Huffman compression instead of PalmDOC LZ77. The HUFF
//! record holds the code tables and the CDIC records hold the phrase
//! dictionary. Phrases may themselves be compressed and are unpacked lazily.

use super::be::{read_u16_be, read_u32_be};
use crate::error::{Error, Result};

#[derive(Clone)]
enum Phrase {
    Leaf(Vec<u8>),
    Packed(Vec<u8>),
}

pub struct HuffCdicReader {
    /// Indexed by the top byte of a code: (code length, terminal, maxcode)
    dict1: Vec<(u8, bool, u32)>,
    /// Per code length 0..=32
    mincode: Vec<u32>,
    maxcode: Vec<u32>,
    phrases: Vec<Phrase>,
}

impl HuffCdicReader {
    pub fn new(huff: &[u8], cdics: &[&[u8]]) -> Result<Self> {
        let mut reader = Self {
            dict1: Vec::with_capacity(256),
            mincode: Vec::with_capacity(33),
            maxcode: Vec::with_capacity(33),
            phrases: Vec::new(),
        };

        reader.load_huff(huff)?;
        for (i, cdic) in cdics.iter().enumerate() {
            reader.load_cdic(cdic, i)?;
        }

        Ok(reader)
    }

    fn load_huff(&mut self, huff: &[u8]) -> Result<()> {
        if huff.len() < 24 || &huff[0..8] != b"HUFF\x00\x00\x00\x18" {
            return Err(Error::structural("HUFF record", "bad header"));
        }

        let off1 = read_u32_be(huff, 8).unwrap_or(0) as usize;
        let off2 = read_u32_be(huff, 12).unwrap_or(0) as usize;

        for i in 0..256 {
            let v = read_u32_be(huff, off1 + i * 4)
                .ok_or_else(|| Error::structural("HUFF record", "code table truncated"))?;
            let codelen = (v & 0x1f) as u8;
            let term = v & 0x80 != 0;
            let maxcode = if codelen > 0 {
                ((v >> 8) + 1)
                    .wrapping_shl(32 - codelen as u32)
                    .wrapping_sub(1)
            } else {
                0
            };
            self.dict1.push((codelen, term, maxcode));
        }

        self.mincode.push(0);
        self.maxcode.push(0);
        for codelen in 1..=32u32 {
            let pos = off2 + (codelen as usize - 1) * 8;
            let (Some(min), Some(max)) = (read_u32_be(huff, pos), read_u32_be(huff, pos + 4)) else {
                return Err(Error::structural("HUFF record", "length table truncated"));
            };
            self.mincode.push(min.wrapping_shl(32 - codelen));
            self.maxcode
                .push((max.wrapping_add(1)).wrapping_shl(32 - codelen).wrapping_sub(1));
        }

        Ok(())
    }

    fn load_cdic(&mut self, cdic: &[u8], index: usize) -> Result<()> {
        let record = || format!("CDIC record {index}");
        if cdic.len() < 16 || &cdic[0..8] != b"CDIC\x00\x00\x00\x10" {
            return Err(Error::structural(record(), "bad header"));
        }

        let phrases = read_u32_be(cdic, 8).unwrap_or(0) as usize;
        let bits = read_u32_be(cdic, 12).unwrap_or(0).min(16);
        let n = (1usize << bits).min(phrases.saturating_sub(self.phrases.len()));

        for i in 0..n {
            let off = read_u16_be(cdic, 16 + i * 2)
                .ok_or_else(|| Error::structural(record(), "offset table truncated"))?
                as usize;
            let blen = read_u16_be(cdic, 16 + off)
                .ok_or_else(|| Error::structural(record(), format!("phrase {i} truncated")))?;

            let start = 16 + off + 2;
            let end = (start + (blen & 0x7fff) as usize).min(cdic.len());
            let data = cdic[start..end].to_vec();
            self.phrases.push(if blen & 0x8000 != 0 {
                Phrase::Leaf(data)
            } else {
                Phrase::Packed(data)
            });
        }

        Ok(())
    }

    /// Decompress a text record.
    pub fn decompress(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let mut output = Vec::new();
        self.unpack_into(data, &mut output, 0)?;
        Ok(output)
    }

    fn unpack_into(&mut self, data: &[u8], output: &mut Vec<u8>, depth: usize) -> Result<()> {
        if depth > 32 {
            return Err(Error::structural("CDIC record", "phrase nesting too deep"));
        }

        let mut bits_remaining = data.len() as i64 * 8;
        let mut padded = data.to_vec();
        padded.extend_from_slice(&[0u8; 8]);

        let mut pos = 0usize;
        let mut x = read_u64_be(&padded, pos);
        let mut n: i32 = 32;

        while bits_remaining > 0 {
            if n <= 0 {
                pos += 4;
                x = read_u64_be(&padded, pos);
                n += 32;
            }

            let code = ((x >> n) & 0xFFFF_FFFF) as u32;
            let (mut codelen, term, mut maxcode) = self.dict1[(code >> 24) as usize];
            if !term {
                while codelen < 32 && code < self.mincode[codelen as usize] {
                    codelen += 1;
                }
                maxcode = self.maxcode[codelen as usize];
            }

            n -= codelen as i32;
            bits_remaining -= codelen as i64;
            if bits_remaining < 0 {
                break;
            }

            let r = if codelen > 0 {
                (maxcode.wrapping_sub(code) >> (32 - codelen as u32)) as usize
            } else {
                0
            };

            match self.phrases.get(r) {
                Some(Phrase::Leaf(phrase)) => output.extend_from_slice(phrase),
                Some(Phrase::Packed(packed)) => {
                    let packed = packed.clone();
                    let mut unpacked = Vec::new();
                    self.unpack_into(&packed, &mut unpacked, depth + 1)?;
                    output.extend_from_slice(&unpacked);
                    self.phrases[r] = Phrase::Leaf(unpacked);
                }
                None => {
                    return Err(Error::structural(
                        "CDIC record",
                        format!("phrase {r} out of bounds ({} phrases)", self.phrases.len()),
                    ));
                }
            }
        }

        Ok(())
    }
}

fn read_u64_be(data: &[u8], pos: usize) -> u64 {
    data.get(pos..pos + 8)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u64_be() {
        let data = [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];
        assert_eq!(read_u64_be(&data, 0), 1);

        let data2 = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(read_u64_be(&data2, 0), 0x0100000000000000);
        assert_eq!(read_u64_be(&data2, 1), 0);
    }

    #[test]
    fn test_bad_huff_header() {
        assert!(matches!(
            HuffCdicReader::new(b"HUFF", &[]),
            Err(Error::StructuralInconsistency { .. })
        ));
    }

    #[test]
    fn test_truncated_tables() {
        let mut huff = b"HUFF\x00\x00\x00\x18".to_vec();
        huff.extend_from_slice(&24u32.to_be_bytes());
        huff.extend_from_slice(&(24 + 1024u32).to_be_bytes());
        huff.resize(24 + 100, 0);
        assert!(HuffCdicReader::new(&huff, &[]).is_err());
    }
}
