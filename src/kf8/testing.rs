//! INDX record builders for tests.

/// Encode a variable-width integer (forward encoding, high bit set on last byte)
pub fn encint(val: u32) -> Vec<u8> {
    if val == 0 {
        return vec![0x80];
    }

    let mut result = Vec::new();
    let mut v = val;
    while v > 0 {
        result.push((v & 0x7F) as u8);
        v >>= 7;
    }
    result[0] |= 0x80;
    result.reverse();
    result
}

#[derive(Debug, Clone, Copy)]
pub struct TagDef {
    pub tag: u8,
    pub values_per_entry: u8,
    pub bitmask: u8,
    pub eof: u8,
}

impl TagDef {
    pub const fn new(tag: u8, values_per_entry: u8, bitmask: u8) -> Self {
        Self {
            tag,
            values_per_entry,
            bitmask,
            eof: 0,
        }
    }

    pub const fn eof() -> Self {
        Self {
            tag: 0,
            values_per_entry: 0,
            bitmask: 0,
            eof: 1,
        }
    }
}

/// Builds a header record plus one data record holding every entry.
pub struct IndxBuilder {
    entries: Vec<(String, Vec<u8>)>,
    tagx: Vec<TagDef>,
    control_byte_count: u8,
    num_cncx: u32,
}

impl IndxBuilder {
    pub fn new(tagx: Vec<TagDef>, control_byte_count: u8) -> Self {
        Self {
            entries: Vec::new(),
            tagx,
            control_byte_count,
            num_cncx: 0,
        }
    }

    pub fn set_cncx_count(&mut self, count: u32) {
        self.num_cncx = count;
    }

    /// Add an entry with pre-encoded control byte and tag data
    pub fn add_entry(&mut self, name: &str, tag_data: Vec<u8>) {
        self.entries.push((name.to_string(), tag_data));
    }

    pub fn build(&self) -> Vec<Vec<u8>> {
        let mut entry_data = Vec::new();
        let mut offsets = Vec::new();
        for (name, tag_data) in &self.entries {
            offsets.push((192 + entry_data.len()) as u16);
            entry_data.push(name.len() as u8);
            entry_data.extend_from_slice(name.as_bytes());
            entry_data.extend_from_slice(tag_data);
        }

        let idxt_offset = 192 + entry_data.len();
        let mut data_record = self.header(idxt_offset as u32, self.entries.len() as u32, 0);
        data_record.extend_from_slice(&entry_data);
        data_record.extend_from_slice(b"IDXT");
        for offset in offsets {
            data_record.extend_from_slice(&offset.to_be_bytes());
        }
        pad4(&mut data_record);

        let mut header_record = self.header(0, 1, 192);
        header_record.extend_from_slice(&self.tagx());

        vec![header_record, data_record]
    }

    /// 192-byte INDX header: IDXT offset at 20, count at 24, encoding at
    /// 28, CNCX count at 52, TAGX offset at 180.
    fn header(&self, idxt: u32, count: u32, tagx: u32) -> Vec<u8> {
        let mut record = vec![0u8; 192];
        record[0..4].copy_from_slice(b"INDX");
        record[4..8].copy_from_slice(&192u32.to_be_bytes());
        record[12..16].copy_from_slice(&2u32.to_be_bytes());
        record[20..24].copy_from_slice(&idxt.to_be_bytes());
        record[24..28].copy_from_slice(&count.to_be_bytes());
        record[28..32].copy_from_slice(&65001u32.to_be_bytes());
        record[36..40].copy_from_slice(&(self.entries.len() as u32).to_be_bytes());
        record[52..56].copy_from_slice(&self.num_cncx.to_be_bytes());
        record[180..184].copy_from_slice(&tagx.to_be_bytes());
        record
    }

    fn tagx(&self) -> Vec<u8> {
        let mut tagx = b"TAGX".to_vec();
        tagx.extend_from_slice(&(12 + 4 * self.tagx.len() as u32).to_be_bytes());
        tagx.extend_from_slice(&(self.control_byte_count as u32).to_be_bytes());
        for tag in &self.tagx {
            tagx.extend_from_slice(&[tag.tag, tag.values_per_entry, tag.bitmask, tag.eof]);
        }
        tagx
    }
}

/// CNCX record holding `strings`, and the offset of each.
pub fn build_cncx(strings: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut cncx = Vec::new();
    let mut offsets = Vec::new();
    for s in strings {
        offsets.push(cncx.len() as u32);
        cncx.extend(encint(s.len() as u32));
        cncx.extend_from_slice(s.as_bytes());
    }
    (cncx, offsets)
}

fn pad4(record: &mut Vec<u8>) {
    while record.len() % 4 != 0 {
        record.push(0);
    }
}
