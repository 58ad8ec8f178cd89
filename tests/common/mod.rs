//! Synthetic BOOKMOBI containers for integration tests.

#![allow(dead_code)]

use std::io::Cursor;

use mobimeta::mobi::ExthBlock;

pub const RECORD_TABLE_OFFSET: usize = 78;

/// A MOBI 6 container under construction.
pub struct MobiBuilder {
    pub header_length: u32,
    pub title: Vec<u8>,
    pub exth: Option<ExthBlock>,
    pub encryption: u16,
    pub codepage: u32,
    pub records: Vec<Vec<u8>>,
    /// Index of the first image record.
    pub image_base: u32,
}

impl MobiBuilder {
    pub fn new(title: &str) -> Self {
        Self {
            header_length: 0xE8,
            title: title.as_bytes().to_vec(),
            exth: None,
            encryption: 0,
            codepage: 65001,
            records: Vec::new(),
            image_base: 0xFFFF_FFFF,
        }
    }

    /// One text record, then a JPEG-looking placeholder image record of
    /// `image_len` bytes that becomes the image base.
    pub fn with_text_and_image(mut self, image_len: usize) -> Self {
        self.records.push(b"Some text for the book.".to_vec());
        let mut image = vec![0u8; image_len];
        image[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        self.image_base = 1 + self.records.len() as u32;
        self.records.push(image);
        self
    }

    pub fn with_record(mut self, record: &[u8]) -> Self {
        self.records.push(record.to_vec());
        self
    }

    pub fn with_exth(mut self, exth: ExthBlock) -> Self {
        self.exth = Some(exth);
        self
    }

    pub fn encrypted(mut self, encryption: u16) -> Self {
        self.encryption = encryption;
        self
    }

    pub fn record0(&self) -> Vec<u8> {
        let mut record0 = vec![0u8; 16 + self.header_length as usize];
        put_u16(&mut record0, 0, 1);
        put_u16(&mut record0, 8, self.records.len().min(1) as u16);
        put_u16(&mut record0, 12, self.encryption);
        record0[16..20].copy_from_slice(b"MOBI");
        put_u32(&mut record0, 0x14, self.header_length);
        put_u32(&mut record0, 28, self.codepage);
        put_u32(&mut record0, 0x5C, 9);
        put_u32(&mut record0, 0x68, 6);
        put_u32(&mut record0, 0x6C, self.image_base);
        put_u32(&mut record0, 0x70, 0xFFFF_FFFF);
        if let Some(exth) = &self.exth {
            put_u32(&mut record0, 0x80, 0x40);
            record0.extend(exth.encode());
        }
        let title_offset = record0.len() as u32;
        put_u32(&mut record0, 0x54, title_offset);
        put_u32(&mut record0, 0x58, self.title.len() as u32);
        record0.extend_from_slice(&self.title);
        record0.extend_from_slice(&[0, 0]);
        record0
    }

    pub fn build(&self) -> Vec<u8> {
        let record0 = self.record0();
        let mut all = vec![record0.as_slice()];
        all.extend(self.records.iter().map(Vec::as_slice));

        let mut data = vec![0u8; RECORD_TABLE_OFFSET];
        data[..14].copy_from_slice(b"Synthetic_Book");
        data[60..68].copy_from_slice(b"BOOKMOBI");
        data[76..78].copy_from_slice(&(all.len() as u16).to_be_bytes());
        let mut offset = RECORD_TABLE_OFFSET + all.len() * 8 + 2;
        for (i, record) in all.iter().enumerate() {
            data.extend_from_slice(&(offset as u32).to_be_bytes());
            data.extend_from_slice(&[0, 0, 0, (2 * i) as u8]);
            offset += record.len();
        }
        data.extend_from_slice(&[0, 0]);
        for record in all {
            data.extend_from_slice(record);
        }
        data
    }

    pub fn cursor(&self) -> Cursor<Vec<u8>> {
        Cursor::new(self.build())
    }
}

/// `(start, end)` of every record according to the table in `data`.
pub fn record_ranges(data: &[u8]) -> Vec<(usize, usize)> {
    let count = u16::from_be_bytes([data[76], data[77]]) as usize;
    let starts: Vec<usize> = (0..count)
        .map(|i| {
            let pos = RECORD_TABLE_OFFSET + i * 8;
            u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]) as usize
        })
        .collect();
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| (start, starts.get(i + 1).copied().unwrap_or(data.len())))
        .collect()
}

/// A small JPEG with enough detail that it does not compress to nothing.
pub fn sample_jpeg(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x ^ y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Jpeg)
        .unwrap();
    out.into_inner()
}

fn put_u16(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u32(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}
