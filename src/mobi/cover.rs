//! Fitting replacement cover and thumbnail images into existing records.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::error::{Error, Result};

/// Bounding box for thumbnail images.
pub const MAX_THUMB_DIMEN: (u32, u32) = (180, 240);

const SHRINK_FACTOR: f64 = 0.8;
const MIN_SIDE: u32 = 16;

/// Re-encode `data` so it is at most `max_bytes` long and, when `dimen` is
/// given, fits inside that bounding box.
///
/// Images that already satisfy both limits are returned unchanged (after a
/// decode check). Otherwise the image is re-encoded as JPEG at decreasing
/// quality, then at decreasing size, until it fits.
pub fn rescale_image(data: &[u8], max_bytes: usize, dimen: Option<(u32, u32)>) -> Result<Vec<u8>> {
    let mut img = image::load_from_memory(data)?;

    let within_box = dimen.is_none_or(|(w, h)| img.width() <= w && img.height() <= h);
    if within_box && data.len() <= max_bytes {
        return Ok(data.to_vec());
    }

    if let Some((w, h)) = dimen
        && !within_box
    {
        img = img.resize(w, h, FilterType::Triangle);
    }

    loop {
        for quality in (10..=90).rev().step_by(10) {
            let encoded = encode_jpeg(&img, quality)?;
            if encoded.len() <= max_bytes {
                tracing::debug!(
                    "Rescaled image to {}x{} at quality {quality} ({} bytes)",
                    img.width(),
                    img.height(),
                    encoded.len()
                );
                return Ok(encoded);
            }
        }

        let width = (img.width() as f64 * SHRINK_FACTOR) as u32;
        let height = (img.height() as f64 * SHRINK_FACTOR) as u32;
        if width < MIN_SIDE || height < MIN_SIDE {
            return Err(Error::CoverTooLarge { slot: max_bytes });
        }
        img = img.resize_exact(width, height, FilterType::Triangle);
    }
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality))?;
    Ok(buf.into_inner())
}
