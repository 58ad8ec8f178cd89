use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// Image format of a cover payload, detected from its magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
#[cfg_attr(feature = "cli", serde(rename_all = "lowercase"))]
pub enum ImageFormat {
    Jpeg,
    Png,
    Gif,
    Bmp,
}

impl ImageFormat {
    /// Detect image type from magic bytes.
    pub fn detect(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }

        if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some(ImageFormat::Jpeg)
        } else if data.starts_with(b"\x89PNG") {
            Some(ImageFormat::Png)
        } else if data.starts_with(b"GIF8") {
            Some(ImageFormat::Gif)
        } else if data.starts_with(b"BM") {
            Some(ImageFormat::Bmp)
        } else {
            None
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Bmp => "bmp",
        }
    }
}

/// Cover image bytes with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct CoverData {
    pub format: ImageFormat,
    #[cfg_attr(feature = "cli", serde(skip))]
    pub data: Vec<u8>,
}

/// Book metadata exchanged with callers of the reader and the updater.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "cli", derive(serde::Serialize))]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub author_sort: Option<String>,
    pub publisher: Option<String>,
    pub comments: Option<String>,
    pub isbn: Option<String>,
    pub tags: BTreeSet<String>,
    pub pubdate: Option<DateTime<Utc>>,
    pub timestamp: Option<DateTime<Utc>>,
    /// IANA language tag, e.g. `en` or `en-US`.
    pub language: String,
    pub cover_data: Option<CoverData>,
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_publisher(mut self, publisher: impl Into<String>) -> Self {
        self.publisher = Some(publisher.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_cover(mut self, data: Vec<u8>) -> Self {
        self.cover_data = ImageFormat::detect(&data).map(|format| CoverData { format, data });
        self
    }
}

/// Caller-supplied knobs for [`crate::MetadataUpdater::update`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Write `author_sort` as the single author entry when it is set.
    pub prefer_author_sort: bool,
}
