//! Error types for mobimeta operations.

use thiserror::Error;

/// Errors that can occur while reading, rewriting or inspecting a container.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The PDB type tag is not a MOBI variant this crate understands.
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Metadata writes into encrypted books are refused.
    #[error("Setting metadata in DRM protected MOBI files is not supported (encryption type {encryption})")]
    DrmProtected { encryption: u16 },

    /// A slice write whose byte count does not match its target range.
    #[error("Key and value lengths must match: expected {expected} bytes, got {found}")]
    LengthMismatch { expected: usize, found: usize },

    #[error("No usable EXTH block: {0}")]
    MissingExth(String),

    /// A record, index or table does not agree with the rest of the container.
    #[error("Structural inconsistency in {record}: {reason}")]
    StructuralInconsistency { record: String, reason: String },

    #[error("Invalid MOBI: {0}")]
    InvalidMobi(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// The cover could not be re-encoded small enough for its record.
    #[error("Cover image does not fit in its {slot} byte record")]
    CoverTooLarge { slot: usize },
}

impl Error {
    pub(crate) fn structural(record: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::StructuralInconsistency {
            record: record.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
