//! MOBI/AZW containers: the PDB record table, record 0 headers, EXTH, and
//! in-place metadata rewriting.

pub(crate) mod be;
pub(crate) mod container;
mod cover;
mod exth;
pub(crate) mod headers;
mod huffcdic;
mod langcodes;
mod palmdoc;
mod pdb;
mod reader;
pub(crate) mod text;
mod updater;

pub use cover::{MAX_THUMB_DIMEN, rescale_image};
pub use exth::{
    EXTH_ASIN, EXTH_AUTHOR, EXTH_COVER_OFFSET, EXTH_DESCRIPTION, EXTH_FAKE_COVER, EXTH_ISBN,
    EXTH_KF8_BOUNDARY, EXTH_LANGUAGE, EXTH_PUBDATE, EXTH_PUBLISHER, EXTH_SUBJECT,
    EXTH_THUMBNAIL_OFFSET, EXTH_UPDATED_TITLE, ExthBlock, ExthRecord, ImageSlots, format_date,
    parse_date,
};
pub use headers::{Compression, Encoding, MobiHeader, NULL_INDEX};
pub use langcodes::{iana_to_mobi, mobi_to_iana};
pub use pdb::{BookType, PdbRecord, PdbRecordTable};
pub use reader::{UNKNOWN_AUTHOR, read_metadata, read_metadata_from_path, read_metadata_with_encoding};
pub use updater::{MetadataUpdater, StagedImage, set_metadata, update_file};
