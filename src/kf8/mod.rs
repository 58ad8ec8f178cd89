//! KF8 (AZW3) structure decoding: FDST, the INDX tables and reassembly of
//! skeletons and fragments into the book's parts.

mod fdst;
mod index;
mod structure;
#[cfg(test)]
mod testing;

pub use fdst::Fdst;
pub use index::{
    Cncx, Fragment, GuideEntry, Index, IndexEntry, NcxEntry, SkelEntry, TagXEntry, TocNode,
    build_toc, decint, read_index,
};
pub use structure::{Kf8Book, Kf8Summary, Part, assemble_parts};
