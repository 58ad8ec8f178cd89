//! # mobimeta
//!
//! Read and rewrite the metadata of MOBI/AZW/AZW3 ebooks in place, and
//! decode the structure of KF8 books for inspection.
//!
//! ## Features
//!
//! - Windowed, strided access to any record of a PDB container
//! - MOBI header and EXTH parsing, tolerant of malformed blocks on read
//! - Staged metadata updates: the new container is built and validated in
//!   memory, then committed in one write (or one atomic rename for files)
//! - Cover and thumbnail replacement, rescaled to fit the existing records
//! - KF8 skeleton/fragment reassembly, FDST flows and NCX/guide indices
//!
//! ## Quick Start
//!
//! ```no_run
//! use mobimeta::{read_metadata_from_path, update_file, UpdateOptions};
//!
//! let mut mi = read_metadata_from_path("book.azw3").unwrap();
//! mi.title = "A Better Title".into();
//! mi.tags.insert("fiction".into());
//! update_file("book.azw3", &mi, &UpdateOptions::default()).unwrap();
//! ```
//!
//! Staging without committing:
//!
//! ```no_run
//! use std::fs::OpenOptions;
//! use mobimeta::{Metadata, MetadataUpdater, UpdateOptions};
//!
//! let file = OpenOptions::new().read(true).write(true).open("book.mobi").unwrap();
//! let mut updater = MetadataUpdater::open(file).unwrap();
//! let mi = Metadata::new("Title").with_author("Author Name");
//! let staged = updater.stage(&mi, &UpdateOptions::default()).unwrap();
//! println!("container grows by {} bytes", staged.delta());
//! ```

pub mod error;
pub mod io;
pub mod kf8;
pub mod metadata;
pub mod mobi;

pub use error::{Error, Result};
pub use io::{ContainerStream, RecordSlice};
pub use kf8::Kf8Book;
pub use metadata::{CoverData, ImageFormat, Metadata, UpdateOptions};
pub use mobi::{
    MetadataUpdater, StagedImage, read_metadata, read_metadata_from_path, set_metadata,
    update_file,
};
