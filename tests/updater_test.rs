mod common;

use std::collections::BTreeSet;
use std::io::Cursor;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use common::{MobiBuilder, record_ranges, sample_jpeg};
use mobimeta::mobi::{
    EXTH_ASIN, EXTH_AUTHOR, EXTH_COVER_OFFSET, EXTH_FAKE_COVER, EXTH_ISBN, EXTH_PUBLISHER,
    EXTH_THUMBNAIL_OFFSET, ExthBlock, read_metadata_from_path,
};
use mobimeta::{
    Error, ImageFormat, Metadata, MetadataUpdater, UpdateOptions, read_metadata, set_metadata,
    update_file,
};

fn assert_contiguous(data: &[u8]) {
    let ranges = record_ranges(data);
    for pair in ranges.windows(2) {
        assert_eq!(pair[0].1, pair[1].0);
        assert!(pair[0].0 <= pair[0].1);
    }
    assert_eq!(ranges.last().map(|r| r.1), Some(data.len()));
}

#[test]
fn test_cover_written_into_placeholder_record() {
    let builder = MobiBuilder::new("Test").with_text_and_image(16 * 1024);
    let original = builder.build();
    let original_ranges = record_ranges(&original);
    assert_eq!(original_ranges.len(), 3);

    let jpeg = sample_jpeg(64, 64);
    assert!(jpeg.len() < 16 * 1024);
    let mi = Metadata::new("Test title")
        .with_author("Test author")
        .with_author("author2")
        .with_cover(jpeg.clone());

    let mut cursor = Cursor::new(original.clone());
    set_metadata(&mut cursor, &mi).unwrap();
    let data = cursor.into_inner();

    let ranges = record_ranges(&data);
    assert_eq!(ranges.len(), 3);
    assert_contiguous(&data);

    // The image record keeps its size and holds the cover, zero padded.
    let (start, end) = ranges[2];
    assert_eq!(end - start, 16 * 1024);
    assert_eq!(&data[start..start + jpeg.len()], jpeg.as_slice());
    assert!(data[start + jpeg.len()..end].iter().all(|&b| b == 0));

    // The text record moved but is unchanged.
    let (old_start, old_end) = original_ranges[1];
    assert_eq!(&data[ranges[1].0..ranges[1].1], &original[old_start..old_end]);

    let read = read_metadata(&mut Cursor::new(data)).unwrap();
    assert_eq!(read.title, "Test title");
    assert_eq!(read.authors, ["Test author", "author2"]);
    let cover = read.cover_data.unwrap();
    assert_eq!(cover.format, ImageFormat::Jpeg);
    assert_eq!(cover.data.len(), 16 * 1024);
}

#[test]
fn test_cover_slot_recorded_in_exth() {
    let builder = MobiBuilder::new("Test").with_text_and_image(8 * 1024);
    let mut cursor = builder.cursor();
    let mi = Metadata::new("Test").with_author("A").with_cover(sample_jpeg(32, 32));
    set_metadata(&mut cursor, &mi).unwrap();

    let updater = MetadataUpdater::open(cursor).unwrap();
    let exth = updater.exth();
    assert_eq!(exth.get_u32(EXTH_COVER_OFFSET), Some(0));
    assert_eq!(exth.get_u32(EXTH_FAKE_COVER), Some(0));
    assert_eq!(exth.get(EXTH_THUMBNAIL_OFFSET), None);
}

#[test]
fn test_thumbnail_is_rescaled() {
    let mut exth = ExthBlock::empty();
    exth.push(EXTH_COVER_OFFSET, 0u32.to_be_bytes());
    exth.push(EXTH_THUMBNAIL_OFFSET, 1u32.to_be_bytes());
    let mut builder = MobiBuilder::new("Test")
        .with_exth(exth)
        .with_text_and_image(256 * 1024);
    let mut thumb = vec![0u8; 64 * 1024];
    thumb[..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    builder.records.push(thumb);

    let cover = sample_jpeg(300, 300);
    let mut cursor = builder.cursor();
    set_metadata(&mut cursor, &Metadata::new("Test").with_cover(cover.clone())).unwrap();
    let data = cursor.into_inner();

    let ranges = record_ranges(&data);
    let (cover_start, _) = ranges[2];
    assert_eq!(&data[cover_start..cover_start + cover.len()], cover.as_slice());

    let (thumb_start, thumb_end) = ranges[3];
    assert_eq!(thumb_end - thumb_start, 64 * 1024);
    assert_eq!(&data[thumb_start..thumb_start + 3], &[0xFF, 0xD8, 0xFF]);
    assert!(!data[thumb_start..thumb_end].starts_with(&cover));
}

#[test]
fn test_full_round_trip() {
    let mut mi = Metadata::new("A Title")
        .with_author("First Author")
        .with_author("Second Author")
        .with_publisher("Publisher Inc.")
        .with_language("fr")
        .with_tag("fiction")
        .with_tag("science");
    mi.comments = Some("<p>A description</p>".into());
    mi.isbn = Some("9780000000002".into());
    mi.pubdate = Some(Utc.with_ymd_and_hms(2011, 3, 4, 5, 6, 7).unwrap());

    let mut cursor = MobiBuilder::new("Old").with_record(b"text").cursor();
    set_metadata(&mut cursor, &mi).unwrap();
    let read = read_metadata(&mut cursor).unwrap();

    assert_eq!(read.title, mi.title);
    assert_eq!(read.authors, mi.authors);
    assert_eq!(read.publisher, mi.publisher);
    assert_eq!(read.comments, mi.comments);
    assert_eq!(read.isbn, mi.isbn);
    assert_eq!(read.tags, mi.tags);
    assert_eq!(read.pubdate, mi.pubdate);
    assert_eq!(read.language, "fr");
}

#[test]
fn test_prefer_author_sort() {
    let mut mi = Metadata::new("T").with_author("Jane Doe");
    mi.author_sort = Some("Doe, Jane".into());

    let mut cursor = MobiBuilder::new("T").with_record(b"text").cursor();
    let options = UpdateOptions {
        prefer_author_sort: true,
    };
    MetadataUpdater::open(&mut cursor)
        .unwrap()
        .update(&mi, &options)
        .unwrap();
    assert_eq!(read_metadata(&mut cursor).unwrap().authors, ["Doe, Jane"]);
}

#[test]
fn test_drm_protected_stream_is_untouched() {
    let original = MobiBuilder::new("Locked").with_record(b"text").encrypted(2).build();
    let mut cursor = Cursor::new(original.clone());

    // Reading is allowed.
    assert_eq!(read_metadata(&mut cursor).unwrap().title, "Locked");

    let result = set_metadata(&mut cursor, &Metadata::new("New").with_author("A"));
    assert!(matches!(result, Err(Error::DrmProtected { encryption: 2 })));
    assert_eq!(cursor.into_inner(), original);
}

#[test]
fn test_read_and_stage_do_not_write() {
    let original = MobiBuilder::new("Untouched").with_text_and_image(4096).build();
    let mut cursor = Cursor::new(original.clone());

    read_metadata(&mut cursor).unwrap();
    {
        let mut updater = MetadataUpdater::open(&mut cursor).unwrap();
        assert!(updater.exth_synthesized());
        updater.metadata().unwrap();
        let staged = updater
            .stage(&Metadata::new("Staged").with_author("A"), &UpdateOptions::default())
            .unwrap();
        assert!(staged.delta() > 0);
    }
    assert_eq!(cursor.into_inner(), original);
}

#[test]
fn test_staged_image_matches_commit() {
    let mut cursor = MobiBuilder::new("Book").with_record(b"text").cursor();
    let mut mi = Metadata::new("Book").with_author("A");
    // Without a date the current time is written, which differs per call.
    mi.pubdate = Some(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
    let mut updater = MetadataUpdater::open(&mut cursor).unwrap();
    let before = updater.table().stream_len as i64;
    let staged = updater.stage(&mi, &UpdateOptions::default()).unwrap();
    assert_eq!(staged.as_bytes().len() as i64, before + staged.delta());

    updater.update(&mi, &UpdateOptions::default()).unwrap();
    drop(updater);
    assert_eq!(cursor.into_inner(), staged.into_bytes());
}

#[test]
fn test_offset_invariant_after_repeated_updates() {
    let mut cursor = MobiBuilder::new("Book")
        .with_record(b"first text record")
        .with_record(b"second")
        .with_record(b"FLIS\0\0\0\x08")
        .cursor();

    for title in ["Short", "A considerably longer title than before", "Mid length"] {
        set_metadata(&mut cursor, &Metadata::new(title).with_author("Author")).unwrap();
        assert_contiguous(cursor.get_ref());
        assert_eq!(read_metadata(&mut cursor).unwrap().title, title);
    }

    let data = cursor.into_inner();
    let ranges = record_ranges(&data);
    assert_eq!(&data[ranges[2].0..ranges[2].1], b"second");
    assert_eq!((ranges[0].1 - ranges[0].0) % 4, 0);
}

#[test]
fn test_no_op_update_keeps_metadata() {
    let mut cursor = MobiBuilder::new("Stable")
        .with_record(b"text")
        .with_record(b"FLIS\0\0\0\x08")
        .cursor();
    let mut mi = Metadata::new("Stable").with_author("Someone").with_tag("history");
    mi.publisher = Some("Press".into());
    mi.pubdate = Some(Utc.with_ymd_and_hms(1999, 12, 31, 0, 0, 0).unwrap());
    set_metadata(&mut cursor, &mi).unwrap();

    let first = read_metadata(&mut cursor).unwrap();
    set_metadata(&mut cursor, &first).unwrap();
    let second = read_metadata(&mut cursor).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_publisher_and_isbn_are_normalized() {
    let mut exth = ExthBlock::empty();
    exth.push(EXTH_PUBLISHER, b"  Press  ".to_vec());
    exth.push(EXTH_ISBN, b" 978-0-00-000000-2 ".to_vec());
    let mut cursor = MobiBuilder::new("Test").with_exth(exth).with_record(b"text").cursor();

    let read = read_metadata(&mut cursor).unwrap();
    assert_eq!(read.publisher.as_deref(), Some("Press"));
    assert_eq!(read.isbn.as_deref(), Some("9780000000002"));
}

#[test]
fn test_unknown_exth_entries_survive() {
    let mut exth = ExthBlock::empty();
    exth.push(EXTH_AUTHOR, b"Old".to_vec());
    exth.push(EXTH_ASIN, b"B000000001".to_vec());
    exth.push(501, b"EBOK".to_vec());
    exth.push(9999, vec![1, 2, 3]);

    let mut cursor = MobiBuilder::new("Old").with_exth(exth).with_record(b"text").cursor();
    set_metadata(&mut cursor, &Metadata::new("New").with_author("New")).unwrap();

    let updater = MetadataUpdater::open(&mut cursor).unwrap();
    let exth = updater.exth();
    assert_eq!(exth.get(EXTH_ASIN), Some(&b"B000000001"[..]));
    assert_eq!(exth.get(501), Some(&b"EBOK"[..]));
    assert_eq!(exth.get(9999), Some(&[1u8, 2, 3][..]));
    let authors: Vec<&[u8]> = exth.get_all(EXTH_AUTHOR).collect();
    assert_eq!(authors, [&b"New"[..]]);

    let unmanaged: Vec<u32> = exth
        .records
        .iter()
        .map(|r| r.id)
        .filter(|id| [EXTH_ASIN, 501, 9999].contains(id))
        .collect();
    assert_eq!(unmanaged, [EXTH_ASIN, 501, 9999]);
}

#[test]
fn test_textread_is_read_only() {
    let mut data = MobiBuilder::new("Plain").with_record(b"text").build();
    data[60..68].copy_from_slice(b"TEXtREAd");
    let mut cursor = Cursor::new(data.clone());

    assert!(read_metadata(&mut cursor).is_ok());
    assert!(matches!(
        set_metadata(&mut cursor, &Metadata::new("x")),
        Err(Error::UnsupportedFormat(_))
    ));
    assert_eq!(cursor.into_inner(), data);
}

#[test]
fn test_unknown_type_is_rejected() {
    let mut data = MobiBuilder::new("Other").with_record(b"text").build();
    data[60..68].copy_from_slice(b"DataPlkr");
    assert!(matches!(
        read_metadata(&mut Cursor::new(data)),
        Err(Error::UnsupportedFormat(_))
    ));
}

#[test]
fn test_update_file_replaces_atomically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("book.mobi");
    std::fs::write(&path, MobiBuilder::new("On Disk").with_record(b"text").build()).unwrap();

    let mi = Metadata::new("Rewritten").with_author("Writer").with_tag("tag");
    update_file(&path, &mi, &UpdateOptions::default()).unwrap();

    let read = read_metadata_from_path(&path).unwrap();
    assert_eq!(read.title, "Rewritten");
    assert_eq!(read.authors, ["Writer"]);
    assert_eq!(read.tags, BTreeSet::from(["tag".to_string()]));

    // Only the book is left in the directory.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn test_update_file_failure_keeps_original() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("locked.mobi");
    let original = MobiBuilder::new("Locked").with_record(b"text").encrypted(1).build();
    std::fs::write(&path, &original).unwrap();

    let result = update_file(&path, &Metadata::new("x"), &UpdateOptions::default());
    assert!(matches!(result, Err(Error::DrmProtected { .. })));
    assert_eq!(std::fs::read(&path).unwrap(), original);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_metadata_round_trip(
        title in "[A-Za-z0-9][A-Za-z0-9 ]{0,30}[A-Za-z0-9]",
        authors in prop::collection::vec("[A-Z][a-z]{1,8}( [A-Z][a-z]{1,8})?", 1..4),
        tags in prop::collection::btree_set("[a-z]{1,8}", 0..5),
        publisher in prop::option::of("[A-Za-z]{1,12}"),
    ) {
        let mut mi = Metadata::new(title.clone());
        mi.authors = authors.clone();
        mi.tags = tags.clone();
        mi.publisher = publisher.clone();

        let mut cursor = MobiBuilder::new("Original").with_record(b"text").cursor();
        set_metadata(&mut cursor, &mi).unwrap();
        let read = read_metadata(&mut cursor).unwrap();

        prop_assert_eq!(read.title, title);
        prop_assert_eq!(read.authors, authors);
        prop_assert_eq!(read.tags, tags);
        prop_assert_eq!(read.publisher, publisher);
    }

    #[test]
    fn prop_records_stay_contiguous(
        title in "[a-z]{0,64}",
        records in prop::collection::vec(prop::collection::vec(any::<u8>(), 1..64), 1..6),
    ) {
        let mut builder = MobiBuilder::new("Book");
        for record in &records {
            builder = builder.with_record(record);
        }
        let original = builder.build();
        let mut cursor = Cursor::new(original.clone());
        set_metadata(&mut cursor, &Metadata::new(title).with_author("A")).unwrap();
        let data = cursor.into_inner();

        let ranges = record_ranges(&data);
        prop_assert_eq!(ranges.len(), records.len() + 1);
        for pair in ranges.windows(2) {
            prop_assert_eq!(pair[0].1, pair[1].0);
        }
        prop_assert_eq!(ranges.last().map(|r| r.1), Some(data.len()));
        for (i, record) in records.iter().enumerate() {
            let (start, end) = ranges[i + 1];
            prop_assert_eq!(&data[start..end], record.as_slice());
        }
    }
}
