use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;
use thumbstore::cache::codec::{RecordEncoder, FIXED_HEADER_LEN};
use thumbstore::cache::{ImageMeta, PixelFormat, StoreOptions, ThumbnailStore};

fn rgba(side: i32) -> ImageMeta {
    ImageMeta::new(side, side, PixelFormat::Rgba32)
}

fn pixels(len: usize, seed: u8) -> Vec<u8> {
    vec![seed; len]
}

fn append_raw(path: &Path, bytes: &[u8]) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
}

/// Write three valid records and close the store. Returns the file length.
fn seed_store(dir: &Path) -> (PathBuf, u64) {
    let path = dir.join("thumbs.bin");
    let store = ThumbnailStore::open(&path, StoreOptions::default());
    for (i, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
        store.save(name, &pixels(64, i as u8), rgba(4), 100 + i as i64);
    }
    store.close();
    let len = fs::metadata(&path).unwrap().len();
    (path, len)
}

#[test]
fn test_trailing_garbage_is_truncated() {
    let dir = tempdir().unwrap();
    let (path, valid_len) = seed_store(dir.path());
    append_raw(&path, &[0xAB; 10]);

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    for (i, name) in ["a.png", "b.png", "c.png"].iter().enumerate() {
        let hit = store.try_get(name, 100 + i as i64).unwrap();
        assert_eq!(hit.payload, pixels(64, i as u8));
    }

    let report = store.recovery_report().unwrap();
    assert_eq!(report.records_scanned, 3);
    assert_eq!(report.truncated_bytes, 10);
    assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);
}

#[test]
fn test_torn_final_record_is_dropped() {
    let dir = tempdir().unwrap();
    let (path, valid_len) = seed_store(dir.path());

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(valid_len - 20).unwrap();
    drop(file);

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    assert!(store.try_get("a.png", 100).is_some());
    assert!(store.try_get("b.png", 101).is_some());
    assert!(store.try_get("c.png", 102).is_none());

    let record_len = FIXED_HEADER_LEN + "c.png".len() as u64 + 64;
    assert_eq!(
        fs::metadata(&path).unwrap().len(),
        valid_len - record_len
    );
}

#[test]
fn test_appends_after_recovery_land_at_valid_end() {
    let dir = tempdir().unwrap();
    let (path, _) = seed_store(dir.path());
    append_raw(&path, b"garbage");

    {
        let store = ThumbnailStore::open(&path, StoreOptions::default());
        store.save("d.png", &pixels(64, 9), rgba(4), 7);
    }

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    assert_eq!(store.recovery_report().unwrap().truncated_bytes, 0);
    assert_eq!(store.try_get("d.png", 7).unwrap().payload, pixels(64, 9));
    assert_eq!(store.stats().keys, 4);
}

#[test]
fn test_negative_length_stops_the_scan() {
    let dir = tempdir().unwrap();
    let (path, valid_len) = seed_store(dir.path());

    let mut tail = Vec::new();
    tail.write_i32::<LittleEndian>(-5).unwrap();
    tail.extend_from_slice(&[0u8; 64]);
    append_raw(&path, &tail);

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    assert_eq!(store.stats().keys, 3);
    assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);
}

#[test]
fn test_oversized_length_is_treated_as_torn_tail() {
    let dir = tempdir().unwrap();
    let (path, valid_len) = seed_store(dir.path());

    let mut tail = Vec::new();
    tail.write_i32::<LittleEndian>(i32::MAX).unwrap();
    tail.extend_from_slice(b"short");
    append_raw(&path, &tail);

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    assert_eq!(store.stats().keys, 3);
    assert_eq!(store.recovery_report().unwrap().truncated_bytes, 9);
    assert_eq!(fs::metadata(&path).unwrap().len(), valid_len);
}

#[test]
fn test_invalid_record_keeps_older_entry_and_scan_continues() {
    let dir = tempdir().unwrap();
    let (path, _) = seed_store(dir.path());

    {
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        let mut encoder = RecordEncoder::new(&mut file);
        // Claims 64x64 RGBA but carries 10 bytes.
        encoder.encode("a.png", 200, rgba(64), &[1; 10]).unwrap();
        encoder.encode("e.png", 5, rgba(2), &[2; 16]).unwrap();
    }
    let file_len = fs::metadata(&path).unwrap().len();

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    assert_eq!(store.try_get("a.png", 100).unwrap().payload, pixels(64, 0));
    assert!(store.try_get("a.png", 200).is_none());
    assert_eq!(store.try_get("e.png", 5).unwrap().payload, vec![2; 16]);

    let report = store.recovery_report().unwrap();
    assert_eq!(report.records_scanned, 5);
    assert_eq!(report.records_skipped, 1);
    assert_eq!(report.keys_indexed, 4);
    assert_eq!(fs::metadata(&path).unwrap().len(), file_len);
}

#[test]
fn test_non_utf8_key_is_skipped() {
    let dir = tempdir().unwrap();
    let (path, _) = seed_store(dir.path());

    let mut record = Vec::new();
    record.write_i32::<LittleEndian>(2).unwrap();
    record.extend_from_slice(&[0xFF, 0xFE]);
    record.write_i64::<LittleEndian>(1).unwrap();
    record.write_i32::<LittleEndian>(1).unwrap();
    record.write_i32::<LittleEndian>(1).unwrap();
    record.write_i32::<LittleEndian>(PixelFormat::Alpha8.to_raw()).unwrap();
    record.write_i32::<LittleEndian>(1).unwrap();
    record.push(0);
    append_raw(&path, &record);

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    let report = store.recovery_report().unwrap();
    assert_eq!(report.records_skipped, 1);
    assert_eq!(report.truncated_bytes, 0);
    assert_eq!(store.stats().keys, 3);
}

#[test]
fn test_empty_file_opens_clean() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("thumbs.bin");

    let store = ThumbnailStore::open(&path, StoreOptions::default());
    assert!(store.is_enabled());
    assert!(path.is_file());
    assert_eq!(store.recovery_report().unwrap().records_scanned, 0);
}
