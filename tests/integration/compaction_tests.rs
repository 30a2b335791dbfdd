use std::cell::RefCell;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::thread;
use tempfile::tempdir;
use thumbstore::cache::codec::FIXED_HEADER_LEN;
use thumbstore::cache::{
    AssetIndex, CacheError, FsAssetIndex, ImageMeta, KeyRules, LivenessResolver, PixelFormat,
    StoreOptions, ThumbnailStore,
};

fn rgba(side: i32) -> ImageMeta {
    ImageMeta::new(side, side, PixelFormat::Rgba32)
}

fn file_len(path: &Path) -> u64 {
    fs::metadata(path).unwrap().len()
}

fn open(dir: &Path) -> ThumbnailStore {
    ThumbnailStore::open(dir.join("thumbs.bin"), StoreOptions::default())
}

#[test]
fn test_clean_drops_dead_keys_and_shrinks_file() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.save("A", &[1; 64], rgba(4), 1);
    store.save("B", &[2; 64], rgba(4), 2);
    store.save("C", &[3; 64], rgba(4), 3);
    let before = file_len(store.path());

    let report = store.try_clean(|key| key != "B").unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.kept, 2);
    assert_eq!(report.bytes_before, before);
    // Exactly B's record is gone: 1-byte key, 64-byte payload.
    assert_eq!(before - report.bytes_after, FIXED_HEADER_LEN + 1 + 64);
    assert_eq!(file_len(store.path()), report.bytes_after);

    assert_eq!(store.try_get("A", 1).unwrap().payload, vec![1; 64]);
    assert!(store.try_get("B", 2).is_none());
    assert_eq!(store.try_get("C", 3).unwrap().payload, vec![3; 64]);
}

#[test]
fn test_liveness_runs_on_calling_thread() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    for (i, key) in ["A", "B", "C", "D", "E", "F"].iter().enumerate() {
        store.save(key, &[i as u8; 16], rgba(2), 1);
    }

    // Rc<RefCell<_>> is neither Send nor Sync.
    let seen = Rc::new(RefCell::new(Vec::new()));
    let report = store
        .try_clean({
            let seen = Rc::clone(&seen);
            move |key| {
                seen.borrow_mut().push((key.to_string(), thread::current().id()));
                key != "C"
            }
        })
        .unwrap();

    assert_eq!(report.removed, 1);
    let seen = seen.borrow();
    assert_eq!(seen.len(), 6);
    let caller = thread::current().id();
    assert!(seen.iter().all(|(_, id)| *id == caller));
}

#[cfg(unix)]
#[test]
fn test_failed_compaction_keeps_store_usable() {
    let dir = tempdir().unwrap();
    let nested = dir.path().join("nested");
    let store = open(&nested);
    store.save("A", &[1; 64], rgba(4), 1);
    store.save("B", &[2; 64], rgba(4), 2);
    let stats_before = store.stats();

    // No directory to create the compaction file in. The open handle
    // still reads the unlinked store.
    fs::remove_dir_all(&nested).unwrap();

    let result = store.try_clean(|key| key == "A");
    assert!(matches!(result, Err(CacheError::Io { .. })), "{result:?}");
    assert!(store.is_enabled());
    assert_eq!(store.stats(), stats_before);
    assert_eq!(store.try_get("A", 1).unwrap().payload, vec![1; 64]);
    assert_eq!(store.try_get("B", 2).unwrap().payload, vec![2; 64]);

    store.clean(|key| key == "A");
    assert!(store.try_get("B", 2).is_some());
}

#[test]
fn test_compacted_file_reopens_and_accepts_appends() {
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        store.save("A", &[1; 64], rgba(4), 1);
        store.save("B", &[2; 64], rgba(4), 2);
        store.clean(|key| key == "A");
        store.save("D", &[4; 16], rgba(2), 4);
    }

    let store = open(dir.path());
    let report = store.recovery_report().unwrap();
    assert_eq!(report.truncated_bytes, 0);
    assert_eq!(report.records_scanned, 2);
    assert!(store.try_get("A", 1).is_some());
    assert!(store.try_get("B", 2).is_none());
    assert_eq!(store.try_get("D", 4).unwrap().payload, vec![4; 16]);
}

#[test]
fn test_clean_discards_superseded_records() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.save("A", &[1; 64], rgba(4), 1);
    store.save("A", &[2; 64], rgba(4), 2);
    store.save("B", &[3; 64], rgba(4), 3);
    store.save("B", &[4; 64], rgba(4), 4);
    assert!(store.stats().dead_bytes > 0);

    store.try_clean(|key| key == "A").unwrap();
    let stats = store.stats();
    assert_eq!(stats.keys, 1);
    assert_eq!(stats.dead_bytes, 0);
    assert_eq!(store.try_get("A", 2).unwrap().payload, vec![2; 64]);
}

#[test]
fn test_clean_with_nothing_dead_leaves_file_alone() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.save("A", &[1; 64], rgba(4), 1);
    store.save("A", &[2; 64], rgba(4), 2);
    let before = file_len(store.path());

    let report = store.try_clean(|_| true).unwrap();
    assert_eq!(report.removed, 0);
    assert_eq!(report.bytes_after, before);
    assert_eq!(file_len(store.path()), before);
}

#[test]
fn test_no_temp_files_left_behind() {
    let dir = tempdir().unwrap();
    let store = open(dir.path());
    store.save("A", &[1; 64], rgba(4), 1);
    store.save("B", &[2; 64], rgba(4), 2);
    store.clean(|key| key == "A");

    let names: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name())
        .collect();
    assert_eq!(names, vec![std::ffi::OsString::from("thumbs.bin")]);
}

struct KnownAssets {
    packages: HashSet<&'static str>,
    files: HashSet<&'static str>,
}

impl AssetIndex for KnownAssets {
    fn has_package(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    fn resolves(&self, path: &str) -> bool {
        self.files.contains(path)
    }
}

#[test]
fn test_liveness_classes_against_asset_index() {
    let dir = tempdir().unwrap();
    let store = ThumbnailStore::open(dir.path().join("Cache/thumbs.bin"), StoreOptions::default());
    let meta = rgba(2);
    store.save("AddonPackages/Kept.Pack.1.var:/Custom/a.jpg", &[0; 16], meta, 1);
    store.save("AddonPackages/Gone.Pack.1.var:/Custom/a.jpg", &[0; 16], meta, 1);
    store.save("SELF:/Custom/Scripts/icon.png", &[0; 16], meta, 1);
    store.save("Custom/Atom/kept.png", &[0; 16], meta, 1);
    store.save("Custom/Atom/gone.png", &[0; 16], meta, 1);

    let assets = KnownAssets {
        packages: HashSet::from(["Kept.Pack.1.var"]),
        files: HashSet::from(["Custom/Atom/kept.png"]),
    };
    let rules = KeyRules::default();
    let resolver = LivenessResolver::new(&assets, &rules, dir.path());
    store.clean_with(&resolver);

    let keys: Vec<String> = store.entries().into_iter().map(|(key, _)| key).collect();
    assert_eq!(
        keys,
        vec![
            "ARCHIVE:/Kept.Pack.1.var:/Custom/a.jpg".to_string(),
            "SELF:/Custom/Scripts/icon.png".to_string(),
            "Custom/Atom/kept.png".to_string(),
        ]
    );
}

#[test]
fn test_filesystem_asset_index() {
    let dir = tempdir().unwrap();
    let base = dir.path();
    fs::create_dir_all(base.join("AllPackages/Sub")).unwrap();
    fs::write(base.join("AllPackages/Sub/Author.Pack.1.VAR"), b"zip").unwrap();
    fs::create_dir_all(base.join("Custom/Hair")).unwrap();
    fs::write(base.join("Custom/Hair/x.jpg"), b"jpg").unwrap();

    let rules = KeyRules::default();
    let assets = FsAssetIndex::scan(base, &rules);
    assert_eq!(assets.package_count(), 1);

    let resolver = LivenessResolver::new(&assets, &rules, base);
    assert!(resolver.is_live("ARCHIVE:/Author.Pack.1.VAR:/Custom/Hair/x.jpg"));
    assert!(!resolver.is_live("ARCHIVE:/Other.Pack.1.var:/Custom/Hair/x.jpg"));
    assert!(resolver.is_live("Custom/Hair/x.jpg"));
    assert!(!resolver.is_live("Custom/Hair/y.jpg"));
    assert!(resolver.is_live("SELF:/anything.png"));
}

#[test]
fn test_package_removed_from_disk_is_compacted() {
    let dir = tempdir().unwrap();
    let base = dir.path();
    fs::create_dir_all(base.join("AddonPackages")).unwrap();
    let package = base.join("AddonPackages/Author.Pack.1.var");
    fs::write(&package, b"zip").unwrap();

    let store = ThumbnailStore::open(base.join("Cache/thumbs.bin"), StoreOptions::default());
    let key = "ARCHIVE:/Author.Pack.1.var:/Custom/Hair/x.jpg";
    store.save(key, &vec![9; 64 * 64 * 4], rgba(64), 1000);

    let rules = KeyRules::default();
    let assets = FsAssetIndex::scan(base, &rules);
    store.clean_with(&LivenessResolver::new(&assets, &rules, base));
    assert!(store.try_get(key, 1000).is_some());

    fs::remove_file(&package).unwrap();
    let assets = FsAssetIndex::scan(base, &rules);
    store.clean_with(&LivenessResolver::new(&assets, &rules, base));
    assert!(store.try_get(key, 1000).is_none());
    assert_eq!(file_len(store.path()), 0);
}
