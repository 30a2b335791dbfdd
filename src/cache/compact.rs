//! Liveness-driven compaction.
//!
//! # Overview
//!
//! Superseded records and records for assets that no longer exist stay in the
//! store file until compaction rewrites it. Compaction asks a liveness
//! predicate about every indexed key, copies the live records into a temporary
//! file next to the store, and renames that file over the store.
//!
//! Nothing irreversible happens until the final rename: if resolving
//! liveness or writing the copy fails, the temporary file is discarded and
//! the store is left exactly as it was.
//!
//! # Liveness Classes
//!
//! [`LivenessResolver`] applies three rules, one per [`KeyClass`]:
//!
//! * Archive keys are live if the asset index knows the package, or the
//!   package file sits in one of the package roots.
//! * Self-reference keys are always live; they cannot be checked cheaply.
//! * Loose-file keys are live if the asset index resolves the path, or the
//!   file exists on disk.

use serde::Serialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::codec::RecordEncoder;
use super::database::StoreState;
use super::entry::IndexEntry;
use super::index::Index;
use super::key::{KeyClass, KeyRules};
use super::{io_err, CacheError, CacheResult};

/// Outcome of one compaction run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    /// Keys checked for liveness
    pub keys_scanned: usize,
    /// Keys dropped
    pub removed: usize,
    /// Keys copied into the new file
    pub kept: usize,
    /// File length before compaction
    pub bytes_before: u64,
    /// File length after compaction
    pub bytes_after: u64,
}

/// Host-side knowledge of which assets currently exist.
pub trait AssetIndex {
    /// Whether a package with this file name is known.
    fn has_package(&self, package: &str) -> bool;

    /// Whether a loose asset path resolves to a real file.
    fn resolves(&self, path: &str) -> bool;
}

/// Asset index built by walking the package roots under a base directory.
#[derive(Debug, Clone, Default)]
pub struct FsAssetIndex {
    base_dir: PathBuf,
    packages: HashSet<String>,
}

impl FsAssetIndex {
    /// Collect every package file found below the package roots of `base_dir`.
    ///
    /// Unreadable directories are skipped.
    #[must_use]
    pub fn scan(base_dir: &Path, rules: &KeyRules) -> Self {
        let mut packages = HashSet::new();
        for root in &rules.package_roots {
            let dir = base_dir.join(root);
            if !dir.is_dir() {
                continue;
            }
            for entry in WalkDir::new(&dir).follow_links(true) {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        log::debug!("Skipping unreadable entry under {}: {}", dir.display(), e);
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                if let Some(name) = entry.file_name().to_str() {
                    if rules.is_package_file(name) {
                        packages.insert(name.to_string());
                    }
                }
            }
        }
        log::debug!(
            "Found {} packages under {}",
            packages.len(),
            base_dir.display()
        );
        Self {
            base_dir: base_dir.to_path_buf(),
            packages,
        }
    }

    /// Number of packages found.
    #[must_use]
    pub fn package_count(&self) -> usize {
        self.packages.len()
    }
}

impl AssetIndex for FsAssetIndex {
    fn has_package(&self, package: &str) -> bool {
        self.packages.contains(package)
    }

    fn resolves(&self, path: &str) -> bool {
        self.base_dir.join(path).is_file()
    }
}

/// Decides liveness per key class.
#[derive(Debug)]
pub struct LivenessResolver<'a, A: AssetIndex + ?Sized> {
    index: &'a A,
    rules: &'a KeyRules,
    base_dir: PathBuf,
    package_dirs: Vec<PathBuf>,
}

impl<'a, A: AssetIndex + ?Sized> LivenessResolver<'a, A> {
    /// Resolve against `index`, falling back to files under `base_dir`.
    pub fn new(index: &'a A, rules: &'a KeyRules, base_dir: &Path) -> Self {
        Self {
            index,
            rules,
            base_dir: base_dir.to_path_buf(),
            package_dirs: rules
                .package_roots
                .iter()
                .map(|root| base_dir.join(root))
                .collect(),
        }
    }

    /// Whether the asset behind `key` still exists.
    #[must_use]
    pub fn is_live(&self, key: &str) -> bool {
        match self.rules.classify(key) {
            KeyClass::Archive { package, .. } => {
                self.index.has_package(package)
                    || self
                        .package_dirs
                        .iter()
                        .any(|dir| dir.join(package).is_file())
            }
            KeyClass::SelfReference => true,
            KeyClass::LooseFile(path) => {
                self.index.resolves(path) || self.base_dir.join(path).exists()
            }
        }
    }
}

/// Compact the store held in `slot`. The caller holds the store lock.
pub(crate) fn compact_locked<F>(
    slot: &mut Option<StoreState>,
    path: &Path,
    is_live: F,
) -> CacheResult<CompactionReport>
where
    F: Fn(&str) -> bool,
{
    let (mut report, temp, fresh, new_len) = {
        let state = slot.as_mut().ok_or(CacheError::Disabled)?;

        let keys: Vec<&str> = state.index.keys().collect();
        let dead: HashSet<&str> = keys.iter().copied().filter(|&key| !is_live(key)).collect();

        let report = CompactionReport {
            keys_scanned: keys.len(),
            removed: dead.len(),
            kept: keys.len() - dead.len(),
            bytes_before: state.len,
            bytes_after: state.len,
        };
        if dead.is_empty() {
            return Ok(report);
        }
        log::debug!("Compacting: {} of {} keys are dead", dead.len(), keys.len());

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let mut temp = tempfile::Builder::new()
            .prefix(".thumbstore-compact")
            .tempfile_in(dir)
            .map_err(io_err("creating compaction file"))?;

        let (fresh, new_len) = {
            let mut writer = BufWriter::new(temp.as_file_mut());
            let rewritten = rewrite_live(&state.index, &mut state.file, &dead, &mut writer)?;
            writer.flush().map_err(io_err("flushing compaction file"))?;
            rewritten
        };
        temp.as_file()
            .sync_all()
            .map_err(io_err("syncing compaction file"))?;
        (report, temp, fresh, new_len)
    };

    // Point of no return: close the old handle and move the copy into place.
    drop(slot.take());
    if let Err(e) = temp.persist(path) {
        log::warn!("Failed to replace store file, keeping original: {}", e.error);
        *slot = reopen(path, None);
        return Err(io_err("replacing store file")(e.error));
    }

    *slot = reopen(path, Some((fresh, new_len)));
    if slot.is_none() {
        return Err(CacheError::Disabled);
    }

    report.bytes_after = new_len;
    Ok(report)
}

/// Copy every live record of `index` from `source` into `writer`, in file order.
fn rewrite_live<W: Write>(
    index: &Index,
    source: &mut File,
    dead: &HashSet<&str>,
    writer: &mut W,
) -> CacheResult<(Index, u64)> {
    let mut fresh = Index::new();
    let mut offset = 0u64;
    let mut buf = Vec::new();
    let mut encoder = RecordEncoder::new(writer);

    for (key, entry) in index.by_offset() {
        if dead.contains(key) {
            continue;
        }
        buf.resize(entry.length as usize, 0);
        source
            .seek(SeekFrom::Start(entry.offset))
            .and_then(|_| source.read_exact(&mut buf))
            .map_err(io_err("reading live record"))?;

        let record_len = encoder.encode(key, entry.last_modified, entry.meta, &buf)?;
        fresh.insert(
            key.to_string(),
            IndexEntry {
                offset: offset + record_len - u64::from(entry.length),
                record_offset: offset,
                record_len,
                ..*entry
            },
        );
        offset += record_len;
    }
    Ok((fresh, offset))
}

/// Reopen the store file after a replace attempt.
///
/// With `fresh`, the index built during the rewrite is adopted; without it
/// the file is scanned again. A failure leaves the store disabled.
fn reopen(path: &Path, fresh: Option<(Index, u64)>) -> Option<StoreState> {
    let reopened = match fresh {
        Some((index, len)) => std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map(|file| StoreState::from_parts(file, index, len))
            .map_err(|source| CacheError::Open {
                path: path.to_path_buf(),
                source,
            }),
        None => StoreState::open(path).map(|(state, _)| state),
    };
    match reopened {
        Ok(state) => Some(state),
        Err(e) => {
            log::error!("Thumbnail store disabled after compaction: {}", e);
            None
        }
    }
}
