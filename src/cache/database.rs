//! File-backed thumbnail store.
//!
//! A single mutex guards the file handle and the index. Every public
//! operation holds it from start to finish, so lookups, appends and
//! compaction are atomic with respect to each other.

use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::codec::RecordEncoder;
use super::compact::{self, AssetIndex, CompactionReport, LivenessResolver};
use super::entry::{ImageMeta, IndexEntry, Thumbnail};
use super::format::expected_payload_len;
use super::index::{self, Index, RecoveryReport};
use super::key::KeyRules;
use super::pool::{BufferPool, PoolConfig};
use super::{io_err, CacheError, CacheResult, Miss};

/// Encode buffers above this size are released after each append.
const SCRATCH_RETAIN: usize = 1024 * 1024;

/// Tunables for a store instance.
#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    /// Key normalization rules
    pub keys: KeyRules,
    /// Payload buffer pool limits
    pub pool: PoolConfig,
    /// Call `fsync` after every append
    pub sync_writes: bool,
}

/// Size accounting for the store file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Whether the store is open
    pub enabled: bool,
    /// Distinct keys
    pub keys: usize,
    /// Bytes held by the latest record of each key
    pub live_bytes: u64,
    /// Total file length
    pub file_bytes: u64,
    /// Bytes held by superseded or invalid records
    pub dead_bytes: u64,
}

/// Open file handle plus the index built from it.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub(crate) file: File,
    pub(crate) index: Index,
    /// End of the last complete record; appends go here.
    pub(crate) len: u64,
    scratch: Vec<u8>,
}

impl StoreState {
    /// Open or create the file at `path` and rebuild its index.
    pub(crate) fn open(path: &Path) -> CacheResult<(Self, RecoveryReport)> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CacheError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        }
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|source| CacheError::Open {
                path: path.to_path_buf(),
                source,
            })?;

        let (index, report) = index::build(&mut file)?;
        Ok((Self::from_parts(file, index, report.valid_length), report))
    }

    pub(crate) fn from_parts(file: File, index: Index, len: u64) -> Self {
        Self {
            file,
            index,
            len,
            scratch: Vec::new(),
        }
    }

    fn read_payload(&mut self, entry: &IndexEntry, buf: &mut [u8]) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(entry.offset))?;
        self.file.read_exact(buf)
    }

    fn append(
        &mut self,
        key: &str,
        last_modified: i64,
        meta: ImageMeta,
        payload: &[u8],
        sync: bool,
    ) -> CacheResult<IndexEntry> {
        self.scratch.clear();
        let record_len =
            RecordEncoder::new(&mut self.scratch).encode(key, last_modified, meta, payload)?;
        let record_offset = self.len;

        let written = self
            .file
            .seek(SeekFrom::Start(record_offset))
            .and_then(|_| self.file.write_all(&self.scratch))
            .and_then(|()| self.file.flush())
            .and_then(|()| if sync { self.file.sync_data() } else { Ok(()) });

        if self.scratch.capacity() > SCRATCH_RETAIN {
            self.scratch = Vec::new();
        }

        if let Err(e) = written {
            // Never leave a torn record in front of the next append.
            if let Err(rollback) = self.file.set_len(record_offset) {
                log::warn!("Failed to roll back partial append: {}", rollback);
            }
            return Err(io_err("appending record")(e));
        }

        self.len += record_len;
        let entry = IndexEntry {
            offset: record_offset + record_len - payload.len() as u64,
            length: payload.len() as u32,
            last_modified,
            meta,
            record_offset,
            record_len,
        };
        self.index.insert(key.to_string(), entry);
        Ok(entry)
    }

    fn stats(&self) -> StoreStats {
        let live_bytes = self.index.live_bytes();
        StoreStats {
            enabled: true,
            keys: self.index.len(),
            live_bytes,
            file_bytes: self.len,
            dead_bytes: self.len.saturating_sub(live_bytes),
        }
    }
}

/// Persistent, append-only thumbnail cache.
///
/// Construct one per application and share it by reference (or `Arc`) with
/// the components that need thumbnails.
///
/// # Example
///
/// ```no_run
/// use thumbstore::cache::{ImageMeta, PixelFormat, ThumbnailStore};
/// use thumbstore::cache::database::StoreOptions;
///
/// let store = ThumbnailStore::open("Cache/AssetBrowser/gallery_thumbnails.bin", StoreOptions::default());
///
/// let path = "AddonPackages/Author.Pack.1.var:/Custom/Hair/x.jpg";
/// match store.try_get(path, 1000) {
///     Some(hit) => {
///         // upload hit.payload ...
///         store.recycle(hit);
///     }
///     None => {
///         let pixels = vec![0u8; 64 * 64 * 4]; // decoded elsewhere
///         store.save(path, &pixels, ImageMeta::new(64, 64, PixelFormat::Rgba32), 1000);
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ThumbnailStore {
    path: PathBuf,
    state: Mutex<Option<StoreState>>,
    rules: KeyRules,
    pool: BufferPool,
    sync_writes: bool,
    recovery: Option<RecoveryReport>,
}

impl ThumbnailStore {
    /// Open the store at `path`, creating the file and its directory if absent.
    ///
    /// Never fails: if the file cannot be opened the store is disabled and
    /// every operation becomes a miss or a no-op.
    pub fn open(path: impl Into<PathBuf>, options: StoreOptions) -> Self {
        let path = path.into();
        match StoreState::open(&path) {
            Ok((state, report)) => Self::assemble(path, Some(state), Some(report), options),
            Err(e) => {
                log::error!("Thumbnail store disabled: {}", e);
                Self::assemble(path, None, None, options)
            }
        }
    }

    /// Open the store at `path`, reporting why it could not be opened.
    pub fn try_open(path: impl Into<PathBuf>, options: StoreOptions) -> CacheResult<Self> {
        let path = path.into();
        let (state, report) = StoreState::open(&path)?;
        Ok(Self::assemble(path, Some(state), Some(report), options))
    }

    fn assemble(
        path: PathBuf,
        state: Option<StoreState>,
        recovery: Option<RecoveryReport>,
        options: StoreOptions,
    ) -> Self {
        Self {
            path,
            state: Mutex::new(state),
            rules: options.keys,
            pool: BufferPool::new(options.pool),
            sync_writes: options.sync_writes,
            recovery,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<StoreState>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the store has an open file.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.lock().is_some()
    }

    /// What the startup scan found, if the store opened.
    #[must_use]
    pub fn recovery_report(&self) -> Option<RecoveryReport> {
        self.recovery
    }

    /// Key rules used by this store.
    #[must_use]
    pub fn rules(&self) -> &KeyRules {
        &self.rules
    }

    /// The payload buffer pool.
    #[must_use]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// Look up the thumbnail for `path`, cached at source time `last_modified`.
    pub fn lookup(&self, path: &str, last_modified: i64) -> Result<Thumbnail, Miss> {
        let key = self.rules.normalize(path);
        let mut guard = self.lock();
        let state = guard.as_mut().ok_or(Miss::Disabled)?;

        let entry = *state.index.get(&key).ok_or(Miss::NotCached)?;
        if entry.last_modified != last_modified {
            log::trace!("Thumbnail cache stale: {}", key);
            return Err(Miss::Stale {
                cached: entry.last_modified,
            });
        }

        let mut payload = self.pool.rent(entry.length as usize);
        if let Err(e) = state.read_payload(&entry, &mut payload) {
            log::warn!("Failed to read cached thumbnail for {}: {}", key, e);
            self.pool.give_back(payload);
            return Err(Miss::Io);
        }

        log::trace!("Thumbnail cache hit: {}", key);
        Ok(Thumbnail {
            payload,
            meta: entry.meta,
        })
    }

    /// Look up a thumbnail; any miss is `None`.
    #[must_use]
    pub fn try_get(&self, path: &str, last_modified: i64) -> Option<Thumbnail> {
        self.lookup(path, last_modified).ok()
    }

    /// Hand a hit's payload buffer back to the pool.
    pub fn recycle(&self, thumbnail: Thumbnail) {
        self.pool.give_back(thumbnail.payload);
    }

    /// Append a thumbnail, reporting why it was not stored.
    pub fn try_save(
        &self,
        path: &str,
        payload: &[u8],
        meta: ImageMeta,
        last_modified: i64,
    ) -> CacheResult<()> {
        let key = self.rules.normalize(path);
        validate(&key, payload.len(), meta)?;

        let mut guard = self.lock();
        let state = guard.as_mut().ok_or(CacheError::Disabled)?;
        let entry = state.append(&key, last_modified, meta, payload, self.sync_writes)?;
        log::debug!(
            "Cached thumbnail {} ({}x{} {}, {} bytes at {})",
            key,
            meta.width,
            meta.height,
            meta.format,
            entry.length,
            entry.offset
        );
        Ok(())
    }

    /// Append a thumbnail. Invalid payloads and I/O failures are logged and
    /// dropped.
    pub fn save(&self, path: &str, payload: &[u8], meta: ImageMeta, last_modified: i64) {
        match self.try_save(path, payload, meta, last_modified) {
            Ok(()) => {}
            Err(CacheError::Disabled) => log::trace!("Store disabled, not caching {}", path),
            Err(e @ (CacheError::InvalidPayload { .. } | CacheError::InvalidDimensions { .. })) => {
                log::warn!("Rejected thumbnail: {}", e)
            }
            Err(e) => log::warn!("Failed to cache thumbnail for {}: {}", path, e),
        }
    }

    /// Remove every key for which `is_live` returns false and rewrite the file.
    pub fn try_clean<F>(&self, is_live: F) -> CacheResult<CompactionReport>
    where
        F: Fn(&str) -> bool,
    {
        let mut guard = self.lock();
        compact::compact_locked(&mut guard, &self.path, is_live)
    }

    /// Compact the store; failures are logged and leave it untouched.
    pub fn clean<F>(&self, is_live: F)
    where
        F: Fn(&str) -> bool,
    {
        match self.try_clean(is_live) {
            Ok(report) if report.removed > 0 => log::info!(
                "Compacted thumbnail store: removed {} of {} keys, {} -> {} bytes",
                report.removed,
                report.keys_scanned,
                report.bytes_before,
                report.bytes_after
            ),
            Ok(_) => log::debug!("Thumbnail store compaction found nothing to remove"),
            Err(CacheError::Disabled) => log::trace!("Store disabled, skipping compaction"),
            Err(e) => log::warn!("Thumbnail store compaction failed: {}", e),
        }
    }

    /// Compact using the three-class liveness rules against an asset index.
    pub fn clean_with<A: AssetIndex + ?Sized>(&self, resolver: &LivenessResolver<'_, A>) {
        self.clean(|key| resolver.is_live(key));
    }

    /// Flush and release the file. Later operations behave as a disabled store.
    pub fn close(&self) {
        let Some(state) = self.lock().take() else {
            return;
        };
        if let Err(e) = state.file.sync_all() {
            log::warn!("Failed to sync thumbnail store on close: {}", e);
        }
        self.pool.clear();
        log::debug!("Thumbnail store closed: {}", self.path.display());
    }

    /// Space accounting for the store file.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.lock().as_ref().map(StoreState::stats).unwrap_or_default()
    }

    /// Snapshot of every index entry, in file order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, IndexEntry)> {
        self.lock()
            .as_ref()
            .map(|state| {
                state
                    .index
                    .by_offset()
                    .into_iter()
                    .map(|(key, entry)| (key.to_string(), *entry))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn validate(key: &str, payload_len: usize, meta: ImageMeta) -> CacheResult<()> {
    if meta.width <= 0 || meta.height <= 0 {
        return Err(CacheError::InvalidDimensions {
            key: key.to_string(),
            width: meta.width,
            height: meta.height,
        });
    }
    match expected_payload_len(meta.width, meta.height, meta.format) {
        Some(expected) if (payload_len as u64) < expected => Err(CacheError::InvalidPayload {
            key: key.to_string(),
            expected,
            actual: payload_len as u64,
        }),
        _ => Ok(()),
    }
}
