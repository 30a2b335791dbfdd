//! In-memory index and startup recovery.
//!
//! # Overview
//!
//! The index maps each cache key to the location of its latest record. It is
//! never persisted: every open rebuilds it with a single forward scan of the
//! store file, so the file itself is the only source of truth.
//!
//! # Recovery
//!
//! The scan stops at the first record whose length fields point past
//! end-of-file (a torn append). Everything before that point is kept and the
//! file is truncated to it. Records that decode cleanly but fail payload
//! validation are skipped without stopping the scan; their bytes stay as dead
//! space until compaction.

use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use super::codec::{Frame, RecordDecoder};
use super::entry::IndexEntry;
use super::format::is_valid_payload;
use super::{io_err, CacheResult};

/// Read buffer for the recovery scan.
const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// Map from cache key to its latest record.
#[derive(Debug, Default, Clone)]
pub struct Index {
    entries: HashMap<String, IndexEntry>,
    live_bytes: u64,
}

impl Index {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&IndexEntry> {
        self.entries.get(key)
    }

    /// Insert or replace the entry for `key`, returning the superseded one.
    pub fn insert(&mut self, key: String, entry: IndexEntry) -> Option<IndexEntry> {
        self.live_bytes += entry.record_len;
        let previous = self.entries.insert(key, entry);
        if let Some(old) = &previous {
            self.live_bytes -= old.record_len;
        }
        previous
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sum of the encoded sizes of the latest record of every key.
    #[must_use]
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes
    }

    /// Iterate over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Iterate over all entries in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &IndexEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// All entries ordered by their position in the file.
    #[must_use]
    pub fn by_offset(&self) -> Vec<(&str, &IndexEntry)> {
        let mut entries: Vec<_> = self.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.record_offset);
        entries
    }
}

/// Outcome of the startup scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Complete records found, including superseded and invalid ones
    pub records_scanned: usize,
    /// Complete records skipped because their payload or key is invalid
    pub records_skipped: usize,
    /// Distinct keys in the rebuilt index
    pub keys_indexed: usize,
    /// End of the last complete record
    pub valid_length: u64,
    /// File length before recovery
    pub file_length: u64,
    /// Bytes cut from the end of the file
    pub truncated_bytes: u64,
}

/// Scan `reader` from offset 0 and rebuild the index.
///
/// Does not modify the source; see [`build`] for the truncating variant.
pub fn scan<R: Read + Seek>(reader: R, file_length: u64) -> CacheResult<(Index, RecoveryReport)> {
    let mut reader = BufReader::with_capacity(SCAN_BUFFER_SIZE, reader);
    reader
        .seek(SeekFrom::Start(0))
        .map_err(io_err("rewinding store file"))?;

    let mut index = Index::new();
    let mut report = RecoveryReport {
        file_length,
        ..RecoveryReport::default()
    };
    let mut offset = 0u64;

    loop {
        let mut decoder = RecordDecoder::new(&mut reader);
        let header = match decoder.decode_header(file_length - offset)? {
            Frame::Complete(header) => header,
            Frame::Truncated => break,
        };

        let record_offset = offset;
        let payload_offset = offset + header.header_len();
        offset += header.record_len();
        report.records_scanned += 1;
        report.valid_length = offset;

        reader
            .seek_relative(i64::from(header.payload_len))
            .map_err(io_err("skipping payload"))?;

        let Some(key) = header.key() else {
            log::debug!("Skipping record at {record_offset} with a non UTF-8 key");
            report.records_skipped += 1;
            continue;
        };
        let meta = header.meta;
        if !is_valid_payload(meta.width, meta.height, meta.format, header.payload_len.into()) {
            log::debug!(
                "Skipping record for {key}: {} bytes for {}x{} {}",
                header.payload_len,
                meta.width,
                meta.height,
                meta.format
            );
            report.records_skipped += 1;
            continue;
        }

        index.insert(
            key.to_string(),
            IndexEntry {
                offset: payload_offset,
                length: header.payload_len,
                last_modified: header.last_modified,
                meta,
                record_offset,
                record_len: header.record_len(),
            },
        );
    }

    report.keys_indexed = index.len();
    report.truncated_bytes = file_length - report.valid_length;
    Ok((index, report))
}

/// Rebuild the index from `file` and cut off any torn tail.
pub fn build(file: &mut File) -> CacheResult<(Index, RecoveryReport)> {
    let file_length = file
        .metadata()
        .map_err(io_err("reading store metadata"))?
        .len();

    let (index, report) = scan(&mut *file, file_length)?;

    if report.truncated_bytes > 0 {
        log::warn!(
            "Truncating {} trailing bytes of an incomplete record (valid length {})",
            report.truncated_bytes,
            report.valid_length
        );
        file.set_len(report.valid_length)
            .map_err(io_err("truncating corrupt tail"))?;
        file.sync_all().map_err(io_err("syncing truncated store"))?;
    }

    log::info!(
        "Thumbnail index rebuilt: {} keys from {} records ({} skipped)",
        report.keys_indexed,
        report.records_scanned,
        report.records_skipped
    );
    Ok((index, report))
}
