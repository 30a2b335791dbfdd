//! Persistent thumbnail store.
//!
//! This module provides a single-file, append-only cache that maps an asset
//! key to a previously decoded bitmap, so thumbnails do not have to be decoded
//! again in every session.
//!
//! # Architecture
//!
//! * [`key`]: Canonical, location-independent cache keys.
//! * [`format`]: Pixel formats and payload size validation.
//! * [`codec`]: Byte layout of one record.
//! * [`entry`]: Image metadata, index entry, and hit types.
//! * [`index`]: In-memory index and startup recovery.
//! * [`pool`]: Reusable payload buffers.
//! * [`database`]: The store itself: lookups, appends, close.
//! * [`compact`]: Liveness-driven compaction.
//!
//! # Failure Model
//!
//! Cache operations never fail the caller. Lookups degrade to a miss, writes
//! and compaction degrade to a logged no-op, and a store that cannot open its
//! file stays disabled for its whole lifetime. The `try_*` variants expose the
//! underlying [`CacheError`] for callers that want it.

pub mod codec;
pub mod compact;
pub mod database;
pub mod entry;
pub mod format;
pub mod index;
pub mod key;
pub mod pool;

pub use compact::{AssetIndex, CompactionReport, FsAssetIndex, LivenessResolver};
pub use database::{StoreOptions, StoreStats, ThumbnailStore};
pub use entry::{ImageMeta, IndexEntry, Thumbnail};
pub use format::PixelFormat;
pub use index::{Index, RecoveryReport};
pub use key::{normalize, KeyClass, KeyRules};
pub use pool::{BufferPool, PoolConfig};

use std::io;
use std::path::PathBuf;

/// Errors raised inside the thumbnail store.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    /// An I/O operation on the store file failed.
    #[error("I/O error while {context}: {source}")]
    Io {
        /// What the store was doing
        context: &'static str,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// The store file could not be opened or created.
    #[error("Cannot open thumbnail store {path}: {source}")]
    Open {
        /// Store file path
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: io::Error,
    },

    /// A payload is too small for its declared dimensions and format.
    #[error("Payload for {key} is {actual} bytes, expected at least {expected}")]
    InvalidPayload {
        /// Cache key
        key: String,
        /// Minimum size implied by the image metadata
        expected: u64,
        /// Size supplied
        actual: u64,
    },

    /// Image dimensions are not positive.
    #[error("Invalid dimensions {width}x{height} for {key}")]
    InvalidDimensions {
        /// Cache key
        key: String,
        /// Declared width
        width: i32,
        /// Declared height
        height: i32,
    },

    /// The key does not fit the on-disk length field.
    #[error("Key is too long to store: {0} bytes")]
    KeyTooLong(usize),

    /// The payload does not fit the on-disk length field.
    #[error("Payload is too long to store: {0} bytes")]
    PayloadTooLong(usize),

    /// The store failed to open or was closed.
    #[error("Thumbnail store is disabled")]
    Disabled,
}

/// Result type for store internals.
pub type CacheResult<T> = Result<T, CacheError>;

/// Adapter for `map_err` on I/O results.
pub(crate) fn io_err(context: &'static str) -> impl FnOnce(io::Error) -> CacheError {
    move |source| CacheError::Io { context, source }
}

/// Why a lookup did not produce a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Miss {
    /// No record exists for the key.
    NotCached,
    /// A record exists, but for a different source timestamp.
    Stale {
        /// Timestamp stored with the record
        cached: i64,
    },
    /// Reading the payload failed.
    Io,
    /// The store is disabled.
    Disabled,
}
