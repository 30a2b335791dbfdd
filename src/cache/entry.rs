//! Index entry and hit definitions.

use serde::Serialize;

use super::format::PixelFormat;

/// Dimensions and pixel layout of a decoded thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImageMeta {
    /// Width in pixels
    pub width: i32,
    /// Height in pixels
    pub height: i32,
    /// Pixel layout of the payload
    pub format: PixelFormat,
}

impl ImageMeta {
    /// Create image metadata.
    #[must_use]
    pub fn new(width: i32, height: i32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            format,
        }
    }
}

/// Location and metadata of the latest record for a key.
///
/// `offset`/`length` address the payload bytes; `record_offset`/`record_len`
/// address the whole record and are used for space accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    /// Absolute file offset of the payload
    pub offset: u64,
    /// Payload length in bytes
    pub length: u32,
    /// Freshness token stored with the record
    pub last_modified: i64,
    /// Decoded image metadata
    pub meta: ImageMeta,
    /// Absolute file offset of the record header
    pub record_offset: u64,
    /// Total encoded record length
    pub record_len: u64,
}

/// A cache hit. The payload comes from the store's buffer pool; hand it back
/// with [`ThumbnailStore::recycle`](super::ThumbnailStore::recycle) when done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    /// Decoded pixel data, exactly as long as the stored payload
    pub payload: Vec<u8>,
    /// Decoded image metadata
    pub meta: ImageMeta,
}

impl Thumbnail {
    /// Width in pixels.
    #[must_use]
    pub fn width(&self) -> i32 {
        self.meta.width
    }

    /// Height in pixels.
    #[must_use]
    pub fn height(&self) -> i32 {
        self.meta.height
    }

    /// Pixel layout of the payload.
    #[must_use]
    pub fn format(&self) -> PixelFormat {
        self.meta.format
    }
}
