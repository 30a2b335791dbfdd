//! Pixel formats and payload size validation.
//!
//! # Overview
//!
//! Every record carries a `(width, height, pixel_format)` triple next to its
//! payload. For formats with a known fixed encoding the triple implies a
//! minimum payload size; a record whose payload is shorter than that is a
//! truncated decode and must never be served.
//!
//! Format identifiers are stored on disk as `i32` values and follow the
//! numbering used by the host engine's texture formats, so files written by
//! other tools stay readable.
//!
//! # Example
//!
//! ```
//! use thumbstore::cache::format::{expected_payload_len, PixelFormat};
//!
//! assert_eq!(expected_payload_len(64, 64, PixelFormat::Rgba32), Some(16_384));
//! assert_eq!(expected_payload_len(64, 64, PixelFormat::Dxt1), Some(2_048));
//! ```

use serde::Serialize;
use std::fmt;

/// Decoded pixel layout of a cached thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PixelFormat {
    /// 8-bit alpha only.
    Alpha8,
    /// 24-bit RGB, 3 bytes per pixel.
    Rgb24,
    /// 32-bit RGBA, 4 bytes per pixel.
    Rgba32,
    /// 32-bit ARGB, 4 bytes per pixel.
    Argb32,
    /// 16-bit RGB 5-6-5.
    Rgb565,
    /// Block-compressed, 8 bytes per 4x4 block.
    Dxt1,
    /// Block-compressed, 16 bytes per 4x4 block.
    Dxt5,
    /// 32-bit BGRA, 4 bytes per pixel.
    Bgra32,
    /// Block-compressed, 16 bytes per 4x4 block.
    Bc7,
    /// A format this crate has no size rule for. Kept verbatim.
    Other(i32),
}

impl PixelFormat {
    /// Decode an on-disk format identifier.
    #[must_use]
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            1 => Self::Alpha8,
            3 => Self::Rgb24,
            4 => Self::Rgba32,
            5 => Self::Argb32,
            7 => Self::Rgb565,
            10 => Self::Dxt1,
            12 => Self::Dxt5,
            14 => Self::Bgra32,
            25 => Self::Bc7,
            other => Self::Other(other),
        }
    }

    /// The on-disk format identifier.
    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Alpha8 => 1,
            Self::Rgb24 => 3,
            Self::Rgba32 => 4,
            Self::Argb32 => 5,
            Self::Rgb565 => 7,
            Self::Dxt1 => 10,
            Self::Dxt5 => 12,
            Self::Bgra32 => 14,
            Self::Bc7 => 25,
            Self::Other(raw) => raw,
        }
    }

    /// Storage layout for formats with a fixed encoding.
    fn layout(self) -> Option<Layout> {
        match self {
            Self::Alpha8 => Some(Layout::PerPixel(1)),
            Self::Rgb565 => Some(Layout::PerPixel(2)),
            Self::Rgb24 => Some(Layout::PerPixel(3)),
            Self::Rgba32 | Self::Argb32 | Self::Bgra32 => Some(Layout::PerPixel(4)),
            Self::Dxt1 => Some(Layout::Block4x4(8)),
            Self::Dxt5 | Self::Bc7 => Some(Layout::Block4x4(16)),
            Self::Other(_) => None,
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Other(raw) => write!(f, "Format({raw})"),
            known => write!(f, "{known:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Layout {
    PerPixel(u64),
    Block4x4(u64),
}

/// Minimum payload length implied by `(width, height, format)`.
///
/// Returns `None` when the format has no known fixed encoding, or when the
/// dimensions are not positive. Arithmetic is done in `u64`, so hostile
/// header values cannot overflow.
#[must_use]
pub fn expected_payload_len(width: i32, height: i32, format: PixelFormat) -> Option<u64> {
    if width <= 0 || height <= 0 {
        return None;
    }
    let (w, h) = (width as u64, height as u64);
    match format.layout()? {
        Layout::PerPixel(bytes) => Some(w * h * bytes),
        Layout::Block4x4(bytes) => Some(w.div_ceil(4) * h.div_ceil(4) * bytes),
    }
}

/// Check that a payload of `payload_len` bytes can hold the described image.
///
/// Dimensions must be positive for every format. Formats without a size rule
/// accept any length.
#[must_use]
pub fn is_valid_payload(width: i32, height: i32, format: PixelFormat, payload_len: u64) -> bool {
    if width <= 0 || height <= 0 {
        return false;
    }
    match expected_payload_len(width, height, format) {
        Some(expected) => payload_len >= expected,
        None => true,
    }
}
