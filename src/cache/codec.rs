//! Binary layout of a single store record.
//!
//! Records are appended back to back with no padding and no file header:
//!
//! ```text
//! [key_len: i32][key: UTF-8]
//! [last_modified: i64]
//! [width: i32][height: i32][format: i32]
//! [payload_len: i32][payload]
//! ```
//!
//! All integers are little-endian.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use super::entry::ImageMeta;
use super::format::PixelFormat;
use super::{io_err, CacheError, CacheResult};

/// Bytes of a record header that do not depend on the key length.
pub const FIXED_HEADER_LEN: u64 = 4 + 8 + 4 + 4 + 4 + 4;

/// Total encoded size of a record.
#[must_use]
pub fn encoded_len(key_len: usize, payload_len: usize) -> u64 {
    FIXED_HEADER_LEN + key_len as u64 + payload_len as u64
}

/// Decoded record header. The payload follows it immediately on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    /// Raw key bytes; expected to be UTF-8
    pub key_bytes: Vec<u8>,
    /// Freshness token
    pub last_modified: i64,
    /// Image metadata
    pub meta: ImageMeta,
    /// Payload length in bytes
    pub payload_len: u32,
}

impl RecordHeader {
    /// The key as a string, if it is valid UTF-8.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        std::str::from_utf8(&self.key_bytes).ok()
    }

    /// Encoded header length, key included.
    #[must_use]
    pub fn header_len(&self) -> u64 {
        FIXED_HEADER_LEN + self.key_bytes.len() as u64
    }

    /// Encoded record length, payload included.
    #[must_use]
    pub fn record_len(&self) -> u64 {
        self.header_len() + u64::from(self.payload_len)
    }
}

/// Result of decoding one header against the bytes left in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// The header and its whole payload fit in the remaining bytes.
    Complete(RecordHeader),
    /// The remaining bytes cannot hold a complete record.
    Truncated,
}

/// Writes records to any [`Write`] sink.
pub struct RecordEncoder<W: Write> {
    writer: W,
}

impl<W: Write> RecordEncoder<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Encode one record and return the number of bytes written.
    ///
    /// Fails without writing anything if the key or payload length does not
    /// fit the `i32` length fields.
    pub fn encode(
        &mut self,
        key: &str,
        last_modified: i64,
        meta: ImageMeta,
        payload: &[u8],
    ) -> CacheResult<u64> {
        let key_len = i32::try_from(key.len()).map_err(|_| CacheError::KeyTooLong(key.len()))?;
        let payload_len = i32::try_from(payload.len())
            .map_err(|_| CacheError::PayloadTooLong(payload.len()))?;

        self.write_all(key_len, last_modified, meta, payload_len, key, payload)
            .map_err(io_err("encoding record"))?;

        Ok(encoded_len(key.len(), payload.len()))
    }

    fn write_all(
        &mut self,
        key_len: i32,
        last_modified: i64,
        meta: ImageMeta,
        payload_len: i32,
        key: &str,
        payload: &[u8],
    ) -> io::Result<()> {
        self.writer.write_i32::<LittleEndian>(key_len)?;
        self.writer.write_all(key.as_bytes())?;
        self.writer.write_i64::<LittleEndian>(last_modified)?;
        self.writer.write_i32::<LittleEndian>(meta.width)?;
        self.writer.write_i32::<LittleEndian>(meta.height)?;
        self.writer.write_i32::<LittleEndian>(meta.format.to_raw())?;
        self.writer.write_i32::<LittleEndian>(payload_len)?;
        self.writer.write_all(payload)
    }
}

/// Reads records from any [`Read`] source, bounded by a byte budget.
pub struct RecordDecoder<R: Read> {
    reader: R,
}

impl<R: Read> RecordDecoder<R> {
    /// Wrap a reader.
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Decode the next header, given how many bytes remain before end-of-file.
    ///
    /// Length fields that are negative or point past `remaining` yield
    /// [`Frame::Truncated`]; nothing beyond the key is read in that case.
    pub fn decode_header(&mut self, remaining: u64) -> CacheResult<Frame> {
        if remaining < 4 {
            return Ok(Frame::Truncated);
        }
        let key_len = match self.reader.read_i32::<LittleEndian>() {
            Ok(len) => len,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Truncated),
            Err(e) => return Err(io_err("reading key length")(e)),
        };
        if key_len < 0 || FIXED_HEADER_LEN + key_len as u64 > remaining {
            return Ok(Frame::Truncated);
        }

        let mut key_bytes = vec![0u8; key_len as usize];
        let fields = self.reader.read_exact(&mut key_bytes).and_then(|()| {
            let last_modified = self.reader.read_i64::<LittleEndian>()?;
            let width = self.reader.read_i32::<LittleEndian>()?;
            let height = self.reader.read_i32::<LittleEndian>()?;
            let format = self.reader.read_i32::<LittleEndian>()?;
            let payload_len = self.reader.read_i32::<LittleEndian>()?;
            Ok((last_modified, width, height, format, payload_len))
        });
        let (last_modified, width, height, format, payload_len) = match fields {
            Ok(fields) => fields,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(Frame::Truncated),
            Err(e) => return Err(io_err("reading record header")(e)),
        };

        let header = RecordHeader {
            key_bytes,
            last_modified,
            meta: ImageMeta::new(width, height, PixelFormat::from_raw(format)),
            payload_len: match u32::try_from(payload_len) {
                Ok(len) => len,
                Err(_) => return Ok(Frame::Truncated),
            },
        };
        if header.record_len() > remaining {
            return Ok(Frame::Truncated);
        }
        Ok(Frame::Complete(header))
    }
}
