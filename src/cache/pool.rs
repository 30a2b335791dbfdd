//! Reusable byte buffers for payload reads.
//!
//! The reader hands out payloads in buffers rented from this pool. Callers
//! should give them back once the pixels are uploaded, but nothing depends on
//! it: a buffer that is never returned is simply dropped.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError};

/// Limits for retained buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Maximum number of idle buffers kept for reuse.
    pub max_retained: usize,
    /// Buffers with a larger capacity are dropped instead of retained.
    pub max_buffer_len: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_retained: 32,
            max_buffer_len: 4 * 1024 * 1024,
        }
    }
}

/// A pool of byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    config: PoolConfig,
}

/// Snapshot of the pool's idle buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Idle buffers available for reuse
    pub idle_buffers: usize,
    /// Combined capacity of the idle buffers
    pub idle_bytes: usize,
}

impl BufferPool {
    /// Create an empty pool.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Rent a zeroed buffer of exactly `len` bytes.
    ///
    /// Reuses the smallest idle buffer that already has the capacity, else
    /// grows an idle one, else allocates.
    #[must_use]
    pub fn rent(&self, len: usize) -> Vec<u8> {
        let reused = {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            let best = idle
                .iter()
                .enumerate()
                .filter(|(_, buf)| buf.capacity() >= len)
                .min_by_key(|(_, buf)| buf.capacity())
                .map(|(i, _)| i);
            match best {
                Some(i) => Some(idle.swap_remove(i)),
                None => idle.pop(),
            }
        };

        let mut buf = reused.unwrap_or_default();
        buf.clear();
        buf.resize(len, 0);
        buf
    }

    /// Return a buffer for reuse.
    pub fn give_back(&self, buf: Vec<u8>) {
        if buf.capacity() == 0 || buf.capacity() > self.config.max_buffer_len {
            log::trace!("Dropping buffer of {} bytes", buf.capacity());
            return;
        }
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() >= self.config.max_retained {
            log::trace!("Buffer pool at capacity, dropping buffer");
            return;
        }
        idle.push(buf);
    }

    /// Drop every idle buffer.
    pub fn clear(&self) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Current idle buffer counts.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        PoolStats {
            idle_buffers: idle.len(),
            idle_bytes: idle.iter().map(Vec::capacity).sum(),
        }
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}
