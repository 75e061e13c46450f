//! Storage backends consumed by the writer and the reader.
//!
//! Writers only append (plus one positioned patch for legacy files); readers
//! only ever ask for byte ranges. Everything above this module is agnostic
//! to whether those bytes come from memory, a file, or a memory map.

#[cfg(unix)]
mod cached;
mod file;
mod memory;
mod mmap;

#[cfg(unix)]
pub use cached::CachedMmapFile;
pub use file::FileBackend;
pub use mmap::MmapFile;

use std::io;
use std::ops::Range;
use std::sync::Arc;

use crate::error::{OmError, Result};

pub trait OmFileWriterBackend {
    /// Append `bytes` at the end.
    fn write(&mut self, bytes: &[u8]) -> Result<()>;

    /// Overwrite already written bytes at `offset`.
    fn write_at(&mut self, bytes: &[u8], offset: u64) -> Result<()>;

    /// Durability barrier.
    fn synchronize(&mut self) -> Result<()>;
}

pub trait OmFileReaderBackend {
    /// Total readable length in bytes.
    fn count(&self) -> u64;

    /// Whether [`prefetch_data`](Self::prefetch_data) does anything useful.
    fn needs_prefetch(&self) -> bool {
        false
    }

    /// Hint that `[offset, offset + count)` will be read soon.
    fn prefetch_data(&self, _offset: u64, _count: u64) {}

    /// Expose `[offset, offset + count)` to `f`.
    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R>;
}

impl<B: OmFileReaderBackend> OmFileReaderBackend for &B {
    fn count(&self) -> u64 {
        (**self).count()
    }

    fn needs_prefetch(&self) -> bool {
        (**self).needs_prefetch()
    }

    fn prefetch_data(&self, offset: u64, count: u64) {
        (**self).prefetch_data(offset, count)
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        (**self).with_bytes(offset, count, f)
    }
}

impl<B: OmFileReaderBackend> OmFileReaderBackend for Arc<B> {
    fn count(&self) -> u64 {
        (**self).count()
    }

    fn needs_prefetch(&self) -> bool {
        (**self).needs_prefetch()
    }

    fn prefetch_data(&self, offset: u64, count: u64) {
        (**self).prefetch_data(offset, count)
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        (**self).with_bytes(offset, count, f)
    }
}

/// Bounds-check a requested range against a backend of `len` bytes.
pub(crate) fn checked_range(offset: u64, count: u64, len: u64) -> Result<Range<usize>> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(offset as usize..end as usize),
        _ => Err(OmError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {count} bytes at {offset} exceeds backend length {len}"),
        ))),
    }
}
