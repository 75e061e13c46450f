use log::trace;

use crate::backend::OmFileWriterBackend;
use crate::error::Result;

/// Write buffer in front of a writer backend.
///
/// Chunks are compressed straight into the spare tail of the buffer. When the
/// tail cannot hold the next worst-case chunk the buffer is flushed first, and
/// grown only if a single chunk is larger than the configured capacity.
pub struct OmBufferedWriter<B: OmFileWriterBackend> {
    backend: B,
    buffer: Vec<u8>,
    capacity: usize,
    /// Bytes handed to the backend so far.
    flushed: u64,
    unsynced: u64,
    sync_every_bytes: Option<u64>,
}

impl<B: OmFileWriterBackend> OmBufferedWriter<B> {
    pub fn new(backend: B, capacity: usize, sync_every_bytes: Option<u64>) -> Self {
        let capacity = capacity.max(1);
        Self {
            backend,
            buffer: Vec::with_capacity(capacity),
            capacity,
            flushed: 0,
            unsynced: 0,
            sync_every_bytes,
        }
    }

    /// Absolute file position of the next byte written.
    #[inline]
    pub fn position(&self) -> u64 {
        self.flushed + self.buffer.len() as u64
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        if self.buffer.len() + bytes.len() > self.capacity {
            self.flush()?;
        }
        if bytes.len() >= self.capacity {
            self.backend.write(bytes)?;
            self.account(bytes.len() as u64)?;
        } else {
            self.buffer.extend_from_slice(bytes);
        }
        Ok(())
    }

    /// Let `fill` write at most `max_len` bytes into the buffer tail and keep
    /// the number of bytes it reports.
    pub fn write_with(
        &mut self,
        max_len: usize,
        fill: impl FnOnce(&mut [u8]) -> Result<usize>,
    ) -> Result<usize> {
        if self.buffer.len() + max_len > self.capacity {
            self.flush()?;
        }
        if max_len > self.capacity {
            self.capacity = max_len;
        }
        let start = self.buffer.len();
        self.buffer.resize(start + max_len, 0);
        match fill(&mut self.buffer[start..]) {
            Ok(written) => {
                self.buffer.truncate(start + written.min(max_len));
                Ok(written)
            }
            Err(e) => {
                self.buffer.truncate(start);
                Err(e)
            }
        }
    }

    /// Patch bytes that may already have been flushed.
    pub fn write_at(&mut self, bytes: &[u8], offset: u64) -> Result<()> {
        self.flush()?;
        self.backend.write_at(bytes, offset)
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.backend.write(&self.buffer)?;
        let n = self.buffer.len() as u64;
        self.buffer.clear();
        self.account(n)
    }

    /// Flush and force durability.
    pub fn synchronize(&mut self) -> Result<()> {
        self.flush()?;
        self.backend.synchronize()?;
        self.unsynced = 0;
        Ok(())
    }

    fn account(&mut self, n: u64) -> Result<()> {
        self.flushed += n;
        self.unsynced += n;
        trace!("flushed {n} bytes, file position {}", self.flushed);
        if let Some(limit) = self.sync_every_bytes {
            if self.unsynced >= limit {
                self.backend.synchronize()?;
                self.unsynced = 0;
            }
        }
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Flush and hand back the backend.
    pub fn into_backend(mut self) -> Result<B> {
        self.flush()?;
        Ok(self.backend)
    }
}
