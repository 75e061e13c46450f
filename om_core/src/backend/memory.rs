use super::{checked_range, OmFileReaderBackend, OmFileWriterBackend};
use crate::error::Result;

/// Growable in-memory file, mostly for tests and small payloads.
impl OmFileWriterBackend for Vec<u8> {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.extend_from_slice(bytes);
        Ok(())
    }

    fn write_at(&mut self, bytes: &[u8], offset: u64) -> Result<()> {
        let start = offset as usize;
        let end = start + bytes.len();
        if end > self.len() {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }
}

impl OmFileReaderBackend for Vec<u8> {
    fn count(&self) -> u64 {
        self.len() as u64
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let range = checked_range(offset, count, self.len() as u64)?;
        Ok(f(&self[range]))
    }
}
