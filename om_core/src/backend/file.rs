use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use super::{checked_range, OmFileReaderBackend, OmFileWriterBackend};
use crate::error::Result;

impl OmFileWriterBackend for File {
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        Write::write_all(self, bytes)?;
        Ok(())
    }

    fn write_at(&mut self, bytes: &[u8], offset: u64) -> Result<()> {
        let end = self.stream_position()?;
        self.seek(SeekFrom::Start(offset))?;
        Write::write_all(self, bytes)?;
        self.seek(SeekFrom::Start(end))?;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.sync_data()?;
        Ok(())
    }
}

/// Plain file read with positioned reads into a temporary buffer.
///
/// Prefer [`MmapFile`](super::MmapFile) for large files; this backend exists
/// for filesystems that do not support memory mapping.
pub struct FileBackend {
    file: Mutex<File>,
    len: u64,
}

impl FileBackend {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::new(File::open(path)?)
    }

    pub fn new(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            len,
        })
    }
}

impl OmFileReaderBackend for FileBackend {
    fn count(&self) -> u64 {
        self.len
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let range = checked_range(offset, count, self.len)?;
        let mut buf = vec![0u8; range.len()];
        {
            let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(&mut buf)?;
        }
        Ok(f(&buf))
    }
}
