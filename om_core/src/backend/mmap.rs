use std::fs::File;
use std::path::Path;

use memmap2::Mmap;

use super::{checked_range, OmFileReaderBackend};
use crate::error::Result;

/// Read-only memory map of a finished OM file.
///
/// Caching is left to the OS page cache; `prefetch_data` turns into a
/// `WillNeed` advice on unix.
pub struct MmapFile {
    mmap: Mmap,
    _file: File,
}

impl MmapFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_file(File::open(path)?)
    }

    pub fn from_file(file: File) -> Result<Self> {
        // SAFETY: OM files are immutable once renamed into place; writers
        // always produce a new file instead of modifying a mapped one.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap, _file: file })
    }
}

impl OmFileReaderBackend for MmapFile {
    fn count(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn needs_prefetch(&self) -> bool {
        true
    }

    fn prefetch_data(&self, offset: u64, count: u64) {
        #[cfg(unix)]
        if let Ok(range) = checked_range(offset, count, self.count()) {
            if !range.is_empty() {
                let _ = self
                    .mmap
                    .advise_range(memmap2::Advice::WillNeed, range.start, range.len());
            }
        }
        #[cfg(not(unix))]
        let _ = (offset, count);
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let range = checked_range(offset, count, self.count())?;
        Ok(f(&self.mmap[range]))
    }
}
