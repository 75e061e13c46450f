use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;

use log::{trace, warn};
use memmap2::Mmap;

use super::{checked_range, OmFileReaderBackend};
use crate::error::Result;

/// Memory map over a local sparse mirror of a slower backing file (for
/// example a network mount).
///
/// The mirror starts as a hole-only file of the same length. Before a range
/// is exposed, every block in it that is still all zeros in the mirror is
/// copied over from the backing file. Promotion is idempotent: concurrent
/// processes may copy the same block twice, which only costs bandwidth.
pub struct CachedMmapFile {
    backing: File,
    cache: File,
    mmap: Mmap,
    len: u64,
    block_size: u64,
}

impl CachedMmapFile {
    pub const DEFAULT_BLOCK_SIZE: u64 = 64 * 1024;

    pub fn open(backing: impl AsRef<Path>, cache: impl AsRef<Path>) -> Result<Self> {
        Self::with_block_size(backing, cache, Self::DEFAULT_BLOCK_SIZE)
    }

    pub fn with_block_size(
        backing: impl AsRef<Path>,
        cache: impl AsRef<Path>,
        block_size: u64,
    ) -> Result<Self> {
        let backing = File::open(backing)?;
        let len = backing.metadata()?.len();
        let cache = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(cache)?;
        if cache.metadata()?.len() != len {
            cache.set_len(len)?;
        }
        // SAFETY: the mirror is only ever written with bytes identical to the
        // backing file, and only in blocks that were still holes.
        let mmap = unsafe { Mmap::map(&cache)? };
        Ok(Self {
            backing,
            cache,
            mmap,
            len,
            block_size: block_size.max(1),
        })
    }

    /// Copy every not-yet-cached block of `[offset, offset + count)` into the mirror.
    fn promote(&self, offset: u64, count: u64) -> Result<()> {
        if count == 0 {
            return Ok(());
        }
        let first = offset / self.block_size;
        let last = (offset + count).div_ceil(self.block_size);
        let mut block = Vec::new();
        for b in first..last {
            let start = b * self.block_size;
            let end = (start + self.block_size).min(self.len);
            if self.mmap[start as usize..end as usize].iter().any(|&x| x != 0) {
                continue;
            }
            block.resize((end - start) as usize, 0);
            self.backing.read_exact_at(&mut block, start)?;
            if block.iter().all(|&x| x == 0) {
                continue;
            }
            self.cache.write_all_at(&block, start)?;
            trace!("promoted cache block {b} ({} bytes)", block.len());
        }
        Ok(())
    }
}

impl OmFileReaderBackend for CachedMmapFile {
    fn count(&self) -> u64 {
        self.len
    }

    fn needs_prefetch(&self) -> bool {
        true
    }

    fn prefetch_data(&self, offset: u64, count: u64) {
        if checked_range(offset, count, self.len).is_err() {
            return;
        }
        if let Err(e) = self.promote(offset, count) {
            warn!("cache promotion of {count} bytes at {offset} failed: {e}");
        }
    }

    fn with_bytes<R>(&self, offset: u64, count: u64, f: impl FnOnce(&[u8]) -> R) -> Result<R> {
        let range = checked_range(offset, count, self.len)?;
        self.promote(offset, count)?;
        Ok(f(&self.mmap[range]))
    }
}
