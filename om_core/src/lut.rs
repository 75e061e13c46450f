//! Lookup table of chunk offsets.
//!
//! The table holds `chunk_count + 1` absolute file offsets: entry `k` is where
//! chunk `k` starts and entry `k + 1` where it ends. It is compressed in groups
//! of `lut_chunk_element_count` entries, and every group is padded to the
//! largest compressed group, so group `i` starts at `lut_offset + i * group_size`.
//! A reader can then fetch only the groups covering the chunks it needs.

use std::ops::Range;

use om_codecs::{BlockCodec, LutPack64};

use crate::error::{OmError, Result};
use crate::metadata::ArrayDescriptor;

/// Compress `entries` in groups of `elements_per_group`.
///
/// Returns the padded LUT blob and the per-group size in bytes.
pub fn compress_lut(entries: &[u64], elements_per_group: u64) -> Result<(Vec<u8>, u64)> {
    if elements_per_group == 0 {
        return Err(OmError::InvalidDimensions(
            "lut_chunk_element_count must be at least 1".into(),
        ));
    }
    let codec = LutPack64;
    let per_group = elements_per_group as usize;
    let mut scratch = vec![0u8; codec.max_compressed_bytes(per_group)];
    let mut groups: Vec<Vec<u8>> = Vec::with_capacity(entries.len().div_ceil(per_group));
    for group in entries.chunks(per_group) {
        let n = codec.compress(group, &mut scratch)?;
        groups.push(scratch[..n].to_vec());
    }
    let group_size = groups.iter().map(Vec::len).max().unwrap_or(0);
    let mut blob = vec![0u8; groups.len() * group_size];
    for (i, group) in groups.iter().enumerate() {
        blob[i * group_size..i * group_size + group.len()].copy_from_slice(group);
    }
    Ok((blob, group_size as u64))
}

/// Where and how an array's LUT is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LutLayout {
    /// Current generation: packed groups of equal padded size.
    Packed {
        offset: u64,
        group_size: u64,
        elements_per_group: u64,
        entry_count: u64,
    },
    /// Legacy generation: one raw u64 per chunk holding its end offset
    /// relative to `data_start`. Entry 0 is implicit. Each "group" is a
    /// single 8-byte entry.
    Raw {
        offset: u64,
        data_start: u64,
        chunk_count: u64,
    },
}

impl LutLayout {
    pub fn packed(descriptor: &ArrayDescriptor) -> Result<Self> {
        let elements_per_group = descriptor.lut_chunk_element_count;
        if elements_per_group == 0 {
            return Err(OmError::Corrupt("lut_chunk_element_count is zero".into()));
        }
        let entry_count = descriptor.chunk_count() + 1;
        let group_count = entry_count.div_ceil(elements_per_group);
        if descriptor.lut_size % group_count != 0 {
            return Err(OmError::Corrupt(format!(
                "LUT size {} is not a multiple of its {group_count} groups",
                descriptor.lut_size
            )));
        }
        Ok(LutLayout::Packed {
            offset: descriptor.lut_offset,
            group_size: descriptor.lut_size / group_count,
            elements_per_group,
            entry_count,
        })
    }

    pub fn entry_count(&self) -> u64 {
        match *self {
            LutLayout::Packed { entry_count, .. } => entry_count,
            LutLayout::Raw { chunk_count, .. } => chunk_count + 1,
        }
    }

    /// Group holding `entry`, or `None` for the implicit legacy entry 0.
    fn group_of(&self, entry: u64) -> Option<u64> {
        match *self {
            LutLayout::Packed {
                elements_per_group, ..
            } => Some(entry / elements_per_group),
            LutLayout::Raw { .. } => entry.checked_sub(1),
        }
    }

    /// Groups needed to know the byte range of every chunk in `chunks`.
    pub fn groups_for_chunks(&self, chunks: Range<u64>) -> Range<u64> {
        let first = self.group_of(chunks.start).unwrap_or(0);
        let last = self.group_of(chunks.end).unwrap_or(0);
        first..last + 1
    }

    /// Absolute file byte range occupied by `groups`.
    pub fn group_bytes(&self, groups: Range<u64>) -> Range<u64> {
        let (offset, size) = match *self {
            LutLayout::Packed {
                offset, group_size, ..
            } => (offset, group_size),
            LutLayout::Raw { offset, .. } => (offset, 8),
        };
        offset + groups.start * size..offset + groups.end * size
    }

    /// Decode `groups` from `bytes` (exactly [`group_bytes`](Self::group_bytes) long).
    pub fn decode(&self, bytes: &[u8], groups: Range<u64>) -> Result<LutWindow> {
        match *self {
            LutLayout::Packed {
                group_size,
                elements_per_group,
                entry_count,
                ..
            } => {
                let first = groups.start * elements_per_group;
                let end = (groups.end * elements_per_group).min(entry_count);
                let mut entries = vec![0u64; end.saturating_sub(first) as usize];
                let codec = LutPack64;
                for (i, out) in entries.chunks_mut(elements_per_group as usize).enumerate() {
                    let start = i * group_size as usize;
                    let group = bytes
                        .get(start..start + group_size as usize)
                        .ok_or_else(|| OmError::Corrupt("LUT group truncated".into()))?;
                    codec.decompress(group, out)?;
                }
                Ok(LutWindow { first, entries })
            }
            LutLayout::Raw { data_start, .. } => {
                let mut entries = Vec::with_capacity(groups.end.saturating_sub(groups.start) as usize + 1);
                if groups.start == 0 {
                    entries.push(data_start);
                }
                for raw in bytes.chunks_exact(8) {
                    let mut le = [0u8; 8];
                    le.copy_from_slice(raw);
                    entries.push(data_start + u64::from_le_bytes(le));
                }
                let first = if groups.start == 0 { 0 } else { groups.start + 1 };
                Ok(LutWindow { first, entries })
            }
        }
    }
}

/// Decoded, contiguous slice of LUT entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LutWindow {
    first: u64,
    entries: Vec<u64>,
}

impl LutWindow {
    pub fn entries(&self) -> Range<u64> {
        self.first..self.first + self.entries.len() as u64
    }

    pub fn get(&self, entry: u64) -> Result<u64> {
        entry
            .checked_sub(self.first)
            .and_then(|i| self.entries.get(i as usize))
            .copied()
            .ok_or_else(|| OmError::Corrupt(format!("LUT entry {entry} outside decoded window")))
    }

    /// Absolute byte range of chunk `chunk`.
    pub fn chunk_bytes(&self, chunk: u64) -> Result<Range<u64>> {
        let start = self.get(chunk)?;
        let end = self.get(chunk + 1)?;
        if end < start {
            return Err(OmError::Corrupt(format!(
                "LUT entries for chunk {chunk} decrease ({start} > {end})"
            )));
        }
        Ok(start..end)
    }
}
