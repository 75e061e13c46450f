//! Partial reads of one array.
//!
//! A read walks the chunks intersecting the request in row-major order and
//! turns them into as few backend reads as possible:
//!
//! 1. LUT groups for consecutive chunks are fetched with one merged read as
//!    long as the gap stays within `io_size_merge` and the read within
//!    `io_size_max`.
//! 2. Within the chunks covered by that LUT window, chunk data is fetched
//!    with merged reads under the same two thresholds.
//! 3. Every requested chunk is decoded into a reusable buffer and its
//!    intersection with the request is scattered into the destination.
//!
//! Chunks that merely sit inside a merged byte range are never decoded.

use std::marker::PhantomData;
use std::ops::Range;

use log::trace;

use crate::backend::OmFileReaderBackend;
use crate::config::IoLimits;
use crate::dims::{copy_region, ChunkGrid, ChunkRangeCursor};
use crate::error::{OmError, Result};
use crate::lut::{LutLayout, LutWindow};
use crate::metadata::ArrayDescriptor;
use crate::transform::{ArrayElement, ChunkScratch, ChunkTransform};

/// Whether `next` may be folded into the read currently covering `current`.
#[inline]
fn can_merge(limits: &IoLimits, current: &Range<u64>, next: &Range<u64>) -> bool {
    next.end <= current.end
        || (next.start <= current.end + limits.io_size_merge
            && next.end - current.start <= limits.io_size_max)
}

/// Reader for one array of an open file.
///
/// Holds decode scratch space, so read methods take `&mut self`. Create one
/// per thread from a shared [`OmFileReader`](crate::reader::OmFileReader).
pub struct OmArrayReader<'a, T: ArrayElement, B: OmFileReaderBackend> {
    backend: &'a B,
    descriptor: ArrayDescriptor,
    grid: ChunkGrid,
    layout: LutLayout,
    transform: ChunkTransform,
    io_limits: IoLimits,
    scratch: ChunkScratch,
    chunk_buffer: Vec<T>,
    /// Chunks served by the data read being planned.
    pending: Vec<u64>,
    _element: PhantomData<T>,
}

impl<'a, T: ArrayElement, B: OmFileReaderBackend> OmArrayReader<'a, T, B> {
    pub(crate) fn new(
        backend: &'a B,
        descriptor: ArrayDescriptor,
        grid: ChunkGrid,
        layout: LutLayout,
        io_limits: IoLimits,
    ) -> Self {
        let transform = ChunkTransform {
            compression: descriptor.compression,
            scale_factor: descriptor.scale_factor,
            add_offset: descriptor.add_offset,
        };
        Self {
            backend,
            descriptor,
            grid,
            layout,
            transform,
            io_limits,
            scratch: ChunkScratch::default(),
            chunk_buffer: Vec::new(),
            pending: Vec::new(),
            _element: PhantomData,
        }
    }

    pub fn with_io_limits(mut self, io_limits: IoLimits) -> Self {
        self.io_limits = io_limits;
        self
    }

    pub fn descriptor(&self) -> &ArrayDescriptor {
        &self.descriptor
    }

    pub fn dims(&self) -> &[u64] {
        self.grid.dims()
    }

    pub fn chunks(&self) -> &[u64] {
        self.grid.chunks()
    }

    /// Read `dim_read` into a freshly allocated row-major buffer.
    pub fn read(&mut self, dim_read: &[Range<u64>]) -> Result<Vec<T>> {
        let dims: Vec<u64> = dim_read.iter().map(|r| r.end.saturating_sub(r.start)).collect();
        let mut out = vec![T::default(); dims.iter().product::<u64>() as usize];
        let zero = vec![0u64; dims.len()];
        self.read_into(dim_read, &mut out, &zero, &dims)?;
        Ok(out)
    }

    /// Read `dim_read` into `into`, a row-major cube of shape `into_dims`,
    /// placing the first requested element at `into_offset`.
    pub fn read_into(
        &mut self,
        dim_read: &[Range<u64>],
        into: &mut [T],
        into_offset: &[u64],
        into_dims: &[u64],
    ) -> Result<()> {
        self.grid.check_read(dim_read)?;
        let rank = self.grid.rank();
        if into_offset.len() != rank || into_dims.len() != rank {
            return Err(OmError::ShapeMismatch(format!(
                "destination offset and shape must have rank {rank}"
            )));
        }
        if into.len() as u64 != into_dims.iter().product::<u64>() {
            return Err(OmError::ShapeMismatch(format!(
                "destination holds {} elements but its shape {into_dims:?} needs {}",
                into.len(),
                into_dims.iter().product::<u64>()
            )));
        }
        for (axis, range) in dim_read.iter().enumerate() {
            if into_offset[axis] + (range.end - range.start) > into_dims[axis] {
                return Err(OmError::ShapeMismatch(format!(
                    "axis {axis}: {} elements at offset {} exceed destination extent {}",
                    range.end - range.start,
                    into_offset[axis],
                    into_dims[axis]
                )));
            }
        }

        let Self {
            backend,
            grid,
            layout,
            transform,
            io_limits,
            scratch,
            chunk_buffer,
            pending,
            ..
        } = self;
        let backend = *backend;
        let grid = &*grid;
        plan_reads(backend, grid, layout, io_limits, dim_read, pending, |bytes, window, chunks| {
            backend.with_bytes(bytes.start, bytes.end - bytes.start, |raw| -> Result<()> {
                for &chunk in chunks {
                    let span = window.chunk_bytes(chunk)?;
                    let input = &raw[(span.start - bytes.start) as usize..(span.end - bytes.start) as usize];
                    decode_and_scatter(
                        grid,
                        transform,
                        chunk,
                        input,
                        scratch,
                        chunk_buffer,
                        dim_read,
                        into,
                        into_offset,
                        into_dims,
                    )?;
                }
                Ok(())
            })?
        })
    }

    /// Ask the backend to page in everything a read of `dim_read` would touch.
    pub fn prefetch(&mut self, dim_read: &[Range<u64>]) -> Result<()> {
        self.grid.check_read(dim_read)?;
        if !self.backend.needs_prefetch() {
            return Ok(());
        }
        let backend = self.backend;
        plan_reads(
            backend,
            &self.grid,
            &self.layout,
            &self.io_limits,
            dim_read,
            &mut self.pending,
            |bytes, _, _| {
                backend.prefetch_data(bytes.start, bytes.end - bytes.start);
                Ok(())
            },
        )
    }

    /// Decoded LUT entries `range` (chunk start offsets, plus the end of the
    /// last chunk at index `chunk_count`).
    pub fn read_lut_entries(&mut self, range: Range<u64>) -> Result<Vec<u64>> {
        let entry_count = self.layout.entry_count();
        if range.start > range.end || range.end > entry_count {
            return Err(OmError::OutOfRange {
                axis: 0,
                range,
                dim: entry_count,
            });
        }
        let mut entries = Vec::with_capacity((range.end - range.start) as usize);
        if range.is_empty() {
            return Ok(entries);
        }
        let groups = self.layout.groups_for_chunks(range.start..range.end - 1);
        let mut first = groups.start;
        while first < groups.end {
            let mut read = first..first + 1;
            while read.end < groups.end {
                let bytes = self.layout.group_bytes(read.clone());
                let next = self.layout.group_bytes(read.end..read.end + 1);
                if !can_merge(&self.io_limits, &bytes, &next) {
                    break;
                }
                read.end += 1;
            }
            let window = read_lut_window(self.backend, &self.layout, read.clone())?;
            let wanted = window.entries();
            for entry in range.start.max(wanted.start)..range.end.min(wanted.end) {
                entries.push(window.get(entry)?);
            }
            first = read.end;
        }
        Ok(entries)
    }
}

fn read_lut_window<B: OmFileReaderBackend>(
    backend: &B,
    layout: &LutLayout,
    groups: Range<u64>,
) -> Result<LutWindow> {
    let bytes = layout.group_bytes(groups.clone());
    trace!(
        "LUT read of groups {groups:?}: {} bytes at {}",
        bytes.end - bytes.start,
        bytes.start
    );
    backend.with_bytes(bytes.start, bytes.end - bytes.start, |raw| {
        layout.decode(raw, groups)
    })?
}

/// Walk the chunks of `dim_read` and call `on_data` once per merged data
/// read with its byte range, the LUT window covering it, and the requested
/// chunks inside it.
fn plan_reads<B: OmFileReaderBackend>(
    backend: &B,
    grid: &ChunkGrid,
    layout: &LutLayout,
    limits: &IoLimits,
    dim_read: &[Range<u64>],
    pending: &mut Vec<u64>,
    mut on_data: impl FnMut(Range<u64>, &LutWindow, &[u64]) -> Result<()>,
) -> Result<()> {
    let mut lut_cursor = ChunkRangeCursor::new(grid, dim_read);
    let mut data_cursor = lut_cursor.clone();

    while let Some(first) = lut_cursor.peek() {
        let mut groups = layout.groups_for_chunks(first..first + 1);
        let mut lut_bytes = layout.group_bytes(groups.clone());
        let mut last = first;
        lut_cursor.advance();
        while let Some(next) = lut_cursor.peek() {
            let next_groups = layout.groups_for_chunks(next..next + 1);
            let next_bytes = layout.group_bytes(next_groups.clone());
            if !can_merge(limits, &lut_bytes, &next_bytes) {
                break;
            }
            groups.end = groups.end.max(next_groups.end);
            lut_bytes.end = lut_bytes.end.max(next_bytes.end);
            last = next;
            lut_cursor.advance();
        }
        let window = read_lut_window(backend, layout, groups)?;

        while let Some(first) = data_cursor.peek().filter(|&c| c <= last) {
            pending.clear();
            pending.push(first);
            let mut bytes = window.chunk_bytes(first)?;
            data_cursor.advance();
            while let Some(next) = data_cursor.peek().filter(|&c| c <= last) {
                let next_bytes = window.chunk_bytes(next)?;
                if !can_merge(limits, &bytes, &next_bytes) {
                    break;
                }
                bytes.end = bytes.end.max(next_bytes.end);
                pending.push(next);
                data_cursor.advance();
            }
            trace!(
                "data read of {} chunks: {} bytes at {}",
                pending.len(),
                bytes.end - bytes.start,
                bytes.start
            );
            on_data(bytes, &window, pending)?;
        }
    }
    Ok(())
}

/// Decode one chunk and copy its intersection with `dim_read` into the
/// destination cube.
#[allow(clippy::too_many_arguments)]
fn decode_and_scatter<T: ArrayElement>(
    grid: &ChunkGrid,
    transform: &ChunkTransform,
    chunk: u64,
    input: &[u8],
    scratch: &mut ChunkScratch,
    chunk_buffer: &mut Vec<T>,
    dim_read: &[Range<u64>],
    into: &mut [T],
    into_offset: &[u64],
    into_dims: &[u64],
) -> Result<()> {
    let region = grid.chunk_region(chunk);
    let chunk_dims: Vec<u64> = region.iter().map(|r| r.end - r.start).collect();
    let len = chunk_dims.iter().product::<u64>() as usize;
    chunk_buffer.clear();
    chunk_buffer.resize(len, T::default());
    let cols = *chunk_dims.last().unwrap_or(&1) as usize;
    T::decode_chunk(transform, input, cols, scratch, chunk_buffer)?;

    let rank = region.len();
    let mut src_start = vec![0u64; rank];
    let mut dst_start = vec![0u64; rank];
    let mut count = vec![0u64; rank];
    for axis in 0..rank {
        let lo = region[axis].start.max(dim_read[axis].start);
        let hi = region[axis].end.min(dim_read[axis].end);
        src_start[axis] = lo - region[axis].start;
        dst_start[axis] = into_offset[axis] + (lo - dim_read[axis].start);
        count[axis] = hi - lo;
    }
    copy_region(
        chunk_buffer,
        &chunk_dims,
        &src_start,
        into,
        into_dims,
        &dst_start,
        &count,
    );
    Ok(())
}
