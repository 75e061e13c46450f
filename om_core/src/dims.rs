//! Row-major chunk geometry.
//!
//! All coordinate math lives here as pure functions over `dims`/`chunks` so
//! the encoder and decoder never do raw offset arithmetic on their own.

use std::ops::Range;

use crate::error::{OmError, Result};

/// Regular chunk grid over an N-dimensional array. The last chunk along an
/// axis may be shorter than `chunks[i]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    dims: Vec<u64>,
    chunks: Vec<u64>,
}

impl ChunkGrid {
    pub fn new(dims: Vec<u64>, chunks: Vec<u64>) -> Result<Self> {
        if dims.len() != chunks.len() {
            return Err(OmError::InvalidDimensions(format!(
                "{} dimensions but {} chunk dimensions",
                dims.len(),
                chunks.len()
            )));
        }
        if dims.is_empty() {
            return Err(OmError::InvalidDimensions(
                "arrays need at least one dimension".into(),
            ));
        }
        for (axis, (&dim, &chunk)) in dims.iter().zip(&chunks).enumerate() {
            if dim == 0 {
                return Err(OmError::InvalidDimensions(format!("dimension {axis} is zero")));
            }
            if chunk == 0 {
                return Err(OmError::InvalidDimensions(format!("chunk dimension {axis} is zero")));
            }
            if chunk > dim {
                return Err(OmError::InvalidDimensions(format!(
                    "chunk dimension {axis} ({chunk}) exceeds dimension ({dim})"
                )));
            }
        }
        Ok(Self { dims, chunks })
    }

    pub fn dims(&self) -> &[u64] {
        &self.dims
    }

    pub fn chunks(&self) -> &[u64] {
        &self.chunks
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of chunks along each axis.
    pub fn grid_shape(&self) -> Vec<u64> {
        self.dims
            .iter()
            .zip(&self.chunks)
            .map(|(&d, &c)| d.div_ceil(c))
            .collect()
    }

    pub fn chunk_count(&self) -> u64 {
        self.grid_shape().iter().product()
    }

    /// Elements in a full (not truncated) chunk.
    pub fn max_chunk_elements(&self) -> usize {
        self.chunks.iter().product::<u64>() as usize
    }

    /// Chunk-grid coordinates of `index`.
    pub fn chunk_coordinates(&self, index: u64) -> Vec<u64> {
        unravel(index, &self.grid_shape())
    }

    pub fn chunk_index(&self, coordinates: &[u64]) -> u64 {
        ravel(coordinates, &self.grid_shape())
    }

    /// Element ranges covered by chunk `index`, per axis.
    pub fn chunk_region(&self, index: u64) -> Vec<Range<u64>> {
        self.chunk_coordinates(index)
            .iter()
            .zip(self.dims.iter().zip(&self.chunks))
            .map(|(&c, (&dim, &chunk))| {
                let start = c * chunk;
                start..(start + chunk).min(dim)
            })
            .collect()
    }

    /// Validate a read request against the array extent.
    pub fn check_read(&self, dim_read: &[Range<u64>]) -> Result<()> {
        if dim_read.len() != self.rank() {
            return Err(OmError::ShapeMismatch(format!(
                "read has {} ranges for a {}-dimensional array",
                dim_read.len(),
                self.rank()
            )));
        }
        for (axis, (range, &dim)) in dim_read.iter().zip(&self.dims).enumerate() {
            if range.start > range.end || range.end > dim {
                return Err(OmError::OutOfRange {
                    axis,
                    range: range.clone(),
                    dim,
                });
            }
        }
        Ok(())
    }
}

/// Row-major strides for `shape`.
pub fn strides(shape: &[u64]) -> Vec<u64> {
    let mut strides = vec![1u64; shape.len()];
    for i in (0..shape.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * shape[i + 1];
    }
    strides
}

pub fn ravel(coordinates: &[u64], shape: &[u64]) -> u64 {
    coordinates
        .iter()
        .zip(shape)
        .fold(0, |acc, (&c, &s)| acc * s + c)
}

pub fn unravel(mut index: u64, shape: &[u64]) -> Vec<u64> {
    let mut coordinates = vec![0u64; shape.len()];
    for (c, &s) in coordinates.iter_mut().zip(shape).rev() {
        *c = index % s;
        index /= s;
    }
    coordinates
}

/// Walks the chunks that intersect a read request in row-major order.
///
/// The position is a mixed-radix counter over per-axis chunk ranges: each
/// step increments the fastest axis and carries into slower ones, so no list
/// of chunk indices is ever built.
#[derive(Debug, Clone)]
pub struct ChunkRangeCursor {
    grid_shape: Vec<u64>,
    lo: Vec<u64>,
    hi: Vec<u64>,
    position: Vec<u64>,
    current: Option<u64>,
}

impl ChunkRangeCursor {
    /// `dim_read` must already be validated with [`ChunkGrid::check_read`].
    pub fn new(grid: &ChunkGrid, dim_read: &[Range<u64>]) -> Self {
        let grid_shape = grid.grid_shape();
        let lo: Vec<u64> = dim_read
            .iter()
            .zip(grid.chunks())
            .map(|(r, &c)| r.start / c)
            .collect();
        let hi: Vec<u64> = dim_read
            .iter()
            .zip(grid.chunks())
            .map(|(r, &c)| r.end.div_ceil(c))
            .collect();
        let empty = dim_read.iter().any(|r| r.is_empty());
        let current = (!empty).then(|| ravel(&lo, &grid_shape));
        Self {
            grid_shape,
            position: lo.clone(),
            lo,
            hi,
            current,
        }
    }

    /// Chunk index at the cursor, `None` once exhausted.
    #[inline]
    pub fn peek(&self) -> Option<u64> {
        self.current
    }

    /// Step to the next intersecting chunk.
    pub fn advance(&mut self) {
        if self.current.is_none() {
            return;
        }
        for axis in (0..self.position.len()).rev() {
            self.position[axis] += 1;
            if self.position[axis] < self.hi[axis] {
                self.current = Some(ravel(&self.position, &self.grid_shape));
                return;
            }
            self.position[axis] = self.lo[axis];
        }
        self.current = None;
    }
}

impl Iterator for ChunkRangeCursor {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let current = self.current?;
        self.advance();
        Some(current)
    }
}

/// Copy a hyperrectangle of `count` elements from `src` (shape `src_dims`,
/// starting at `src_start`) into `dst` (shape `dst_dims`, starting at
/// `dst_start`).
///
/// Trailing axes that are complete in both source and destination are
/// coalesced into one linear run, so the common "full fastest axis" case
/// becomes a handful of `copy_from_slice` calls.
pub fn copy_region<T: Copy>(
    src: &[T],
    src_dims: &[u64],
    src_start: &[u64],
    dst: &mut [T],
    dst_dims: &[u64],
    dst_start: &[u64],
    count: &[u64],
) {
    let rank = count.len();
    debug_assert!(src_dims.len() == rank && dst_dims.len() == rank);
    if rank == 0 || count.iter().any(|&c| c == 0) {
        return;
    }

    let mut run_axis = rank - 1;
    let mut run = count[run_axis];
    while run_axis > 0
        && count[run_axis] == src_dims[run_axis]
        && count[run_axis] == dst_dims[run_axis]
    {
        run_axis -= 1;
        run *= count[run_axis];
    }
    let run = run as usize;

    let src_strides = strides(src_dims);
    let dst_strides = strides(dst_dims);
    let mut position = vec![0u64; run_axis];
    loop {
        let mut s = 0u64;
        let mut d = 0u64;
        for axis in 0..rank {
            let p = if axis < run_axis { position[axis] } else { 0 };
            s += (src_start[axis] + p) * src_strides[axis];
            d += (dst_start[axis] + p) * dst_strides[axis];
        }
        let (s, d) = (s as usize, d as usize);
        dst[d..d + run].copy_from_slice(&src[s..s + run]);

        // carry across the outer axes
        let mut axis = run_axis;
        loop {
            if axis == 0 {
                return;
            }
            axis -= 1;
            position[axis] += 1;
            if position[axis] < count[axis] {
                break;
            }
            position[axis] = 0;
        }
    }
}
