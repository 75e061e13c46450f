use std::ops::Range;

use crate::dims::{copy_region, ChunkGrid};
use crate::error::{OmError, Result};
use crate::format::{CompressionKind, DataType};
use crate::lut::compress_lut;
use crate::metadata::ArrayDescriptor;
use crate::transform::{ArrayElement, ChunkScratch, ChunkTransform};

/// Validated parameters of one array being written, plus the per-chunk
/// compression step. Holds no I/O state; see
/// [`OmArrayWriter`](crate::writer::OmArrayWriter) for that.
#[derive(Debug, Clone)]
pub struct Encoder {
    grid: ChunkGrid,
    data_type: DataType,
    transform: ChunkTransform,
    lut_chunk_element_count: u64,
}

impl Encoder {
    /// Every argument is checked here, before anything touches storage.
    pub fn new(
        dims: Vec<u64>,
        chunks: Vec<u64>,
        data_type: DataType,
        compression: CompressionKind,
        scale_factor: f32,
        add_offset: f32,
        lut_chunk_element_count: u64,
    ) -> Result<Self> {
        let grid = ChunkGrid::new(dims, chunks)?;
        let supported = match data_type {
            DataType::Float => true,
            DataType::Double => compression == CompressionKind::FpxXor2d,
            _ => false,
        };
        if !supported {
            return Err(OmError::UnsupportedCompression {
                data_type,
                compression,
            });
        }
        if compression.is_quantized() && !(scale_factor.is_finite() && scale_factor != 0.0) {
            return Err(OmError::InvalidDimensions(format!(
                "scale factor {scale_factor} cannot quantize values"
            )));
        }
        if lut_chunk_element_count == 0 {
            return Err(OmError::InvalidDimensions(
                "lut_chunk_element_count must be at least 1".into(),
            ));
        }
        Ok(Self {
            grid,
            data_type,
            transform: ChunkTransform {
                compression,
                scale_factor,
                add_offset,
            },
            lut_chunk_element_count,
        })
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn transform(&self) -> &ChunkTransform {
        &self.transform
    }

    /// Worst-case compressed size of any single chunk of this array.
    pub fn max_chunk_bytes<T: ArrayElement>(&self) -> usize {
        T::max_compressed_bytes(self.transform.compression, self.grid.max_chunk_elements())
    }

    /// Gather chunk `chunk` out of a caller slab and compress it into `out`.
    ///
    /// `source` has shape `source_dims`; `origin[i]` is the global array
    /// coordinate that `source_start[i]` corresponds to.
    #[allow(clippy::too_many_arguments)]
    pub fn compress_chunk<T: ArrayElement>(
        &self,
        chunk: u64,
        source: &[T],
        source_dims: &[u64],
        source_start: &[u64],
        origin: &[u64],
        gather: &mut Vec<T>,
        scratch: &mut ChunkScratch,
        out: &mut [u8],
    ) -> Result<usize> {
        let region: Vec<Range<u64>> = self.grid.chunk_region(chunk);
        let count: Vec<u64> = region.iter().map(|r| r.end - r.start).collect();
        let start: Vec<u64> = region
            .iter()
            .zip(source_start.iter().zip(origin))
            .map(|(r, (&s, &o))| s + (r.start - o))
            .collect();

        gather.clear();
        gather.resize(count.iter().product::<u64>() as usize, T::default());
        let zero = vec![0u64; count.len()];
        copy_region(source, source_dims, &start, gather, &count, &zero, &count);

        let cols = *count.last().unwrap_or(&1) as usize;
        T::encode_chunk(&self.transform, gather, cols, scratch, out)
    }

    /// Compress the chunk offset table. Returns the blob and its group size.
    pub fn compress_lut(&self, chunk_offsets: &[u64]) -> Result<(Vec<u8>, u64)> {
        compress_lut(chunk_offsets, self.lut_chunk_element_count)
    }

    pub fn descriptor(&self, lut_offset: u64, lut_size: u64) -> ArrayDescriptor {
        ArrayDescriptor {
            data_type: self.data_type,
            compression: self.transform.compression,
            scale_factor: self.transform.scale_factor,
            add_offset: self.transform.add_offset,
            dimensions: self.grid.dims().to_vec(),
            chunks: self.grid.chunks().to_vec(),
            dimension_names: Vec::new(),
            lut_offset,
            lut_size,
            lut_chunk_element_count: self.lut_chunk_element_count,
        }
    }
}
