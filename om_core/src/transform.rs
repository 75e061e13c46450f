//! Chunk transform: quantization plus 2D predictive coding.
//!
//! A chunk is viewed as `rows x cols`, where `cols` is the chunk's extent
//! along the fastest axis. Each row is replaced by its difference (16-bit
//! paths) or XOR (lossless paths) against the previous row, which exposes
//! the correlation between consecutive time steps or grid rows to the block
//! codec.

use std::ops::BitXor;

use om_codecs::{BlockCodec, PforDelta16, XorPack32, XorPack64};

use crate::error::{OmError, Result};
use crate::format::{CompressionKind, DataType};

/// Quantized value reserved for NaN / missing.
pub const NAN_SENTINEL: i16 = i16::MAX;

/// Quantized values are clamped into this range so that the sentinel is
/// never produced by real data and `i16::MIN` is never produced at all.
pub const QUANTIZED_MIN: i16 = i16::MIN + 1;
pub const QUANTIZED_MAX: i16 = i16::MAX - 1;

#[inline]
pub fn quantize_linear(value: f32, scale_factor: f32, add_offset: f32) -> i16 {
    if value.is_nan() {
        return NAN_SENTINEL;
    }
    ((value - add_offset) * scale_factor)
        .round()
        .clamp(QUANTIZED_MIN as f32, QUANTIZED_MAX as f32) as i16
}

#[inline]
pub fn dequantize_linear(q: i16, scale_factor: f32, add_offset: f32) -> f32 {
    if q == NAN_SENTINEL {
        return f32::NAN;
    }
    q as f32 / scale_factor + add_offset
}

#[inline]
pub fn quantize_log(value: f32, scale_factor: f32, add_offset: f32) -> i16 {
    // values below -1 have no logarithm and are stored as missing
    quantize_linear((1.0 + value).log10(), scale_factor, add_offset)
}

#[inline]
pub fn dequantize_log(q: i16, scale_factor: f32, add_offset: f32) -> f32 {
    if q == NAN_SENTINEL {
        return f32::NAN;
    }
    10f32.powf(q as f32 / scale_factor + add_offset) - 1.0
}

/// Replace every row by its wrapping difference to the previous row.
pub fn delta2d_encode(values: &mut [i16], cols: usize) {
    if cols == 0 {
        return;
    }
    let rows = values.len() / cols;
    for row in (1..rows).rev() {
        let (before, current) = values.split_at_mut(row * cols);
        let previous = &before[(row - 1) * cols..];
        for (v, p) in current[..cols].iter_mut().zip(previous) {
            *v = v.wrapping_sub(*p);
        }
    }
}

pub fn delta2d_decode(values: &mut [i16], cols: usize) {
    if cols == 0 {
        return;
    }
    let rows = values.len() / cols;
    for row in 1..rows {
        let (before, current) = values.split_at_mut(row * cols);
        let previous = &before[(row - 1) * cols..];
        for (v, p) in current[..cols].iter_mut().zip(previous) {
            *v = v.wrapping_add(*p);
        }
    }
}

/// Replace every row by its XOR with the previous row.
pub fn xor2d_encode<W: Copy + BitXor<Output = W>>(values: &mut [W], cols: usize) {
    if cols == 0 {
        return;
    }
    let rows = values.len() / cols;
    for row in (1..rows).rev() {
        let (before, current) = values.split_at_mut(row * cols);
        let previous = &before[(row - 1) * cols..];
        for (v, p) in current[..cols].iter_mut().zip(previous) {
            *v = *v ^ *p;
        }
    }
}

pub fn xor2d_decode<W: Copy + BitXor<Output = W>>(values: &mut [W], cols: usize) {
    if cols == 0 {
        return;
    }
    let rows = values.len() / cols;
    for row in 1..rows {
        let (before, current) = values.split_at_mut(row * cols);
        let previous = &before[(row - 1) * cols..];
        for (v, p) in current[..cols].iter_mut().zip(previous) {
            *v = *v ^ *p;
        }
    }
}

/// Per-array transform parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkTransform {
    pub compression: CompressionKind,
    pub scale_factor: f32,
    pub add_offset: f32,
}

/// Reusable integer buffers so chunk coding does not allocate per chunk.
#[derive(Debug, Default)]
pub struct ChunkScratch {
    int16: Vec<i16>,
    word32: Vec<u32>,
    word64: Vec<u64>,
}

/// Element type that can be stored as an OM array.
pub trait ArrayElement: Copy + Default + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn supports(compression: CompressionKind) -> bool;

    /// Worst-case compressed size of a chunk with `elements` values.
    fn max_compressed_bytes(compression: CompressionKind, elements: usize) -> usize;

    /// Transform and compress one chunk, returning the bytes written to `out`.
    fn encode_chunk(
        transform: &ChunkTransform,
        values: &[Self],
        cols: usize,
        scratch: &mut ChunkScratch,
        out: &mut [u8],
    ) -> Result<usize>;

    /// Decompress and invert the transform, filling all of `out`.
    fn decode_chunk(
        transform: &ChunkTransform,
        input: &[u8],
        cols: usize,
        scratch: &mut ChunkScratch,
        out: &mut [Self],
    ) -> Result<()>;
}

impl ArrayElement for f32 {
    const DATA_TYPE: DataType = DataType::Float;

    fn supports(_compression: CompressionKind) -> bool {
        true
    }

    fn max_compressed_bytes(compression: CompressionKind, elements: usize) -> usize {
        match compression {
            CompressionKind::FpxXor2d => XorPack32.max_compressed_bytes(elements),
            _ => PforDelta16.max_compressed_bytes(elements),
        }
    }

    fn encode_chunk(
        transform: &ChunkTransform,
        values: &[f32],
        cols: usize,
        scratch: &mut ChunkScratch,
        out: &mut [u8],
    ) -> Result<usize> {
        let ChunkTransform {
            compression,
            scale_factor,
            add_offset,
        } = *transform;
        match compression {
            CompressionKind::PforDelta2dInt16 | CompressionKind::PforDelta2dInt16Logarithmic => {
                let quantize: fn(f32, f32, f32) -> i16 = if compression == CompressionKind::PforDelta2dInt16 {
                    quantize_linear
                } else {
                    quantize_log
                };
                let q = &mut scratch.int16;
                q.clear();
                q.extend(values.iter().map(|&v| quantize(v, scale_factor, add_offset)));
                delta2d_encode(q, cols);
                Ok(PforDelta16.compress(q, out)?)
            }
            CompressionKind::FpxXor2d => {
                let words = &mut scratch.word32;
                words.clear();
                words.extend(values.iter().map(|v| v.to_bits()));
                xor2d_encode(words, cols);
                Ok(XorPack32.compress(words, out)?)
            }
        }
    }

    fn decode_chunk(
        transform: &ChunkTransform,
        input: &[u8],
        cols: usize,
        scratch: &mut ChunkScratch,
        out: &mut [f32],
    ) -> Result<()> {
        let ChunkTransform {
            compression,
            scale_factor,
            add_offset,
        } = *transform;
        match compression {
            CompressionKind::PforDelta2dInt16 | CompressionKind::PforDelta2dInt16Logarithmic => {
                let dequantize: fn(i16, f32, f32) -> f32 = if compression == CompressionKind::PforDelta2dInt16 {
                    dequantize_linear
                } else {
                    dequantize_log
                };
                let q = &mut scratch.int16;
                q.clear();
                q.resize(out.len(), 0);
                PforDelta16.decompress(input, q)?;
                delta2d_decode(q, cols);
                for (o, &v) in out.iter_mut().zip(q.iter()) {
                    *o = dequantize(v, scale_factor, add_offset);
                }
            }
            CompressionKind::FpxXor2d => {
                let words = &mut scratch.word32;
                words.clear();
                words.resize(out.len(), 0);
                XorPack32.decompress(input, words)?;
                xor2d_decode(words, cols);
                for (o, &w) in out.iter_mut().zip(words.iter()) {
                    *o = f32::from_bits(w);
                }
            }
        }
        Ok(())
    }
}

impl ArrayElement for f64 {
    const DATA_TYPE: DataType = DataType::Double;

    fn supports(compression: CompressionKind) -> bool {
        compression == CompressionKind::FpxXor2d
    }

    fn max_compressed_bytes(_compression: CompressionKind, elements: usize) -> usize {
        XorPack64.max_compressed_bytes(elements)
    }

    fn encode_chunk(
        transform: &ChunkTransform,
        values: &[f64],
        cols: usize,
        scratch: &mut ChunkScratch,
        out: &mut [u8],
    ) -> Result<usize> {
        ensure_supported::<f64>(transform.compression)?;
        let words = &mut scratch.word64;
        words.clear();
        words.extend(values.iter().map(|v| v.to_bits()));
        xor2d_encode(words, cols);
        Ok(XorPack64.compress(words, out)?)
    }

    fn decode_chunk(
        transform: &ChunkTransform,
        input: &[u8],
        cols: usize,
        scratch: &mut ChunkScratch,
        out: &mut [f64],
    ) -> Result<()> {
        ensure_supported::<f64>(transform.compression)?;
        let words = &mut scratch.word64;
        words.clear();
        words.resize(out.len(), 0);
        XorPack64.decompress(input, words)?;
        xor2d_decode(words, cols);
        for (o, &w) in out.iter_mut().zip(words.iter()) {
            *o = f64::from_bits(w);
        }
        Ok(())
    }
}

pub fn ensure_supported<T: ArrayElement>(compression: CompressionKind) -> Result<()> {
    if T::supports(compression) {
        Ok(())
    } else {
        Err(OmError::UnsupportedCompression {
            data_type: T::DATA_TYPE,
            compression,
        })
    }
}
