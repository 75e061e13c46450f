//! Writer for the fixed-header 2-D generation.
//!
//! New files use [`OmFileWriter`](crate::writer::OmFileWriter); this exists so
//! readers can be exercised against files in the older layout:
//!
//! ```text
//! [header: 40 bytes]
//! [LUT: n_chunks x u64 LE, end of each chunk relative to the data start]
//! [chunk 0] [chunk 1] ... [chunk N-1]
//! [padding: 256 zero bytes]
//! ```

use log::debug;

use crate::backend::OmFileWriterBackend;
use crate::buffer::OmBufferedWriter;
use crate::config::WriterOptions;
use crate::encoder::Encoder;
use crate::error::{OmError, Result};
use crate::format::{
    CompressionKind, DataType, LegacyHeader, LEGACY_PADDING, LEGACY_VERSION_1, LEGACY_VERSION_2,
};
use crate::transform::ChunkScratch;

/// Write `values` (shape `header.dims`) as a legacy file into `backend`.
///
/// The LUT is reserved up front and patched with one positioned write once
/// every chunk size is known.
pub fn write_legacy<B: OmFileWriterBackend>(
    backend: B,
    header: &LegacyHeader,
    values: &[f32],
) -> Result<B> {
    if header.version != LEGACY_VERSION_1 && header.version != LEGACY_VERSION_2 {
        return Err(OmError::UnsupportedVersion(header.version));
    }
    if header.version == LEGACY_VERSION_1 && header.compression != CompressionKind::PforDelta2dInt16 {
        return Err(OmError::UnsupportedCompression {
            data_type: DataType::Float,
            compression: header.compression,
        });
    }
    let encoder = Encoder::new(
        header.dims.to_vec(),
        header.chunks.to_vec(),
        DataType::Float,
        header.compression,
        header.scale_factor,
        0.0,
        1,
    )?;
    let dims = header.dims;
    if values.len() as u64 != dims[0] * dims[1] {
        return Err(OmError::ShapeMismatch(format!(
            "{} values supplied for a {}x{} array",
            values.len(),
            dims[0],
            dims[1]
        )));
    }

    let options = WriterOptions::default();
    let mut buffer = OmBufferedWriter::new(backend, options.buffer_capacity, options.sync_every_bytes);
    buffer.write_all(&header.to_bytes())?;
    let lut_offset = buffer.position();
    let chunk_count = encoder.grid().chunk_count();
    buffer.write_all(&vec![0u8; chunk_count as usize * 8])?;

    let data_start = buffer.position();
    let max_bytes = encoder.max_chunk_bytes::<f32>();
    let mut gather = Vec::new();
    let mut scratch = ChunkScratch::default();
    let mut lut = Vec::with_capacity(chunk_count as usize * 8);
    for chunk in 0..chunk_count {
        buffer.write_with(max_bytes, |out| {
            encoder.compress_chunk(
                chunk,
                values,
                &dims,
                &[0, 0],
                &[0, 0],
                &mut gather,
                &mut scratch,
                out,
            )
        })?;
        lut.extend_from_slice(&(buffer.position() - data_start).to_le_bytes());
    }
    buffer.write_at(&lut, lut_offset)?;
    buffer.write_all(&[0u8; LEGACY_PADDING as usize])?;
    buffer.synchronize()?;
    debug!(
        "wrote legacy v{} file: {chunk_count} chunks, {} bytes",
        header.version,
        buffer.position()
    );
    buffer.into_backend()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::LEGACY_HEADER_SIZE;

    fn header(version: u8, compression: CompressionKind) -> LegacyHeader {
        LegacyHeader {
            version,
            compression,
            scale_factor: 10.0,
            dims: [5, 7],
            chunks: [2, 3],
        }
    }

    #[test]
    fn lut_is_patched_with_relative_ends() {
        let values: Vec<f32> = (0..35).map(|v| v as f32 * 0.5).collect();
        let bytes = write_legacy(
            Vec::new(),
            &header(LEGACY_VERSION_2, CompressionKind::PforDelta2dInt16),
            &values,
        )
        .unwrap();

        let chunk_count = 3 * 3;
        let lut_start = LEGACY_HEADER_SIZE as usize;
        let data_start = lut_start + chunk_count * 8;
        let ends: Vec<u64> = bytes[lut_start..data_start]
            .chunks_exact(8)
            .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
            .collect();
        assert!(ends.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(
            bytes.len(),
            data_start + ends[chunk_count - 1] as usize + LEGACY_PADDING as usize
        );
    }

    #[test]
    fn version_one_is_linear_only() {
        let values = vec![0f32; 35];
        assert!(write_legacy(
            Vec::new(),
            &header(LEGACY_VERSION_1, CompressionKind::FpxXor2d),
            &values
        )
        .is_err());
        assert!(matches!(
            write_legacy(Vec::new(), &header(3, CompressionKind::FpxXor2d), &values),
            Err(OmError::UnsupportedVersion(3))
        ));
    }
}
