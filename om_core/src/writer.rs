use std::fs::{self, File};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::backend::OmFileWriterBackend;
use crate::buffer::OmBufferedWriter;
use crate::config::WriterOptions;
use crate::encoder::Encoder;
use crate::error::{OmError, Result};
use crate::format::{CompressionKind, MAGIC, VERSION};
use crate::metadata::{ArrayDescriptor, Variable};
use crate::transform::{ArrayElement, ChunkScratch};

/// Streaming writer for current-generation OM files.
///
/// # Write contract
/// Arrays are written one after another: [`prepare_array`](Self::prepare_array)
/// hands out an [`OmArrayWriter`] that borrows this writer until it is
/// finalized. Once every array is done, [`write_trailer`](Self::write_trailer)
/// appends the metadata tree that references them.
///
/// # Format layout written
/// ```text
/// ["OM" 3]
/// [array 0 chunks] [array 0 LUT]
/// [array 1 chunks] [array 1 LUT] ...
/// [metadata document: JSON Variable tree]
/// [trailer: u64 LE length of the document]
/// ```
pub struct OmFileWriter<B: OmFileWriterBackend> {
    buffer: OmBufferedWriter<B>,
    options: WriterOptions,
}

impl<B: OmFileWriterBackend> OmFileWriter<B> {
    pub fn new(backend: B, options: WriterOptions) -> Self {
        Self {
            buffer: OmBufferedWriter::new(backend, options.buffer_capacity, options.sync_every_bytes),
            options,
        }
    }

    fn ensure_header(&mut self) -> Result<()> {
        if self.buffer.position() == 0 {
            self.buffer.write_all(MAGIC)?;
            self.buffer.write_all(&[VERSION])?;
        }
        Ok(())
    }

    /// Start a new array. Parameters are validated before any byte is written.
    pub fn prepare_array<T: ArrayElement>(
        &mut self,
        dims: Vec<u64>,
        chunks: Vec<u64>,
        compression: CompressionKind,
        scale_factor: f32,
        add_offset: f32,
    ) -> Result<OmArrayWriter<'_, T, B>> {
        let encoder = Encoder::new(
            dims,
            chunks,
            T::DATA_TYPE,
            compression,
            scale_factor,
            add_offset,
            self.options.lut_chunk_element_count,
        )?;
        self.ensure_header()?;
        let data_start = self.buffer.position();
        let chunk_count = encoder.grid().chunk_count();
        let mut chunk_offsets = Vec::with_capacity(chunk_count as usize + 1);
        chunk_offsets.push(data_start);
        Ok(OmArrayWriter {
            buffer: &mut self.buffer,
            encoder,
            chunk_count,
            chunk_offsets,
            gather: Vec::new(),
            scratch: ChunkScratch::default(),
            _element: PhantomData,
        })
    }

    /// Append the metadata document and its length, then flush and sync.
    pub fn write_trailer(&mut self, root: &Variable) -> Result<()> {
        self.ensure_header()?;
        let document = serde_json::to_vec(root)?;
        self.buffer.write_all(&document)?;
        self.buffer.write_all(&(document.len() as u64).to_le_bytes())?;
        self.buffer.synchronize()?;
        debug!(
            "wrote metadata document of {} bytes, file size {}",
            document.len(),
            self.buffer.position()
        );
        Ok(())
    }

    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    pub fn into_backend(self) -> Result<B> {
        self.buffer.into_backend()
    }
}

/// Writes the chunks of one array in row-major chunk order.
pub struct OmArrayWriter<'w, T: ArrayElement, B: OmFileWriterBackend> {
    buffer: &'w mut OmBufferedWriter<B>,
    encoder: Encoder,
    chunk_count: u64,
    /// Absolute start of every written chunk, plus the end of the last one.
    chunk_offsets: Vec<u64>,
    gather: Vec<T>,
    scratch: ChunkScratch,
    _element: PhantomData<T>,
}

impl<'w, T: ArrayElement, B: OmFileWriterBackend> OmArrayWriter<'w, T, B> {
    /// Index of the next chunk to be written.
    pub fn next_chunk(&self) -> u64 {
        self.chunk_offsets.len() as u64 - 1
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    /// Write the region of the array that starts at the next unwritten chunk
    /// and spans `count` elements per axis.
    ///
    /// `values` has shape `source_dims`; the region is read from it starting
    /// at `source_offset`. Along every axis `count` must be a multiple of the
    /// chunk size or reach the end of the array, and the chunks it covers must
    /// be consecutive in row-major order.
    pub fn write_data(
        &mut self,
        values: &[T],
        source_dims: &[u64],
        source_offset: &[u64],
        count: &[u64],
    ) -> Result<()> {
        let grid = self.encoder.grid();
        let rank = grid.rank();
        if source_dims.len() != rank || source_offset.len() != rank || count.len() != rank {
            return Err(OmError::ShapeMismatch(format!(
                "write arguments must all have rank {rank}"
            )));
        }
        let expected: u64 = source_dims.iter().product();
        if values.len() as u64 != expected {
            return Err(OmError::ShapeMismatch(format!(
                "{} values supplied for a source shape of {expected} elements",
                values.len()
            )));
        }
        let next = self.next_chunk();
        if next >= self.chunk_count {
            return Err(OmError::ShapeMismatch(format!(
                "all {} chunks are already written",
                self.chunk_count
            )));
        }

        let grid_shape = grid.grid_shape();
        let start_chunk = grid.chunk_coordinates(next);
        let origin: Vec<u64> = start_chunk
            .iter()
            .zip(grid.chunks())
            .map(|(&c, &chunk)| c * chunk)
            .collect();
        let mut span = vec![0u64; rank];
        for axis in 0..rank {
            let (dim, chunk) = (grid.dims()[axis], grid.chunks()[axis]);
            let n = count[axis];
            if source_offset[axis] + n > source_dims[axis] {
                return Err(OmError::ShapeMismatch(format!(
                    "axis {axis}: offset {} + count {n} exceeds source extent {}",
                    source_offset[axis], source_dims[axis]
                )));
            }
            let end = origin[axis] + n;
            if n == 0 || end > dim || (n % chunk != 0 && end != dim) {
                return Err(OmError::ShapeMismatch(format!(
                    "axis {axis}: count {n} at {} is not a whole number of chunks of {chunk} within {dim}",
                    origin[axis]
                )));
            }
            span[axis] = n.div_ceil(chunk);
        }

        // Axes after the first partial one must be covered completely, axes
        // before it must span a single chunk.
        let mut stop = rank - 1;
        while stop > 0 && start_chunk[stop] == 0 && span[stop] == grid_shape[stop] {
            stop -= 1;
        }
        if let Some(axis) = (0..stop).find(|&a| span[a] != 1) {
            return Err(OmError::ShapeMismatch(format!(
                "axis {axis}: region spans {} chunks but later axes are not complete",
                span[axis]
            )));
        }

        let total: u64 = span.iter().product();
        let max_bytes = self.encoder.max_chunk_bytes::<T>();
        for chunk in next..next + total {
            let encoder = &self.encoder;
            let gather = &mut self.gather;
            let scratch = &mut self.scratch;
            self.buffer.write_with(max_bytes, |out| {
                encoder.compress_chunk(
                    chunk,
                    values,
                    source_dims,
                    source_offset,
                    &origin,
                    gather,
                    scratch,
                    out,
                )
            })?;
            self.chunk_offsets.push(self.buffer.position());
        }
        Ok(())
    }

    /// Append the LUT and return the descriptor that locates this array.
    pub fn finalize(self) -> Result<ArrayDescriptor> {
        let written = self.next_chunk();
        if written != self.chunk_count {
            return Err(OmError::ShapeMismatch(format!(
                "only {written} of {} chunks were written",
                self.chunk_count
            )));
        }
        let (lut, group_size) = self.encoder.compress_lut(&self.chunk_offsets)?;
        let lut_offset = self.buffer.position();
        self.buffer.write_all(&lut)?;
        debug!(
            "finalized array of {} chunks: data {} bytes, LUT {} bytes ({} per group)",
            self.chunk_count,
            lut_offset - self.chunk_offsets[0],
            lut.len(),
            group_size
        );
        Ok(self.encoder.descriptor(lut_offset, lut.len() as u64))
    }
}

/// `<name>~` next to `path`.
pub fn temporary_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push("~");
    path.with_file_name(name)
}

/// Write `values` (shape `dims`) as a single-array file at `path`.
///
/// The array is the root variable. Data goes to a temporary sibling that is
/// synced and renamed over `path`, so readers never observe a partial file.
#[allow(clippy::too_many_arguments)]
pub fn write_whole_file<T: ArrayElement>(
    path: impl AsRef<Path>,
    dims: &[u64],
    chunks: &[u64],
    compression: CompressionKind,
    scale_factor: f32,
    add_offset: f32,
    values: &[T],
    overwrite: bool,
) -> Result<()> {
    write_whole_file_with(
        path,
        dims,
        chunks,
        compression,
        scale_factor,
        add_offset,
        values,
        overwrite,
        WriterOptions::default(),
    )
}

/// [`write_whole_file`] with explicit writer options.
#[allow(clippy::too_many_arguments)]
pub fn write_whole_file_with<T: ArrayElement>(
    path: impl AsRef<Path>,
    dims: &[u64],
    chunks: &[u64],
    compression: CompressionKind,
    scale_factor: f32,
    add_offset: f32,
    values: &[T],
    overwrite: bool,
    options: WriterOptions,
) -> Result<()> {
    let path = path.as_ref();
    if !overwrite && path.exists() {
        return Err(OmError::FileExists(path.to_path_buf()));
    }
    // validate before creating anything on disk
    Encoder::new(
        dims.to_vec(),
        chunks.to_vec(),
        T::DATA_TYPE,
        compression,
        scale_factor,
        add_offset,
        options.lut_chunk_element_count,
    )?;

    let temporary = temporary_sibling(path);
    let mut writer = OmFileWriter::new(File::create(&temporary)?, options);
    let descriptor = {
        let mut array =
            writer.prepare_array::<T>(dims.to_vec(), chunks.to_vec(), compression, scale_factor, add_offset)?;
        let zero = vec![0u64; dims.len()];
        array.write_data(values, dims, &zero, dims)?;
        array.finalize()?
    };
    writer.write_trailer(&Variable::array("", descriptor))?;
    let size = writer.position();
    drop(writer.into_backend()?);
    fs::rename(&temporary, path)?;
    info!("wrote {} ({size} bytes)", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::HEADER_SIZE;

    fn writer() -> OmFileWriter<Vec<u8>> {
        OmFileWriter::new(Vec::new(), WriterOptions::default())
    }

    #[test]
    fn header_is_written_once() {
        let mut w = writer();
        let first = w
            .prepare_array::<f32>(vec![4], vec![2], CompressionKind::FpxXor2d, 1.0, 0.0)
            .unwrap();
        drop(first);
        let second = w
            .prepare_array::<f32>(vec![4], vec![2], CompressionKind::FpxXor2d, 1.0, 0.0)
            .unwrap();
        drop(second);
        assert_eq!(w.position(), HEADER_SIZE);
    }

    #[test]
    fn rejects_misaligned_regions() {
        let mut w = writer();
        let mut array = w
            .prepare_array::<f32>(vec![6, 6], vec![2, 3], CompressionKind::PforDelta2dInt16, 10.0, 0.0)
            .unwrap();
        let slab = vec![0f32; 36];
        // 5 rows is neither a chunk multiple nor the end of the axis
        assert!(matches!(
            array.write_data(&slab, &[6, 6], &[0, 0], &[5, 6]),
            Err(OmError::ShapeMismatch(_))
        ));
        // two chunk rows of a half-width column band are not consecutive chunks
        assert!(matches!(
            array.write_data(&slab, &[6, 6], &[0, 0], &[4, 3]),
            Err(OmError::ShapeMismatch(_))
        ));
        // wrong element count
        assert!(array.write_data(&slab[..10], &[6, 6], &[0, 0], &[2, 6]).is_err());

        array.write_data(&slab, &[6, 6], &[0, 0], &[2, 6]).unwrap();
        assert_eq!(array.next_chunk(), 2);
        // one chunk at a time is always consecutive
        array.write_data(&slab, &[6, 6], &[2, 0], &[2, 3]).unwrap();
        array.write_data(&slab, &[6, 6], &[2, 3], &[2, 3]).unwrap();
        assert_eq!(array.next_chunk(), 4);
        assert!(matches!(array.finalize(), Err(OmError::ShapeMismatch(_))));
    }

    #[test]
    fn finalize_records_lut_position() {
        let mut w = writer();
        let values: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let mut array = w
            .prepare_array::<f32>(vec![4, 5], vec![2, 2], CompressionKind::FpxXor2d, 1.0, 0.0)
            .unwrap();
        array.write_data(&values, &[4, 5], &[0, 0], &[4, 5]).unwrap();
        let descriptor = array.finalize().unwrap();
        assert_eq!(descriptor.chunk_count(), 6);
        assert!(descriptor.lut_offset > HEADER_SIZE);
        assert_eq!(w.position(), descriptor.lut_offset + descriptor.lut_size);
    }

    #[test]
    fn nan_attributes_reopen() {
        let mut w = writer();
        let values: Vec<f32> = (0..8).map(|v| v as f32 * 0.5).collect();
        let mut array = w
            .prepare_array::<f32>(vec![8], vec![4], CompressionKind::FpxXor2d, f32::NAN, 0.0)
            .unwrap();
        array.write_data(&values, &[8], &[0], &[8]).unwrap();
        let descriptor = array.finalize().unwrap();
        let root = Variable::array("", descriptor)
            .with_children(vec![Variable::scalar("fill_value", f32::NAN)]);
        w.write_trailer(&root).unwrap();

        let reader = crate::reader::OmFileReader::open(w.into_backend().unwrap()).unwrap();
        assert!(reader.root().as_array().unwrap().scale_factor.is_nan());
        assert!(matches!(
            reader.variable("fill_value").and_then(Variable::as_scalar),
            Some(crate::metadata::ScalarValue::Float(v)) if v.is_nan()
        ));
        assert_eq!(reader.array::<f32>(reader.root()).unwrap().read(&[0..8]).unwrap(), values);
    }

    #[test]
    fn temporary_sibling_appends_tilde() {
        assert_eq!(
            temporary_sibling(Path::new("/data/t2m.om")),
            PathBuf::from("/data/t2m.om~")
        );
    }
}
