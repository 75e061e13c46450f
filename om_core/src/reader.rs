use std::path::Path;

use log::debug;

use crate::backend::{MmapFile, OmFileReaderBackend};
use crate::config::IoLimits;
use crate::decoder::OmArrayReader;
use crate::dims::ChunkGrid;
use crate::error::{OmError, Result};
use crate::format::{
    le_array, DataType, LegacyHeader, HEADER_SIZE, LEGACY_HEADER_SIZE, LEGACY_VERSION_1,
    LEGACY_VERSION_2, MAGIC, TRAILER_SIZE, VERSION,
};
use crate::lut::LutLayout;
use crate::metadata::{ArrayDescriptor, Variable};
use crate::transform::{ensure_supported, ArrayElement};

/// Random-access reader for OM files of either generation.
///
/// # Open sequence
/// 1. Read the magic bytes and version.
/// 2. Legacy (1, 2): decode the 40-byte header and synthesize a root array
///    whose LUT is the raw offset table right after the header.
/// 3. Current (3): read the trailing `u64` document length, then parse the
///    JSON metadata tree in front of it.
///
/// Only metadata is touched here. Chunk data and LUT groups are read on
/// demand by the [`OmArrayReader`]s handed out by [`array`](Self::array).
pub struct OmFileReader<B: OmFileReaderBackend> {
    backend: B,
    version: u8,
    root: Variable,
    /// Data start of a legacy file, whose root array uses the raw LUT layout.
    legacy_data_start: Option<u64>,
    io_limits: IoLimits,
}

impl OmFileReader<MmapFile> {
    /// Memory-map `path` and open it.
    pub fn open_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::open(MmapFile::open(path)?)
    }
}

impl<B: OmFileReaderBackend> OmFileReader<B> {
    pub fn open(backend: B) -> Result<Self> {
        let len = backend.count();
        let head = backend.with_bytes(0, len.min(HEADER_SIZE), |b| b.to_vec())?;
        if head.len() < HEADER_SIZE as usize || &head[..2] != MAGIC {
            return Err(OmError::NotAnOmFile);
        }
        let version = head[2];
        let reader = match version {
            LEGACY_VERSION_1 | LEGACY_VERSION_2 => Self::open_legacy(backend, len)?,
            VERSION => Self::open_current(backend, len)?,
            other => return Err(OmError::UnsupportedVersion(other)),
        };
        debug!(
            "opened OM v{} file of {len} bytes with {} arrays",
            reader.version,
            reader.root.as_array().map_or(0, |_| 1) + reader.root.arrays().len()
        );
        Ok(reader)
    }

    fn open_legacy(backend: B, len: u64) -> Result<Self> {
        if len < LEGACY_HEADER_SIZE {
            return Err(OmError::Corrupt(format!(
                "legacy header needs {LEGACY_HEADER_SIZE} bytes, file has {len}"
            )));
        }
        let header = backend.with_bytes(0, LEGACY_HEADER_SIZE, LegacyHeader::from_bytes)??;
        let grid = ChunkGrid::new(header.dims.to_vec(), header.chunks.to_vec())
            .map_err(|e| OmError::Corrupt(e.to_string()))?;
        let chunk_count = grid.chunk_count();
        let descriptor = ArrayDescriptor {
            data_type: DataType::Float,
            compression: header.compression,
            scale_factor: header.scale_factor,
            add_offset: 0.0,
            dimensions: grid.dims().to_vec(),
            chunks: grid.chunks().to_vec(),
            dimension_names: Vec::new(),
            lut_offset: LEGACY_HEADER_SIZE,
            lut_size: chunk_count * 8,
            lut_chunk_element_count: 1,
        };
        let data_start = LEGACY_HEADER_SIZE + descriptor.lut_size;
        if data_start > len {
            return Err(OmError::Corrupt(format!(
                "offset table of {chunk_count} chunks exceeds file length {len}"
            )));
        }
        Ok(Self {
            backend,
            version: header.version,
            root: Variable::array("", descriptor),
            legacy_data_start: Some(data_start),
            io_limits: IoLimits::default(),
        })
    }

    fn open_current(backend: B, len: u64) -> Result<Self> {
        if len < HEADER_SIZE + TRAILER_SIZE {
            return Err(OmError::Corrupt(format!("file of {len} bytes has no trailer")));
        }
        let document_len = backend.with_bytes(len - TRAILER_SIZE, TRAILER_SIZE, |b| {
            u64::from_le_bytes(le_array(b))
        })?;
        let document_start = (len - TRAILER_SIZE)
            .checked_sub(document_len)
            .filter(|&start| start >= HEADER_SIZE)
            .ok_or_else(|| {
                OmError::Corrupt(format!(
                    "metadata document of {document_len} bytes does not fit in {len} bytes"
                ))
            })?;
        let root = backend.with_bytes(document_start, document_len, |b| {
            serde_json::from_slice::<Variable>(b)
        })??;
        Ok(Self {
            backend,
            version: VERSION,
            root,
            legacy_data_start: None,
            io_limits: IoLimits::default(),
        })
    }

    /// I/O merge thresholds handed to every array reader created afterwards.
    pub fn with_io_limits(mut self, io_limits: IoLimits) -> Self {
        self.io_limits = io_limits;
        self
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn is_legacy(&self) -> bool {
        self.legacy_data_start.is_some()
    }

    pub fn root(&self) -> &Variable {
        &self.root
    }

    /// Resolve a `/`-separated path from the root.
    pub fn variable(&self, path: &str) -> Option<&Variable> {
        self.root.find(path)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Reader for the array stored in `variable`, which must belong to this file.
    pub fn array<T: ArrayElement>(&self, variable: &Variable) -> Result<OmArrayReader<'_, T, B>> {
        let descriptor = variable
            .as_array()
            .ok_or_else(|| OmError::NotAnArray(variable.name.clone()))?;
        if descriptor.data_type != T::DATA_TYPE {
            return Err(OmError::DataTypeMismatch {
                expected: T::DATA_TYPE,
                found: descriptor.data_type,
            });
        }
        ensure_supported::<T>(descriptor.compression)?;
        let grid = ChunkGrid::new(descriptor.dimensions.clone(), descriptor.chunks.clone())
            .map_err(|e| OmError::Corrupt(e.to_string()))?;
        let layout = match self.legacy_data_start {
            Some(data_start) => LutLayout::Raw {
                offset: descriptor.lut_offset,
                data_start,
                chunk_count: grid.chunk_count(),
            },
            None => LutLayout::packed(descriptor)?,
        };
        Ok(OmArrayReader::new(
            &self.backend,
            descriptor.clone(),
            grid,
            layout,
            self.io_limits,
        ))
    }

    /// [`array`](Self::array) for the variable at `path`.
    pub fn array_at<T: ArrayElement>(&self, path: &str) -> Result<OmArrayReader<'_, T, B>> {
        let variable = self
            .variable(path)
            .ok_or_else(|| OmError::NotAnArray(path.to_string()))?;
        self.array(variable)
    }
}
