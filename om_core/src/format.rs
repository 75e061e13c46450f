use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{OmError, Result};

/// First two bytes of every OM file, both generations.
pub const MAGIC: &[u8; 2] = b"OM";

/// Fixed-header generations: 1 has no compression byte, 2 adds it.
pub const LEGACY_VERSION_1: u8 = 1;
pub const LEGACY_VERSION_2: u8 = 2;

/// Current generation: N-dimensional arrays described by a metadata tree.
pub const VERSION: u8 = 3;

/// Size of the legacy fixed header in bytes.
///   magic[2] + version:u8 + compression:u8 + scale_factor:f32
///   + dim0:u64 + dim1:u64 + chunk0:u64 + chunk1:u64
///   = 2 + 1 + 1 + 4 + 32 = 40
pub const LEGACY_HEADER_SIZE: u64 = 40;

/// Size of the current-generation header (`magic + version`).
pub const HEADER_SIZE: u64 = 3;

/// Trailer: u64 LE byte length of the metadata document.
pub const TRAILER_SIZE: u64 = 8;

/// Zero bytes appended after legacy chunk data.
pub const LEGACY_PADDING: u64 = 256;

/// Default number of LUT entries compressed together.
pub const DEFAULT_LUT_CHUNK_ELEMENT_COUNT: u64 = 256;

// ── Compression kinds ─────────────────────────────────────────────────────

/// How chunk values are transformed and packed. The numeric id is stored in
/// legacy headers; the snake_case name is stored in the metadata document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionKind {
    /// Linear 16-bit quantization, 2D delta, zig-zag bit packing.
    PforDelta2dInt16,
    /// Lossless XOR of float bit patterns, bit packing.
    FpxXor2d,
    /// Like `PforDelta2dInt16` applied to `log10(1 + v)`.
    PforDelta2dInt16Logarithmic,
}

impl CompressionKind {
    pub fn id(self) -> u8 {
        match self {
            CompressionKind::PforDelta2dInt16 => 0,
            CompressionKind::FpxXor2d => 1,
            CompressionKind::PforDelta2dInt16Logarithmic => 3,
        }
    }

    pub fn from_id(id: u8) -> Result<Self> {
        match id {
            0 => Ok(CompressionKind::PforDelta2dInt16),
            1 => Ok(CompressionKind::FpxXor2d),
            3 => Ok(CompressionKind::PforDelta2dInt16Logarithmic),
            other => Err(OmError::UnknownCompression(other)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            CompressionKind::PforDelta2dInt16 => "pfor_delta2d_int16",
            CompressionKind::FpxXor2d => "fpx_xor2d",
            CompressionKind::PforDelta2dInt16Logarithmic => "pfor_delta2d_int16_logarithmic",
        }
    }

    /// Whether values are quantized to 16 bits (and thus lossy).
    pub fn is_quantized(self) -> bool {
        !matches!(self, CompressionKind::FpxXor2d)
    }
}

impl fmt::Display for CompressionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionKind {
    type Err = OmError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pfor_delta2d_int16" | "int16" | "linear" => Ok(CompressionKind::PforDelta2dInt16),
            "fpx_xor2d" | "xor" | "lossless" => Ok(CompressionKind::FpxXor2d),
            "pfor_delta2d_int16_logarithmic" | "log" | "logarithmic" => {
                Ok(CompressionKind::PforDelta2dInt16Logarithmic)
            }
            other => Err(OmError::UnknownCompressionName(other.to_string())),
        }
    }
}

// ── Data types ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float,
    Double,
    String,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int8 => "int8",
            DataType::Uint8 => "uint8",
            DataType::Int16 => "int16",
            DataType::Uint16 => "uint16",
            DataType::Int32 => "int32",
            DataType::Uint32 => "uint32",
            DataType::Int64 => "int64",
            DataType::Uint64 => "uint64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::String => "string",
        };
        f.write_str(name)
    }
}

// ── Legacy header ─────────────────────────────────────────────────────────

/// Decoded representation of the 40-byte legacy (2-D) header.
#[derive(Debug, Clone, PartialEq)]
pub struct LegacyHeader {
    pub version: u8,
    pub compression: CompressionKind,
    pub scale_factor: f32,
    pub dims: [u64; 2],
    pub chunks: [u64; 2],
}

impl LegacyHeader {
    /// Serialize to exactly `LEGACY_HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; LEGACY_HEADER_SIZE as usize] {
        let mut buf = [0u8; LEGACY_HEADER_SIZE as usize];
        buf[..2].copy_from_slice(MAGIC);
        buf[2] = self.version;
        buf[3] = self.compression.id();
        buf[4..8].copy_from_slice(&self.scale_factor.to_le_bytes());
        buf[8..16].copy_from_slice(&self.dims[0].to_le_bytes());
        buf[16..24].copy_from_slice(&self.dims[1].to_le_bytes());
        buf[24..32].copy_from_slice(&self.chunks[0].to_le_bytes());
        buf[32..40].copy_from_slice(&self.chunks[1].to_le_bytes());
        buf
    }

    /// Deserialize from `LEGACY_HEADER_SIZE` bytes, checking magic and version.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() < 3 || &buf[..2] != MAGIC {
            return Err(OmError::NotAnOmFile);
        }
        let version = buf[2];
        if version != LEGACY_VERSION_1 && version != LEGACY_VERSION_2 {
            return Err(OmError::UnsupportedVersion(version));
        }
        if buf.len() < LEGACY_HEADER_SIZE as usize {
            return Err(OmError::Corrupt(format!(
                "legacy header needs {LEGACY_HEADER_SIZE} bytes, file has {}",
                buf.len()
            )));
        }
        let compression = if version == LEGACY_VERSION_1 {
            CompressionKind::PforDelta2dInt16
        } else {
            CompressionKind::from_id(buf[3])?
        };
        Ok(Self {
            version,
            compression,
            scale_factor: f32::from_le_bytes(le_array(&buf[4..8])),
            dims: [
                u64::from_le_bytes(le_array(&buf[8..16])),
                u64::from_le_bytes(le_array(&buf[16..24])),
            ],
            chunks: [
                u64::from_le_bytes(le_array(&buf[24..32])),
                u64::from_le_bytes(le_array(&buf[32..40])),
            ],
        })
    }
}

/// Copy a slice of known length into a fixed array.
pub(crate) fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}
