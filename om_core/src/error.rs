use std::ops::Range;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::{CompressionKind, DataType};

pub type Result<T> = std::result::Result<T, OmError>;

#[derive(Debug, Error)]
pub enum OmError {
    #[error("invalid dimensions: {0}")]
    InvalidDimensions(String),

    #[error("compression {compression} cannot store {data_type} arrays")]
    UnsupportedCompression {
        data_type: DataType,
        compression: CompressionKind,
    },

    #[error("unknown compression id {0}")]
    UnknownCompression(u8),

    #[error("unknown compression '{0}', expected int16, log or xor")]
    UnknownCompressionName(String),

    #[error("data type mismatch: array holds {found}, caller asked for {expected}")]
    DataTypeMismatch { expected: DataType, found: DataType },

    #[error("not an OM file: magic bytes missing")]
    NotAnOmFile,

    #[error("unsupported OM file version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed metadata document: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("variable '{0}' does not hold an array")]
    NotAnArray(String),

    #[error("corrupt OM file: {0}")]
    Corrupt(String),

    #[error("read range {range:?} on axis {axis} exceeds dimension {dim}")]
    OutOfRange {
        axis: usize,
        range: Range<u64>,
        dim: u64,
    },

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("file {0:?} already exists")]
    FileExists(PathBuf),

    #[error("codec error: {0}")]
    Codec(#[from] om_codecs::CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
