pub mod backend;
pub mod buffer;
pub mod config;
pub mod decoder;
pub mod dims;
pub mod encoder;
pub mod error;
pub mod format;
pub mod legacy;
pub mod lut;
pub mod metadata;
pub mod reader;
pub mod transform;
pub mod writer;

#[cfg(unix)]
pub use backend::CachedMmapFile;
pub use backend::{FileBackend, MmapFile, OmFileReaderBackend, OmFileWriterBackend};
pub use buffer::OmBufferedWriter;
pub use config::{IoLimits, WriterOptions};
pub use decoder::OmArrayReader;
pub use dims::{ChunkGrid, ChunkRangeCursor};
pub use encoder::Encoder;
pub use error::{OmError, Result};
pub use format::{CompressionKind, DataType, LegacyHeader, MAGIC, VERSION};
pub use legacy::write_legacy;
pub use metadata::{ArrayDescriptor, ScalarValue, Variable, VariableValue};
pub use reader::OmFileReader;
pub use transform::ArrayElement;
pub use writer::{write_whole_file, write_whole_file_with, OmArrayWriter, OmFileWriter};
