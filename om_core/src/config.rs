use serde::{Deserialize, Serialize};

use crate::format::DEFAULT_LUT_CHUNK_ELEMENT_COUNT;

/// Thresholds for merging nearby byte-range reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoLimits {
    /// Two ranges are merged when the gap between them is at most this many bytes.
    pub io_size_merge: u64,
    /// A merged range never grows beyond this many bytes. A single range
    /// larger than the cap is still read on its own.
    pub io_size_max: u64,
}

impl Default for IoLimits {
    fn default() -> Self {
        Self {
            io_size_merge: 512,
            io_size_max: 65536,
        }
    }
}

impl IoLimits {
    /// No merging at all: one read per LUT group and per chunk.
    pub fn unmerged() -> Self {
        Self {
            io_size_merge: 0,
            io_size_max: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// Bytes buffered before handing them to the backend.
    pub buffer_capacity: usize,
    /// Force a durability sync after this many flushed bytes.
    pub sync_every_bytes: Option<u64>,
    /// LUT entries compressed together in one group.
    pub lut_chunk_element_count: u64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            buffer_capacity: 256 * 1024,
            sync_every_bytes: None,
            lut_chunk_element_count: DEFAULT_LUT_CHUNK_ELEMENT_COUNT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let options: WriterOptions = serde_json::from_str(r#"{"lut_chunk_element_count": 16}"#).unwrap();
        assert_eq!(options.lut_chunk_element_count, 16);
        assert_eq!(options.buffer_capacity, WriterOptions::default().buffer_capacity);

        let limits: IoLimits = serde_json::from_str("{}").unwrap();
        assert_eq!(limits, IoLimits::default());
    }
}
