//! Block compressors for OM chunk payloads.
//!
//! Every codec here turns a slice of fixed-width integers into a byte block
//! and back. Blocks do not record their element count: the caller knows the
//! chunk shape and passes an output slice of exactly the right length.

mod bitpack;
mod lut_pack;
mod pfor;
mod xor;

pub use bitpack::{max_packed_bytes, pack, unpack, PackWord, FRAME_LEN};
pub use lut_pack::LutPack64;
pub use pfor::PforDelta16;
pub use xor::{XorPack32, XorPack64};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("compressed block truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("invalid bit width {width} for {max}-bit values")]
    InvalidWidth { width: u32, max: u32 },

    #[error("output buffer too small: need {needed} bytes, have {available}")]
    OutputTooSmall { needed: usize, available: usize },
}

/// Published worst-case output size for `len` words of type `W`:
/// `(len / 256 + len + 32) * size_of::<W>()` bytes.
pub const fn max_compressed_bytes<W>(len: usize) -> usize {
    (len / 256 + len + 32) * std::mem::size_of::<W>()
}

/// Core compression abstraction for one chunk's integer payload.
///
/// Implementations must be stateless across blocks: any block can be
/// decompressed without touching its neighbours. This is what makes random
/// access into an OM file possible.
pub trait BlockCodec: Send + Sync {
    type Word: PackWord;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Upper bound for [`compress`](Self::compress) output, used to size
    /// buffers before compressing.
    fn max_compressed_bytes(&self, len: usize) -> usize {
        max_compressed_bytes::<Self::Word>(len)
    }

    /// Compress `values` into `out`, returning the number of bytes written.
    fn compress(&self, values: &[Self::Word], out: &mut [u8]) -> Result<usize, CodecError>;

    /// Fill `out` from `input`, returning the number of bytes consumed.
    fn decompress(&self, input: &[u8], out: &mut [Self::Word]) -> Result<usize, CodecError>;
}
