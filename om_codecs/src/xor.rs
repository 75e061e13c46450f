use crate::bitpack::{pack, unpack};
use crate::{BlockCodec, CodecError};

/// Lossless codec for XOR-coded `f32` bit patterns.
///
/// Neighbouring floats share sign, exponent and the high mantissa bits, so
/// after the XOR step most words have many leading zeros.
#[derive(Debug, Default, Clone, Copy)]
pub struct XorPack32;

impl BlockCodec for XorPack32 {
    type Word = u32;

    fn name(&self) -> &'static str {
        "xor_pack32"
    }

    fn compress(&self, values: &[u32], out: &mut [u8]) -> Result<usize, CodecError> {
        pack(values, out)
    }

    fn decompress(&self, input: &[u8], out: &mut [u32]) -> Result<usize, CodecError> {
        unpack(input, out)
    }
}

/// Same as [`XorPack32`] for `f64` bit patterns.
#[derive(Debug, Default, Clone, Copy)]
pub struct XorPack64;

impl BlockCodec for XorPack64 {
    type Word = u64;

    fn name(&self) -> &'static str {
        "xor_pack64"
    }

    fn compress(&self, values: &[u64], out: &mut [u8]) -> Result<usize, CodecError> {
        pack(values, out)
    }

    fn decompress(&self, input: &[u8], out: &mut [u64]) -> Result<usize, CodecError> {
        unpack(input, out)
    }
}
