use crate::bitpack::{max_packed_bytes, pack, unpack};
use crate::{max_compressed_bytes, BlockCodec, CodecError};

/// Codec for groups of cumulative chunk offsets.
///
/// Layout: `[first: u64 LE][packed differences to the previous entry]`.
/// Offsets are non-decreasing, so the differences are compressed chunk sizes
/// and usually fit in 10 to 20 bits.
#[derive(Debug, Default, Clone, Copy)]
pub struct LutPack64;

impl BlockCodec for LutPack64 {
    type Word = u64;

    fn name(&self) -> &'static str {
        "lut_pack64"
    }

    fn max_compressed_bytes(&self, len: usize) -> usize {
        8 + max_compressed_bytes::<u64>(len)
    }

    fn compress(&self, values: &[u64], out: &mut [u8]) -> Result<usize, CodecError> {
        let Some((&first, _)) = values.split_first() else {
            return Ok(0);
        };
        let needed = 8 + max_packed_bytes::<u64>(values.len() - 1);
        if out.len() < needed {
            return Err(CodecError::OutputTooSmall {
                needed,
                available: out.len(),
            });
        }
        out[..8].copy_from_slice(&first.to_le_bytes());
        let deltas: Vec<u64> = values.windows(2).map(|w| w[1].wrapping_sub(w[0])).collect();
        Ok(8 + pack(&deltas, &mut out[8..])?)
    }

    fn decompress(&self, input: &[u8], out: &mut [u64]) -> Result<usize, CodecError> {
        let Some((first, rest)) = out.split_first_mut() else {
            return Ok(0);
        };
        let head: [u8; 8] = input
            .get(..8)
            .and_then(|b| b.try_into().ok())
            .ok_or(CodecError::Truncated {
                needed: 8,
                available: input.len(),
            })?;
        *first = u64::from_le_bytes(head);
        let consumed = unpack(&input[8..], rest)?;
        let mut previous = *first;
        for value in rest.iter_mut() {
            previous = previous.wrapping_add(*value);
            *value = previous;
        }
        Ok(8 + consumed)
    }
}
