use crate::bitpack::{pack, unpack};
use crate::{BlockCodec, CodecError};

/// Lossy-path codec for 16-bit quantized, delta-coded chunks.
///
/// The delta step itself happens before this codec sees the data; here each
/// difference is zig-zag mapped and bit packed, so rows that barely change
/// collapse to a few bits per value.
#[derive(Debug, Default, Clone, Copy)]
pub struct PforDelta16;

impl BlockCodec for PforDelta16 {
    type Word = i16;

    fn name(&self) -> &'static str {
        "pfor_delta16"
    }

    fn compress(&self, values: &[i16], out: &mut [u8]) -> Result<usize, CodecError> {
        pack(values, out)
    }

    fn decompress(&self, input: &[u8], out: &mut [i16]) -> Result<usize, CodecError> {
        unpack(input, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bound_holds_for_worst_case_input() {
        let codec = PforDelta16;
        let values: Vec<i16> = (0..1000).map(|i| if i % 2 == 0 { i16::MIN } else { i16::MAX }).collect();
        let mut out = vec![0u8; codec.max_compressed_bytes(values.len())];
        let n = codec.compress(&values, &mut out).unwrap();
        assert!(n <= (values.len() / 256 + values.len() + 32) * 2);

        let mut back = vec![0i16; values.len()];
        assert_eq!(codec.decompress(&out[..n], &mut back).unwrap(), n);
        assert_eq!(back, values);
    }

    #[test]
    fn smooth_deltas_compress() {
        let codec = PforDelta16;
        let values: Vec<i16> = (0..1024).map(|i| (i % 5) as i16 - 2).collect();
        let mut out = vec![0u8; codec.max_compressed_bytes(values.len())];
        let n = codec.compress(&values, &mut out).unwrap();
        // 3 bits per value plus one width byte per frame
        assert_eq!(n, 8 + 1024 * 3 / 8);
    }
}
