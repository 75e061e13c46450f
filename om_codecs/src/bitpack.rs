use crate::CodecError;

/// Number of values sharing one bit width.
pub const FRAME_LEN: usize = 128;

/// Fixed-width integer that can be bit packed.
///
/// `to_packed` must map into the low `BITS` bits of a `u64`, and
/// `from_packed` must invert it exactly. Signed words use zig-zag so that
/// small negative deltas stay narrow.
pub trait PackWord: Copy + Default + Send + Sync + 'static {
    const BITS: u32;
    fn to_packed(self) -> u64;
    fn from_packed(v: u64) -> Self;
}

macro_rules! unsigned_word {
    ($t:ty) => {
        impl PackWord for $t {
            const BITS: u32 = <$t>::BITS;

            #[inline]
            fn to_packed(self) -> u64 {
                self as u64
            }

            #[inline]
            fn from_packed(v: u64) -> Self {
                v as $t
            }
        }
    };
}

unsigned_word!(u16);
unsigned_word!(u32);
unsigned_word!(u64);

impl PackWord for i16 {
    const BITS: u32 = 16;

    #[inline]
    fn to_packed(self) -> u64 {
        (((self << 1) ^ (self >> 15)) as u16) as u64
    }

    #[inline]
    fn from_packed(v: u64) -> Self {
        let z = v as u16;
        ((z >> 1) as i16) ^ -((z & 1) as i16)
    }
}

/// Bytes occupied by `count` values packed at `width` bits.
#[inline]
pub fn packed_len(count: usize, width: u32) -> usize {
    (count * width as usize).div_ceil(8)
}

/// Exact worst case of [`pack`]: one width byte per frame plus full-width values.
pub fn max_packed_bytes<W: PackWord>(count: usize) -> usize {
    count.div_ceil(FRAME_LEN) + count * (W::BITS as usize / 8)
}

/// Pack `values` into `out`, returning the number of bytes written.
///
/// Layout per frame: `[width: u8][ceil(m * width / 8) bytes, LSB first]`.
/// `out` must hold at least [`max_packed_bytes`] bytes.
pub fn pack<W: PackWord>(values: &[W], out: &mut [u8]) -> Result<usize, CodecError> {
    let needed = max_packed_bytes::<W>(values.len());
    if out.len() < needed {
        return Err(CodecError::OutputTooSmall {
            needed,
            available: out.len(),
        });
    }
    let mut pos = 0;
    for frame in values.chunks(FRAME_LEN) {
        let width = frame
            .iter()
            .map(|v| 64 - v.to_packed().leading_zeros())
            .max()
            .unwrap_or(0);
        out[pos] = width as u8;
        pos += 1;
        pos += pack_frame(frame, width, &mut out[pos..]);
    }
    Ok(pos)
}

fn pack_frame<W: PackWord>(frame: &[W], width: u32, out: &mut [u8]) -> usize {
    if width == 0 {
        return 0;
    }
    // at most 7 pending bits plus one 64-bit value
    let mut acc: u128 = 0;
    let mut bits = 0u32;
    let mut pos = 0;
    for v in frame {
        acc |= (v.to_packed() as u128) << bits;
        bits += width;
        while bits >= 8 {
            out[pos] = acc as u8;
            acc >>= 8;
            bits -= 8;
            pos += 1;
        }
    }
    if bits > 0 {
        out[pos] = acc as u8;
        pos += 1;
    }
    pos
}

/// Unpack exactly `out.len()` values from `input`.
///
/// Returns the number of input bytes consumed. Trailing bytes after the last
/// frame are ignored, which lets callers hand in padded regions.
pub fn unpack<W: PackWord>(input: &[u8], out: &mut [W]) -> Result<usize, CodecError> {
    let mut pos = 0;
    for frame in out.chunks_mut(FRAME_LEN) {
        let width = *input.get(pos).ok_or(CodecError::Truncated {
            needed: pos + 1,
            available: input.len(),
        })? as u32;
        if width > W::BITS {
            return Err(CodecError::InvalidWidth {
                width,
                max: W::BITS,
            });
        }
        pos += 1;
        let len = packed_len(frame.len(), width);
        let bytes = input.get(pos..pos + len).ok_or(CodecError::Truncated {
            needed: pos + len,
            available: input.len(),
        })?;
        unpack_frame(bytes, width, frame);
        pos += len;
    }
    Ok(pos)
}

fn unpack_frame<W: PackWord>(bytes: &[u8], width: u32, frame: &mut [W]) {
    if width == 0 {
        frame.fill(W::default());
        return;
    }
    let mask = (1u128 << width) - 1;
    let mut acc: u128 = 0;
    let mut bits = 0u32;
    let mut bytes = bytes.iter();
    for slot in frame.iter_mut() {
        while bits < width {
            acc |= (*bytes.next().unwrap_or(&0) as u128) << bits;
            bits += 8;
        }
        *slot = W::from_packed((acc & mask) as u64);
        acc >>= width;
        bits -= width;
    }
}
