//! Fixed-width encoding for keys and values stored in node blocks.
//!
//! Every entry in a node block occupies the same number of bytes, which is
//! what lets the fan-out be computed from the block size alone.

use std::fmt::Debug;

/// A type with a fixed-width block encoding.
///
/// # Invariants
/// - `encode` writes exactly `ENCODED_LEN` bytes at the start of `out`
/// - `decode(encode(x)) == x`
pub trait BlockCodec: Sized {
    /// Number of bytes one encoded value occupies.
    const ENCODED_LEN: usize;

    /// Encode into the first `ENCODED_LEN` bytes of `out`.
    fn encode(&self, out: &mut [u8]);

    /// Decode from the first `ENCODED_LEN` bytes of `bytes`.
    fn decode(bytes: &[u8]) -> Self;
}

/// Types usable as tree keys.
pub trait Key: BlockCodec + Ord + Clone + Debug + Send + Sync + 'static {}

impl<T> Key for T where T: BlockCodec + Ord + Clone + Debug + Send + Sync + 'static {}

/// Types usable as tree values.
pub trait Value: BlockCodec + Clone + Debug + Send + Sync + 'static {}

impl<T> Value for T where T: BlockCodec + Clone + Debug + Send + Sync + 'static {}

macro_rules! impl_block_codec_for_int {
    ($($t:ty),* $(,)?) => {
        $(
            impl BlockCodec for $t {
                const ENCODED_LEN: usize = std::mem::size_of::<$t>();

                fn encode(&self, out: &mut [u8]) {
                    out[..Self::ENCODED_LEN].copy_from_slice(&self.to_le_bytes());
                }

                fn decode(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(&bytes[..Self::ENCODED_LEN]);
                    <$t>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_block_codec_for_int!(u8, u16, u32, u64, u128, i8, i16, i32, i64, i128);

impl<const N: usize> BlockCodec for [u8; N] {
    const ENCODED_LEN: usize = N;

    fn encode(&self, out: &mut [u8]) {
        out[..N].copy_from_slice(self);
    }

    fn decode(bytes: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(&bytes[..N]);
        raw
    }
}
