use std::fmt;

use ahash::RandomState;

/// Width of one serialized key inside a shard file.
pub const KEY_BYTES: usize = 16;

/// 128-bit address split into two words: `high` holds groups 1..=4,
/// `low` holds groups 5..=8, both in big-endian group order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CanonicalKey {
    pub high: u64,
    pub low: u64,
}

impl CanonicalKey {
    #[inline]
    pub const fn new(high: u64, low: u64) -> Self {
        Self { high, low }
    }

    /// Fold eight hextets into the two words.
    #[inline]
    pub fn from_groups(groups: &[u16; 8]) -> Self {
        let fold = |gs: &[u16]| gs.iter().fold(0u64, |acc, &g| (acc << 16) | g as u64);
        Self {
            high: fold(&groups[..4]),
            low: fold(&groups[4..]),
        }
    }

    pub fn groups(&self) -> [u16; 8] {
        let mut out = [0u16; 8];
        for i in 0..4 {
            let shift = 48 - 16 * i as u32;
            out[i] = (self.high >> shift) as u16;
            out[i + 4] = (self.low >> shift) as u16;
        }
        out
    }

    #[inline]
    pub fn as_u128(&self) -> u128 {
        ((self.high as u128) << 64) | self.low as u128
    }

    /// Shard record layout: `high` then `low`, little-endian each.
    #[inline]
    pub fn to_bytes(&self) -> [u8; KEY_BYTES] {
        let mut buf = [0u8; KEY_BYTES];
        buf[..8].copy_from_slice(&self.high.to_le_bytes());
        buf[8..].copy_from_slice(&self.low.to_le_bytes());
        buf
    }

    #[inline]
    pub fn from_bytes(buf: &[u8; KEY_BYTES]) -> Self {
        let mut high = [0u8; 8];
        let mut low = [0u8; 8];
        high.copy_from_slice(&buf[..8]);
        low.copy_from_slice(&buf[8..]);
        Self {
            high: u64::from_le_bytes(high),
            low: u64::from_le_bytes(low),
        }
    }
}

/// Full, uncompressed lowercase form (`xxxx:xxxx:...`, 8 groups).
impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.groups();
        write!(
            f,
            "{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}:{:04x}",
            g[0], g[1], g[2], g[3], g[4], g[5], g[6], g[7]
        )
    }
}

// Fixed seeds: routing must not depend on per-process randomness.
const SHARD_SEEDS: [u64; 4] = [
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
];

#[inline]
fn shard_hasher() -> RandomState {
    RandomState::with_seeds(SHARD_SEEDS[0], SHARD_SEEDS[1], SHARD_SEEDS[2], SHARD_SEEDS[3])
}

/// Shard index for `key` among `shards` buckets. Pure in `key` and `shards`.
#[inline]
pub fn shard_of(key: &CanonicalKey, shards: usize) -> usize {
    debug_assert!(shards > 0);
    let h = shard_hasher().hash_one(key.as_u128());
    (h % shards as u64) as usize
}
