//! Chunk names and the bit-slicing helpers derived from them (spec section 3).

use std::fmt;

use crate::geometry::{Geometry, CHUNK_NAME_SIZE};

/// A fixed-width, opaque, cryptographically-derived chunk name. Compared by
/// byte equality only, as the spec requires.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkName(pub [u8; CHUNK_NAME_SIZE]);

impl ChunkName {
    pub fn new(bytes: [u8; CHUNK_NAME_SIZE]) -> Self {
        ChunkName(bytes)
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }

    /// Which zone shard owns this name, out of `zone_count` zones.
    pub fn zone_selector(self, zone_count: u32) -> u32 {
        let tail = u32::from_be_bytes([self.0[28], self.0[29], self.0[30], self.0[31]]);
        tail % zone_count
    }

    /// A coarse (lossy) hash used to place the name into a delta-list-like
    /// slot within a shard. Two distinct names landing on the same slot is
    /// exactly the "collision" event described in spec section 4.1.
    pub fn coarse_slot(self, num_slots: u32) -> u32 {
        fnv1a(&self.0) % num_slots
    }

    /// Hook/sample predicate: selects names eligible for sparse retention.
    pub fn is_sample(self, geometry: &Geometry) -> bool {
        let head = u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]);
        head % geometry.sample_rate == 0
    }
}

impl fmt::Debug for ChunkName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkName({})", self.to_hex())
    }
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(last: u8) -> ChunkName {
        let mut bytes = [0u8; CHUNK_NAME_SIZE];
        bytes[31] = last;
        ChunkName::new(bytes)
    }

    #[test]
    fn zone_selector_is_stable() {
        let n = name(7);
        assert_eq!(n.zone_selector(4), n.zone_selector(4));
    }

    #[test]
    fn distinct_names_compare_unequal() {
        assert_ne!(name(1), name(2));
        assert_eq!(name(1), name(1));
    }
}
