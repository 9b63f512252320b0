//! DHT participant identifiers, living in the same 160-bit space as
//! `InfoHash`. Distance, bucket placement, and random generation are all
//! defined here so the routing table never touches raw bytes directly.
use rand::RngCore;
use std::fmt;

pub const LEN: usize = 20;
pub const BITS: u32 = (LEN as u32) * 8;

/// A 20-byte Kademlia node identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId([u8; LEN]);

impl NodeId {
    pub fn from_bytes(bytes: [u8; LEN]) -> Self {
        NodeId(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; LEN] {
        &self.0
    }

    /// Cryptographically-sourced random id, uniform over 2^160, so that the
    /// DHT cannot be trivially Sybil-attacked by predicting node ids.
    pub fn random() -> Self {
        let mut bytes = [0u8; LEN];
        rand::rng().fill_bytes(&mut bytes);
        NodeId(bytes)
    }

    /// `a XOR b`, the Kademlia distance metric.
    pub fn distance(&self, other: &NodeId) -> [u8; LEN] {
        let mut out = [0u8; LEN];
        for i in 0..LEN {
            out[i] = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Number of leading zero bits in a 160-bit distance value, 0..=160.
    pub fn leading_zero_bits(distance: &[u8; LEN]) -> u32 {
        for (i, &byte) in distance.iter().enumerate() {
            if byte != 0 {
                return (i as u32) * 8 + byte.leading_zeros();
            }
        }
        BITS
    }

    /// Maps a distance to one of 160 routing-table buckets. Distance 0 (an
    /// id that equals the local id) maps to bucket 0 by convention; larger
    /// XOR distances map to higher bucket indices.
    pub fn bucket_index(distance: &[u8; LEN]) -> usize {
        let lz = Self::leading_zero_bits(distance);
        if lz >= BITS {
            0
        } else {
            (BITS - 1 - lz) as usize
        }
    }

    /// Produces a random id whose bucket index relative to `local_id` is
    /// exactly `idx`: copies `local_id`'s prefix up to bit `BITS-1-idx`,
    /// flips the next bit, and randomizes the remainder.
    pub fn random_in_bucket(local_id: &NodeId, idx: usize) -> NodeId {
        assert!(idx < BITS as usize, "bucket index out of range");
        let flip_bit = BITS as usize - 1 - idx;
        let mut out = local_id.0;
        let mut rng = rand::rng();
        let flip_byte = flip_bit / 8;
        let flip_bit_in_byte = 7 - (flip_bit % 8);

        // Flip the bit that decides this bucket.
        out[flip_byte] ^= 1 << flip_bit_in_byte;

        // Randomize every bit after the flipped one.
        for byte_idx in flip_byte..LEN {
            let mut mask: u8 = 0;
            let start_bit = if byte_idx == flip_byte {
                flip_bit_in_byte
            } else {
                8
            };
            for bit in 0..start_bit {
                mask |= 1 << bit;
            }
            if mask == 0 {
                continue;
            }
            let mut random_byte = [0u8; 1];
            rng.fill_bytes(&mut random_byte);
            out[byte_idx] = (out[byte_idx] & !mask) | (random_byte[0] & mask);
        }
        NodeId(out)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_reflexive_zero() {
        let a = NodeId::random();
        assert_eq!(a.distance(&a), [0u8; LEN]);
    }

    #[test]
    fn distance_is_symmetric() {
        let a = NodeId::random();
        let b = NodeId::random();
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_xor_is_transitive() {
        let a = NodeId::random();
        let b = NodeId::random();
        let c = NodeId::random();
        let ab = a.distance(&b);
        let bc = b.distance(&c);
        let ac = a.distance(&c);
        let mut xored = [0u8; LEN];
        for i in 0..LEN {
            xored[i] = ab[i] ^ bc[i];
        }
        assert_eq!(xored, ac);
    }

    #[test]
    fn leading_zero_bits_of_zero_distance_is_all_bits() {
        assert_eq!(NodeId::leading_zero_bits(&[0u8; LEN]), BITS);
    }

    #[test]
    fn bucket_index_of_zero_distance_is_zero() {
        assert_eq!(NodeId::bucket_index(&[0u8; LEN]), 0);
    }

    #[test]
    fn bucket_index_of_max_distance_is_top_bucket() {
        assert_eq!(NodeId::bucket_index(&[0xff; LEN]), BITS as usize - 1);
    }

    #[test]
    fn random_in_bucket_lands_in_requested_bucket() {
        let local = NodeId::random();
        for idx in [0usize, 1, 63, 100, 158] {
            let candidate = NodeId::random_in_bucket(&local, idx);
            let d = local.distance(&candidate);
            assert_eq!(NodeId::bucket_index(&d), idx, "bucket mismatch for idx {idx}");
        }
    }
}
