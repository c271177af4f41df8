use rand::{
    distributions::{Distribution, Standard},
    Rng,
};
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::{
    cmp::Ordering,
    convert::{TryFrom, TryInto},
    fmt,
    ops::BitXor,
};
use thiserror::Error;

/// Length of a `NodeId` in bytes.
pub const ID_LEN: usize = 20;

/// 160-bit identifier of nodes and keys on the DHT.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct NodeId(#[serde(with = "byte_array")] [u8; ID_LEN]);

/// Keys live in the same id space as nodes.
pub type Key = NodeId;

impl NodeId {
    /// Create an id by hashing the given bytes using SHA-1.
    pub fn sha1(bytes: &[u8]) -> Self {
        let hash = Sha1::digest(bytes);
        Self(hash.into())
    }

    /// XOR distance between `self` and `other`. The result compares as an unsigned big-endian
    /// integer, so smaller means closer.
    pub fn distance(&self, other: &NodeId) -> NodeId {
        *self ^ *other
    }

    /// Compare `a` and `b` by their distance to `self`.
    pub fn cmp_distance(&self, a: &NodeId, b: &NodeId) -> Ordering {
        self.distance(a).cmp(&self.distance(b))
    }

    /// Flip the bit at the given index.
    ///
    /// # Panics
    ///
    /// Panics if index is out of bounds (>= 160)
    pub fn flip_bit(self, index: usize) -> Self {
        let mut bytes = self.0;
        let (byte_index, bit_index) = (index / 8, index % 8);

        let actual_bit_index = 7 - bit_index;
        bytes[byte_index] ^= 1 << actual_bit_index;

        bytes.into()
    }

    /// Number of leading zero bits.
    pub fn leading_zeros(&self) -> u32 {
        let mut bits = 0;

        for byte in self.0 {
            bits += byte.leading_zeros();

            if byte != 0 {
                break;
            }
        }

        bits
    }
}

impl AsRef<[u8]> for NodeId {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<NodeId> for [u8; ID_LEN] {
    fn from(id: NodeId) -> [u8; ID_LEN] {
        id.0
    }
}

impl From<[u8; ID_LEN]> for NodeId {
    fn from(bytes: [u8; ID_LEN]) -> NodeId {
        Self(bytes)
    }
}

#[derive(Debug, Error)]
#[error("invalid id length")]
pub struct LengthError;

impl<'a> TryFrom<&'a [u8]> for NodeId {
    type Error = LengthError;

    fn try_from(slice: &'a [u8]) -> Result<Self, Self::Error> {
        Ok(Self(slice.try_into().map_err(|_| LengthError)?))
    }
}

impl BitXor for NodeId {
    type Output = Self;

    fn bitxor(mut self, rhs: Self) -> Self {
        for (src, dst) in rhs.0.iter().zip(self.0.iter_mut()) {
            *dst ^= *src;
        }

        self
    }
}

impl Distribution<NodeId> for Standard {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> NodeId {
        NodeId(rng.gen())
    }
}

impl fmt::LowerHex for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{b:02x}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:x}")
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:x}")
    }
}

mod byte_array {
    use super::ID_LEN;
    use serde::{
        de::{Deserialize, Deserializer, Error},
        ser::{Serialize, Serializer},
    };
    use serde_bytes::{ByteBuf, Bytes};
    use std::convert::TryInto;

    pub(super) fn serialize<S: Serializer>(bytes: &[u8; ID_LEN], s: S) -> Result<S::Ok, S::Error> {
        Bytes::new(bytes.as_ref()).serialize(s)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; ID_LEN], D::Error> {
        let buf = ByteBuf::deserialize(d)?;
        let buf = buf.into_vec();
        let len = buf.len();

        buf.try_into().map_err(|_| {
            let expected = format!("{ID_LEN}");
            D::Error::invalid_length(len, &expected.as_ref())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positive_no_leading_zeroes() {
        let zero_bits = NodeId::from([0u8; ID_LEN]);
        let one_bits = NodeId::from([255u8; ID_LEN]);

        let xor_hash = zero_bits ^ one_bits;

        assert_eq!(xor_hash.leading_zeros(), 0)
    }

    #[test]
    fn positive_all_leading_zeroes() {
        let first_one_bits = NodeId::from([255u8; ID_LEN]);
        let second_one_bits = NodeId::from([255u8; ID_LEN]);

        let xor_hash = first_one_bits ^ second_one_bits;

        assert_eq!(xor_hash.leading_zeros() as usize, ID_LEN * 8);
    }

    #[test]
    fn positive_one_leading_zero() {
        let zero_bits = NodeId::from([0u8; ID_LEN]);

        let mut bytes = [255u8; ID_LEN];
        bytes[0] = 127;
        let mostly_one_bits = NodeId::from(bytes);

        let xor_hash = zero_bits ^ mostly_one_bits;

        assert_eq!(xor_hash.leading_zeros(), 1);
    }

    #[test]
    fn distance_to_self_is_zero() {
        let id: NodeId = rand::random();

        assert_eq!(id.distance(&id), NodeId::from([0u8; ID_LEN]));
    }

    #[test]
    fn distance_is_symmetric() {
        let a: NodeId = rand::random();
        let b: NodeId = rand::random();

        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn cmp_distance_prefers_shared_prefix() {
        let target = NodeId::from([0u8; ID_LEN]);

        let mut near = [0u8; ID_LEN];
        near[ID_LEN - 1] = 0xff;
        let mut far = [0u8; ID_LEN];
        far[0] = 0x01;

        assert_eq!(
            target.cmp_distance(&near.into(), &far.into()),
            Ordering::Less
        );
        assert_eq!(
            target.cmp_distance(&far.into(), &near.into()),
            Ordering::Greater
        );
    }

    #[test]
    fn try_from_wrong_length_fails() {
        assert!(NodeId::try_from(&[1u8; 19][..]).is_err());
        assert!(NodeId::try_from(&[1u8; ID_LEN][..]).is_ok());
    }

    #[test]
    fn lower_hex_formatting() {
        let mut bytes = [0u8; ID_LEN];
        bytes[0] = 0xab;
        bytes[ID_LEN - 1] = 0x01;

        let formatted = format!("{:x}", NodeId::from(bytes));

        assert_eq!(formatted.len(), ID_LEN * 2);
        assert!(formatted.starts_with("ab00"));
        assert!(formatted.ends_with("0001"));
    }
}
