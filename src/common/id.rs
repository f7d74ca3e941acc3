//! Kademlia node Id or a lookup target
use rand::Rng;
use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits.
pub const ID_BITS: usize = ID_SIZE * 8;
pub const MAX_DISTANCE: u8 = ID_BITS as u8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
pub struct Id([u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id> {
        let bytes = bytes.as_ref();
        let array: [u8; ID_SIZE] = bytes.try_into().map_err(|_| {
            Error::Malformed(format!(
                "invalid Id size, expected {ID_SIZE} bytes, got {}",
                bytes.len()
            ))
        })?;

        Ok(Id(array))
    }

    /// Derive an Id from arbitrary content, used to name values in the DHT.
    pub fn hash(content: &[u8]) -> Id {
        Id(sha1_smol::Sha1::from(content).digest().bytes())
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// XOR metric between this Id and another, interpreted as a big endian
    /// unsigned integer by the derived [Ord].
    pub fn xor(&self, other: &Id) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, (a, b)) in self.0.iter().zip(other.0.iter()).enumerate() {
            result[i] = a ^ b;
        }

        Id(result)
    }

    /// Simplified XOR distance between this Id and a target Id.
    ///
    /// The distance is the number of trailing non zero bits in the XOR result.
    ///
    /// Distance to self is 0
    /// Distance to the furthest Id is 160
    /// Distance to an Id with 5 leading matching bits is 155
    pub fn distance(&self, other: &Id) -> u8 {
        for i in 0..ID_SIZE {
            let a = self.0[i];
            let b = other.0[i];

            if a != b {
                // leading zeros so far + leading zeros of this byte
                let leading_zeros = (i as u32 * 8 + (a ^ b).leading_zeros()) as u8;

                return MAX_DISTANCE - leading_zeros;
            }
        }

        0
    }

    /// Value of the bit at `index`, counting from the most significant bit.
    pub fn bit(&self, index: usize) -> bool {
        self.0[index / 8] & (0x80 >> (index % 8)) != 0
    }

    /// Returns a copy of this Id with the bit at `index` set to `value`.
    pub fn with_bit(mut self, index: usize, value: bool) -> Id {
        let mask = 0x80 >> (index % 8);

        if value {
            self.0[index / 8] |= mask;
        } else {
            self.0[index / 8] &= !mask;
        }

        self
    }

    /// Returns a copy of this Id keeping only the first `depth` bits,
    /// every following bit is zeroed.
    pub fn truncate(&self, depth: usize) -> Id {
        let mut result = [0_u8; ID_SIZE];

        for (i, byte) in result.iter_mut().enumerate() {
            let start = i * 8;
            if start + 8 <= depth {
                *byte = self.0[i];
            } else if start < depth {
                *byte = self.0[i] & (0xff_u8 << (8 - (depth - start)));
            }
        }

        Id(result)
    }

    /// Returns `true` if the first `depth` bits of both Ids are equal.
    pub fn shares_prefix(&self, other: &Id, depth: usize) -> bool {
        self.truncate(depth) == other.truncate(depth)
    }

    /// A random Id sharing the first `depth` bits with `prefix`.
    pub fn random_with_prefix(prefix: &Id, depth: usize) -> Id {
        let random = Id::random();
        let mut result = prefix.truncate(depth);

        for index in depth..ID_BITS {
            result = result.with_bit(index, random.bit(index));
        }

        result
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl FromStr for Id {
    type Err = Error;

    /// Parse an Id from its 40 characters hex encoding.
    fn from_str(s: &str) -> Result<Id> {
        if s.len() != ID_SIZE * 2 || !s.is_ascii() {
            return Err(Error::Malformed(format!(
                "expected {} hex characters, got {:?}",
                ID_SIZE * 2,
                s
            )));
        }

        let mut bytes = [0_u8; ID_SIZE];

        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|error| Error::Malformed(format!("invalid hex Id {s:?}: {error}")))?;
        }

        Ok(Id(bytes))
    }
}

impl From<[u8; ID_SIZE]> for Id {
    fn from(bytes: [u8; ID_SIZE]) -> Self {
        Id(bytes)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }

        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({self})")
    }
}
