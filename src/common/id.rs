//! Kademlia node Id or a lookup target
use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};
use std::str::FromStr;

use crate::{Error, Result};

/// The size of node IDs in bytes.
pub const ID_SIZE: usize = 20;
/// The size of node IDs in bits, also the deepest possible k-bucket.
pub const MAX_DISTANCE: u8 = ID_SIZE as u8 * 8;

#[derive(Clone, Copy, PartialEq, Ord, PartialOrd, Eq, Hash)]
/// Kademlia node Id or a lookup target
pub struct Id(pub [u8; ID_SIZE]);

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
        if bytes.len() != ID_SIZE {
            return Err(Error::InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    /// Full XOR distance between this Id and a target Id.
    ///
    /// [Distance] is a total order; sorting peers by `id.xor(&target)`
    /// ascending sorts them from closest to furthest.
    pub fn xor(&self, other: &Id) -> Distance {
        let mut xor = [0_u8; ID_SIZE];
        for (i, byte) in xor.iter_mut().enumerate() {
            *byte = self.0[i] ^ other.0[i];
        }

        Distance(xor)
    }

    /// Simplified XOR distance between this Id and a target Id, used as the
    /// k-bucket index in the routing table.
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

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

/// The integer value of the bitwise XOR of two [Id]s, big-endian.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Distance(pub(crate) [u8; ID_SIZE]);

impl Debug for Distance {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Distance({})", hex(&self.0))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&hex(&self.0))
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Id> {
        if s.len() % 2 != 0 {
            return Err(Error::InvalidIdEncoding(s.into()));
        }

        let mut bytes = Vec::with_capacity(s.len() / 2);
        for chunk in s.as_bytes().chunks_exact(2) {
            let high = hex_value(chunk[0]).ok_or_else(|| Error::InvalidIdEncoding(s.into()))?;
            let low = hex_value(chunk[1]).ok_or_else(|| Error::InvalidIdEncoding(s.into()))?;
            bytes.push((high << 4) | low);
        }

        Id::from_bytes(bytes)
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(char::from_digit((byte >> 4) as u32, 16).expect("nibble is a hex digit"));
        out.push(char::from_digit((byte & 0xf) as u32, 16).expect("nibble is a hex digit"));
    }
    out
}

fn hex_value(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|digit| digit as u8)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distance_to_self() {
        let id = Id::random();
        let distance = id.distance(&id);
        assert_eq!(distance, 0)
    }

    #[test]
    fn distance_to_id() {
        let id: Id = "0639A1E24FC69E12C7E0A087EE2F0F287D6B98A9".parse().unwrap();
        let target: Id = "035b41e2fa04da09fe1bbbb98ec8e87f0de27cb7".parse().unwrap();

        let distance = id.distance(&target);

        assert_eq!(distance, 155)
    }

    #[test]
    fn distance_to_random_id() {
        let id = Id::random();
        let target = Id::random();

        let distance = id.distance(&target);

        assert_ne!(distance, 0)
    }

    #[test]
    fn distance_to_furthest() {
        let id = Id::random();

        let mut opposite = [0_u8; ID_SIZE];
        for (i, byte) in id.0.iter().enumerate() {
            opposite[i] = byte ^ 0xff;
        }
        let target = Id(opposite);

        let distance = id.distance(&target);

        assert_eq!(distance, MAX_DISTANCE)
    }

    #[test]
    fn xor_orders_by_closeness() {
        let target: Id = "0000000000000000000000000000000000000000".parse().unwrap();
        let near: Id = "0000000000000000000000000000000000000005".parse().unwrap();
        let far: Id = "000000000000000000000000000000000000000c".parse().unwrap();

        assert!(near.xor(&target) < far.xor(&target));
        assert_eq!(target.xor(&near), near.xor(&target));
    }

    #[test]
    fn from_str_roundtrip() {
        let id = Id::random();
        let parsed: Id = id.to_string().parse().unwrap();

        assert_eq!(parsed, id);
    }

    #[test]
    fn from_str_rejects_bad_input() {
        assert!("05".parse::<Id>().is_err());
        assert!("zz".repeat(20).parse::<Id>().is_err());
    }
}
