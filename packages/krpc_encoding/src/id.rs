//! 160-bit identifiers and the XOR distance metric (BEP-5 §Node IDs).
//!
//! `NodeId` and `InfoHash` are wire-compatible (both 20 raw bytes) but kept
//! as distinct types so a caller can't accidentally pass a node id where an
//! info hash was meant, or vice versa.

use num_bigint::BigUint;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use std::convert::TryFrom;
use std::fmt;

pub const ID_LEN: usize = 20;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; ID_LEN]);

        impl $name {
            pub fn random() -> $name {
                let mut bytes = [0u8; ID_LEN];
                rand::thread_rng().fill_bytes(&mut bytes);
                $name(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; ID_LEN] {
                &self.0
            }

            /// XOR distance to `other`, interpreted as a 160-bit unsigned integer.
            pub fn distance(&self, other: &$name) -> Distance {
                let mut xored = [0u8; ID_LEN];
                for i in 0..ID_LEN {
                    xored[i] = self.0[i] ^ other.0[i];
                }
                Distance(BigUint::from_bytes_be(&xored))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "{}(", stringify!($name))?;
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, ")")
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = crate::errors::ErrorKind;

            fn try_from(bytes: &[u8]) -> Result<$name, Self::Error> {
                if bytes.len() != ID_LEN {
                    return Err(crate::errors::ErrorKind::BadCompactLength {
                        expected: ID_LEN,
                        got: bytes.len(),
                    });
                }
                let mut array = [0u8; ID_LEN];
                array.copy_from_slice(bytes);
                Ok($name(array))
            }
        }

        impl From<[u8; ID_LEN]> for $name {
            fn from(bytes: [u8; ID_LEN]) -> $name {
                $name(bytes)
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serde_bytes::Bytes::new(&self.0).serialize(serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<$name, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let buf = ByteBuf::deserialize(deserializer)?;
                $name::try_from(buf.as_slice()).map_err(serde::de::Error::custom)
            }
        }
    };
}

id_type!(NodeId);
id_type!(InfoHash);

/// XOR distance between two 160-bit identifiers, represented as an unsigned
/// big integer so it totally orders by closeness.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Distance(pub BigUint);

impl Distance {
    pub fn zero() -> Distance {
        Distance(BigUint::from(0u8))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(byte: u8) -> NodeId {
        NodeId([byte; ID_LEN])
    }

    #[test]
    fn distance_to_self_is_zero() {
        let a = NodeId::random();
        assert_eq!(a.distance(&a), Distance::zero());
    }

    #[test]
    fn distance_is_symmetric() {
        let a = id(0x01);
        let b = id(0x02);
        assert_eq!(a.distance(&b), b.distance(&a));
    }

    #[test]
    fn distance_xor_is_transitive_identity() {
        // distance(A,B) xor distance(B,C) == distance(A,C)
        let a = NodeId::random();
        let b = NodeId::random();
        let c = NodeId::random();

        let d_ab = a.distance(&b);
        let d_bc = b.distance(&c);
        let d_ac = a.distance(&c);

        let mut xored = [0u8; ID_LEN];
        let ab_bytes = d_ab.0.to_bytes_be();
        let bc_bytes = d_bc.0.to_bytes_be();
        let pad = |bytes: &[u8]| -> [u8; ID_LEN] {
            let mut out = [0u8; ID_LEN];
            let offset = ID_LEN - bytes.len();
            out[offset..].copy_from_slice(bytes);
            out
        };
        let ab = pad(&ab_bytes);
        let bc = pad(&bc_bytes);
        for i in 0..ID_LEN {
            xored[i] = ab[i] ^ bc[i];
        }
        assert_eq!(BigUint::from_bytes_be(&xored), d_ac.0);
    }

    #[test]
    fn node_id_and_info_hash_round_trip_bytes() {
        let raw = [7u8; ID_LEN];
        let id = NodeId::from(raw);
        assert_eq!(id.as_bytes(), &raw);
    }
}
