//! Compact encodings from BEP-5: a peer contact is 6 bytes (4-byte IPv4 +
//! 2-byte big-endian port), a node contact is 26 bytes (20-byte `NodeId` +
//! the 6-byte peer contact). `nodes`/`values` on the wire are simply these
//! records concatenated with no separators.
//!
//! IPv4 only, per the spec's Non-goals (BEP-32 `nodes6`/`values6` are not
//! implemented).

use crate::errors::{Error, ErrorKind};
use crate::id::{NodeId, ID_LEN};
use byteorder::{BigEndian, ByteOrder};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_bytes::ByteBuf;
use std::fmt;
use std::net::Ipv4Addr;

pub const ADDR_LEN: usize = 6;
pub const NODE_INFO_LEN: usize = ID_LEN + ADDR_LEN;

/// A compact IPv4 peer contact: `(ip, port)`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Addr {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Addr {
    pub fn new(ip: Ipv4Addr, port: u16) -> Addr {
        Addr { ip, port }
    }

    pub fn to_bytes(&self) -> [u8; ADDR_LEN] {
        let mut buf = [0u8; ADDR_LEN];
        buf[..4].copy_from_slice(&self.ip.octets());
        BigEndian::write_u16(&mut buf[4..], self.port);
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Addr, Error> {
        if bytes.len() != ADDR_LEN {
            return Err(ErrorKind::BadCompactLength {
                expected: ADDR_LEN,
                got: bytes.len(),
            }
            .into());
        }
        let ip = Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]);
        let port = BigEndian::read_u16(&bytes[4..]);
        Ok(Addr { ip, port })
    }
}

impl fmt::Debug for Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<std::net::SocketAddrV4> for Addr {
    fn from(addr: std::net::SocketAddrV4) -> Addr {
        Addr::new(*addr.ip(), addr.port())
    }
}

impl From<Addr> for std::net::SocketAddrV4 {
    fn from(addr: Addr) -> std::net::SocketAddrV4 {
        std::net::SocketAddrV4::new(addr.ip, addr.port)
    }
}

impl Serialize for Addr {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde_bytes::Bytes::new(&self.to_bytes()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Addr {
    fn deserialize<D>(deserializer: D) -> Result<Addr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buf = ByteBuf::deserialize(deserializer)?;
        Addr::from_bytes(buf.as_slice()).map_err(DeError::custom)
    }
}

/// A compact node contact: `NodeId` plus its `Addr`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: Addr,
}

impl NodeInfo {
    pub fn new(id: NodeId, addr: Addr) -> NodeInfo {
        NodeInfo { id, addr }
    }

    pub fn to_bytes(&self) -> [u8; NODE_INFO_LEN] {
        let mut buf = [0u8; NODE_INFO_LEN];
        buf[..ID_LEN].copy_from_slice(self.id.as_bytes());
        buf[ID_LEN..].copy_from_slice(&self.addr.to_bytes());
        buf
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<NodeInfo, Error> {
        if bytes.len() != NODE_INFO_LEN {
            return Err(ErrorKind::BadCompactLength {
                expected: NODE_INFO_LEN,
                got: bytes.len(),
            }
            .into());
        }
        let id = NodeId::try_from_slice(&bytes[..ID_LEN])?;
        let addr = Addr::from_bytes(&bytes[ID_LEN..])?;
        Ok(NodeInfo { id, addr })
    }
}

impl NodeId {
    fn try_from_slice(bytes: &[u8]) -> Result<NodeId, Error> {
        use std::convert::TryFrom;
        NodeId::try_from(bytes).map_err(Error::from)
    }
}

/// Encodes a list of `NodeInfo` as the concatenated 26-byte-per-record
/// compact string used for the `nodes` key, or decodes the same.
pub mod node_info_list {
    use super::*;

    pub fn serialize<S>(nodes: &[NodeInfo], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut bytes = Vec::with_capacity(nodes.len() * NODE_INFO_LEN);
        for node in nodes {
            bytes.extend_from_slice(&node.to_bytes());
        }
        serde_bytes::Bytes::new(&bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<NodeInfo>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let buf = ByteBuf::deserialize(deserializer)?;
        decode_node_infos(buf.as_slice()).map_err(DeError::custom)
    }
}

pub fn decode_node_infos(bytes: &[u8]) -> Result<Vec<NodeInfo>, Error> {
    if bytes.len() % NODE_INFO_LEN != 0 {
        return Err(ErrorKind::BadCompactLength {
            expected: NODE_INFO_LEN,
            got: bytes.len() % NODE_INFO_LEN,
        }
        .into());
    }
    bytes
        .chunks(NODE_INFO_LEN)
        .map(NodeInfo::from_bytes)
        .collect()
}

pub fn encode_node_infos(nodes: &[NodeInfo]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(nodes.len() * NODE_INFO_LEN);
    for node in nodes {
        bytes.extend_from_slice(&node.to_bytes());
    }
    bytes
}

/// `values`: a bencode list of 6-byte compact peer strings (not a single
/// concatenated string, unlike `nodes`).
pub mod addr_list {
    use super::*;

    pub fn serialize<S>(addrs: &[Addr], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::ser::SerializeSeq;
        let mut seq = serializer.serialize_seq(Some(addrs.len()))?;
        for addr in addrs {
            seq.serialize_element(&serde_bytes::ByteBuf::from(addr.to_bytes().to_vec()))?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<Addr>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bufs: Vec<ByteBuf> = Vec::deserialize(deserializer)?;
        bufs.iter()
            .map(|buf| Addr::from_bytes(buf.as_slice()))
            .collect::<Result<Vec<_>, Error>>()
            .map_err(DeError::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addr_round_trips_through_6_bytes() {
        let addr = Addr::new(Ipv4Addr::new(192, 0, 2, 1), 6881);
        let bytes = addr.to_bytes();
        assert_eq!(bytes.len(), ADDR_LEN);
        let decoded = Addr::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, addr);
    }

    #[test]
    fn node_info_round_trips_through_26_bytes() {
        let node = NodeInfo::new(
            NodeId([3u8; ID_LEN]),
            Addr::new(Ipv4Addr::new(10, 0, 0, 1), 1234),
        );
        let bytes = node.to_bytes();
        assert_eq!(bytes.len(), NODE_INFO_LEN);
        let decoded = NodeInfo::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, node);
    }

    #[test]
    fn decode_node_infos_rejects_misaligned_length() {
        let bytes = vec![0u8; NODE_INFO_LEN + 1];
        assert!(decode_node_infos(&bytes).is_err());
    }

    #[test]
    fn empty_nodes_list_round_trips() {
        let encoded = encode_node_infos(&[]);
        assert!(encoded.is_empty());
        let decoded = decode_node_infos(&encoded).unwrap();
        assert!(decoded.is_empty());
    }
}
