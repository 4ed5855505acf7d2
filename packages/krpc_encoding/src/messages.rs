//! KRPC message envelope and payload shapes (BEP-5 §KRPC Protocol).
//!
//! Kept close to the teacher's `krpc_protocol::messages` module: the same
//! envelope/tag shape, the same `Query`/`Response`/`KRPCError` split. The
//! `nodes`/`values` fields now route through `crate::compact` instead of an
//! unretrieved `node_info` module, and a `Method` enum plus `RawEnvelope` are
//! added so the dispatcher can resolve a response's shape from the
//! originating query's method (spec §4.1, §4.7) before fully decoding it.

use crate::booleans;
use crate::compact::{addr_list, node_info_list};
pub use crate::compact::{Addr, NodeInfo};
use crate::id::NodeId;
use serde_bytes::ByteBuf;
use serde_derive::{Deserialize, Serialize};
use std::fmt;

/// Opaque transaction id, 2-4 bytes per BEP-5 convention, echoed verbatim.
pub type TransactionId = Vec<u8>;

/// The method named by a query, used to disambiguate an untagged `Response`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Method {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
    SampleInfoHashes,
}

/// Envelope holding information common to requests and responses.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Message {
    /// Public IP address of the requester (BEP-0042), compact-encoded.
    pub ip: Option<Addr>,

    /// Transaction id generated by the querying node, echoed in the response.
    #[serde(rename = "t", with = "serde_bytes")]
    pub transaction_id: TransactionId,

    /// Client version string.
    #[serde(rename = "v")]
    pub version: Option<ByteBuf>,

    #[serde(flatten)]
    pub message_type: MessageType,

    /// Sent by read-only DHT nodes (BEP-0043).
    #[serde(
        rename = "ro",
        default,
        skip_serializing_if = "booleans::is_false",
        deserialize_with = "booleans::deserialize"
    )]
    pub read_only: bool,
}

impl Message {
    pub fn decode(bytes: &[u8]) -> crate::errors::Result<Message> {
        serde_bencode::de::from_bytes(bytes)
            .map_err(|cause| crate::errors::ErrorKind::DecodeError { cause }.into())
    }

    pub fn encode(&self) -> crate::errors::Result<Vec<u8>> {
        serde_bencode::ser::to_bytes(self)
            .map_err(|cause| crate::errors::ErrorKind::EncodeError { cause }.into())
    }

    pub fn new_query(transaction_id: TransactionId, query: Query) -> Message {
        Message {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Query { query },
            read_only: false,
        }
    }

    pub fn new_response(transaction_id: TransactionId, response: Response) -> Message {
        Message {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Response { response },
            read_only: false,
        }
    }

    pub fn new_error(transaction_id: TransactionId, error: KRPCError) -> Message {
        Message {
            ip: None,
            transaction_id,
            version: None,
            message_type: MessageType::Error { error },
            read_only: false,
        }
    }

    /// The sender-declared node id, if the message carries one. Bare error
    /// frames carry none (spec §4.1).
    pub fn sender_id(&self) -> Option<NodeId> {
        match &self.message_type {
            MessageType::Query { query } => Some(query.id()),
            MessageType::Response { response } => Some(response.id()),
            MessageType::Error { .. } => None,
        }
    }

    pub fn method(&self) -> Option<Method> {
        match &self.message_type {
            MessageType::Query { query } => Some(query.method()),
            _ => None,
        }
    }
}

/// Messages sent and received by nodes.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "y")]
pub enum MessageType {
    #[serde(rename = "q")]
    Query {
        #[serde(flatten)]
        query: Query,
    },

    #[serde(rename = "r")]
    Response {
        #[serde(rename = "r")]
        response: Response,
    },

    #[serde(rename = "e")]
    Error {
        #[serde(rename = "e")]
        error: KRPCError,
    },
}

/// Error sent when a query cannot be fulfilled. `(code, message)`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct KRPCError(pub u32, pub String);

impl KRPCError {
    pub fn new(error_code: u32, message: &str) -> KRPCError {
        KRPCError(error_code, message.to_string())
    }

    pub fn generic(message: &str) -> KRPCError {
        KRPCError::new(201, message)
    }

    pub fn server(message: &str) -> KRPCError {
        KRPCError::new(202, message)
    }

    pub fn protocol(message: &str) -> KRPCError {
        KRPCError::new(203, message)
    }

    pub fn method_unknown(message: &str) -> KRPCError {
        KRPCError::new(204, message)
    }

    pub fn code(&self) -> u32 {
        self.0
    }

    pub fn message(&self) -> &str {
        &self.1
    }
}

impl fmt::Display for KRPCError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.0, self.1)
    }
}

/// Possible queries (BEP-5 plus the BEP-51 `sample_infohashes` extension).
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "q", content = "a")]
pub enum Query {
    #[serde(rename = "ping")]
    Ping { id: NodeId },

    #[serde(rename = "find_node")]
    FindNode { id: NodeId, target: NodeId },

    #[serde(rename = "get_peers")]
    GetPeers {
        id: NodeId,
        info_hash: NodeId,
    },

    #[serde(rename = "announce_peer")]
    AnnouncePeer {
        id: NodeId,

        #[serde(deserialize_with = "booleans::deserialize", default)]
        implied_port: bool,

        port: Option<u16>,

        info_hash: NodeId,

        #[serde(with = "serde_bytes")]
        token: Vec<u8>,
    },

    #[serde(rename = "sample_infohashes")]
    SampleInfoHashes { id: NodeId, target: NodeId },
}

impl Query {
    pub fn id(&self) -> NodeId {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. }
            | Query::SampleInfoHashes { id, .. } => *id,
        }
    }

    pub fn method(&self) -> Method {
        match self {
            Query::Ping { .. } => Method::Ping,
            Query::FindNode { .. } => Method::FindNode,
            Query::GetPeers { .. } => Method::GetPeers,
            Query::AnnouncePeer { .. } => Method::AnnouncePeer,
            Query::SampleInfoHashes { .. } => Method::SampleInfoHashes,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
            Query::SampleInfoHashes { .. } => "sample_infohashes",
        }
    }
}

/// Possible responses. Untagged: the shape is resolved from the originating
/// query's method (spec §4.1), not self-describing on the wire.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum Response {
    /// Response to `find_node`, and to `get_peers`/`sample_infohashes` when
    /// the responder has no better answer.
    NextHop {
        id: NodeId,

        #[serde(with = "serde_bytes", default, skip_serializing_if = "Option::is_none")]
        token: Option<Vec<u8>>,

        #[serde(with = "node_info_list")]
        nodes: Vec<NodeInfo>,
    },

    /// Response to `get_peers` when the responder has stored peers.
    GetPeers {
        id: NodeId,

        #[serde(with = "serde_bytes", default, skip_serializing_if = "Option::is_none")]
        token: Option<Vec<u8>>,

        #[serde(rename = "values", with = "addr_list")]
        peers: Vec<Addr>,
    },

    /// Response to `ping` and `announce_peer`.
    OnlyId { id: NodeId },
}

impl Response {
    pub fn id(&self) -> NodeId {
        match self {
            Response::NextHop { id, .. } => *id,
            Response::GetPeers { id, .. } => *id,
            Response::OnlyId { id } => *id,
        }
    }
}

/// A method-agnostic decode of a response envelope: just enough to know
/// `{t, id}` without committing to a shape. Produced when no transaction
/// correlates the reply to a query method (spec §4.1's ambiguity note), and
/// promoted to a full `Message` once the method is known.
#[derive(Debug, Clone)]
pub struct RawEnvelope {
    pub transaction_id: TransactionId,
    pub id: NodeId,
}
