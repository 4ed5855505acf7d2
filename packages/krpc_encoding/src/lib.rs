//! Bencode wire encoding for the Mainline BitTorrent DHT KRPC protocol
//! (BEP-5). This crate owns message shapes and the compact `nodes`/`values`
//! encodings; it knows nothing about sockets, routing, or lookups.

pub mod booleans;
pub mod codec;
pub mod compact;
pub mod errors;
pub mod id;
pub mod messages;

pub use codec::Codec;
pub use errors::{Error, ErrorKind, Result};
pub use id::{Distance, InfoHash, NodeId, ID_LEN};
pub use messages::{
    Addr, KRPCError, Message, MessageType, Method, NodeInfo, Query, RawEnvelope, Response,
    TransactionId,
};
