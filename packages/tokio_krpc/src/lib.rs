//! Async UDP transport and transaction correlation for the DHT KRPC
//! protocol (spec §4.2, §4.6). Pairs with `krpc_encoding` for the wire
//! format and `routing_table` for the table this transport feeds.

pub mod errors;
pub mod outbound;
pub mod socket_pump;
pub mod transaction;

pub use errors::{Error, ErrorKind, Result};
pub use outbound::{OutboundClient, PortSpec};
pub use socket_pump::{OutboundSender, SocketPump};
pub use transaction::{TransactionManager, TransactionOutcome};
