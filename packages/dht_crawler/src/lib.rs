//! Mainline BitTorrent DHT node engine: routing table, transaction manager,
//! message pipeline, iterative lookup engine, and peer/token stores (spec
//! §1-§2). The crates below it (`krpc_encoding`, `tokio_krpc`,
//! `routing_table`) own the wire format, transport, and k-bucket structure
//! respectively; this crate is where they meet a concrete node.

pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod handlers;
pub mod lookup;
pub mod peer_store;
pub mod persistence;
pub mod token_store;

pub use bootstrap::{Resolver, StaticResolver};
pub use config::NodeConfig;
pub use engine::DhtEngine;
pub use errors::{Error, ErrorKind, Result};
pub use lookup::{Phase, PeerLookupResult};
