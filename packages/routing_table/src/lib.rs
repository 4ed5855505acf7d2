//! The k-bucket routing table keyed by XOR distance from the owning node's
//! id (spec §3, §4.5).

pub mod bucket;
pub mod node;
pub mod table;

pub use bucket::{Bucket, BucketInsert};
pub use node::{Node, NodeQuality};
pub use table::{InsertResult, RoutingTable, DEFAULT_K, DEFAULT_REFRESH_INTERVAL_SECS};
