//! Node-wide tunables (spec §5 Resource caps, §4.5/4.6/4.9 defaults).
//! Plain struct with a `Default` impl — no file-format parsing here, that
//! is the CLI front-end's job (out of core scope, spec §1).

use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// UDP port to bind (spec §6, default from `original_source/dht_constants.hpp`).
    pub port: u16,

    /// k-bucket capacity (spec §3: "k=8 (configurable; default typically 8 or 16)").
    pub k: usize,

    /// Iterative lookup parallelism (spec §4.9; original source pins 5).
    pub alpha: usize,

    /// Maximum nodes returned/retained by a lookup (original source: 16).
    pub max_results: usize,

    /// Hard safety cap on lookup rounds (spec §4.9).
    pub max_iterations: usize,

    /// Per-query transaction timeout (spec §4.6, default 30s).
    pub transaction_timeout: Duration,

    /// Hard cap on concurrently active transactions (spec §5).
    pub max_transactions: usize,

    /// Whole-operation bootstrap timeout (spec §5).
    pub bootstrap_timeout: Duration,

    /// Token rotation interval (spec §4.3, ~5-10 min).
    pub token_rotation_interval: Duration,

    /// Stored-peer TTL (spec §3, ~30 min).
    pub peer_ttl: Duration,

    /// Maximum peers retained per info_hash (spec §3/§5, default 100).
    pub max_peers_per_infohash: usize,

    /// Peer-store expiry sweep interval (spec §4.4, ~5 min).
    pub peer_sweep_interval: Duration,

    /// Routing-table bucket refresh interval (spec §4.5, ~15 min).
    pub bucket_refresh_interval: Duration,

    /// Persistence snapshot interval (spec §4.10, ~10 min).
    pub persistence_interval: Duration,

    /// Transaction-timeout sweep cadence (spec §5, 1 Hz).
    pub timeout_sweep_interval: Duration,

    /// Directory holding the routing table / peer store / transaction
    /// snapshots (spec §6 Persisted state).
    pub config_dir: PathBuf,
}

pub const DEFAULT_PORT: u16 = 6881;

impl Default for NodeConfig {
    fn default() -> NodeConfig {
        NodeConfig {
            port: DEFAULT_PORT,
            k: 8,
            alpha: 5,
            max_results: 16,
            max_iterations: 20,
            transaction_timeout: Duration::from_secs(30),
            max_transactions: 1024,
            bootstrap_timeout: Duration::from_secs(30),
            token_rotation_interval: Duration::from_secs(10 * 60),
            peer_ttl: Duration::from_secs(30 * 60),
            max_peers_per_infohash: 100,
            peer_sweep_interval: Duration::from_secs(5 * 60),
            bucket_refresh_interval: Duration::from_secs(15 * 60),
            persistence_interval: Duration::from_secs(10 * 60),
            timeout_sweep_interval: Duration::from_secs(1),
            config_dir: PathBuf::from("config"),
        }
    }
}

impl NodeConfig {
    pub fn with_port(mut self, port: u16) -> NodeConfig {
        self.port = port;
        self
    }

    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> NodeConfig {
        self.config_dir = dir.into();
        self
    }

    pub fn routing_table_path(&self) -> PathBuf {
        self.config_dir.join("routing_table.dat")
    }

    pub fn peer_store_path(&self) -> PathBuf {
        self.config_dir.join("peer_store.dat")
    }

    pub fn transactions_path(&self) -> PathBuf {
        self.config_dir.join("transactions.dat")
    }

    pub fn node_id_path(&self) -> PathBuf {
        self.config_dir.join("node_id.dat")
    }
}
