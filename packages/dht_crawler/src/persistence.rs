//! Periodic snapshot/restore of routing table and peer store (spec §4.10,
//! §6). Both snapshots are plain bencode dicts, written via a write-temp,
//! rename-into-place sequence so a crash mid-write never corrupts the live
//! file (grounded in the teacher's general preference for atomic replace
//! over in-place writes, extended here to the DHT's own persisted state).
//!
//! A failed load is never fatal: the node falls back to an empty table or
//! store and re-learns everything by bootstrapping and serving traffic.

use crate::config::NodeConfig;
use crate::errors::{ErrorKind, Result};
use crate::peer_store::PeerStore;
use chrono::Utc;
use krpc_encoding::compact::Addr;
use krpc_encoding::{InfoHash, NodeId};
use routing_table::{Node, RoutingTable};
use serde_derive::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize)]
struct NodeEntry {
    id: NodeId,
    ip: String,
    port: u16,
}

#[derive(Serialize, Deserialize)]
struct RoutingTableSnapshot {
    own_id: NodeId,
    k_bucket_size: usize,
    nodes: Vec<NodeEntry>,
}

#[derive(Serialize, Deserialize)]
struct PeerEntry {
    ip: String,
    port: u16,
    ttl_remaining_seconds: i64,
}

#[derive(Serialize, Deserialize)]
struct InfoHashPeers {
    info_hash: InfoHash,
    peers: Vec<PeerEntry>,
}

#[derive(Serialize, Deserialize)]
struct PeerStoreSnapshot {
    entries: Vec<InfoHashPeers>,
}

pub struct PersistenceManager {
    routing_table_path: PathBuf,
    peer_store_path: PathBuf,
    transactions_path: PathBuf,
    node_id_path: PathBuf,
}

impl PersistenceManager {
    pub fn new(config: &NodeConfig) -> PersistenceManager {
        PersistenceManager {
            routing_table_path: config.routing_table_path(),
            peer_store_path: config.peer_store_path(),
            transactions_path: config.transactions_path(),
            node_id_path: config.node_id_path(),
        }
    }

    pub async fn save_routing_table(&self, table: &RoutingTable) -> Result<()> {
        self.save_routing_table_entries(table.owner_id(), table.k(), table.snapshot_entries()).await
    }

    /// Same as `save_routing_table`, but takes an already-extracted entry
    /// list instead of a live table — lets a caller drop the table's lock
    /// before awaiting the (potentially slow) disk write.
    pub async fn save_routing_table_entries(&self, own_id: NodeId, k: usize, entries: Vec<(NodeId, Addr)>) -> Result<()> {
        let snapshot = RoutingTableSnapshot {
            own_id,
            k_bucket_size: k,
            nodes: entries
                .into_iter()
                .map(|(id, addr)| NodeEntry { id, ip: addr.ip.to_string(), port: addr.port })
                .collect(),
        };
        let bytes = serde_bencode::ser::to_bytes(&snapshot)
            .map_err(|cause| ErrorKind::PersistenceWrite { what: "routing table", cause: to_io_error(cause) })?;
        atomic_write(&self.routing_table_path, &bytes).await?;
        log::debug!("persisted {} routing table entries", snapshot.nodes.len());
        Ok(())
    }

    /// Loads the routing table snapshot. A missing or corrupt file is
    /// logged and treated as an empty table, never a fatal error (spec
    /// §4.10).
    pub async fn load_routing_table(&self, own_id: NodeId, k: usize) -> RoutingTable {
        match tokio::fs::read(&self.routing_table_path).await {
            Ok(bytes) => match serde_bencode::de::from_bytes::<RoutingTableSnapshot>(&bytes) {
                Ok(snapshot) => {
                    let mut table = RoutingTable::with_k(own_id, k);
                    for entry in snapshot.nodes {
                        if let Ok(ip) = entry.ip.parse::<Ipv4Addr>() {
                            table.insert(Node::new(entry.id, Addr::new(ip, entry.port)));
                        }
                    }
                    table
                }
                Err(err) => {
                    log::warn!("routing table snapshot at {:?} is corrupt, starting empty: {}", self.routing_table_path, err);
                    RoutingTable::with_k(own_id, k)
                }
            },
            Err(_) => RoutingTable::with_k(own_id, k),
        }
    }

    /// Loads the persisted node id, or mints a fresh random one and persists
    /// it for next time (original_source: `src/types/node_id.cpp`, "generated
    /// randomly on first run").
    pub async fn load_or_create_node_id(&self) -> Result<NodeId> {
        if let Ok(bytes) = tokio::fs::read(&self.node_id_path).await {
            if let Ok(id) = <NodeId as std::convert::TryFrom<&[u8]>>::try_from(bytes.as_slice()) {
                return Ok(id);
            }
            log::warn!("node id file at {:?} is malformed, generating a new id", self.node_id_path);
        }
        let id = NodeId::random();
        atomic_write(&self.node_id_path, id.as_bytes()).await?;
        Ok(id)
    }

    pub async fn save_peer_store(&self, store: &PeerStore) -> Result<()> {
        let mut by_hash: std::collections::HashMap<InfoHash, Vec<PeerEntry>> = std::collections::HashMap::new();
        for (info_hash, addr, ttl_remaining) in store.snapshot_entries() {
            by_hash.entry(info_hash).or_default().push(PeerEntry {
                ip: addr.ip.to_string(),
                port: addr.port,
                ttl_remaining_seconds: ttl_remaining,
            });
        }
        let snapshot = PeerStoreSnapshot {
            entries: by_hash.into_iter().map(|(info_hash, peers)| InfoHashPeers { info_hash, peers }).collect(),
        };
        let bytes = serde_bencode::ser::to_bytes(&snapshot)
            .map_err(|cause| ErrorKind::PersistenceWrite { what: "peer store", cause: to_io_error(cause) })?;
        atomic_write(&self.peer_store_path, &bytes).await?;
        log::debug!("persisted peer store entries for {} info_hashes", snapshot.entries.len());
        Ok(())
    }

    pub async fn load_peer_store(&self, store: &PeerStore) {
        let bytes = match tokio::fs::read(&self.peer_store_path).await {
            Ok(bytes) => bytes,
            Err(_) => return,
        };
        match serde_bencode::de::from_bytes::<PeerStoreSnapshot>(&bytes) {
            Ok(snapshot) => {
                for entry in snapshot.entries {
                    for peer in entry.peers {
                        if let Ok(ip) = peer.ip.parse::<Ipv4Addr>() {
                            store.restore_entry(entry.info_hash, Addr::new(ip, peer.port), peer.ttl_remaining_seconds);
                        }
                    }
                }
            }
            Err(err) => {
                log::warn!("peer store snapshot at {:?} is corrupt, starting empty: {}", self.peer_store_path, err);
            }
        }
    }

    /// Writes the count of currently active transactions for diagnostics.
    /// No transaction is ever reconstructed from this file on reload: a
    /// transaction's completion is a `tokio::sync::oneshot::Sender` held by
    /// the in-flight caller, and that handle cannot survive a process
    /// restart, so in-flight transactions are always discarded and simply
    /// time out or are abandoned (spec §6 "callback state is not
    /// persisted").
    pub async fn save_transaction_count(&self, active_count: usize) -> Result<()> {
        let bytes = format!("d13:active_counti{}ee", active_count).into_bytes();
        atomic_write(&self.transactions_path, &bytes).await?;
        Ok(())
    }

    /// Runs `save_routing_table`/`save_peer_store` every `interval` until
    /// cancelled, logging (not propagating) any write failure so a single
    /// bad snapshot never takes down the sweeper task.
    pub async fn run_snapshot_loop(
        &self,
        table: std::sync::Arc<std::sync::Mutex<RoutingTable>>,
        peers: std::sync::Arc<PeerStore>,
        interval: std::time::Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let (owner, k, entries) = {
                let table = table.lock().unwrap();
                (table.owner_id(), table.k(), table.snapshot_entries())
            };
            if let Err(err) = self.save_routing_table_entries(owner, k, entries).await {
                log::warn!("failed to snapshot routing table: {}", err);
            }
            if let Err(err) = self.save_peer_store(&peers).await {
                log::warn!("failed to snapshot peer store: {}", err);
            }
        }
    }
}

fn to_io_error(cause: serde_bencode::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, cause.to_string())
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|cause| ErrorKind::PersistenceWrite { what: "config directory", cause })?;
    }
    let tmp_path = path.with_extension("tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .map_err(|cause| ErrorKind::PersistenceWrite { what: "snapshot temp file", cause })?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|cause| ErrorKind::PersistenceWrite { what: "snapshot rename", cause })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use routing_table::RoutingTable;
    use std::time::Duration;

    fn config(dir: &Path) -> NodeConfig {
        NodeConfig::default().with_config_dir(dir)
    }

    #[tokio::test]
    async fn routing_table_round_trips_through_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(&config(dir.path()));

        let own_id = NodeId::random();
        let mut table = RoutingTable::new(own_id);
        let node_id = NodeId::random();
        table.insert(Node::new(node_id, Addr::new(Ipv4Addr::new(192, 0, 2, 1), 6881)));

        manager.save_routing_table(&table).await.unwrap();
        let restored = manager.load_routing_table(own_id, 8).await;
        assert!(restored.find(&node_id).is_some());
    }

    #[tokio::test]
    async fn loading_a_missing_routing_table_snapshot_yields_an_empty_table() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(&config(dir.path()));
        let own_id = NodeId::random();
        let table = manager.load_routing_table(own_id, 8).await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn loading_a_corrupt_routing_table_snapshot_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(&config(dir.path()));
        tokio::fs::create_dir_all(dir.path()).await.unwrap();
        tokio::fs::write(manager.routing_table_path.clone(), b"not bencode").await.unwrap();

        let own_id = NodeId::random();
        let table = manager.load_routing_table(own_id, 8).await;
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn peer_store_round_trips_through_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let manager = PersistenceManager::new(&config(dir.path()));

        let store = PeerStore::new(Duration::from_secs(1800), 100);
        let hash = InfoHash([4u8; krpc_encoding::ID_LEN]);
        store.announce(hash, Addr::new(Ipv4Addr::new(198, 51, 100, 2), 6881));

        manager.save_peer_store(&store).await.unwrap();

        let restored = PeerStore::new(Duration::from_secs(1800), 100);
        manager.load_peer_store(&restored).await;
        assert_eq!(restored.peer_count(&hash), 1);
    }
}
