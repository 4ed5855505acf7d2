//! `DhtEngine`: the node facade that wires every subsystem together and
//! spawns the background tasks spec §5 describes (dependency injection over
//! singletons, per spec §9 Design Notes — nothing here is a global).

use crate::bootstrap::{self, Resolver};
use crate::config::NodeConfig;
use crate::dispatcher::MessageDispatcher;
use crate::errors::{Error, Result};
use crate::handlers::QueryHandlers;
use crate::lookup::{LookupEngine, PeerLookupResult};
use crate::peer_store::PeerStore;
use crate::persistence::PersistenceManager;
use crate::token_store::TokenStore;
use krpc_encoding::compact::NodeInfo;
use krpc_encoding::{InfoHash, NodeId};
use routing_table::RoutingTable;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_krpc::{OutboundClient, PortSpec, SocketPump, TransactionManager};

/// Channel depth between the socket's receive loop and the dispatcher —
/// generous enough to absorb a burst without the recv loop blocking on a
/// full channel (spec §5: the pump never blocks on routing).
const RECV_CHANNEL_DEPTH: usize = 1024;

pub struct DhtEngine {
    own_id: NodeId,
    config: NodeConfig,
    local_addr: SocketAddr,
    table: Arc<Mutex<RoutingTable>>,
    transactions: Arc<TransactionManager>,
    tokens: Arc<TokenStore>,
    peers: Arc<PeerStore>,
    outbound: OutboundClient,
    lookup: Arc<LookupEngine>,
    persistence: Arc<PersistenceManager>,
    cancel: Arc<AtomicBool>,
    background: Vec<JoinHandle<()>>,
}

impl DhtEngine {
    /// Binds the UDP socket, loads persisted state (or starts fresh), and
    /// spawns the recv loop, dispatcher, and every background sweeper. The
    /// returned engine is immediately ready to serve inbound queries and
    /// run lookups; `bootstrap` is a separate, explicit step (spec §5, §6).
    pub async fn new(config: NodeConfig) -> Result<DhtEngine> {
        let persistence = Arc::new(PersistenceManager::new(&config));
        let own_id = persistence.load_or_create_node_id().await?;

        let bind_addr = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.port);
        let pump = SocketPump::bind(bind_addr).await.map_err(Error::from)?;
        let local_addr = pump.local_addr().map_err(|cause| {
            Error::from(crate::errors::ErrorKind::PersistenceRead { what: "local socket address", cause: cause.to_string() })
        })?;

        let transactions = Arc::new(TransactionManager::with_limits(config.max_transactions, config.transaction_timeout));
        let outbound = OutboundClient::new(pump.sender(), transactions.clone());

        let table = Arc::new(Mutex::new(persistence.load_routing_table(own_id, config.k).await));
        let tokens = Arc::new(TokenStore::new(config.token_rotation_interval));
        let peers = Arc::new(PeerStore::new(config.peer_ttl, config.max_peers_per_infohash));
        persistence.load_peer_store(&peers).await;

        let handlers = Arc::new(QueryHandlers::new(own_id, table.clone(), tokens.clone(), peers.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(
            own_id,
            pump.sender(),
            transactions.clone(),
            handlers,
            outbound.clone(),
        ));
        let lookup = Arc::new(LookupEngine::new(own_id, outbound.clone(), table.clone(), config.alpha, config.max_results, config.max_iterations));

        let cancel = Arc::new(AtomicBool::new(false));
        let mut background = Vec::new();

        let (tx, rx) = mpsc::channel(RECV_CHANNEL_DEPTH);
        let pump = Arc::new(pump);
        background.push(tokio::spawn({
            let pump = pump.clone();
            async move { pump.run_recv_loop(tx).await }
        }));
        background.push(tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.run(rx).await }
        }));
        background.push(tokio::spawn({
            let tokens = tokens.clone();
            let interval = config.token_rotation_interval;
            async move { tokens.run_rotation_checker(interval).await }
        }));
        background.push(tokio::spawn({
            let peers = peers.clone();
            let interval = config.peer_sweep_interval;
            async move { run_peer_sweeper(peers, interval).await }
        }));
        background.push(tokio::spawn({
            let transactions = transactions.clone();
            let interval = config.timeout_sweep_interval;
            async move { run_timeout_sweeper(transactions, interval).await }
        }));
        background.push(tokio::spawn({
            let persistence = persistence.clone();
            let table = table.clone();
            let peers = peers.clone();
            let interval = config.persistence_interval;
            async move { persistence.run_snapshot_loop(table, peers, interval).await }
        }));
        background.push(tokio::spawn({
            let table = table.clone();
            let lookup = lookup.clone();
            let interval = config.bucket_refresh_interval;
            async move { run_bucket_refresher(own_id, table, lookup, interval).await }
        }));

        Ok(DhtEngine {
            own_id,
            config,
            local_addr,
            table,
            transactions,
            tokens,
            peers,
            outbound,
            lookup,
            persistence,
            cancel,
            background,
        })
    }

    pub fn own_id(&self) -> NodeId {
        self.own_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn routing_table_len(&self) -> usize {
        self.table.lock().unwrap().len()
    }

    pub fn active_transaction_count(&self) -> usize {
        self.transactions.active_count()
    }

    pub fn stored_peer_info_hash_count(&self) -> usize {
        self.peers.info_hash_count()
    }

    /// Pings `endpoints` and seeds the routing table, then runs a
    /// `find_node(own_id)` lookup to pull in the rest of the network (spec
    /// §5, §6). DNS resolution of bootstrap hostnames is the caller's job —
    /// see `bootstrap_hosts` for the `Resolver`-mediated convenience.
    pub async fn bootstrap(&self, endpoints: &[SocketAddr]) -> Result<()> {
        bootstrap::bootstrap(
            self.own_id,
            &self.outbound,
            &self.table,
            &self.lookup,
            endpoints,
            &self.cancel,
            self.config.bootstrap_timeout,
        )
        .await
    }

    /// Resolves `hosts` through `resolver` and bootstraps against the union
    /// of every endpoint they return (spec §6 External interfaces: DNS
    /// resolution is an external collaborator, not core logic).
    pub async fn bootstrap_hosts(&self, hosts: &[&str], resolver: &dyn Resolver) -> Result<()> {
        let mut endpoints = Vec::new();
        for host in hosts {
            endpoints.extend(resolver.resolve(host)?);
        }
        self.bootstrap(&endpoints).await
    }

    /// Cancels any in-flight `bootstrap` call at its next poll point.
    pub fn cancel_bootstrap(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub async fn find_closest_nodes(&self, target: NodeId) -> Result<Vec<NodeInfo>> {
        self.lookup.find_closest_nodes(target).await
    }

    pub async fn find_peers(&self, info_hash: InfoHash) -> Result<PeerLookupResult> {
        self.lookup.find_peers(info_hash).await
    }

    pub async fn announce(&self, info_hash: InfoHash, port: PortSpec) -> Result<bool> {
        self.lookup.announce(info_hash, port).await
    }

    /// Snapshots routing table and peer store immediately, out of band from
    /// the periodic sweeper — used for a clean shutdown.
    pub async fn snapshot_now(&self) -> Result<()> {
        let (owner, k, entries) = {
            let table = self.table.lock().unwrap();
            (table.owner_id(), table.k(), table.snapshot_entries())
        };
        self.persistence.save_routing_table_entries(owner, k, entries).await?;
        self.persistence.save_peer_store(&self.peers).await?;
        self.persistence.save_transaction_count(self.transactions.active_count()).await?;
        Ok(())
    }

    /// Stops every background task and persists a final snapshot. Consumes
    /// the engine: there is no coming back from a shutdown `DhtEngine`.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.snapshot_now().await;
        for handle in self.background {
            handle.abort();
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::InfoHash;
    use tokio_krpc::PortSpec;

    fn config(dir: &std::path::Path) -> NodeConfig {
        NodeConfig::default()
            .with_port(0)
            .with_config_dir(dir)
    }

    /// Two nodes, one bootstrapping off the other: covers spec §8 scenarios
    /// 1 (ping), 2 (find_node on a near-empty table), and the bootstrap path
    /// end to end over real loopback sockets.
    #[tokio::test]
    async fn a_node_bootstraps_off_another_and_finds_it() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let seed = DhtEngine::new(config(dir_a.path())).await.unwrap();
        let joiner = DhtEngine::new(config(dir_b.path())).await.unwrap();

        joiner.bootstrap(&[seed.local_addr()]).await.unwrap();

        assert!(joiner.routing_table_len() >= 1);
        let nodes = joiner.find_closest_nodes(seed.own_id()).await.unwrap();
        assert!(nodes.iter().any(|n| n.id == seed.own_id()));
    }

    /// Spec §8 scenario 3/4: get_peers/announce_peer/get_peers round trip
    /// and stale-token rejection, driven through two real engines instead of
    /// a single `QueryHandlers` instance.
    #[tokio::test]
    async fn announce_then_find_peers_round_trips_across_two_nodes() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let seed = DhtEngine::new(config(dir_a.path())).await.unwrap();
        let announcer = DhtEngine::new(config(dir_b.path())).await.unwrap();
        announcer.bootstrap(&[seed.local_addr()]).await.unwrap();

        let info_hash = InfoHash([9u8; krpc_encoding::ID_LEN]);
        let announced = announcer.announce(info_hash, PortSpec::Implied).await.unwrap();
        assert!(announced);

        let result = seed.find_peers(info_hash).await.unwrap();
        assert!(!result.peers.is_empty());
    }

    #[tokio::test]
    async fn bootstrap_then_shutdown_persists_a_snapshot() {
        let dir_a = tempfile::tempdir().unwrap();
        let dir_b = tempfile::tempdir().unwrap();

        let seed = DhtEngine::new(config(dir_a.path())).await.unwrap();
        let joiner = DhtEngine::new(config(dir_b.path())).await.unwrap();
        joiner.bootstrap(&[seed.local_addr()]).await.unwrap();

        let config_dir = dir_b.path().to_path_buf();
        joiner.shutdown().await.unwrap();

        let reloaded = DhtEngine::new(config(&config_dir)).await.unwrap();
        assert!(reloaded.routing_table_len() >= 1);
    }
}

async fn run_peer_sweeper(peers: Arc<PeerStore>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        peers.sweep_expired();
    }
}

async fn run_timeout_sweeper(transactions: Arc<TransactionManager>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        transactions.check_timeouts();
    }
}

/// Issues a `find_node` lookup on a random id in range for every bucket that
/// has gone quiet past the refresh interval (spec §4.5).
async fn run_bucket_refresher(own_id: NodeId, table: Arc<Mutex<RoutingTable>>, lookup: Arc<LookupEngine>, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let stale = {
            let table = table.lock().unwrap();
            table.stale_buckets(routing_table::DEFAULT_REFRESH_INTERVAL_SECS)
        };
        for (_idx, target) in stale {
            if target == own_id {
                continue;
            }
            if let Err(err) = lookup.find_closest_nodes(target).await {
                log::debug!("bucket refresh lookup for {:?} failed: {}", target, err);
            }
        }
    }
}
