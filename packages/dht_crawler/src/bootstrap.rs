//! Cold-start population of the routing table from a list of well-known
//! endpoints (spec §5, §6). DNS resolution of bootstrap hostnames is left
//! to the CLI front-end; the `Resolver` trait is the seam, and this module
//! only ever consumes an already-resolved `&[SocketAddr]`.

use crate::dispatcher::to_compact_addr;
use crate::errors::{Error, ErrorKind, Result};
use crate::lookup::LookupEngine;
use krpc_encoding::NodeId;
use routing_table::{Node, RoutingTable};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_krpc::OutboundClient;

/// Resolves a bootstrap hostname to a set of candidate endpoints. An
/// external collaborator: the core never performs DNS lookups itself.
pub trait Resolver: Send + Sync {
    fn resolve(&self, host: &str) -> Result<Vec<SocketAddr>>;
}

/// A `Resolver` that only ever returns a fixed, pre-resolved endpoint list —
/// used by tests and by callers who already resolved bootstrap hosts
/// upstream.
pub struct StaticResolver {
    endpoints: Vec<SocketAddr>,
}

impl StaticResolver {
    pub fn new(endpoints: Vec<SocketAddr>) -> StaticResolver {
        StaticResolver { endpoints }
    }
}

impl Resolver for StaticResolver {
    fn resolve(&self, _host: &str) -> Result<Vec<SocketAddr>> {
        Ok(self.endpoints.clone())
    }
}

/// Pings every endpoint to seed the routing table, then runs a
/// `find_node(own_id)` lookup to pull in the rest of the network. `cancel`
/// is polled at each iteration boundary and before each ping attempt; a
/// cancellation mid-flight never leaks a transaction, since the
/// in-flight ones simply time out on their own schedule (spec §5).
pub async fn bootstrap(
    own_id: NodeId,
    outbound: &OutboundClient,
    table: &Arc<Mutex<RoutingTable>>,
    lookup: &LookupEngine,
    endpoints: &[SocketAddr],
    cancel: &Arc<AtomicBool>,
    timeout: Duration,
) -> Result<()> {
    match tokio::time::timeout(timeout, run(own_id, outbound, table, lookup, endpoints, cancel)).await {
        Ok(result) => result,
        Err(_) => Err(Error::from(ErrorKind::BootstrapTimedOut)),
    }
}

async fn run(
    own_id: NodeId,
    outbound: &OutboundClient,
    table: &Arc<Mutex<RoutingTable>>,
    lookup: &LookupEngine,
    endpoints: &[SocketAddr],
    cancel: &Arc<AtomicBool>,
) -> Result<()> {
    for &endpoint in endpoints {
        if cancel.load(Ordering::SeqCst) {
            return Err(Error::from(ErrorKind::Cancelled));
        }

        match outbound.ping(own_id, endpoint).await {
            Ok(node_id) => {
                if let Some(addr) = to_compact_addr(endpoint) {
                    table.lock().unwrap().insert(Node::new(node_id, addr));
                }
            }
            Err(err) => log::debug!("bootstrap ping to {} failed: {}", endpoint, err),
        }
    }

    if cancel.load(Ordering::SeqCst) {
        return Err(Error::from(ErrorKind::Cancelled));
    }

    if table.lock().unwrap().is_empty() {
        return Err(Error::from(ErrorKind::TableEmpty));
    }

    lookup.find_closest_nodes(own_id).await.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_returns_its_fixed_endpoints() {
        let endpoints = vec!["127.0.0.1:6881".parse().unwrap()];
        let resolver = StaticResolver::new(endpoints.clone());
        assert_eq!(resolver.resolve("dht.example.com").unwrap(), endpoints);
    }

    #[tokio::test]
    async fn bootstrap_with_no_reachable_endpoints_fails_with_table_empty() {
        use krpc_encoding::NodeId;
        use routing_table::RoutingTable;
        use tokio_krpc::{OutboundClient, SocketPump, TransactionManager};

        let own_id = NodeId::random();
        let pump = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transactions = Arc::new(TransactionManager::with_limits(16, Duration::from_millis(20)));
        let outbound = OutboundClient::new(pump.sender(), transactions);
        let table = Arc::new(Mutex::new(RoutingTable::new(own_id)));
        let lookup_engine = LookupEngine::new(own_id, outbound.clone(), table.clone(), 3, 8, 20);
        let cancel = Arc::new(AtomicBool::new(false));

        let unreachable: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = bootstrap(
            own_id,
            &outbound,
            &table,
            &lookup_engine,
            &[unreachable],
            &cancel,
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(ref e) if matches!(e.kind(), ErrorKind::TableEmpty)));
    }

    #[tokio::test]
    async fn pre_cancelled_bootstrap_returns_cancelled() {
        use krpc_encoding::NodeId;
        use routing_table::RoutingTable;
        use tokio_krpc::{OutboundClient, SocketPump, TransactionManager};

        let own_id = NodeId::random();
        let pump = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transactions = Arc::new(TransactionManager::new());
        let outbound = OutboundClient::new(pump.sender(), transactions);
        let table = Arc::new(Mutex::new(RoutingTable::new(own_id)));
        let lookup_engine = LookupEngine::new(own_id, outbound.clone(), table.clone(), 3, 8, 20);
        let cancel = Arc::new(AtomicBool::new(true));

        let result = bootstrap(own_id, &outbound, &table, &lookup_engine, &[], &cancel, Duration::from_secs(5)).await;
        assert!(matches!(result, Err(ref e) if matches!(e.kind(), ErrorKind::Cancelled)));
    }
}
