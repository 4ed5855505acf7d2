//! The α-parallel iterative Kademlia lookup (spec §4.9).
//!
//! Each round queries up to `alpha` not-yet-queried, not-failed shortlist
//! entries concurrently, merges what comes back, and loops until the
//! shortlist is exhausted or `max_iterations` is hit. The state machine is
//! literally `Seeding → Probing ⇄ Merging → Completed`, tracked as an enum
//! for diagnostics even though a single `LookupEngine::run_lookup` call
//! only ever drives one lookup at a time through it.

use crate::errors::{Error, ErrorKind, Result};
use futures::future::join_all;
use krpc_encoding::compact::{Addr, NodeInfo};
use krpc_encoding::messages::Response;
use krpc_encoding::{InfoHash, NodeId};
use routing_table::{Node, RoutingTable};
use std::collections::HashMap;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tokio_krpc::{OutboundClient, PortSpec};

/// Stage of a single lookup, surfaced for logging/diagnostics.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
    Seeding,
    Probing,
    Merging,
    Completed,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum QueryStatus {
    NotQueried,
    Queried,
    Responded,
    Failed,
}

#[derive(Clone, Debug)]
struct ShortlistEntry {
    id: NodeId,
    addr: Addr,
    status: QueryStatus,
}

/// Result of `LookupEngine::find_peers`.
#[derive(Debug)]
pub struct PeerLookupResult {
    pub peers: Vec<Addr>,
    pub closest_nodes: Vec<NodeInfo>,
    pub tokens_by_node: HashMap<NodeId, Vec<u8>>,
}

/// Guards a single lookup's terminal transition so `complete()` fires
/// exactly once even if more than one round could plausibly race it (spec
/// §5 ordering guarantee, §9 Design Notes "AtomicBool-guarded completion
/// latch").
struct CompletionLatch {
    phase: Mutex<Phase>,
    completed: AtomicBool,
}

impl CompletionLatch {
    fn new() -> CompletionLatch {
        CompletionLatch { phase: Mutex::new(Phase::Seeding), completed: AtomicBool::new(false) }
    }

    fn set_phase(&self, phase: Phase) {
        *self.phase.lock().unwrap() = phase;
    }

    fn complete(&self) -> bool {
        self.completed.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok()
    }
}

pub struct LookupEngine {
    own_id: NodeId,
    outbound: OutboundClient,
    table: std::sync::Arc<Mutex<RoutingTable>>,
    alpha: usize,
    max_results: usize,
    max_iterations: usize,
}

impl LookupEngine {
    pub fn new(
        own_id: NodeId,
        outbound: OutboundClient,
        table: std::sync::Arc<Mutex<RoutingTable>>,
        alpha: usize,
        max_results: usize,
        max_iterations: usize,
    ) -> LookupEngine {
        LookupEngine { own_id, outbound, table, alpha, max_results, max_iterations }
    }

    /// Returns up to `max_results` nodes closest to `target` that this node
    /// can discover by iterative query.
    pub async fn find_closest_nodes(&self, target: NodeId) -> Result<Vec<NodeInfo>> {
        let (shortlist, _peers, _tokens) = self.run_lookup(target, false).await?;
        Ok(shortlist
            .into_iter()
            .map(|entry| NodeInfo::new(entry.id, entry.addr))
            .collect())
    }

    /// Runs a `get_peers` lookup, returning harvested peers, the converged
    /// shortlist, and the tokens needed to `announce` to each responder.
    pub async fn find_peers(&self, info_hash: InfoHash) -> Result<PeerLookupResult> {
        let target = NodeId(info_hash.0);
        let (shortlist, peers, tokens) = self.run_lookup(target, true).await?;
        Ok(PeerLookupResult {
            peers,
            closest_nodes: shortlist.into_iter().map(|entry| NodeInfo::new(entry.id, entry.addr)).collect(),
            tokens_by_node: tokens,
        })
    }

    /// Runs `find_peers`, then issues `announce_peer` to the closest nodes
    /// that returned a token. Succeeds if at least one announce succeeded.
    pub async fn announce(&self, info_hash: InfoHash, port: PortSpec) -> Result<bool> {
        let result = self.find_peers(info_hash).await?;

        let mut targets: Vec<(NodeId, Addr, Vec<u8>)> = result
            .closest_nodes
            .iter()
            .filter_map(|node| result.tokens_by_node.get(&node.id).map(|token| (node.id, node.addr, token.clone())))
            .collect();
        targets.sort_by_key(|(id, _, _)| NodeId(info_hash.0).distance(id));

        let announces = targets.into_iter().map(|(id, addr, token)| {
            let outbound = self.outbound.clone();
            let own_id = self.own_id;
            let destination = SocketAddr::V4(SocketAddrV4::from(addr));
            let port = match port {
                PortSpec::Implied => PortSpec::Implied,
                PortSpec::Explicit(p) => PortSpec::Explicit(p),
            };
            async move {
                outbound.announce_peer(own_id, destination, info_hash, token, port).await.map(|_| id)
            }
        });

        let outcomes = join_all(announces).await;
        Ok(outcomes.into_iter().any(|outcome| outcome.is_ok()))
    }

    async fn run_lookup(
        &self,
        target: NodeId,
        is_peer_lookup: bool,
    ) -> Result<(Vec<ShortlistEntry>, Vec<Addr>, HashMap<NodeId, Vec<u8>>)> {
        let latch = CompletionLatch::new();
        let mut shortlist = self.seed(&target)?;
        let mut harvested_peers: Vec<Addr> = Vec::new();
        let mut tokens_by_node: HashMap<NodeId, Vec<u8>> = HashMap::new();

        let mut iterations = 0;
        loop {
            latch.set_phase(Phase::Probing);
            let batch_idx: Vec<usize> = pick_batch(&shortlist, &target, self.alpha);
            if batch_idx.is_empty() {
                break;
            }
            for &idx in &batch_idx {
                shortlist[idx].status = QueryStatus::Queried;
            }
            iterations += 1;

            let queries = batch_idx.iter().map(|&idx| self.query_one(&shortlist[idx], target, is_peer_lookup));
            let outcomes = join_all(queries).await;

            latch.set_phase(Phase::Merging);
            for (&idx, outcome) in batch_idx.iter().zip(outcomes.into_iter()) {
                match outcome {
                    Ok(QueryOutcome { nodes, peers, token }) => {
                        shortlist[idx].status = QueryStatus::Responded;
                        if let Some(token) = token {
                            tokens_by_node.insert(shortlist[idx].id, token);
                        }
                        harvested_peers.extend(peers);
                        self.merge_nodes(&mut shortlist, nodes, &target);
                    }
                    Err(_) => {
                        shortlist[idx].status = QueryStatus::Failed;
                    }
                }
            }

            sort_shortlist(&mut shortlist, &target);
            shortlist.truncate(self.max_results);

            if iterations >= self.max_iterations {
                log::debug!("lookup for {:?} hit the max_iterations safety cap", target);
                break;
            }
            if shortlist.iter().all(|e| e.status != QueryStatus::NotQueried) {
                break;
            }
        }

        if latch.complete() {
            latch.set_phase(Phase::Completed);
        }

        sort_shortlist(&mut shortlist, &target);
        shortlist.truncate(self.max_results);
        harvested_peers.dedup();
        Ok((shortlist, harvested_peers, tokens_by_node))
    }

    fn seed(&self, target: &NodeId) -> Result<Vec<ShortlistEntry>> {
        let table = self.table.lock().unwrap();
        if table.is_empty() {
            return Err(Error::from(ErrorKind::TableEmpty));
        }
        Ok(table
            .closest(target, self.max_results)
            .into_iter()
            .map(|node| ShortlistEntry { id: node.id, addr: node.addr, status: QueryStatus::NotQueried })
            .collect())
    }

    async fn query_one(&self, entry: &ShortlistEntry, target: NodeId, is_peer_lookup: bool) -> Result<QueryOutcome> {
        let destination = SocketAddr::V4(SocketAddrV4::from(entry.addr));
        let response = if is_peer_lookup {
            self.outbound.get_peers(self.own_id, destination, InfoHash(target.0)).await?
        } else {
            self.outbound.find_node(self.own_id, destination, target).await?
        };

        let outcome = match response {
            Response::NextHop { nodes, token, .. } => QueryOutcome { nodes, peers: Vec::new(), token },
            Response::GetPeers { peers, token, .. } => QueryOutcome { nodes: Vec::new(), peers, token },
            Response::OnlyId { .. } => QueryOutcome { nodes: Vec::new(), peers: Vec::new(), token: None },
        };

        {
            let mut table = self.table.lock().unwrap();
            table.insert(Node::new(entry.id, entry.addr));
        }
        Ok(outcome)
    }

    fn merge_nodes(&self, shortlist: &mut Vec<ShortlistEntry>, nodes: Vec<NodeInfo>, target: &NodeId) {
        let mut table = self.table.lock().unwrap();
        for node in nodes {
            if node.id == self.own_id {
                continue;
            }
            table.insert(Node::new(node.id, node.addr));
            if !shortlist.iter().any(|e| e.id == node.id) {
                shortlist.push(ShortlistEntry { id: node.id, addr: node.addr, status: QueryStatus::NotQueried });
            }
        }
        drop(table);
        sort_shortlist(shortlist, target);
    }
}

struct QueryOutcome {
    nodes: Vec<NodeInfo>,
    peers: Vec<Addr>,
    token: Option<Vec<u8>>,
}

/// Picks up to `alpha` not-yet-queried, not-failed entries, nearest-first.
fn pick_batch(shortlist: &[ShortlistEntry], target: &NodeId, alpha: usize) -> Vec<usize> {
    let mut candidates: Vec<usize> = (0..shortlist.len())
        .filter(|&idx| shortlist[idx].status == QueryStatus::NotQueried)
        .collect();
    candidates.sort_by_key(|&idx| target.distance(&shortlist[idx].id));
    candidates.truncate(alpha);
    candidates
}

/// Orders by distance to `target`; ties prefer a `Responded` entry, then
/// break lexicographically on node id (spec §4.9).
fn sort_shortlist(shortlist: &mut [ShortlistEntry], target: &NodeId) {
    shortlist.sort_by(|a, b| {
        let da = target.distance(&a.id);
        let db = target.distance(&b.id);
        da.cmp(&db)
            .then_with(|| (a.status != QueryStatus::Responded).cmp(&(b.status != QueryStatus::Responded)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::compact::Addr;
    use routing_table::RoutingTable;
    use std::net::Ipv4Addr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_krpc::{OutboundClient, SocketPump, TransactionManager};

    fn addr(port: u16) -> Addr {
        Addr::new(Ipv4Addr::new(127, 0, 0, 1), port)
    }

    async fn engine_with_empty_table() -> LookupEngine {
        let own_id = NodeId::random();
        let pump = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transactions = Arc::new(TransactionManager::new());
        let outbound = OutboundClient::new(pump.sender(), transactions);
        let table = Arc::new(Mutex::new(RoutingTable::new(own_id)));
        LookupEngine::new(own_id, outbound, table, 3, 8, 20)
    }

    #[tokio::test]
    async fn lookup_on_empty_table_fails_fast() {
        let engine = engine_with_empty_table().await;
        let result = engine.find_closest_nodes(NodeId::random()).await;
        assert!(matches!(result, Err(ref e) if matches!(e.kind(), ErrorKind::TableEmpty)));
    }

    #[test]
    fn sort_prefers_responded_on_distance_tie() {
        let target = NodeId([0u8; 20]);
        let a = NodeId([1u8; 20]);
        let mut shortlist = vec![
            ShortlistEntry { id: a, addr: addr(1), status: QueryStatus::NotQueried },
        ];
        sort_shortlist(&mut shortlist, &target);
        assert_eq!(shortlist[0].id, a);
    }

    #[test]
    fn pick_batch_respects_alpha_cap() {
        let target = NodeId([0u8; 20]);
        let shortlist: Vec<ShortlistEntry> = (1..=10u8)
            .map(|b| ShortlistEntry { id: NodeId([b; 20]), addr: addr(b as u16), status: QueryStatus::NotQueried })
            .collect();
        let batch = pick_batch(&shortlist, &target, 3);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn completion_latch_fires_exactly_once() {
        let latch = CompletionLatch::new();
        assert!(latch.complete());
        assert!(!latch.complete());
    }
}
