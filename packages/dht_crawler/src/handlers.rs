//! Replies to inbound queries (spec §4.8). Each handler is a pure function
//! of the query plus the node's stores — no network I/O here, that is the
//! dispatcher's job once a `Response` or `KRPCError` comes back.

use crate::peer_store::PeerStore;
use crate::token_store::TokenStore;
use krpc_encoding::compact::{Addr, NodeInfo};
use krpc_encoding::messages::{KRPCError, Query, Response};
use krpc_encoding::{InfoHash, NodeId};
use routing_table::RoutingTable;
use std::sync::{Arc, Mutex};

/// Maximum nodes returned in a `find_node`/`get_peers` fallback reply
/// (original_source: matches the table's own `k`).
const DEFAULT_NODE_REPLY_COUNT: usize = 8;

pub struct QueryHandlers {
    own_id: NodeId,
    table: Arc<Mutex<RoutingTable>>,
    tokens: Arc<TokenStore>,
    peers: Arc<PeerStore>,
}

impl QueryHandlers {
    pub fn new(
        own_id: NodeId,
        table: Arc<Mutex<RoutingTable>>,
        tokens: Arc<TokenStore>,
        peers: Arc<PeerStore>,
    ) -> QueryHandlers {
        QueryHandlers { own_id, table, tokens, peers }
    }

    pub fn table(&self) -> &Arc<Mutex<RoutingTable>> {
        &self.table
    }

    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub fn peers(&self) -> &Arc<PeerStore> {
        &self.peers
    }

    /// Dispatches `query` to the handler matching its method and returns
    /// either a `Response` to send back, or a `KRPCError` (spec §4.8: bad
    /// token, etc).
    pub fn handle(&self, query: &Query, source: Addr) -> Result<Response, KRPCError> {
        match query {
            Query::Ping { .. } => Ok(self.handle_ping()),
            Query::FindNode { target, .. } => Ok(self.handle_find_node(*target)),
            Query::GetPeers { info_hash, .. } => Ok(self.handle_get_peers(InfoHash(info_hash.0), source)),
            Query::AnnouncePeer { info_hash, token, implied_port, port, .. } => {
                self.handle_announce_peer(InfoHash(info_hash.0), token, *implied_port, *port, source)
            }
            Query::SampleInfoHashes { target, .. } => Ok(self.handle_find_node(*target)),
        }
    }

    fn handle_ping(&self) -> Response {
        Response::OnlyId { id: self.own_id }
    }

    fn handle_find_node(&self, target: NodeId) -> Response {
        let nodes = self.closest_node_infos(&target);
        Response::NextHop { id: self.own_id, token: None, nodes }
    }

    fn handle_get_peers(&self, info_hash: InfoHash, source: Addr) -> Response {
        let token = self.tokens.issue(&source);
        let known_peers = self.peers.get_peers(&info_hash, DEFAULT_NODE_REPLY_COUNT);

        if known_peers.is_empty() {
            let target = NodeId(info_hash.0);
            let nodes = self.closest_node_infos(&target);
            Response::NextHop { id: self.own_id, token: Some(token), nodes }
        } else {
            Response::GetPeers { id: self.own_id, token: Some(token), peers: known_peers }
        }
    }

    fn handle_announce_peer(
        &self,
        info_hash: InfoHash,
        token: &[u8],
        implied_port: bool,
        port: Option<u16>,
        source: Addr,
    ) -> Result<Response, KRPCError> {
        if !self.tokens.validate(token, &source) {
            return Err(KRPCError::protocol("bad token"));
        }

        let announced_port = if implied_port { source.port } else { port.unwrap_or(source.port) };
        let announced_addr = Addr::new(source.ip, announced_port);
        self.peers.announce(info_hash, announced_addr);
        Ok(Response::OnlyId { id: self.own_id })
    }

    fn closest_node_infos(&self, target: &NodeId) -> Vec<NodeInfo> {
        let table = self.table.lock().unwrap();
        table
            .closest(target, DEFAULT_NODE_REPLY_COUNT)
            .into_iter()
            .map(|node| NodeInfo::new(node.id, node.addr))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_store::PeerStore;
    use crate::token_store::TokenStore;
    use routing_table::RoutingTable;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn source() -> Addr {
        Addr::new(Ipv4Addr::new(203, 0, 113, 9), 6881)
    }

    fn handlers() -> QueryHandlers {
        let own_id = NodeId::random();
        QueryHandlers::new(
            own_id,
            Arc::new(Mutex::new(RoutingTable::new(own_id))),
            Arc::new(TokenStore::new(Duration::from_secs(600))),
            Arc::new(PeerStore::new(Duration::from_secs(1800), 100)),
        )
    }

    #[test]
    fn ping_echoes_own_id() {
        let handlers = handlers();
        let response = handlers.handle(&Query::Ping { id: NodeId::random() }, source()).unwrap();
        assert_eq!(response.id(), handlers.own_id);
    }

    #[test]
    fn find_node_on_empty_table_returns_no_nodes() {
        let handlers = handlers();
        let response = handlers
            .handle(&Query::FindNode { id: NodeId::random(), target: NodeId::random() }, source())
            .unwrap();
        match response {
            Response::NextHop { nodes, .. } => assert!(nodes.is_empty()),
            other => panic!("expected NextHop, got {:?}", other),
        }
    }

    #[test]
    fn get_peers_without_stored_peers_returns_token_and_nodes() {
        let handlers = handlers();
        let info_hash = [5u8; 20];
        let response = handlers
            .handle(&Query::GetPeers { id: NodeId::random(), info_hash: NodeId(info_hash) }, source())
            .unwrap();
        match response {
            Response::NextHop { token, .. } => assert!(token.is_some()),
            other => panic!("expected NextHop with a token, got {:?}", other),
        }
    }

    #[test]
    fn announce_peer_with_stale_token_is_rejected() {
        let handlers = handlers();
        let info_hash = NodeId([6u8; 20]);
        let err = handlers
            .handle(
                &Query::AnnouncePeer {
                    id: NodeId::random(),
                    implied_port: true,
                    port: None,
                    info_hash,
                    token: b"bogus".to_vec(),
                },
                source(),
            )
            .unwrap_err();
        assert_eq!(err.code(), 203);
    }

    #[test]
    fn get_peers_then_announce_peer_then_get_peers_round_trips() {
        let handlers = handlers();
        let info_hash = NodeId([7u8; 20]);

        let first = handlers
            .handle(&Query::GetPeers { id: NodeId::random(), info_hash }, source())
            .unwrap();
        let token = match first {
            Response::NextHop { token, .. } => token.unwrap(),
            other => panic!("expected NextHop, got {:?}", other),
        };

        handlers
            .handle(
                &Query::AnnouncePeer {
                    id: NodeId::random(),
                    implied_port: true,
                    port: None,
                    info_hash,
                    token,
                },
                source(),
            )
            .unwrap();

        let second = handlers
            .handle(&Query::GetPeers { id: NodeId::random(), info_hash }, source())
            .unwrap();
        match second {
            Response::GetPeers { peers, .. } => assert_eq!(peers, vec![source()]),
            other => panic!("expected GetPeers with a stored peer, got {:?}", other),
        }
    }
}
