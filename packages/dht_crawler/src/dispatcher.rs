//! Decodes inbound frames and routes them (spec §4.7): a query goes to
//! `QueryHandlers`, a response or error completes the matching transaction,
//! and the sender of either is folded into the routing table (spec §4.5
//! "any exchange refreshes the sender's entry").
//!
//! Grounded in the teacher's `src/peer/response.rs` dispatch shape, rebuilt
//! around the two-phase `decode_raw_response`/`promote_response` split
//! (spec §4.1, §4.7, §9 Design Notes) since `Response` can't self-describe
//! its shape.

use crate::handlers::QueryHandlers;
use krpc_encoding::compact::Addr;
use krpc_encoding::messages::{Message, MessageType};
use krpc_encoding::{Codec, NodeId};
use routing_table::{InsertResult, Node};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_krpc::{OutboundClient, OutboundSender, TransactionManager};

pub struct MessageDispatcher {
    own_id: NodeId,
    codec: Codec,
    sender: OutboundSender,
    transactions: Arc<TransactionManager>,
    handlers: Arc<QueryHandlers>,
    outbound: OutboundClient,
}

impl MessageDispatcher {
    pub fn new(
        own_id: NodeId,
        sender: OutboundSender,
        transactions: Arc<TransactionManager>,
        handlers: Arc<QueryHandlers>,
        outbound: OutboundClient,
    ) -> MessageDispatcher {
        MessageDispatcher {
            own_id,
            codec: Codec::new(),
            sender,
            transactions,
            handlers,
            outbound,
        }
    }

    /// Drains `rx` until the channel closes, dispatching each frame in turn.
    /// Intended to be spawned as its own task (spec §5).
    pub async fn run(&self, mut rx: mpsc::Receiver<(Vec<u8>, SocketAddr)>) {
        while let Some((bytes, source)) = rx.recv().await {
            self.dispatch(bytes, source).await;
        }
    }

    async fn dispatch(&self, bytes: Vec<u8>, source: SocketAddr) {
        match self.codec.decode_raw_response(&bytes) {
            Ok(envelope) => {
                self.observe(envelope.id, source);
                match self.transactions.peek_method(&envelope.transaction_id) {
                    Some(method) => match self.codec.promote_response(&bytes, method) {
                        Ok(message) => self.transactions.on_response(&envelope.transaction_id, source, message),
                        Err(err) => log::debug!("dropping response from {} with unexpected shape: {}", source, err),
                    },
                    None => log::debug!("dropping response from {} for unknown transaction {:?}", source, envelope.transaction_id),
                }
            }
            Err(err) => match err.kind() {
                krpc_encoding::ErrorKind::NotAResponse { y } if y == "q" => self.dispatch_query(bytes, source).await,
                krpc_encoding::ErrorKind::NotAResponse { y } if y == "e" => self.dispatch_error(bytes, source),
                _ => log::debug!("dropping malformed frame from {}: {}", source, err),
            },
        }
    }

    async fn dispatch_query(&self, bytes: Vec<u8>, source: SocketAddr) {
        let message = match self.codec.decode(&bytes) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("dropping malformed query from {}: {}", source, err);
                return;
            }
        };

        let (query, sender_id) = match (&message.message_type, message.sender_id()) {
            (MessageType::Query { query }, Some(id)) => (query, id),
            _ => return,
        };
        self.observe(sender_id, source);

        let source_addr = match to_compact_addr(source) {
            Some(addr) => addr,
            None => return,
        };

        let reply = match self.handlers.handle(query, source_addr) {
            Ok(response) => Message::new_response(message.transaction_id.clone(), response),
            Err(error) => Message::new_error(message.transaction_id.clone(), error),
        };

        match self.codec.encode(&reply) {
            Ok(bytes) => {
                if let Err(err) = self.sender.send(&bytes, source).await {
                    log::warn!("failed to send reply to {}: {}", source, err);
                }
            }
            Err(err) => log::warn!("failed to encode reply to {}: {}", source, err),
        }
    }

    fn dispatch_error(&self, bytes: Vec<u8>, source: SocketAddr) {
        let message = match self.codec.decode(&bytes) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("dropping malformed error frame from {}: {}", source, err);
                return;
            }
        };
        if let MessageType::Error { error } = message.message_type {
            self.transactions.on_error(&message.transaction_id, source, error);
        }
    }

    /// Folds a sender into the routing table, kicking off the ping-the-head
    /// replacement protocol in the background when the owning bucket is
    /// full (spec §4.5).
    fn observe(&self, id: NodeId, source: SocketAddr) {
        if id == self.own_id {
            return;
        }
        let addr = match to_compact_addr(source) {
            Some(addr) => addr,
            None => return,
        };
        let node = Node::new(id, addr);

        let result = {
            let mut table = self.handlers.table().lock().unwrap();
            table.insert(node.clone())
        };

        if let InsertResult::PendingPing { to_ping } = result {
            self.spawn_head_ping(to_ping, node);
        }
    }

    fn spawn_head_ping(&self, to_ping: NodeId, candidate: Node) {
        let head_addr = {
            let table = self.handlers.table().lock().unwrap();
            table.find(&to_ping).map(|n| n.addr)
        };
        let head_addr = match head_addr {
            Some(addr) => addr,
            None => return,
        };

        let outbound = self.outbound.clone();
        let handlers = self.handlers.clone();
        let own_id = self.own_id;
        let destination = SocketAddr::V4(std::net::SocketAddrV4::from(head_addr));

        tokio::spawn(async move {
            let responded = outbound.ping(own_id, destination).await.is_ok();
            let mut table = handlers.table().lock().unwrap();
            table.resolve_ping_result(responded, candidate);
        });
    }
}

pub(crate) fn to_compact_addr(addr: SocketAddr) -> Option<Addr> {
    match addr {
        SocketAddr::V4(v4) => Some(Addr::from(v4)),
        SocketAddr::V6(_) => {
            log::debug!("ignoring IPv6 peer {} (compact wire format is IPv4-only)", addr);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_store::PeerStore;
    use crate::token_store::TokenStore;
    use krpc_encoding::messages::Query;
    use routing_table::RoutingTable;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_krpc::SocketPump;

    async fn build() -> MessageDispatcher {
        let own_id = NodeId::random();
        let pump = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let transactions = Arc::new(TransactionManager::new());
        let outbound = OutboundClient::new(pump.sender(), transactions.clone());
        let handlers = Arc::new(QueryHandlers::new(
            own_id,
            Arc::new(Mutex::new(RoutingTable::new(own_id))),
            Arc::new(TokenStore::new(Duration::from_secs(600))),
            Arc::new(PeerStore::new(Duration::from_secs(1800), 100)),
        ));
        MessageDispatcher::new(own_id, pump.sender(), transactions, handlers, outbound)
    }

    #[tokio::test]
    async fn ping_query_gets_a_reply_sent_back() {
        let dispatcher = build().await;
        let responder = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let responder_addr = responder.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            responder.run_recv_loop(tx).await;
        });

        let codec = Codec::new();
        let query = Message::new_query(vec![b'a', b'a'], Query::Ping { id: NodeId::random() });
        let bytes = codec.encode(&query).unwrap();

        dispatcher.dispatch(bytes, responder_addr).await;

        let (frame, _source) = rx.recv().await.unwrap();
        let reply = codec.decode(&frame).unwrap();
        assert!(matches!(reply.message_type, MessageType::Response { .. }));
    }

    #[tokio::test]
    async fn unknown_transaction_response_does_not_panic() {
        let dispatcher = build().await;
        let codec = Codec::new();
        let msg = Message::new_response(vec![9, 9], krpc_encoding::messages::Response::OnlyId { id: NodeId::random() });
        let bytes = codec.encode(&msg).unwrap();
        dispatcher.dispatch(bytes, "127.0.0.1:6881".parse().unwrap()).await;
    }
}
