//! Typed outbound query helpers, the modern equivalent of the teacher's
//! `transport::send::SendTransport` (`ping`/`find_node`/`get_peers`/
//! `announce_peer`), rebuilt on `async fn` + the oneshot-based
//! `TransactionManager` instead of a hand-polled `Future`.

use crate::errors::{Error, ErrorKind, Result};
use crate::socket_pump::OutboundSender;
use crate::transaction::{TransactionManager, TransactionOutcome};
use krpc_encoding::messages::{Method, Query, Response};
use krpc_encoding::{Codec, InfoHash, NodeId};
use std::net::SocketAddr;
use std::sync::Arc;

/// How the announcing peer's port should be conveyed (spec §4.8).
#[derive(Clone, Copy)]
pub enum PortSpec {
    Implied,
    Explicit(u16),
}

/// Bundles what every outbound call needs: where to send, how to correlate
/// the reply, and how to encode it.
#[derive(Clone)]
pub struct OutboundClient {
    sender: OutboundSender,
    transactions: Arc<TransactionManager>,
    codec: Codec,
}

impl OutboundClient {
    pub fn new(sender: OutboundSender, transactions: Arc<TransactionManager>) -> OutboundClient {
        OutboundClient {
            sender,
            transactions,
            codec: Codec::new(),
        }
    }

    async fn roundtrip(&self, destination: SocketAddr, method: Method, query: Query) -> Result<Response> {
        let (tx_id, rx) = self.transactions.create(method, destination)?;
        let message = krpc_encoding::messages::Message::new_query(tx_id.clone(), query);
        let bytes = self.codec.encode(&message)?;
        self.sender.send(&bytes, destination).await?;

        match rx.await {
            Ok(TransactionOutcome::Response { message, .. }) => match message.message_type {
                krpc_encoding::messages::MessageType::Response { response } => Ok(response),
                _ => Err(Error::from(ErrorKind::UnexpectedOutcome)),
            },
            Ok(TransactionOutcome::Error { error, .. }) => Err(Error::from(ErrorKind::RemoteError(error))),
            Ok(TransactionOutcome::Timeout) => Err(Error::from(ErrorKind::Timeout { transaction_id: tx_id })),
            Err(_) => Err(Error::from(ErrorKind::Cancelled)),
        }
    }

    pub async fn ping(&self, own_id: NodeId, destination: SocketAddr) -> Result<NodeId> {
        let response = self.roundtrip(destination, Method::Ping, Query::Ping { id: own_id }).await?;
        Ok(response.id())
    }

    pub async fn find_node(&self, own_id: NodeId, destination: SocketAddr, target: NodeId) -> Result<Response> {
        self.roundtrip(destination, Method::FindNode, Query::FindNode { id: own_id, target }).await
    }

    pub async fn get_peers(&self, own_id: NodeId, destination: SocketAddr, info_hash: InfoHash) -> Result<Response> {
        self.roundtrip(
            destination,
            Method::GetPeers,
            Query::GetPeers { id: own_id, info_hash: NodeId(info_hash.0) },
        )
        .await
    }

    pub async fn announce_peer(
        &self,
        own_id: NodeId,
        destination: SocketAddr,
        info_hash: InfoHash,
        token: Vec<u8>,
        port: PortSpec,
    ) -> Result<NodeId> {
        let (implied_port, port) = match port {
            PortSpec::Implied => (true, None),
            PortSpec::Explicit(p) => (false, Some(p)),
        };
        let response = self
            .roundtrip(
                destination,
                Method::AnnouncePeer,
                Query::AnnouncePeer {
                    id: own_id,
                    implied_port,
                    port,
                    info_hash: NodeId(info_hash.0),
                    token,
                },
            )
            .await?;
        Ok(response.id())
    }
}
