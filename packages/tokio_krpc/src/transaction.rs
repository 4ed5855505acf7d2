//! Correlates outbound queries with inbound responses/timeouts (spec §4.6).
//!
//! Unlike the teacher's `response_future.rs`/`response.rs` (a hand-rolled
//! `Future` that polls a shared map and stashes a waker inside the lock —
//! the exact "callbacks fire from inside the lock" hazard the spec's Design
//! Notes call out), completion here is a single `tokio::sync::oneshot`
//! channel per transaction. The sender lives in the table under the lock;
//! it is taken out and the lock dropped *before* `send` is called, so no
//! reentrancy is possible and no recursive mutex is needed.

use crate::errors::{ErrorKind, Result};
use krpc_encoding::messages::{KRPCError, Message, Method, TransactionId};
use rand::RngCore;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

pub const DEFAULT_MAX_TRANSACTIONS: usize = 1024;
pub const DEFAULT_TX_TIMEOUT_SECS: u64 = 30;

/// The terminal state of a transaction. Exactly one of these is ever sent
/// on a transaction's channel (spec §3 Transaction lifecycle).
#[derive(Debug)]
pub enum TransactionOutcome {
    Response { message: Message, source: SocketAddr },
    Error { error: KRPCError, source: SocketAddr },
    Timeout,
}

struct Entry {
    destination: SocketAddr,
    method: Method,
    created_at: Instant,
    completion: Option<oneshot::Sender<TransactionOutcome>>,
}

pub struct TransactionManager {
    entries: Mutex<HashMap<TransactionId, Entry>>,
    max_transactions: usize,
    timeout: Duration,
}

impl TransactionManager {
    pub fn new() -> TransactionManager {
        TransactionManager::with_limits(DEFAULT_MAX_TRANSACTIONS, Duration::from_secs(DEFAULT_TX_TIMEOUT_SECS))
    }

    pub fn with_limits(max_transactions: usize, timeout: Duration) -> TransactionManager {
        TransactionManager {
            entries: Mutex::new(HashMap::new()),
            max_transactions,
            timeout,
        }
    }

    pub fn active_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Allocates a fresh, unique transaction id and registers it. Returns
    /// the id to stamp onto the outbound query and a receiver that resolves
    /// exactly once with the terminal outcome (spec §3, §4.6).
    pub fn create(
        &self,
        method: Method,
        destination: SocketAddr,
    ) -> Result<(TransactionId, oneshot::Receiver<TransactionOutcome>)> {
        let mut entries = self.entries.lock().unwrap();
        if entries.len() >= self.max_transactions {
            return Err(ErrorKind::CapacityExceeded { capacity: self.max_transactions }.into());
        }

        let id = loop {
            let candidate = random_transaction_id();
            if !entries.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = oneshot::channel();
        entries.insert(
            id.clone(),
            Entry {
                destination,
                method,
                created_at: Instant::now(),
                completion: Some(tx),
            },
        );
        Ok((id, rx))
    }

    /// The method of the transaction matching `id`, without consuming it —
    /// used by the dispatcher to promote a raw response decode (spec §4.1,
    /// §4.7, §9 Design Notes).
    pub fn peek_method(&self, id: &TransactionId) -> Option<Method> {
        self.entries.lock().unwrap().get(id).map(|e| e.method)
    }

    pub fn on_response(&self, id: &TransactionId, source: SocketAddr, message: Message) {
        self.complete(id, source, |sender| {
            let _ = sender.send(TransactionOutcome::Response { message, source });
        });
    }

    pub fn on_error(&self, id: &TransactionId, source: SocketAddr, error: KRPCError) {
        self.complete(id, source, |sender| {
            let _ = sender.send(TransactionOutcome::Error { error, source });
        });
    }

    fn complete(&self, id: &TransactionId, source: SocketAddr, finish: impl FnOnce(oneshot::Sender<TransactionOutcome>)) {
        let sender = {
            let mut entries = self.entries.lock().unwrap();
            match entries.remove(id) {
                Some(mut entry) => {
                    if entry.destination != source {
                        // NATs can rewrite the source port mid-flight; we
                        // tolerate the mismatch rather than drop the reply
                        // (spec §4.6 policy knob).
                        log::debug!(
                            "transaction {:?} reply from {} did not match expected {}",
                            id, source, entry.destination
                        );
                    }
                    entry.completion.take()
                }
                None => None,
            }
        };

        if let Some(sender) = sender {
            finish(sender);
        } else {
            log::debug!("dropping reply for unknown transaction {:?}", id);
        }
    }

    /// Scans for transactions older than the configured timeout and fires
    /// their timeout outcome. O(active transactions) per call — fine at the
    /// `MAX_TRANSACTIONS` scale this spec targets; an implementation
    /// expecting ten-thousands of in-flight transactions should replace
    /// this with a timer wheel or a min-heap keyed by deadline (spec §9
    /// Design Notes).
    pub fn check_timeouts(&self) {
        let expired: Vec<(TransactionId, oneshot::Sender<TransactionOutcome>)> = {
            let mut entries = self.entries.lock().unwrap();
            let now = Instant::now();
            let expired_ids: Vec<TransactionId> = entries
                .iter()
                .filter(|(_, entry)| now.duration_since(entry.created_at) >= self.timeout)
                .map(|(id, _)| id.clone())
                .collect();

            expired_ids
                .into_iter()
                .filter_map(|id| {
                    entries.remove(&id).and_then(|mut e| e.completion.take()).map(|s| (id, s))
                })
                .collect()
        };

        for (id, sender) in expired {
            log::debug!("transaction {:?} timed out", id);
            let _ = sender.send(TransactionOutcome::Timeout);
        }
    }
}

impl Default for TransactionManager {
    fn default() -> TransactionManager {
        TransactionManager::new()
    }
}

fn random_transaction_id() -> TransactionId {
    let mut bytes = [0u8; 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::messages::{Method, Response};
    use krpc_encoding::NodeId;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:6881".parse().unwrap()
    }

    #[tokio::test]
    async fn response_completes_the_matching_transaction() {
        let manager = TransactionManager::new();
        let (id, rx) = manager.create(Method::Ping, addr()).unwrap();

        let msg = Message::new_response(id.clone(), Response::OnlyId { id: NodeId::random() });
        manager.on_response(&id, addr(), msg);

        let outcome = rx.await.unwrap();
        matches!(outcome, TransactionOutcome::Response { .. });
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test]
    async fn timeout_fires_when_no_reply_arrives() {
        let manager = TransactionManager::with_limits(16, Duration::from_millis(1));
        let (_, rx) = manager.create(Method::Ping, addr()).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        manager.check_timeouts();
        let outcome = rx.await.unwrap();
        assert!(matches!(outcome, TransactionOutcome::Timeout));
    }

    #[tokio::test]
    async fn capacity_exceeded_fails_creation() {
        let manager = TransactionManager::with_limits(1, Duration::from_secs(30));
        let _first = manager.create(Method::Ping, addr()).unwrap();
        assert!(manager.create(Method::Ping, addr()).is_err());
    }

    #[tokio::test]
    async fn unknown_transaction_reply_is_dropped_silently() {
        let manager = TransactionManager::new();
        let msg = Message::new_response(vec![9, 9], Response::OnlyId { id: NodeId::random() });
        manager.on_response(&vec![9, 9], addr(), msg);
        assert_eq!(manager.active_count(), 0);
    }
}
