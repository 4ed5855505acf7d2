//! A single routing-table entry (spec §3 Node record).

use chrono::{DateTime, Duration, Utc};
use krpc_encoding::compact::Addr;
use krpc_encoding::NodeId;

/// BEP-5 node quality. `Good`/`Questionable`/`Bad` drive eviction policy:
/// a full, un-splittable bucket only yields a slot when its least-recently
/// seen entry turns out to be `Bad`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NodeQuality {
    Good,
    Questionable,
    Bad,
}

/// How long since a successful exchange a node is still considered `Good`
/// (BEP-5: 15 minutes).
const GOOD_WINDOW: i64 = 15 * 60;

/// Two consecutive failed queries with no intervening success demotes a
/// node to `Bad` (SPEC_FULL.md §3).
const BAD_FAILURE_THRESHOLD: u32 = 2;

#[derive(Clone, Debug)]
pub struct Node {
    pub id: NodeId,
    pub addr: Addr,
    pub last_seen: DateTime<Utc>,
    pub failed_query_count: u32,
}

impl Node {
    pub fn new(id: NodeId, addr: Addr) -> Node {
        Node {
            id,
            addr,
            last_seen: Utc::now(),
            failed_query_count: 0,
        }
    }

    /// Records a successful interaction (we got a response from this node,
    /// or this node sent us a well-formed query), resetting its failure
    /// streak and refreshing `last_seen`.
    pub fn mark_responded(&mut self) {
        self.last_seen = Utc::now();
        self.failed_query_count = 0;
    }

    /// Records a query to this node that went unanswered.
    pub fn mark_failed(&mut self) {
        self.failed_query_count += 1;
    }

    pub fn quality(&self) -> NodeQuality {
        if self.failed_query_count >= BAD_FAILURE_THRESHOLD {
            return NodeQuality::Bad;
        }
        let age = Utc::now().signed_duration_since(self.last_seen);
        if age <= Duration::seconds(GOOD_WINDOW) {
            NodeQuality::Good
        } else {
            NodeQuality::Questionable
        }
    }

    pub fn is_good(&self) -> bool {
        self.quality() == NodeQuality::Good
    }

    pub fn is_bad(&self) -> bool {
        self.quality() == NodeQuality::Bad
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn addr() -> Addr {
        Addr::new(Ipv4Addr::new(127, 0, 0, 1), 6881)
    }

    #[test]
    fn fresh_node_is_good() {
        let node = Node::new(NodeId::random(), addr());
        assert_eq!(node.quality(), NodeQuality::Good);
    }

    #[test]
    fn two_failures_make_a_node_bad() {
        let mut node = Node::new(NodeId::random(), addr());
        node.mark_failed();
        assert_eq!(node.quality(), NodeQuality::Good);
        node.mark_failed();
        assert_eq!(node.quality(), NodeQuality::Bad);
    }

    #[test]
    fn responding_resets_failure_streak() {
        let mut node = Node::new(NodeId::random(), addr());
        node.mark_failed();
        node.mark_responded();
        assert_eq!(node.failed_query_count, 0);
        assert_eq!(node.quality(), NodeQuality::Good);
    }
}
