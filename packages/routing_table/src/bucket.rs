//! A single k-bucket: a bounded, LRU-ordered set of nodes covering a
//! contiguous slice of the owner-relative distance space `[start, end)`
//! (spec §3 k-bucket, §4.5).

use crate::node::Node;
use chrono::{DateTime, Utc};
use krpc_encoding::id::Distance;
use krpc_encoding::NodeId;
use num_bigint::BigUint;

#[derive(Debug)]
pub struct Bucket {
    /// Inclusive lower bound of the distance range this bucket covers.
    pub start: BigUint,
    /// Exclusive upper bound.
    pub end: BigUint,
    /// Ordered least-recently-seen (head, index 0) to most-recently-seen
    /// (tail, last index).
    nodes: Vec<Node>,
    capacity: usize,
    pub last_changed: DateTime<Utc>,
}

/// Outcome of attempting to insert a node into a single bucket.
pub enum BucketInsert {
    /// The node was new and there was room; it now occupies the tail.
    Inserted,
    /// The node already existed; its position/timestamps were refreshed.
    Refreshed,
    /// The bucket is full and not splittable. The caller should ping
    /// `to_ping` (the least-recently-seen entry); if it responds, the
    /// candidate is dropped, if not, the caller should evict `to_ping` and
    /// retry the insert (spec §4.5).
    Full { to_ping: NodeId },
}

impl Bucket {
    pub fn new(start: BigUint, end: BigUint, capacity: usize) -> Bucket {
        Bucket {
            start,
            end,
            nodes: Vec::new(),
            capacity,
            last_changed: Utc::now(),
        }
    }

    /// The bucket spanning the entire 160-bit distance space, the routing
    /// table's initial single-bucket state.
    pub fn full_range(capacity: usize) -> Bucket {
        let end = BigUint::from(1u8) << 160;
        Bucket::new(BigUint::from(0u8), end, capacity)
    }

    pub fn covers(&self, distance: &Distance) -> bool {
        distance.0 >= self.start && distance.0 < self.end
    }

    pub fn is_full(&self) -> bool {
        self.nodes.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// A bucket is splittable only if it covers the owner's own distance
    /// (zero) — standard Kademlia restriction that keeps the table at
    /// O(k log n) instead of splitting every bucket to full depth.
    pub fn covers_owner(&self) -> bool {
        self.start == BigUint::from(0u8)
    }

    pub fn get(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| &n.id == id)
    }

    pub fn get_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| &n.id == id)
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        let idx = self.nodes.iter().position(|n| &n.id == id)?;
        self.last_changed = Utc::now();
        Some(self.nodes.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    pub fn good_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter().filter(|n| n.is_good())
    }

    /// Head of the LRU order: the least-recently-seen entry, the one
    /// consulted before evicting from a full bucket.
    pub fn head(&self) -> Option<&Node> {
        self.nodes.first()
    }

    fn move_to_tail(&mut self, id: &NodeId) {
        if let Some(idx) = self.nodes.iter().position(|n| &n.id == id) {
            let node = self.nodes.remove(idx);
            self.nodes.push(node);
        }
    }

    /// Attempts to insert or refresh `node`. Does not itself split or evict
    /// across the ping-replacement protocol — see `BucketInsert`.
    pub fn insert(&mut self, node: Node) -> BucketInsert {
        if let Some(existing) = self.get_mut(&node.id) {
            existing.mark_responded();
            existing.addr = node.addr;
            self.move_to_tail(&node.id);
            self.last_changed = Utc::now();
            return BucketInsert::Refreshed;
        }

        if !self.is_full() {
            self.nodes.push(node);
            self.last_changed = Utc::now();
            return BucketInsert::Inserted;
        }

        // Full: first see whether a `Bad` node can simply be evicted outright
        // without consulting the network (spec §4.5: "unless an existing
        // entry's quality drops to bad").
        if let Some(bad_idx) = self.nodes.iter().position(|n| n.is_bad()) {
            self.nodes.remove(bad_idx);
            self.nodes.push(node);
            self.last_changed = Utc::now();
            return BucketInsert::Inserted;
        }

        BucketInsert::Full {
            to_ping: self.head().expect("full bucket has a head").id,
        }
    }

    /// Forces `node` into the bucket, evicting the current head. Used after
    /// the caller has pinged the head and found it unresponsive.
    pub fn evict_head_and_insert(&mut self, node: Node) {
        if !self.nodes.is_empty() {
            self.nodes.remove(0);
        }
        self.nodes.push(node);
        self.last_changed = Utc::now();
    }

    /// Splits this bucket at its midpoint, returning the new upper-half
    /// bucket and redistributing this bucket's contents between the two
    /// based on each node's distance from `owner` (spec §4.5, §8 invariant:
    /// union of children equals parent range, intersection empty).
    pub fn split(&mut self, owner: &NodeId) -> Bucket {
        let mid = &self.start + (&self.end - &self.start) / 2u8;
        let mut upper = Bucket::new(mid.clone(), self.end.clone(), self.capacity);
        let lower_end = mid.clone();

        let (keep, move_out): (Vec<Node>, Vec<Node>) = self
            .nodes
            .drain(..)
            .partition(|n| owner.distance(&n.id).0 < lower_end);

        self.end = mid;
        self.nodes = keep;
        upper.nodes = move_out;
        self.last_changed = Utc::now();
        upper.last_changed = Utc::now();
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::compact::Addr;
    use std::net::Ipv4Addr;

    fn addr() -> Addr {
        Addr::new(Ipv4Addr::new(127, 0, 0, 1), 6881)
    }

    #[test]
    fn full_range_covers_zero_and_max() {
        let bucket = Bucket::full_range(8);
        assert!(bucket.covers(&Distance(BigUint::from(0u8))));
        assert!(bucket.covers_owner());
    }

    #[test]
    fn insert_refreshes_existing_node() {
        let mut bucket = Bucket::full_range(8);
        let id = NodeId::random();
        bucket.insert(Node::new(id, addr()));
        match bucket.insert(Node::new(id, addr())) {
            BucketInsert::Refreshed => {}
            _ => panic!("expected refresh"),
        }
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn full_bucket_reports_head_to_ping() {
        let mut bucket = Bucket::new(BigUint::from(1u8), BigUint::from(2u8), 2);
        bucket.insert(Node::new(NodeId::random(), addr()));
        bucket.insert(Node::new(NodeId::random(), addr()));
        let third = Node::new(NodeId::random(), addr());
        match bucket.insert(third) {
            BucketInsert::Full { .. } => {}
            _ => panic!("expected full"),
        }
    }
}
