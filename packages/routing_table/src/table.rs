//! The k-bucket routing table (spec §4.5).
//!
//! Structure follows the teacher's `src/routing/table.rs`: an ordered `Vec`
//! of buckets, located by binary search, split lazily on insert. Eviction
//! and the ping-the-head replacement policy are new — the teacher's version
//! just dropped new nodes when a bucket was full and unsplittable.

use crate::bucket::{Bucket, BucketInsert};
use crate::node::Node;
use chrono::{DateTime, Duration, Utc};
use krpc_encoding::id::Distance;
use krpc_encoding::NodeId;
use std::cmp::Ordering;

/// Bucket refresh interval: a bucket untouched this long gets a `find_node`
/// lookup issued for a random id in its range (spec §4.5, ~15 minutes).
pub const DEFAULT_REFRESH_INTERVAL_SECS: i64 = 15 * 60;

pub const DEFAULT_K: usize = 8;

/// Result of `RoutingTable::insert`, mirroring `BucketInsert` but at the
/// table level (split attempts are transparent to the caller).
#[derive(Debug, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    Refreshed,
    /// The owning bucket is full and unsplittable; the caller must ping
    /// `to_ping` out-of-band and call `resolve_ping_result`.
    PendingPing { to_ping: NodeId },
}

pub struct RoutingTable {
    id: NodeId,
    k: usize,
    buckets: Vec<Bucket>,
}

impl RoutingTable {
    pub fn new(id: NodeId) -> RoutingTable {
        RoutingTable::with_k(id, DEFAULT_K)
    }

    pub fn with_k(id: NodeId, k: usize) -> RoutingTable {
        RoutingTable {
            id,
            k,
            buckets: vec![Bucket::full_range(k)],
        }
    }

    pub fn owner_id(&self) -> NodeId {
        self.id
    }

    pub fn k(&self) -> usize {
        self.k
    }

    pub fn len(&self) -> usize {
        self.buckets.iter().map(Bucket::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn distance_to(&self, id: &NodeId) -> Distance {
        self.id.distance(id)
    }

    /// Locates the bucket covering `distance` via binary search over the
    /// ordered, disjoint, space-covering bucket ranges (spec §8 invariant).
    fn bucket_idx_for(&self, distance: &Distance) -> usize {
        self.buckets
            .binary_search_by(|bucket| {
                if bucket.covers(distance) {
                    Ordering::Equal
                } else if distance.0 < bucket.start {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            })
            .expect("bucket ranges partition the full distance space")
    }

    /// Inserts or refreshes `node`. Never inserts the owner's own id (spec
    /// §3, §4.5 invariant).
    pub fn insert(&mut self, node: Node) -> InsertResult {
        if node.id == self.id {
            return InsertResult::Refreshed;
        }

        let distance = self.distance_to(&node.id);
        let idx = self.bucket_idx_for(&distance);

        match self.buckets[idx].insert(node.clone()) {
            BucketInsert::Inserted => InsertResult::Inserted,
            BucketInsert::Refreshed => InsertResult::Refreshed,
            BucketInsert::Full { to_ping } => {
                if self.buckets[idx].covers_owner() {
                    self.split_bucket(idx);
                    // Retry once against the freshly split pair.
                    return self.insert(node);
                }
                InsertResult::PendingPing { to_ping }
            }
        }
    }

    /// Completes the ping-the-head replacement protocol for a
    /// `PendingPing` outcome: if the head responded, the candidate is
    /// dropped; if not, the head is evicted and the candidate takes its
    /// place (spec §4.5).
    pub fn resolve_ping_result(&mut self, head_responded: bool, candidate: Node) {
        let distance = self.distance_to(&candidate.id);
        let idx = self.bucket_idx_for(&distance);
        if head_responded {
            if let Some(head) = self.buckets[idx].head() {
                let head_id = head.id;
                if let Some(head_mut) = self.buckets[idx].get_mut(&head_id) {
                    head_mut.mark_responded();
                }
            }
        } else {
            self.buckets[idx].evict_head_and_insert(candidate);
        }
    }

    fn split_bucket(&mut self, idx: usize) {
        let upper = self.buckets[idx].split(&self.id);
        self.buckets.insert(idx + 1, upper);
    }

    pub fn remove(&mut self, id: &NodeId) -> Option<Node> {
        let distance = self.distance_to(id);
        let idx = self.bucket_idx_for(&distance);
        self.buckets[idx].remove(id)
    }

    pub fn find(&self, id: &NodeId) -> Option<&Node> {
        let distance = self.distance_to(id);
        let idx = self.bucket_idx_for(&distance);
        self.buckets[idx].get(id)
    }

    /// Returns up to `n` nodes with smallest XOR distance to `target`,
    /// ascending by distance, breaking ties by lexicographic node id (spec
    /// §4.9 tie-break rule also applies here).
    pub fn closest(&self, target: &NodeId, n: usize) -> Vec<Node> {
        let mut candidates: Vec<&Node> = self.buckets.iter().flat_map(Bucket::iter).collect();
        candidates.sort_by(|a, b| {
            let da = target.distance(&a.id);
            let db = target.distance(&b.id);
            da.cmp(&db).then_with(|| a.id.cmp(&b.id))
        });
        candidates.into_iter().take(n).cloned().collect()
    }

    /// Buckets whose `last_changed` is older than `interval` — candidates
    /// for a refresh lookup (spec §4.5).
    pub fn stale_buckets(&self, interval_secs: i64) -> Vec<(usize, krpc_encoding::id::NodeId)> {
        let now: DateTime<Utc> = Utc::now();
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, bucket)| now.signed_duration_since(bucket.last_changed) > Duration::seconds(interval_secs))
            .map(|(idx, bucket)| (idx, self.random_id_in_bucket(bucket)))
            .collect()
    }

    fn random_id_in_bucket(&self, bucket: &Bucket) -> NodeId {
        // A random distance within [start, end) XORed back against the
        // owner id yields a node id actually inside the bucket's range.
        use krpc_encoding::id::ID_LEN;
        use num_bigint::{BigUint, RandBigInt};

        let width = &bucket.end - &bucket.start;
        let mut rng = rand::thread_rng();
        let offset = if width == BigUint::from(0u8) {
            BigUint::from(0u8)
        } else {
            rng.gen_biguint_below(&width)
        };
        let distance = &bucket.start + offset;

        let distance_bytes = distance.to_bytes_be();
        let mut padded = [0u8; ID_LEN];
        let start = ID_LEN.saturating_sub(distance_bytes.len());
        let take = distance_bytes.len().min(ID_LEN);
        padded[start..].copy_from_slice(&distance_bytes[distance_bytes.len() - take..]);

        let mut xored = [0u8; ID_LEN];
        for i in 0..ID_LEN {
            xored[i] = self.id.as_bytes()[i] ^ padded[i];
        }
        NodeId::from(xored)
    }

    /// All `(NodeId, Addr)` pairs in the table, for persistence (spec §4.5,
    /// §6 snapshot format). Bucket structure is intentionally not
    /// persisted; `RoutingTable::insert` re-establishes it on load.
    pub fn snapshot_entries(&self) -> Vec<(NodeId, krpc_encoding::compact::Addr)> {
        self.buckets
            .iter()
            .flat_map(Bucket::iter)
            .map(|node| (node.id, node.addr))
            .collect()
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
    fn owner_id_is_never_inserted() {
        let owner = NodeId::random();
        let mut table = RoutingTable::new(owner);
        table.insert(Node::new(owner, addr()));
        assert!(table.is_empty());
    }

    #[test]
    fn insert_then_find_round_trips() {
        let mut table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();
        table.insert(Node::new(id, addr()));
        assert!(table.find(&id).is_some());
    }

    #[test]
    fn bucket_splits_when_full_and_covers_owner() {
        let owner = NodeId::random();
        let mut table = RoutingTable::with_k(owner, 2);
        for _ in 0..3 {
            table.insert(Node::new(NodeId::random(), addr()));
        }
        assert!(table.bucket_count() >= 2);
    }

    #[test]
    fn closest_returns_at_most_n_sorted_by_distance() {
        let owner = NodeId::random();
        let mut table = RoutingTable::with_k(owner, 8);
        for _ in 0..20 {
            table.insert(Node::new(NodeId::random(), addr()));
        }
        let target = NodeId::random();
        let closest = table.closest(&target, 5);
        assert!(closest.len() <= 5);
        for pair in closest.windows(2) {
            let d0 = target.distance(&pair[0].id);
            let d1 = target.distance(&pair[1].id);
            assert!(d0 <= d1);
        }
    }

    #[test]
    fn insert_twice_is_idempotent_on_membership() {
        let mut table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();
        table.insert(Node::new(id, addr()));
        let before = table.len();
        table.insert(Node::new(id, addr()));
        assert_eq!(table.len(), before);
    }

    #[test]
    fn remove_drops_the_node() {
        let mut table = RoutingTable::new(NodeId::random());
        let id = NodeId::random();
        table.insert(Node::new(id, addr()));
        table.remove(&id);
        assert!(table.find(&id).is_none());
    }
}
