//! Storage for peers announced against an info_hash (spec §4.4).
//!
//! Grounded in `original_source/dht_peer_storage.cpp`: a map of info_hash to
//! a bounded, TTL-expiring set of peer contacts, with a periodic sweep
//! rather than per-lookup pruning.

use chrono::{DateTime, Utc};
use krpc_encoding::compact::Addr;
use krpc_encoding::InfoHash;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

struct Entry {
    addr: Addr,
    announced_at: DateTime<Utc>,
}

pub struct PeerStore {
    entries: Mutex<HashMap<InfoHash, Vec<Entry>>>,
    ttl: Duration,
    max_per_infohash: usize,
}

impl PeerStore {
    pub fn new(ttl: Duration, max_per_infohash: usize) -> PeerStore {
        PeerStore {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_per_infohash,
        }
    }

    /// Records `addr` as a peer for `info_hash`. Re-announcing refreshes the
    /// timestamp rather than duplicating the entry. When the per-info_hash
    /// cap is already reached, the oldest entry is evicted to make room
    /// (spec §4.4 "bounded per info_hash").
    pub fn announce(&self, info_hash: InfoHash, addr: Addr) {
        let mut entries = self.entries.lock().unwrap();
        let bucket = entries.entry(info_hash).or_insert_with(Vec::new);

        if let Some(existing) = bucket.iter_mut().find(|e| e.addr == addr) {
            existing.announced_at = Utc::now();
            return;
        }

        if bucket.len() >= self.max_per_infohash {
            if let Some((oldest_idx, _)) = bucket
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.announced_at)
            {
                bucket.remove(oldest_idx);
            }
        }
        bucket.push(Entry { addr, announced_at: Utc::now() });
    }

    /// Returns up to `limit` live (non-expired) peers for `info_hash`.
    pub fn get_peers(&self, info_hash: &InfoHash, limit: usize) -> Vec<Addr> {
        let entries = self.entries.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        match entries.get(info_hash) {
            Some(bucket) => bucket
                .iter()
                .filter(|e| e.announced_at >= cutoff)
                .take(limit)
                .map(|e| e.addr)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Drops every entry past its TTL, and any info_hash left with no
    /// peers. Run on a timer by the engine (spec §4.4, §5).
    pub fn sweep_expired(&self) {
        let mut entries = self.entries.lock().unwrap();
        let cutoff = Utc::now() - chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        entries.retain(|_, bucket| {
            bucket.retain(|e| e.announced_at >= cutoff);
            !bucket.is_empty()
        });
    }

    pub fn info_hash_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn peer_count(&self, info_hash: &InfoHash) -> usize {
        self.entries
            .lock()
            .unwrap()
            .get(info_hash)
            .map(|b| b.len())
            .unwrap_or(0)
    }

    /// Every live entry as `(info_hash, addr, ttl_remaining_seconds)`, for
    /// the persistence snapshot (spec §6).
    pub fn snapshot_entries(&self) -> Vec<(InfoHash, Addr, i64)> {
        let entries = self.entries.lock().unwrap();
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::zero());
        let now = Utc::now();
        entries
            .iter()
            .flat_map(|(info_hash, bucket)| {
                bucket.iter().map(move |e| {
                    let remaining = ttl - now.signed_duration_since(e.announced_at);
                    (*info_hash, e.addr, remaining.num_seconds().max(0))
                })
            })
            .collect()
    }

    /// Re-inserts a peer restored from a snapshot with an already-elapsed
    /// clock: `announced_at` is backdated so the remembered TTL still
    /// expires at (approximately) the original time.
    pub fn restore_entry(&self, info_hash: InfoHash, addr: Addr, ttl_remaining_seconds: i64) {
        let mut entries = self.entries.lock().unwrap();
        let age = self.ttl.as_secs() as i64 - ttl_remaining_seconds.max(0);
        let announced_at = Utc::now() - chrono::Duration::seconds(age.max(0));
        entries.entry(info_hash).or_insert_with(Vec::new).push(Entry { addr, announced_at });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krpc_encoding::id::ID_LEN;
    use std::net::Ipv4Addr;

    fn addr(port: u16) -> Addr {
        Addr::new(Ipv4Addr::new(198, 51, 100, 7), port)
    }

    #[test]
    fn announce_then_get_peers_round_trips() {
        let store = PeerStore::new(Duration::from_secs(1800), 100);
        let hash = InfoHash([7u8; ID_LEN]);
        store.announce(hash, addr(6881));
        store.announce(hash, addr(6882));
        let peers = store.get_peers(&hash, 10);
        assert_eq!(peers.len(), 2);
    }

    #[test]
    fn re_announce_does_not_duplicate() {
        let store = PeerStore::new(Duration::from_secs(1800), 100);
        let hash = InfoHash([1u8; ID_LEN]);
        store.announce(hash, addr(6881));
        store.announce(hash, addr(6881));
        assert_eq!(store.peer_count(&hash), 1);
    }

    #[test]
    fn cap_evicts_oldest_entry() {
        let store = PeerStore::new(Duration::from_secs(1800), 2);
        let hash = InfoHash([2u8; ID_LEN]);
        store.announce(hash, addr(1));
        store.announce(hash, addr(2));
        store.announce(hash, addr(3));
        assert_eq!(store.peer_count(&hash), 2);
        let peers = store.get_peers(&hash, 10);
        assert!(peers.contains(&addr(3)));
    }

    #[test]
    fn sweep_removes_expired_entries_and_empty_buckets() {
        let store = PeerStore::new(Duration::from_millis(0), 100);
        let hash = InfoHash([3u8; ID_LEN]);
        store.announce(hash, addr(6881));
        store.sweep_expired();
        assert_eq!(store.info_hash_count(), 0);
    }

    #[test]
    fn unknown_info_hash_returns_no_peers() {
        let store = PeerStore::new(Duration::from_secs(1800), 100);
        let hash = InfoHash([9u8; ID_LEN]);
        assert!(store.get_peers(&hash, 10).is_empty());
    }
}
