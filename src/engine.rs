//! # Gossip Engine State
//!
//! Two fixed-capacity FIFO rings back the epidemic protocol:
//!
//! - [`SeenSet`]: recently observed message ids. Membership here is the
//!   definition of "already seen"; it is what stops re-floods. Eviction is
//!   FIFO, so an id can fall out and be re-processed later. That staleness
//!   is accepted; the TTL bounds how far such a re-flood can travel.
//! - [`GossipStore`]: the serialized wire form of recently observed GOSSIP
//!   messages, kept solely to answer IWANT solicitations. Serving the
//!   stored bytes verbatim preserves the id and TTL exactly as observed at
//!   store time.
//!
//! Lookup is a linear scan. At these capacities that is cheap, and the
//! ring keeps memory strictly bounded.

use std::collections::VecDeque;

/// Capacity of the seen-set ring.
pub const MAX_SEEN_MSGS: usize = 2000;

/// Capacity of the gossip store ring.
pub const MAX_STORED_GOSSIP: usize = 500;

/// FIFO ring of recently observed message ids.
#[derive(Debug, Default)]
pub struct SeenSet {
    ring: VecDeque<String>,
}

impl SeenSet {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(MAX_SEEN_MSGS),
        }
    }

    /// Record `id` as seen. Returns `true` iff it was new.
    pub fn mark_seen(&mut self, id: &str) -> bool {
        if self.contains(id) {
            return false;
        }
        if self.ring.len() == MAX_SEEN_MSGS {
            self.ring.pop_front();
        }
        self.ring.push_back(id.to_string());
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ring.iter().any(|seen| seen == id)
    }

    /// Up to `limit` ids, most recent first. Feeds IHAVE digests.
    pub fn recent_ids(&self, limit: usize) -> Vec<String> {
        self.ring.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// One stored GOSSIP: its id and the exact bytes it arrived (or left) as.
#[derive(Debug)]
struct StoredGossip {
    msg_id: String,
    bytes: Vec<u8>,
}

/// FIFO ring of serialized GOSSIP messages for IWANT service.
#[derive(Debug, Default)]
pub struct GossipStore {
    ring: VecDeque<StoredGossip>,
}

impl GossipStore {
    pub fn new() -> Self {
        Self {
            ring: VecDeque::with_capacity(MAX_STORED_GOSSIP),
        }
    }

    /// Insert a message, evicting the oldest entry when full. Callers
    /// insert only on first observation, so ids are not deduplicated here.
    pub fn insert(&mut self, msg_id: &str, bytes: Vec<u8>) {
        if self.ring.len() == MAX_STORED_GOSSIP {
            self.ring.pop_front();
        }
        self.ring.push_back(StoredGossip {
            msg_id: msg_id.to_string(),
            bytes,
        });
    }

    /// The stored bytes for `msg_id`, if it has not been evicted.
    pub fn lookup(&self, msg_id: &str) -> Option<&[u8]> {
        self.ring
            .iter()
            .find(|s| s.msg_id == msg_id)
            .map(|s| s.bytes.as_slice())
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_is_new_then_duplicate() {
        let mut seen = SeenSet::new();
        assert!(seen.mark_seen("X"));
        assert!(!seen.mark_seen("X"));
        assert!(seen.contains("X"));
    }

    #[test]
    fn eviction_readmits_an_old_id() {
        let mut seen = SeenSet::new();
        assert!(seen.mark_seen("X"));
        for i in 0..MAX_SEEN_MSGS {
            assert!(seen.mark_seen(&format!("filler-{i}")));
        }
        // "X" was the oldest entry and has been pushed out.
        assert!(!seen.contains("X"));
        assert!(seen.mark_seen("X"));
        assert_eq!(seen.len(), MAX_SEEN_MSGS);
    }

    #[test]
    fn eviction_is_fifo() {
        let mut seen = SeenSet::new();
        for i in 0..MAX_SEEN_MSGS {
            seen.mark_seen(&format!("id-{i}"));
        }
        seen.mark_seen("one-more");
        assert!(!seen.contains("id-0"));
        assert!(seen.contains("id-1"));
        assert!(seen.contains("one-more"));
    }

    #[test]
    fn recent_ids_are_reverse_chronological_and_bounded() {
        let mut seen = SeenSet::new();
        for i in 0..10 {
            seen.mark_seen(&format!("id-{i}"));
        }
        let recent = seen.recent_ids(3);
        assert_eq!(recent, vec!["id-9", "id-8", "id-7"]);
        assert_eq!(seen.recent_ids(100).len(), 10);
        assert!(SeenSet::new().recent_ids(5).is_empty());
    }

    #[test]
    fn store_serves_exact_bytes_until_evicted() {
        let mut store = GossipStore::new();
        store.insert("m1", b"serialized-form-of-m1".to_vec());
        assert_eq!(store.lookup("m1"), Some(&b"serialized-form-of-m1"[..]));
        assert_eq!(store.lookup("m2"), None);

        for i in 0..MAX_STORED_GOSSIP {
            store.insert(&format!("filler-{i}"), vec![0u8; 8]);
        }
        assert_eq!(store.lookup("m1"), None);
        assert_eq!(store.len(), MAX_STORED_GOSSIP);
    }
}
