//! Bounded key cache with TTL and max-size eviction.
//!
//! Backs alert deduplication: a condition key is remembered for the TTL so the
//! same condition does not page twice, and the map can never grow past
//! `max_size` even if condition keys carry unbounded ids.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::hash::keccak256;

/// Set of string keys (stored as keccak256 hashes) with TTL and capacity limits.
///
/// - **Max capacity:** when full, the oldest entry is evicted on insert.
/// - **TTL:** expired entries are dropped before every insert.
pub struct BoundedHashCache {
    map: HashMap<[u8; 32], Instant>,
    max_size: usize,
    ttl: Duration,
}

impl BoundedHashCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            max_size: max_size.max(1),
            ttl,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map
            .get(&keccak256(key.as_bytes()))
            .is_some_and(|t| t.elapsed() < self.ttl)
    }

    /// Remember `key`. Returns false if it was already live.
    pub fn insert(&mut self, key: &str) -> bool {
        let hash = keccak256(key.as_bytes());
        let now = Instant::now();
        self.map.retain(|_, t| now.duration_since(*t) < self.ttl);
        if self.map.contains_key(&hash) {
            return false;
        }
        while self.map.len() >= self.max_size {
            let oldest = self.map.iter().min_by_key(|(_, t)| **t).map(|(h, _)| *h);
            match oldest {
                Some(h) => {
                    self.map.remove(&h);
                }
                None => break,
            }
        }
        self.map.insert(hash, now);
        true
    }

    /// Forget `key` so the next insert succeeds. Returns true if it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.map.remove(&keccak256(key.as_bytes())).is_some()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
