use std::collections::BTreeMap;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::content::content_entry::ContentEntry;
use crate::content::content_id::ContentId;

struct PoolEntry {
    entry: Arc<ContentEntry>,
    last_used: u64,
}

/// Cached content of one kind, bounded by the total size of the retained payloads. When an
///  insert exceeds the budget, least recently used entries are evicted until it fits.
///
/// Recency is tracked with a monotonic counter rather than timestamps: every hit or insert
///  stamps the entry with the next counter value, and an ordered map from stamp to id gives
///  the eviction order.
pub struct ContentPool {
    byte_budget: usize,
    bytes_used: usize,
    next_stamp: u64,
    entries: FxHashMap<ContentId, PoolEntry>,
    by_recency: BTreeMap<u64, ContentId>,
}

impl ContentPool {
    pub fn new(byte_budget: usize) -> ContentPool {
        ContentPool {
            byte_budget,
            bytes_used: 0,
            next_stamp: 0,
            entries: FxHashMap::default(),
            by_recency: BTreeMap::default(),
        }
    }

    fn stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }

    /// Looks up an entry, marking it as most recently used
    pub fn get(&mut self, id: &ContentId) -> Option<Arc<ContentEntry>> {
        let stamp = self.stamp();
        let pool_entry = self.entries.get_mut(id)?;

        self.by_recency.remove(&pool_entry.last_used);
        pool_entry.last_used = stamp;
        self.by_recency.insert(stamp, *id);
        Some(pool_entry.entry.clone())
    }

    pub fn contains(&self, id: &ContentId) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns `false` if the entry is bigger than the whole budget and was therefore not
    ///  retained.
    pub fn insert(&mut self, entry: Arc<ContentEntry>) -> bool {
        let id = entry.key.id;
        self.remove(&id);

        if entry.len() > self.byte_budget {
            debug!("content {} has {} bytes, exceeding the pool's budget of {} bytes - not retaining it", entry.key, entry.len(), self.byte_budget);
            return false;
        }

        while self.bytes_used + entry.len() > self.byte_budget {
            let Some((_, lru_id)) = self.by_recency.pop_first() else {
                break;
            };
            if let Some(evicted) = self.entries.remove(&lru_id) {
                trace!("evicting {} from content pool", evicted.entry.key);
                self.bytes_used -= evicted.entry.len();
            }
        }

        let stamp = self.stamp();
        self.bytes_used += entry.len();
        self.by_recency.insert(stamp, id);
        self.entries.insert(id, PoolEntry { entry, last_used: stamp });
        true
    }

    pub fn remove(&mut self, id: &ContentId) -> Option<Arc<ContentEntry>> {
        let removed = self.entries.remove(id)?;
        self.by_recency.remove(&removed.last_used);
        self.bytes_used -= removed.entry.len();
        Some(removed.entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes_used(&self) -> usize {
        self.bytes_used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use uuid::Uuid;
    use crate::content::content_id::ContentKey;

    fn id(n: u128) -> ContentId {
        ContentId(Uuid::from_u128(n))
    }

    fn entry(n: u128, len: usize) -> Arc<ContentEntry> {
        Arc::new(ContentEntry::new(ContentKey::texture(id(n)), vec![n as u8; len]))
    }

    #[test]
    fn test_insert_and_get() {
        let mut pool = ContentPool::new(100);
        assert!(pool.get(&id(1)).is_none());

        assert!(pool.insert(entry(1, 10)));
        assert!(pool.insert(entry(2, 20)));
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.bytes_used(), 30);
        assert_eq!(pool.get(&id(2)).unwrap().data.len(), 20);
    }

    #[test]
    fn test_replace_same_id() {
        let mut pool = ContentPool::new(100);
        pool.insert(entry(1, 10));
        pool.insert(entry(1, 40));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.bytes_used(), 40);
    }

    #[rstest]
    #[case::no_eviction(vec![1, 2, 3], 30, vec![], vec![1, 2, 3, 4])]
    #[case::evict_oldest(vec![], 30, vec![1], vec![2, 3, 4])]
    #[case::touched_survives(vec![1], 30, vec![2], vec![1, 3, 4])]
    #[case::evict_two(vec![], 60, vec![1, 2], vec![3, 4])]
    #[case::evict_all(vec![3, 2, 1], 100, vec![1, 2, 3], vec![4])]
    fn test_lru_eviction(#[case] touched: Vec<u128>, #[case] new_len: usize, #[case] expected_evicted: Vec<u128>, #[case] expected_retained: Vec<u128>) {
        let mut pool = ContentPool::new(if expected_evicted.is_empty() { 200 } else { 100 });
        for n in 1..=3 {
            pool.insert(entry(n, 25));
        }
        for n in touched {
            pool.get(&id(n));
        }

        assert!(pool.insert(entry(4, new_len)));

        for n in expected_evicted {
            assert!(!pool.contains(&id(n)), "{} should have been evicted", n);
        }
        for n in &expected_retained {
            assert!(pool.contains(&id(*n)), "{} should have been retained", n);
        }
        assert_eq!(pool.len(), expected_retained.len());
        assert!(pool.bytes_used() <= 200);
    }

    #[test]
    fn test_oversized_entry_is_not_retained() {
        let mut pool = ContentPool::new(100);
        pool.insert(entry(1, 50));

        let big = entry(2, 101);
        assert!(!pool.insert(big.clone()));
        assert!(!pool.contains(&id(2)));
        assert!(pool.contains(&id(1)));
        assert_eq!(pool.bytes_used(), 50);
    }

    #[test]
    fn test_evicted_entry_stays_alive_for_holders() {
        let mut pool = ContentPool::new(10);
        pool.insert(entry(1, 10));
        let held = pool.get(&id(1)).unwrap();

        pool.insert(entry(2, 10));
        assert!(!pool.contains(&id(1)));
        assert_eq!(held.data.len(), 10);
    }
}
