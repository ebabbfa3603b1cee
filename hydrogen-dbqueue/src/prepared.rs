//! Per-connection prepared-statement cache with LRU eviction.
//!
//! A bounded map from statement name to `{SQL, engine handle, usage counter,
//! recency stamp}`. Exactly one worker thread owns each connection, so the
//! cache has no interior locking. The handle type is engine-specific: the
//! analysed template for SQLite (rusqlite's own statement cache holds the
//! compiled statement), server-side statement objects for PostgreSQL/MySQL.
//!
//! Eviction returns the displaced handle so the engine can release its
//! backend resource (DEALLOCATE, stmt close) before dropping it.

use std::time::Instant;

use rustc_hash::FxHashMap;

/// One cached statement.
#[derive(Debug)]
pub struct CachedStatement<H> {
    pub sql: String,
    pub handle: H,
    pub created_at: Instant,
    pub usage_count: u64,
    /// Monotonic recency stamp; the lowest stamp is evicted first.
    stamp: u64,
}

/// Bounded LRU cache of prepared statements for one connection.
#[derive(Debug)]
pub struct PreparedStatementCache<H> {
    capacity: usize,
    entries: FxHashMap<String, CachedStatement<H>>,
    clock: u64,
}

impl<H> PreparedStatementCache<H> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: FxHashMap::default(),
            clock: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&CachedStatement<H>> {
        self.entries.get(name)
    }

    /// Insert a statement. Re-inserting an existing name replaces it; at
    /// capacity the least recently used entry is evicted first. Displaced
    /// handles are returned for the engine to release.
    pub fn insert(&mut self, name: &str, sql: &str, handle: H) -> Vec<H> {
        let mut displaced = Vec::new();

        if let Some(old) = self.entries.remove(name) {
            displaced.push(old.handle);
        } else if self.entries.len() >= self.capacity {
            if let Some(evicted) = self.evict_lru() {
                displaced.push(evicted);
            }
        }

        self.clock += 1;
        self.entries.insert(
            name.to_string(),
            CachedStatement {
                sql: sql.to_string(),
                handle,
                created_at: Instant::now(),
                usage_count: 0,
                stamp: self.clock,
            },
        );
        displaced
    }

    /// Mark a statement as used: bump its usage counter and recency stamp.
    pub fn touch(&mut self, name: &str) -> Option<&CachedStatement<H>> {
        self.clock += 1;
        let clock = self.clock;
        let entry = self.entries.get_mut(name)?;
        entry.usage_count += 1;
        entry.stamp = clock;
        Some(entry)
    }

    /// Remove a statement, returning its handle for release.
    pub fn remove(&mut self, name: &str) -> Option<H> {
        self.entries.remove(name).map(|entry| entry.handle)
    }

    /// Drain every entry (connection teardown).
    pub fn drain(&mut self) -> Vec<H> {
        self.entries.drain().map(|(_, entry)| entry.handle).collect()
    }

    pub fn usage_count(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|entry| entry.usage_count)
    }

    fn evict_lru(&mut self) -> Option<H> {
        let name = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.stamp)
            .map(|(name, _)| name.clone())?;
        tracing::debug!(statement = %name, "evicting least recently used prepared statement");
        self.remove(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(capacity: usize) -> PreparedStatementCache<u32> {
        PreparedStatementCache::new(capacity)
    }

    #[test]
    fn insert_and_get() {
        let mut c = cache(4);
        assert!(c.insert("q1", "SELECT 1", 1).is_empty());
        assert_eq!(c.get("q1").map(|e| e.handle), Some(1));
        assert_eq!(c.get("q1").map(|e| e.sql.as_str()), Some("SELECT 1"));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn evicts_least_recently_used_at_capacity() {
        let mut c = cache(3);
        c.insert("a", "SELECT a", 1);
        c.insert("b", "SELECT b", 2);
        c.insert("c", "SELECT c", 3);

        // Touch a and c so b becomes LRU.
        c.touch("a");
        c.touch("c");

        let displaced = c.insert("d", "SELECT d", 4);
        assert_eq!(displaced, vec![2]);
        assert!(!c.contains("b"));
        assert!(c.contains("a") && c.contains("c") && c.contains("d"));
        assert_eq!(c.len(), 3);
    }

    #[test]
    fn insertion_order_breaks_ties() {
        let mut c = cache(2);
        c.insert("first", "SELECT 1", 1);
        c.insert("second", "SELECT 2", 2);
        let displaced = c.insert("third", "SELECT 3", 3);
        assert_eq!(displaced, vec![1]);
    }

    #[test]
    fn reinsert_replaces_without_eviction() {
        let mut c = cache(2);
        c.insert("a", "SELECT a", 1);
        c.insert("b", "SELECT b", 2);
        let displaced = c.insert("a", "SELECT a2", 10);
        assert_eq!(displaced, vec![1]);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get("a").map(|e| e.handle), Some(10));
        assert_eq!(c.get("a").map(|e| e.sql.as_str()), Some("SELECT a2"));
    }

    #[test]
    fn touch_tracks_usage() {
        let mut c = cache(2);
        c.insert("a", "SELECT a", 1);
        assert_eq!(c.usage_count("a"), Some(0));
        c.touch("a");
        c.touch("a");
        assert_eq!(c.usage_count("a"), Some(2));
        assert!(c.touch("missing").is_none());
    }

    #[test]
    fn remove_returns_handle() {
        let mut c = cache(2);
        c.insert("a", "SELECT a", 7);
        assert_eq!(c.remove("a"), Some(7));
        assert_eq!(c.remove("a"), None);
        assert!(c.is_empty());
    }

    #[test]
    fn capacity_floor_is_one() {
        let mut c = cache(0);
        assert_eq!(c.capacity(), 1);
        c.insert("a", "SELECT a", 1);
        let displaced = c.insert("b", "SELECT b", 2);
        assert_eq!(displaced, vec![1]);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn drain_empties_the_cache() {
        let mut c = cache(4);
        c.insert("a", "SELECT a", 1);
        c.insert("b", "SELECT b", 2);
        let mut handles = c.drain();
        handles.sort_unstable();
        assert_eq!(handles, vec![1, 2]);
        assert!(c.is_empty());
    }
}
