use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::debug;

pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);
pub const DEFAULT_PURGE: Duration = Duration::from_secs(60 * 60);

/// In-memory set of already delivered items with per-entry expiration.
///
/// Not persisted: after a restart dedup falls back to the cursor alone.
pub struct DedupCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl DedupCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    /// Atomically checks `key` and marks it seen.
    /// Returns `true` if the key was not seen before (or had expired).
    pub fn insert_if_new(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        match entries.get(key) {
            Some(expires) if *expires > now => false,
            _ => {
                entries.insert(key.to_owned(), now + self.ttl);
                true
            }
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map_or(false, |expires| *expires > Instant::now())
    }

    /// Drops expired entries, returns how many were removed.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, expires| *expires > now);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Runs `purge` every `every` until the returned handle is aborted.
    pub fn spawn_purger(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // first tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = cache.purge();
                debug!(removed, left = cache.len(), "dedup cache purged");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_insert_is_duplicate() {
        let cache = DedupCache::new(DEFAULT_TTL);

        assert!(cache.insert_if_new("staff@1"));
        assert!(!cache.insert_if_new("staff@1"));
        assert!(cache.insert_if_new("staff@2"));
        assert!(cache.contains("staff@1"));
        assert!(!cache.contains("other@1"));
    }

    #[test]
    fn expired_entries_are_new_again() {
        let cache = DedupCache::new(Duration::ZERO);

        assert!(cache.insert_if_new("staff@1"));
        assert!(!cache.contains("staff@1"));
        assert!(cache.insert_if_new("staff@1"));
        assert_eq!(cache.purge(), 1);
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn purger_removes_expired() {
        let cache = Arc::new(DedupCache::new(Duration::ZERO));
        cache.insert_if_new("a");
        cache.insert_if_new("b");

        let handle = cache.spawn_purger(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;

        assert_eq!(cache.len(), 0);
        handle.abort();
    }
}
