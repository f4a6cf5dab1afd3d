//! Process-local capability cache
//!
//! TTL-bounded cache of `Capabilities` keyed by endpoint URL. Refreshes are
//! serialized per key; readers either see the previous value (while fresh)
//! or wait on the in-flight refresh. The only public read path is
//! `get_or_refresh`, so stale entries are always re-probed before use.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::models::Capabilities;

#[derive(Clone)]
struct CacheEntry {
    capabilities: Capabilities,
    generated_at: Instant,
}

pub struct CapabilityCache {
    entries: DashMap<String, CacheEntry>,
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    ttl: Duration,
}

impl CapabilityCache {
    /// Default TTL of 24 hours
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(24 * 60 * 60))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self { entries: DashMap::new(), refresh_locks: DashMap::new(), ttl }
    }

    /// Return the cached record for `key`, refreshing it first when missing
    /// or stale.
    ///
    /// Concurrent callers for the same key share one refresh; callers for
    /// other keys proceed independently.
    pub async fn get_or_refresh<F, Fut>(&self, key: &str, refresh: F) -> Capabilities
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Capabilities>,
    {
        if let Some(entry) = self.fresh_entry(key) {
            tracing::debug!("Capability cache hit for {}", key);
            return entry.capabilities;
        }

        let lock = self
            .refresh_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // another caller may have refreshed while we waited on the lock
        if let Some(entry) = self.fresh_entry(key) {
            return entry.capabilities;
        }

        tracing::debug!("Capability cache refresh for {}", key);
        let capabilities = refresh().await;
        self.entries.insert(
            key.to_string(),
            CacheEntry { capabilities: capabilities.clone(), generated_at: Instant::now() },
        );
        capabilities
    }

    /// Drop one entry, forcing the next read to refresh
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn fresh_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.get(key)?;
        if entry.generated_at.elapsed() < self.ttl {
            Some(entry.clone())
        } else {
            None
        }
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn caches_within_ttl() {
        let cache = CapabilityCache::with_ttl(Duration::from_secs(60));
        let refreshes = AtomicUsize::new(0);

        for _ in 0..3 {
            let caps = cache
                .get_or_refresh("http://a/sparql", || async {
                    refreshes.fetch_add(1, Ordering::SeqCst);
                    Capabilities::new("http://a/sparql")
                })
                .await;
            assert_eq!(caps.endpoint_url, "http://a/sparql");
        }

        assert_eq!(refreshes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_entries_are_reprobed() {
        let cache = CapabilityCache::with_ttl(Duration::from_millis(10));
        let refreshes = AtomicUsize::new(0);

        let refresh = || async {
            refreshes.fetch_add(1, Ordering::SeqCst);
            Capabilities::new("http://a/sparql")
        };

        cache.get_or_refresh("http://a/sparql", refresh).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache
            .get_or_refresh("http://a/sparql", || async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Capabilities::new("http://a/sparql")
            })
            .await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let cache = CapabilityCache::with_ttl(Duration::from_secs(60));
        let refreshes = AtomicUsize::new(0);

        cache
            .get_or_refresh("http://a/sparql", || async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Capabilities::new("http://a/sparql")
            })
            .await;
        cache.invalidate("http://a/sparql");
        cache
            .get_or_refresh("http://a/sparql", || async {
                refreshes.fetch_add(1, Ordering::SeqCst);
                Capabilities::new("http://a/sparql")
            })
            .await;

        assert_eq!(refreshes.load(Ordering::SeqCst), 2);
    }
}
