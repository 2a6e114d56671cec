//! In-process cache: LRU recency with per-entry TTL.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use serde_json::Value;

use epi::{CacheKeys, PipelineStep};

use crate::{CacheStats, PrefixCache, PrefixHit, StatsCounters};

#[derive(Debug)]
struct MemoryEntry {
    value: Value,
    expires_at: Instant,
    approx_size: usize,
}

/// Hash table + recency list; `set` touches, `get` touches only the entry
/// it returns (the longest matched prefix).
pub struct MemoryCache {
    keys: CacheKeys,
    default_ttl: Duration,
    entries: Mutex<LruCache<String, MemoryEntry>>,
    stats: StatsCounters,
}

impl MemoryCache {
    pub fn new(keys: CacheKeys, max_items: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_items.max(1)).expect("non-zero capacity");
        Self {
            keys,
            default_ttl,
            entries: Mutex::new(LruCache::new(capacity)),
            stats: StatsCounters::default(),
        }
    }

    /// Current number of live entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PrefixCache for MemoryCache {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, fingerprint: &str, steps: &[PipelineStep]) -> Option<PrefixHit> {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("cache lock");
        for matched in (1..=steps.len()).rev() {
            let key = self.keys.key(fingerprint, &steps[..matched]);
            let expired = matches!(entries.peek(&key), Some(entry) if entry.expires_at <= now);
            if expired {
                entries.pop(&key);
                continue;
            }
            // A real lookup, so recency is touched on the entry returned.
            if let Some(entry) = entries.get(&key) {
                let value = entry.value.clone();
                self.stats.hit_with_len(matched, steps.len());
                return Some(PrefixHit { value, matched });
            }
        }
        self.stats.miss();
        None
    }

    async fn set(
        &self,
        fingerprint: &str,
        steps: &[PipelineStep],
        value: &Value,
        ttl: Option<Duration>,
    ) {
        let key = self.keys.key(fingerprint, steps);
        let approx_size = serde_json::to_string(value).map(|s| s.len()).unwrap_or(0);
        let entry = MemoryEntry {
            value: value.clone(),
            expires_at: Instant::now() + ttl.unwrap_or(self.default_ttl),
            approx_size,
        };
        let mut entries = self.entries.lock().expect("cache lock");
        if let Some((evicted, _)) = entries.push(key.clone(), entry) {
            if evicted != key {
                tracing::debug!(key = %evicted, "evicted least-recently-used cache entry");
            }
        }
        self.stats.set();
    }

    async fn invalidate_by_epi(&self, fingerprint: &str) -> u64 {
        let prefix = self.keys.fingerprint_prefix(fingerprint);
        let mut entries = self.entries.lock().expect("cache lock");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key);
        }
        doomed.len() as u64
    }

    async fn clear(&self) {
        self.entries.lock().expect("cache lock").clear();
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries = self.entries.lock().expect("cache lock");
        let bytes: usize = entries.iter().map(|(_, e)| e.approx_size).sum();
        f.debug_struct("MemoryCache")
            .field("entries", &entries.len())
            .field("approx_bytes", &bytes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn steps(names: &[&str]) -> Vec<PipelineStep> {
        names.iter().map(|n| PipelineStep::named(*n)).collect()
    }

    fn cache(max_items: usize) -> MemoryCache {
        MemoryCache::new(CacheKeys::default(), max_items, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn returns_longest_cached_prefix() {
        let cache = cache(16);
        let sequence = steps(&["a", "b", "c"]);
        cache.set("fp", &sequence[..1], &json!({"after": "a"}), None).await;
        cache.set("fp", &sequence[..2], &json!({"after": "b"}), None).await;

        let hit = cache.get("fp", &sequence).await.unwrap();
        assert_eq!(hit.matched, 2);
        assert_eq!(hit.value, json!({"after": "b"}));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.partial_hits, 1);
    }

    #[tokio::test]
    async fn full_match_is_not_partial() {
        let cache = cache(16);
        let sequence = steps(&["a", "b"]);
        cache.set("fp", &sequence, &json!(1), None).await;
        let hit = cache.get("fp", &sequence).await.unwrap();
        assert_eq!(hit.matched, 2);
        assert_eq!(cache.stats().partial_hits, 0);
    }

    #[tokio::test]
    async fn empty_step_list_never_hits() {
        let cache = cache(16);
        assert!(cache.get("fp", &[]).await.is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn expired_entries_are_deleted_during_scan() {
        let cache = cache(16);
        let sequence = steps(&["a", "b"]);
        cache
            .set("fp", &sequence, &json!("stale"), Some(Duration::ZERO))
            .await;
        cache.set("fp", &sequence[..1], &json!("live"), None).await;

        let hit = cache.get("fp", &sequence).await.unwrap();
        assert_eq!(hit.matched, 1);
        assert_eq!(hit.value, json!("live"));
        // The expired full-prefix entry is gone.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn lru_evicts_before_insertion() {
        let cache = cache(2);
        let a = steps(&["a"]);
        let b = steps(&["b"]);
        let c = steps(&["c"]);
        cache.set("fp", &a, &json!(1), None).await;
        cache.set("fp", &b, &json!(2), None).await;
        // Touch `a` so `b` is the LRU victim.
        cache.get("fp", &a).await.unwrap();
        cache.set("fp", &c, &json!(3), None).await;

        assert!(cache.get("fp", &a).await.is_some());
        assert!(cache.get("fp", &b).await.is_none());
        assert!(cache.get("fp", &c).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_by_epi_wipes_all_prefix_lengths() {
        let cache = cache(16);
        let sequence = steps(&["a", "b"]);
        cache.set("fp1", &sequence[..1], &json!(1), None).await;
        cache.set("fp1", &sequence, &json!(2), None).await;
        cache.set("fp2", &sequence, &json!(3), None).await;

        assert_eq!(cache.invalidate_by_epi("fp1").await, 2);
        assert!(cache.get("fp1", &sequence).await.is_none());
        assert!(cache.get("fp2", &sequence).await.is_some());
    }

    #[tokio::test]
    async fn clear_wipes_everything() {
        let cache = cache(16);
        cache.set("fp", &steps(&["a"]), &json!(1), None).await;
        cache.clear().await;
        assert!(cache.is_empty());
    }
}
