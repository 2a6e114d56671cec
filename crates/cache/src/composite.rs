//! Two-layer cache: fast L1 in front of a (usually shared) L2.
//!
//! Reads try L1 first; an L2 hit is promoted into L1 under the prefix
//! length L2 matched. Writes and invalidations go to both layers
//! concurrently. The L2 slot may itself be a composite, so hierarchies of
//! arbitrary depth compose from two-layer nodes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use epi::PipelineStep;

use crate::{CacheStats, PrefixCache, PrefixHit, SharedCache, StatsCounters};

pub struct CompositeCache {
    l1: SharedCache,
    l2: SharedCache,
    stats: StatsCounters,
}

impl CompositeCache {
    pub fn new(l1: SharedCache, l2: SharedCache) -> Self {
        Self {
            l1,
            l2,
            stats: StatsCounters::default(),
        }
    }

    pub fn layers(&self) -> (&SharedCache, &SharedCache) {
        (&self.l1, &self.l2)
    }
}

#[async_trait]
impl PrefixCache for CompositeCache {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn get(&self, fingerprint: &str, steps: &[PipelineStep]) -> Option<PrefixHit> {
        if let Some(hit) = self.l1.get(fingerprint, steps).await {
            self.stats.hit_with_len(hit.matched, steps.len());
            return Some(hit);
        }
        match self.l2.get(fingerprint, steps).await {
            Some(hit) => {
                // Promotion: remember the L2 answer under the prefix it matched.
                self.l1
                    .set(fingerprint, &steps[..hit.matched], &hit.value, None)
                    .await;
                self.stats.hit_with_len(hit.matched, steps.len());
                Some(hit)
            }
            None => {
                self.stats.miss();
                None
            }
        }
    }

    async fn set(
        &self,
        fingerprint: &str,
        steps: &[PipelineStep],
        value: &Value,
        ttl: Option<Duration>,
    ) {
        tokio::join!(
            self.l1.set(fingerprint, steps, value, ttl),
            self.l2.set(fingerprint, steps, value, ttl),
        );
        self.stats.set();
    }

    async fn invalidate_by_epi(&self, fingerprint: &str) -> u64 {
        let (from_l1, from_l2) = tokio::join!(
            self.l1.invalidate_by_epi(fingerprint),
            self.l2.invalidate_by_epi(fingerprint),
        );
        from_l1 + from_l2
    }

    async fn clear(&self) {
        tokio::join!(self.l1.clear(), self.l2.clear());
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn stats_tree(&self) -> Value {
        let mut tree = serde_json::to_value(self.stats()).unwrap_or_default();
        if let Some(map) = tree.as_object_mut() {
            map.insert("backend".into(), Value::String(self.name().into()));
            map.insert(
                "children".into(),
                Value::Array(vec![self.l1.stats_tree(), self.l2.stats_tree()]),
            );
        }
        tree
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;
    use epi::CacheKeys;
    use serde_json::json;

    fn memory() -> Arc<MemoryCache> {
        Arc::new(MemoryCache::new(
            CacheKeys::default(),
            64,
            Duration::from_secs(60),
        ))
    }

    fn steps(names: &[&str]) -> Vec<PipelineStep> {
        names.iter().map(|n| PipelineStep::named(*n)).collect()
    }

    #[tokio::test]
    async fn set_writes_through_both_layers() {
        let (l1, l2) = (memory(), memory());
        let composite = CompositeCache::new(l1.clone(), l2.clone());
        let sequence = steps(&["a"]);

        composite.set("fp", &sequence, &json!(1), None).await;
        assert!(l1.get("fp", &sequence).await.is_some());
        assert!(l2.get("fp", &sequence).await.is_some());
    }

    #[tokio::test]
    async fn l2_hit_is_promoted_to_l1() {
        let (l1, l2) = (memory(), memory());
        let sequence = steps(&["a", "b"]);
        l2.set("fp", &sequence[..1], &json!("from-l2"), None).await;

        let composite = CompositeCache::new(l1.clone(), l2);
        let hit = composite.get("fp", &sequence).await.unwrap();
        assert_eq!(hit.matched, 1);

        // L1 now answers on its own, under the same prefix length.
        let l1_hit = l1.get("fp", &sequence).await.unwrap();
        assert_eq!(l1_hit.matched, 1);
        assert_eq!(l1_hit.value, json!("from-l2"));
    }

    #[tokio::test]
    async fn invalidate_sums_both_layers() {
        let (l1, l2) = (memory(), memory());
        let composite = CompositeCache::new(l1, l2);
        let sequence = steps(&["a"]);
        composite.set("fp", &sequence, &json!(1), None).await;

        assert_eq!(composite.invalidate_by_epi("fp").await, 2);
        assert!(composite.get("fp", &sequence).await.is_none());
    }

    #[tokio::test]
    async fn stats_tree_reports_children() {
        let composite = CompositeCache::new(memory(), memory());
        let sequence = steps(&["a"]);
        composite.set("fp", &sequence, &json!(1), None).await;
        composite.get("fp", &sequence).await.unwrap();

        let tree = composite.stats_tree();
        assert_eq!(tree["backend"], "composite");
        assert_eq!(tree["sets"], 1);
        assert_eq!(tree["children"].as_array().unwrap().len(), 2);
        assert_eq!(tree["children"][0]["backend"], "memory");
    }
}
