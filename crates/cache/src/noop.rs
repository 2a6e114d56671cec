//! Disabled cache: every operation is total and side-effect free.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use epi::PipelineStep;

use crate::{CacheStats, PrefixCache, PrefixHit, StatsCounters};

#[derive(Debug, Default)]
pub struct NoopCache {
    stats: StatsCounters,
}

impl NoopCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PrefixCache for NoopCache {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _fingerprint: &str, _steps: &[PipelineStep]) -> Option<PrefixHit> {
        self.stats.miss();
        None
    }

    async fn set(
        &self,
        _fingerprint: &str,
        _steps: &[PipelineStep],
        _value: &Value,
        _ttl: Option<Duration>,
    ) {
        self.stats.set();
    }

    async fn invalidate_by_epi(&self, _fingerprint: &str) -> u64 {
        0
    }

    async fn clear(&self) {}

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}
