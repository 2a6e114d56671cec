//! Prefix caches for preprocessed ePI documents.
//!
//! Every back-end implements one contract, [`PrefixCache`]: values are
//! stored under `(fingerprint, step-signature-prefix)` keys and a read
//! returns the *longest* cached prefix of the requested step sequence.
//! Back-end failures are never surfaced to callers — they increment the
//! back-end's error counter and degrade to a miss.
//!
//! Three back-ends ship here: [`MemoryCache`] (LRU + TTL), [`RedisCache`]
//! (shared, optionally gzip-compressed) and [`NoopCache`]. Any two can be
//! layered with [`CompositeCache`], and [`build_cache`] assembles a whole
//! hierarchy from a config string such as `memory<redis`.

pub mod composite;
pub mod config;
pub mod memory;
pub mod noop;
pub mod redis;
mod stats;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use epi::PipelineStep;

pub use crate::composite::CompositeCache;
pub use crate::config::{build_cache, CacheOptions};
pub use crate::memory::MemoryCache;
pub use crate::noop::NoopCache;
pub use crate::redis::RedisCache;
pub(crate) use crate::stats::StatsCounters;

/// A successful prefix lookup.
#[derive(Debug, Clone)]
pub struct PrefixHit {
    /// The cached document after `matched` steps.
    pub value: Value,
    /// Number of leading steps the hit covers; never zero.
    pub matched: usize,
}

/// Monotonic per-back-end counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    #[serde(rename = "partialHits")]
    pub partial_hits: u64,
}

/// Errors raised while *constructing* a back-end. Operational failures
/// never escape the trait methods.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache backend unavailable: {0}")]
    Backend(String),

    #[error("invalid cache configuration: {0}")]
    Config(String),
}

impl From<::redis::RedisError> for CacheError {
    fn from(err: ::redis::RedisError) -> Self {
        CacheError::Backend(err.to_string())
    }
}

/// The uniform contract over all cache back-ends.
#[async_trait]
pub trait PrefixCache: Send + Sync {
    /// Short identifier used in stats trees and logs.
    fn name(&self) -> &'static str;

    /// Longest-prefix lookup. Scans from the full step sequence down to a
    /// single step and returns the first live entry; expired entries found
    /// on the way are deleted and the scan continues. An empty step list
    /// never hits.
    async fn get(&self, fingerprint: &str, steps: &[PipelineStep]) -> Option<PrefixHit>;

    /// Store `value` under the full step prefix.
    async fn set(
        &self,
        fingerprint: &str,
        steps: &[PipelineStep],
        value: &Value,
        ttl: Option<Duration>,
    );

    /// Remove every entry of any prefix length sharing `fingerprint`.
    /// Returns the number of removed entries.
    async fn invalidate_by_epi(&self, fingerprint: &str) -> u64;

    /// Wipe the whole back-end.
    async fn clear(&self);

    fn stats(&self) -> CacheStats;

    /// Stats as JSON, including child back-ends for composites.
    fn stats_tree(&self) -> Value {
        let mut tree = serde_json::to_value(self.stats()).unwrap_or_default();
        if let Some(map) = tree.as_object_mut() {
            map.insert("backend".into(), Value::String(self.name().into()));
        }
        tree
    }
}

/// Shared handle alias used across the workspace.
pub type SharedCache = Arc<dyn PrefixCache>;
