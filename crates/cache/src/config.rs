//! Back-end assembly from configuration.
//!
//! The backend spec is a `<`-separated chain read left to right, e.g.
//! `memory<redis<memory`. Layers are built right to left so the rightmost
//! token becomes the innermost L2:
//! `Composite(memory, Composite(redis, memory))`.

use std::sync::Arc;
use std::time::Duration;

use epi::CacheKeys;

use crate::{CacheError, CompositeCache, MemoryCache, NoopCache, RedisCache, SharedCache};

/// Knobs shared by every back-end in one hierarchy.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Backend spec: `none`, `memory`, `redis`, a `redis://…` URL, or a
    /// `<`-chain of those.
    pub backend: String,
    pub ttl: Duration,
    pub max_items: usize,
    pub compress: bool,
    pub schema_version: String,
    /// Connection string used by plain `redis` tokens.
    pub redis_url: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            backend: "memory".into(),
            ttl: Duration::from_millis(1_200_000),
            max_items: 1_000,
            compress: false,
            schema_version: epi::DEFAULT_SCHEMA_VERSION.into(),
            redis_url: "redis://127.0.0.1:6379".into(),
        }
    }
}

impl CacheOptions {
    fn keys(&self) -> CacheKeys {
        CacheKeys::new(self.schema_version.clone())
    }
}

/// Build the cache hierarchy described by `options.backend`.
pub async fn build_cache(options: &CacheOptions) -> Result<SharedCache, CacheError> {
    let tokens: Vec<&str> = options
        .backend
        .split('<')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Ok(Arc::new(NoopCache::new()));
    }

    // Rightmost token first: it is the innermost L2.
    let mut layered = build_single(tokens[tokens.len() - 1], options).await?;
    for token in tokens[..tokens.len() - 1].iter().rev() {
        let l1 = build_single(token, options).await?;
        layered = Arc::new(CompositeCache::new(l1, layered));
    }
    Ok(layered)
}

async fn build_single(token: &str, options: &CacheOptions) -> Result<SharedCache, CacheError> {
    match token {
        "none" | "noop" => Ok(Arc::new(NoopCache::new())),
        "memory" | "mem" => Ok(Arc::new(MemoryCache::new(
            options.keys(),
            options.max_items,
            options.ttl,
        ))),
        "redis" => connect_redis(&options.redis_url, options).await,
        url if url.starts_with("redis://") || url.starts_with("rediss://") => {
            connect_redis(url, options).await
        }
        unknown => Err(CacheError::Config(format!(
            "unknown cache backend `{unknown}`"
        ))),
    }
}

async fn connect_redis(url: &str, options: &CacheOptions) -> Result<SharedCache, CacheError> {
    let cache = RedisCache::connect(url, options.keys(), options.ttl, options.compress).await?;
    Ok(Arc::new(cache))
}
