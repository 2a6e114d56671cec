//! Shared cache over Redis.
//!
//! Values are JSON strings, optionally gzip-compressed and base64-framed
//! with a `gzip64:` prefix. Expiry is delegated to Redis (`SET … EX`),
//! with the millisecond TTL rounded up to whole seconds. Invalidation and
//! `clear` walk the keyspace with cursor-based `SCAN`.

use std::io::{Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::Value;

use ::redis::aio::ConnectionManager;
use ::redis::{cmd, RedisResult};

use epi::{CacheKeys, PipelineStep};

use crate::{CacheError, CacheStats, PrefixCache, PrefixHit, StatsCounters};

const GZIP_FRAME_PREFIX: &str = "gzip64:";
const SCAN_BATCH: usize = 100;

pub struct RedisCache {
    keys: CacheKeys,
    default_ttl: Duration,
    compress: bool,
    manager: ConnectionManager,
    stats: StatsCounters,
}

impl RedisCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`).
    pub async fn connect(
        url: &str,
        keys: CacheKeys,
        default_ttl: Duration,
        compress: bool,
    ) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(url)?;
        let manager = ConnectionManager::new(client).await?;
        Ok(Self {
            keys,
            default_ttl,
            compress,
            manager,
            stats: StatsCounters::default(),
        })
    }

    fn encode(&self, value: &Value) -> Result<String, String> {
        let json = serde_json::to_string(value).map_err(|e| e.to_string())?;
        if !self.compress {
            return Ok(json);
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).map_err(|e| e.to_string())?;
        let bytes = encoder.finish().map_err(|e| e.to_string())?;
        Ok(format!("{GZIP_FRAME_PREFIX}{}", BASE64.encode(bytes)))
    }

    /// Frames without the gzip prefix are parsed as plain JSON, so mixed
    /// compressed/uncompressed deployments read each other's entries.
    fn decode(payload: &str) -> Result<Value, String> {
        match payload.strip_prefix(GZIP_FRAME_PREFIX) {
            Some(b64) => {
                let bytes = BASE64.decode(b64).map_err(|e| e.to_string())?;
                let mut json = String::new();
                GzDecoder::new(bytes.as_slice())
                    .read_to_string(&mut json)
                    .map_err(|e| e.to_string())?;
                serde_json::from_str(&json).map_err(|e| e.to_string())
            }
            None => serde_json::from_str(payload).map_err(|e| e.to_string()),
        }
    }

    async fn delete_matching(&self, pattern: &str) -> u64 {
        let mut con = self.manager.clone();
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;
        loop {
            let page: RedisResult<(u64, Vec<String>)> = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut con)
                .await;
            let (next, batch) = match page {
                Ok(page) => page,
                Err(err) => {
                    tracing::warn!(error = %err, pattern, "redis scan failed");
                    self.stats.error();
                    return removed;
                }
            };
            if !batch.is_empty() {
                let deleted: RedisResult<u64> =
                    cmd("DEL").arg(&batch).query_async(&mut con).await;
                match deleted {
                    Ok(n) => removed += n,
                    Err(err) => {
                        tracing::warn!(error = %err, "redis delete failed");
                        self.stats.error();
                    }
                }
            }
            cursor = next;
            if cursor == 0 {
                return removed;
            }
        }
    }
}

#[async_trait]
impl PrefixCache for RedisCache {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn get(&self, fingerprint: &str, steps: &[PipelineStep]) -> Option<PrefixHit> {
        let mut con = self.manager.clone();
        for matched in (1..=steps.len()).rev() {
            let key = self.keys.key(fingerprint, &steps[..matched]);
            let payload: RedisResult<Option<String>> =
                cmd("GET").arg(&key).query_async(&mut con).await;
            match payload {
                Ok(Some(payload)) => match Self::decode(&payload) {
                    Ok(value) => {
                        self.stats.hit_with_len(matched, steps.len());
                        return Some(PrefixHit { value, matched });
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, key, "undecodable cache entry");
                        self.stats.error();
                    }
                },
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, key, "redis get failed");
                    self.stats.error();
                }
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
        let payload = match self.encode(value) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, key, "unencodable cache value");
                self.stats.error();
                return;
            }
        };
        let seconds = ttl_seconds(ttl.unwrap_or(self.default_ttl));
        let mut con = self.manager.clone();
        let result: RedisResult<()> = cmd("SET")
            .arg(&key)
            .arg(payload)
            .arg("EX")
            .arg(seconds)
            .query_async(&mut con)
            .await;
        match result {
            Ok(()) => self.stats.set(),
            Err(err) => {
                tracing::warn!(error = %err, key, "redis set failed");
                self.stats.error();
            }
        }
    }

    async fn invalidate_by_epi(&self, fingerprint: &str) -> u64 {
        self.delete_matching(&self.keys.pattern(fingerprint)).await
    }

    async fn clear(&self) {
        self.delete_matching(&self.keys.version_pattern()).await;
    }

    fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

/// Millisecond TTL rounded up to whole seconds, at least one.
fn ttl_seconds(ttl: Duration) -> u64 {
    (ttl.as_millis().div_ceil(1000) as u64).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ttl_rounds_up_to_seconds() {
        assert_eq!(ttl_seconds(Duration::from_millis(1)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1000)), 1);
        assert_eq!(ttl_seconds(Duration::from_millis(1001)), 2);
        assert_eq!(ttl_seconds(Duration::from_millis(1_200_000)), 1200);
        assert_eq!(ttl_seconds(Duration::ZERO), 1);
    }

    #[test]
    fn plain_frames_decode_as_json() {
        let value = json!({"a": [1, 2, 3]});
        let decoded = RedisCache::decode(&value.to_string()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn gzip_frames_roundtrip() {
        let value = json!({"section": "x".repeat(512)});
        let json = serde_json::to_string(&value).unwrap();
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(json.as_bytes()).unwrap();
        let framed = format!("{GZIP_FRAME_PREFIX}{}", BASE64.encode(encoder.finish().unwrap()));

        assert_eq!(RedisCache::decode(&framed).unwrap(), value);
    }

    #[test]
    fn corrupt_frames_are_rejected() {
        assert!(RedisCache::decode("gzip64:!!not-base64!!").is_err());
        assert!(RedisCache::decode("not json either").is_err());
    }
}
