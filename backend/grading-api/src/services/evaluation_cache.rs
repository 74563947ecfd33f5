use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};

const KEY_PREFIX: &str = "ai:evaluation:cache:";
const DEFAULT_TTL_DAYS: i64 = 7;
/// Redis keeps entries a little past their logical expiry so stale reads are
/// evicted by `lookup` and counted by `statistics`.
const REDIS_EXPIRY_GRACE_SECS: i64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStatistics {
    pub total_entries: u64,
    pub expired_entries: u64,
    pub valid_entries: u64,
    pub cache_size_mb: f64,
}

/// Raw storage behind the evaluation cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>>;
    async fn set(&self, entry: &CacheEntry) -> Result<()>;
    async fn delete(&self, hash: &str) -> Result<()>;
    async fn entries(&self) -> Result<Vec<CacheEntry>>;
}

#[derive(Clone)]
pub struct RedisCacheStore {
    redis: ConnectionManager,
}

impl RedisCacheStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    fn key(hash: &str) -> String {
        format!("{}{}", KEY_PREFIX, hash)
    }

    async fn scan_keys(&self) -> Result<Vec<String>> {
        let mut conn = self.redis.clone();
        let pattern = format!("{}*", KEY_PREFIX);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .context("Failed to scan evaluation cache keys")?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>> {
        let mut conn = self.redis.clone();
        let key = Self::key(hash);

        let raw: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut conn)
                .await
                .context("Failed to read evaluation cache")
        })
        .await?;

        raw.map(|json| serde_json::from_str(&json).context("Corrupt evaluation cache entry"))
            .transpose()
    }

    async fn set(&self, entry: &CacheEntry) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = Self::key(&entry.content_hash);
        let json = serde_json::to_string(entry)?;
        let ttl = (entry.expires_at - Utc::now()).num_seconds().max(1) + REDIS_EXPIRY_GRACE_SECS;

        track_cache_operation("set", async {
            redis::cmd("SET")
                .arg(&key)
                .arg(json)
                .arg("EX")
                .arg(ttl)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to write evaluation cache")
        })
        .await
    }

    async fn delete(&self, hash: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = Self::key(hash);

        track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to delete evaluation cache entry")
        })
        .await
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>> {
        let mut conn = self.redis.clone();
        let mut entries = Vec::new();

        for key in self.scan_keys().await? {
            let raw: Option<String> = redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .context("Failed to read evaluation cache")?;
            // Entries that vanished or no longer parse are skipped.
            if let Some(entry) = raw.and_then(|json| serde_json::from_str(&json).ok()) {
                entries.push(entry);
            }
        }

        Ok(entries)
    }
}

pub fn writing_cache_key(task_type: &str, prompt_text: &str, essay_text: &str) -> String {
    format!("writing:{}:{}:{}", task_type, prompt_text, essay_text)
}

pub fn speaking_cache_key(part_number: i32, transcript_text: &str) -> String {
    format!("speaking:{}:{}", part_number, transcript_text)
}

pub fn content_hash(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

/// Content-addressed memoization of AI evaluations. Every failure in here
/// degrades to a miss or a skipped write; callers never see cache errors.
#[derive(Clone)]
pub struct EvaluationCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
}

impl EvaluationCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self::with_ttl(store, Duration::days(DEFAULT_TTL_DAYS))
    }

    pub fn with_ttl(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn lookup<T: DeserializeOwned>(&self, raw_key: &str) -> Option<T> {
        let hash = content_hash(raw_key);

        let entry = match self.store.get(&hash).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                record_cache_miss();
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Evaluation cache read failed");
                record_cache_miss();
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            if let Err(e) = self.store.delete(&hash).await {
                tracing::warn!(error = %e, "Failed to evict expired cache entry");
            }
            tracing::debug!(hash = %hash, "Evicted expired evaluation cache entry");
            record_cache_miss();
            return None;
        }

        match serde_json::from_str(&entry.payload) {
            Ok(value) => {
                record_cache_hit();
                tracing::debug!(hash = %hash, "Evaluation cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(hash = %hash, error = %e, "Undecodable evaluation cache entry");
                record_cache_miss();
                None
            }
        }
    }

    pub async fn store<T: Serialize>(&self, raw_key: &str, value: &T) {
        let entry = match self.entry_for(raw_key, value) {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode evaluation for cache");
                return;
            }
        };
        if let Err(e) = self.store.set(&entry).await {
            tracing::warn!(hash = %entry.content_hash, error = %e, "Evaluation cache write failed");
        }
    }

    pub async fn statistics(&self) -> Result<CacheStatistics> {
        let now = Utc::now();
        let entries = self.store.entries().await?;

        let mut stats = CacheStatistics::default();
        let mut bytes = 0usize;
        for entry in &entries {
            stats.total_entries += 1;
            if entry.is_expired(now) {
                stats.expired_entries += 1;
            } else {
                stats.valid_entries += 1;
            }
            bytes += entry.payload.len();
        }
        stats.cache_size_mb = bytes as f64 / (1024.0 * 1024.0);

        Ok(stats)
    }

    /// Removes every expired entry, returning how many were dropped.
    pub async fn purge_expired(&self) -> Result<u64> {
        let now = Utc::now();
        let mut purged = 0;
        for entry in self.store.entries().await? {
            if entry.is_expired(now) {
                self.store.delete(&entry.content_hash).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "Purged expired evaluation cache entries");
        }
        Ok(purged)
    }

    fn entry_for<T: Serialize>(&self, raw_key: &str, value: &T) -> Result<CacheEntry> {
        let now = Utc::now();
        Ok(CacheEntry {
            content_hash: content_hash(raw_key),
            payload: serde_json::to_string(value)?,
            created_at: now,
            expires_at: now + self.ttl,
        })
    }
}
