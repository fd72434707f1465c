//! Response cache for retrieval requests
//!
//! Keyed by normalized query plus every request field that shapes the
//! result set. Writes invalidate the whole cache so a store followed by a
//! retrieve always observes the stored item; TTL bounds staleness between
//! reads. Hits return a deep copy with the `cache_hit` flag set.

use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::clock::SharedClock;
use crate::config::ResponseCacheConfig;
use crate::types::{RetrieveRequest, RetrieveResponse};

struct CachedResponse {
    response: RetrieveResponse,
    created_at: DateTime<Utc>,
    hit_count: AtomicU64,
}

/// Cache statistics counters
#[derive(Debug, Default)]
pub struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub invalidations: AtomicU64,
    pub evictions: AtomicU64,
}

/// TTL response cache
pub struct ResponseCache {
    config: ResponseCacheConfig,
    clock: SharedClock,
    entries: DashMap<String, CachedResponse>,
    counters: CacheCounters,
}

impl ResponseCache {
    pub fn new(config: ResponseCacheConfig, clock: SharedClock) -> Self {
        Self {
            config,
            clock,
            entries: DashMap::new(),
            counters: CacheCounters::default(),
        }
    }

    /// Cache key over the normalized query and the result-shaping fields
    fn cache_key(request: &RetrieveRequest) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        normalize_query(&request.query).hash(&mut hasher);
        request.strategy.as_str().hash(&mut hasher);
        request.conversation_id.hash(&mut hasher);
        request.max_results.hash(&mut hasher);
        request.max_tokens.hash(&mut hasher);
        if let Some(ref kinds) = request.kinds {
            for kind in kinds {
                kind.as_str().hash(&mut hasher);
            }
        }
        request.min_score.map(f32::to_bits).hash(&mut hasher);
        request.since.map(|t| t.timestamp_millis()).hash(&mut hasher);
        request.until.map(|t| t.timestamp_millis()).hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn is_expired(&self, entry: &CachedResponse, now: DateTime<Utc>) -> bool {
        (now - entry.created_at).num_seconds() > self.config.ttl_seconds
    }

    /// Deep-copied cached response, if fresh
    pub fn get(&self, request: &RetrieveRequest) -> Option<RetrieveResponse> {
        let key = Self::cache_key(request);
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(&key) {
            if !self.is_expired(&entry, now) {
                entry.hit_count.fetch_add(1, Ordering::Relaxed);
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                let mut response = entry.response.clone();
                response.cache_hit = true;
                return Some(response);
            }
            drop(entry);
            self.entries.remove(&key);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, request: &RetrieveRequest, response: &RetrieveResponse) {
        if self.entries.len() >= self.config.max_entries {
            self.evict_oldest();
        }

        let key = Self::cache_key(request);
        self.entries.insert(
            key,
            CachedResponse {
                response: response.clone(),
                created_at: self.clock.now(),
                hit_count: AtomicU64::new(0),
            },
        );
    }

    fn evict_oldest(&self) {
        let mut oldest_key: Option<String> = None;
        let mut oldest_time: Option<DateTime<Utc>> = None;

        for entry in self.entries.iter() {
            if oldest_time.map_or(true, |t| entry.created_at < t) {
                oldest_time = Some(entry.created_at);
                oldest_key = Some(entry.key().clone());
            }
        }

        if let Some(key) = oldest_key {
            self.entries.remove(&key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Drop every entry; called on any write to the tiers
    pub fn invalidate_all(&self) {
        let count = self.entries.len() as u64;
        self.entries.clear();
        self.counters
            .invalidations
            .fetch_add(count, Ordering::Relaxed);
    }

    /// Drop expired entries
    pub fn remove_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| !self.is_expired(entry, now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses.load(Ordering::Relaxed)
    }
}

/// Lowercase, trim, and collapse inner whitespace
fn normalize_query(query: &str) -> String {
    query
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
