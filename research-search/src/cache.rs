//! In-memory result cache with TTL, LRU eviction and single-flight.
//!
//! Caches fused aggregate results keyed by a stable hash of the normalised
//! query text, the sorted source selection and the filters. Uses [`moka`]:
//! per-entry TTL through an [`Expiry`] policy, least-recently-used eviction
//! once `capacity` is exceeded, and coalesced inserts so that concurrent
//! misses on one key run a single computation whose result every waiter
//! shares.
//!
//! The cache is an owned component: build one per service, [`reset`] it for
//! test isolation, and stop its sweep task with [`shutdown`].
//!
//! [`reset`]: CacheLayer::reset
//! [`shutdown`]: CacheLayer::shutdown

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::future::Cache;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::SearchError;
use crate::types::{AggregateResult, FusedResult, SearchFilters, SearchQuery};

/// Non-fatal cache failures. The caller bypasses the cache and computes
/// afresh.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache key derivation failed: {0}")]
    Key(String),
}

/// Stable key for one logical query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

#[derive(Serialize)]
struct KeyMaterial<'a> {
    text: String,
    sources: Vec<&'a str>,
    filters: &'a SearchFilters,
}

impl CacheKey {
    /// Derive the key for `query`.
    ///
    /// Text is lower-cased with whitespace runs collapsed; sources are
    /// sorted. `max_results` is not part of the key: each entry records the
    /// per-backend fetch limit it was computed with, and only requests within
    /// that limit are served from it.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Key`] if the key material cannot be encoded.
    pub fn for_query(query: &SearchQuery) -> Result<Self, CacheError> {
        let material = KeyMaterial {
            text: query
                .text()
                .split_whitespace()
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
                .join(" "),
            sources: query.sources().iter().map(String::as_str).collect(),
            filters: query.filters(),
        };
        let bytes = serde_json::to_vec(&material).map_err(|e| CacheError::Key(e.to_string()))?;
        Ok(Self(blake3::hash(&bytes).to_hex().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One cached aggregate.
///
/// Clones share the value and the hit counter.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    aggregate: Arc<AggregateResult>,
    fetch_limit: usize,
    inserted_at: Instant,
    ttl: Duration,
    hits: Arc<AtomicU64>,
}

impl CacheEntry {
    fn new(aggregate: AggregateResult, fetch_limit: usize, ttl: Duration) -> Self {
        Self {
            aggregate: Arc::new(aggregate),
            fetch_limit,
            inserted_at: Instant::now(),
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn aggregate(&self) -> &AggregateResult {
        &self.aggregate
    }

    /// Cached fused results, in rank order.
    pub fn results(&self) -> &[FusedResult] {
        &self.aggregate.fused_results
    }

    /// `max_results` the backends were asked for when this entry was built.
    pub fn fetch_limit(&self) -> usize {
        self.fetch_limit
    }

    /// Whether this entry can answer a request for `max_results` results.
    pub fn covers(&self, max_results: usize) -> bool {
        self.fetch_limit >= max_results
    }

    pub fn inserted_at(&self) -> Instant {
        self.inserted_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of times this entry has been served from the cache.
    pub fn hit_count(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }
}

struct EntryTtl;

impl Expiry<CacheKey, CacheEntry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &CacheEntry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Result of [`CacheLayer::get_or_compute`].
#[derive(Debug, Clone)]
pub struct Lookup {
    pub entry: CacheEntry,
    /// `true` when the value came from the cache (or from another caller's
    /// in-flight computation) rather than from this call's computation.
    pub cached: bool,
}

/// Counters reported by [`CacheLayer::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: u64,
    pub hits: u64,
    pub misses: u64,
}

/// Rounds of waiting on a narrower in-flight computation before computing
/// outside the single-flight path.
const NARROW_ENTRY_ROUNDS: usize = 3;

/// Bounded TTL cache of fused results.
pub struct CacheLayer {
    cache: Cache<CacheKey, CacheEntry>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    sweep: CancellationToken,
}

impl CacheLayer {
    /// Create a cache holding at most `capacity` entries for `ttl` each.
    pub fn new(capacity: u64, ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .build();
        Self {
            cache,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            sweep: CancellationToken::new(),
        }
    }

    /// Default TTL for new entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Look up `key`. Expired entries are never returned.
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let entry = self.cache.get(key).await;
        match &entry {
            Some(entry) => self.note_hit(key, entry),
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = key.as_str(), "cache miss");
            }
        }
        entry
    }

    /// Store `aggregate`, computed with per-backend limit `fetch_limit`, under
    /// `key` for `ttl`, replacing any previous entry.
    ///
    /// Capacity is enforced before this returns.
    pub async fn put(
        &self,
        key: CacheKey,
        aggregate: AggregateResult,
        fetch_limit: usize,
        ttl: Duration,
    ) {
        self.cache
            .insert(key, CacheEntry::new(aggregate, fetch_limit, ttl))
            .await;
        self.cache.run_pending_tasks().await;
    }

    /// Drop the entry for `key`, if any.
    pub async fn invalidate(&self, key: &CacheKey) {
        self.cache.invalidate(key).await;
    }

    /// Return a cached value for `key` that covers `fetch_limit`, or run
    /// `compute` to produce one.
    ///
    /// Concurrent callers missing on the same key wait for one shared
    /// computation. A failed computation is not cached; every waiter
    /// receives the error. An entry built with a smaller limit than
    /// requested is treated as a miss and replaced.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        fetch_limit: usize,
        compute: F,
    ) -> Result<Lookup, SearchError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<AggregateResult, SearchError>>,
    {
        let ttl = self.ttl;
        for _ in 0..NARROW_ENTRY_ROUNDS {
            if let Some(entry) = self.cache.get(&key).await {
                if entry.covers(fetch_limit) {
                    self.note_hit(&key, &entry);
                    return Ok(Lookup {
                        entry,
                        cached: true,
                    });
                }
                tracing::debug!(
                    key = key.as_str(),
                    cached_limit = entry.fetch_limit,
                    fetch_limit,
                    "cached entry too narrow; recomputing"
                );
                self.cache.invalidate(&key).await;
            }

            let entry = self
                .cache
                .entry(key.clone())
                .or_try_insert_with(async {
                    compute()
                        .await
                        .map(|aggregate| CacheEntry::new(aggregate, fetch_limit, ttl))
                })
                .await
                .map_err(|err| (*err).clone())?;

            if entry.is_fresh() {
                return Ok(self.stored_fresh(&key, entry.into_value()).await);
            }
            let entry = entry.into_value();
            if entry.covers(fetch_limit) {
                self.note_hit(&key, &entry);
                return Ok(Lookup {
                    entry,
                    cached: true,
                });
            }
            // Joined a concurrent computation for a smaller limit.
        }

        let entry = CacheEntry::new(compute().await?, fetch_limit, ttl);
        self.cache.insert(key.clone(), entry.clone()).await;
        Ok(self.stored_fresh(&key, entry).await)
    }

    async fn stored_fresh(&self, key: &CacheKey, entry: CacheEntry) -> Lookup {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.cache.run_pending_tasks().await;
        tracing::debug!(key = key.as_str(), "cache miss; stored fresh result");
        Lookup {
            entry,
            cached: false,
        }
    }

    fn note_hit(&self, key: &CacheKey, entry: &CacheEntry) {
        entry.record_hit();
        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = key.as_str(), hits = entry.hit_count(), "cache hit");
    }

    /// Entry count and lifetime hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.entry_count(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of live entries (approximate until pending tasks run).
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Apply pending evictions and purge expired entries.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Drop every entry.
    pub async fn reset(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Start a background task purging expired entries every `interval`.
    ///
    /// Does nothing outside a Tokio runtime.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("no runtime; cache sweep disabled");
            return;
        };
        if interval.is_zero() {
            return;
        }
        let cache = self.cache.clone();
        let token = self.sweep.clone();
        handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => cache.run_pending_tasks().await,
                }
            }
            tracing::debug!("cache sweep stopped");
        });
    }

    /// Stop the background sweep.
    pub fn shutdown(&self) {
        self.sweep.cancel();
    }
}

impl Drop for CacheLayer {
    fn drop(&mut self) {
        self.sweep.cancel();
    }
}
