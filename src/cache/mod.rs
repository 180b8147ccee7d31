//! Byte-budgeted result cache with frequency/recency-aware eviction, per-mode
//! TTLs and snapshot persistence.
//!
//! All mutation goes through one mutex per cache instance. Snapshot I/O runs
//! outside the lock on a copy of the live entries.

pub mod key;
pub mod snapshot;
pub mod sweeper;

use std::{
   collections::HashMap,
   sync::Arc,
   time::{Duration, Instant},
};

pub use key::{CacheLookup, cache_key};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
pub use snapshot::{FileSnapshotStore, MemorySnapshotStore, SnapshotStore};
pub use sweeper::spawn_maintenance;

use crate::{
   Result,
   clock::Clock,
   config::{CacheConfig, MAX_ENTRY_FRACTION, SNAPSHOT_NAME},
   types::{QueryInfo, SearchResult, SearchStats},
};

const MS_PER_HOUR: f64 = 3_600_000.0;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Everything needed to answer a repeated request without re-running the
/// pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSearch {
   pub results:      Vec<SearchResult>,
   pub query_info:   QueryInfo,
   pub search_stats: SearchStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
   pub key:            String,
   /// Request text, kept for pattern invalidation and top-query stats.
   pub query:          String,
   /// Origin locators of the cached results, for source invalidation.
   pub locators:       Vec<String>,
   pub payload:        Vec<u8>,
   pub created_ms:     i64,
   pub last_access_ms: i64,
   pub access_count:   u64,
   pub ttl_ms:         i64,
   pub size:           u64,
}

impl CacheEntry {
   pub const fn is_expired(&self, now_ms: i64) -> bool {
      now_ms - self.created_ms > self.ttl_ms
   }

   /// Lower is evicted first: `accesses/hour - idle hours - size in MB`.
   pub fn eviction_score(&self, now_ms: i64) -> f64 {
      let hours_alive = ((now_ms - self.created_ms) as f64 / MS_PER_HOUR).max(1.0);
      let accesses_per_hour = self.access_count as f64 / hours_alive;
      let hours_idle = (now_ms - self.last_access_ms).max(0) as f64 / MS_PER_HOUR;
      let size_mb = self.size as f64 / BYTES_PER_MB;

      accesses_per_hour - hours_idle - size_mb
   }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheCounters {
   pub hits:            u64,
   pub misses:          u64,
   pub evictions:       u64,
   pub expirations:     u64,
   pub total_access_us: u64,
   pub timed_accesses:  u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
   pub total_entries:    usize,
   pub total_size_bytes: u64,
   pub max_size_bytes:   u64,
   pub hits:             u64,
   pub misses:           u64,
   pub evictions:        u64,
   pub expirations:      u64,
   pub hit_rate:         f64,
   pub avg_access_us:    f64,
   pub oldest_entry:     Option<String>,
   pub newest_entry:     Option<String>,
}

#[derive(Serialize, Deserialize)]
struct Snapshot {
   saved_at_ms: i64,
   entries:     Vec<CacheEntry>,
   counters:    CacheCounters,
}

#[derive(Default)]
struct CacheState {
   entries:     HashMap<String, CacheEntry>,
   total_bytes: u64,
   counters:    CacheCounters,
}

impl CacheState {
   fn remove(&mut self, key: &str) -> Option<CacheEntry> {
      let entry = self.entries.remove(key)?;
      self.total_bytes -= entry.size;
      Some(entry)
   }

   fn insert(&mut self, entry: CacheEntry) {
      self.total_bytes += entry.size;
      self.entries.insert(entry.key.clone(), entry);
   }

   fn eviction_victim(&self, now_ms: i64) -> Option<String> {
      self
         .entries
         .values()
         .min_by(|a, b| {
            a.eviction_score(now_ms)
               .total_cmp(&b.eviction_score(now_ms))
               .then_with(|| a.last_access_ms.cmp(&b.last_access_ms))
               .then_with(|| a.key.cmp(&b.key))
         })
         .map(|entry| entry.key.clone())
   }

   fn remove_where(&mut self, pred: impl Fn(&CacheEntry) -> bool) -> usize {
      let keys: Vec<String> = self
         .entries
         .values()
         .filter(|&entry| pred(entry))
         .map(|entry| entry.key.clone())
         .collect();
      for key in &keys {
         self.remove(key);
      }
      keys.len()
   }
}

pub struct ResultCache {
   state:     Mutex<CacheState>,
   config:    CacheConfig,
   max_bytes: u64,
   store:     Option<Arc<dyn SnapshotStore>>,
   clock:     Arc<dyn Clock>,
}

impl ResultCache {
   pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
      let max_bytes = config.max_bytes();
      Self { state: Mutex::new(CacheState::default()), config, max_bytes, store: None, clock }
   }

   pub fn with_store(mut self, store: Arc<dyn SnapshotStore>) -> Self {
      self.store = Some(store);
      self
   }

   /// Overrides the byte budget derived from `max_size_mb`.
   pub const fn with_byte_budget(mut self, max_bytes: u64) -> Self {
      self.max_bytes = max_bytes;
      self
   }

   pub const fn max_bytes(&self) -> u64 {
      self.max_bytes
   }

   pub const fn config(&self) -> &CacheConfig {
      &self.config
   }

   pub fn len(&self) -> usize {
      self.state.lock().entries.len()
   }

   pub fn is_empty(&self) -> bool {
      self.len() == 0
   }

   pub fn total_bytes(&self) -> u64 {
      self.state.lock().total_bytes
   }

   pub fn get(&self, lookup: &CacheLookup<'_>) -> Option<CachedSearch> {
      let key = lookup.key();
      let payload = self.get_payload(&key)?;

      match serde_json::from_slice(&payload) {
         Ok(cached) => Some(cached),
         Err(e) => {
            tracing::warn!(%key, error = %e, "dropping undecodable cache entry");
            self.state.lock().remove(&key);
            None
         },
      }
   }

   fn get_payload(&self, key: &str) -> Option<Vec<u8>> {
      let started = Instant::now();
      let now = self.clock.now_ms();
      let mut state = self.state.lock();

      let expired = match state.entries.get(key) {
         None => {
            state.counters.misses += 1;
            return None;
         },
         Some(entry) => entry.is_expired(now),
      };

      if expired {
         state.remove(key);
         state.counters.misses += 1;
         state.counters.expirations += 1;
         tracing::debug!(%key, "expired cache entry dropped");
         return None;
      }

      let entry = state.entries.get_mut(key)?;
      entry.last_access_ms = now;
      entry.access_count += 1;
      let payload = entry.payload.clone();
      let accesses = entry.access_count;

      state.counters.hits += 1;
      state.counters.timed_accesses += 1;
      state.counters.total_access_us += started.elapsed().as_micros() as u64;

      tracing::debug!(%key, accesses, "cache hit");
      Some(payload)
   }

   /// Stores a payload. Returns `false` when the payload alone is larger than
   /// a tenth of the byte budget or cannot be serialized.
   pub fn set(
      &self,
      lookup: &CacheLookup<'_>,
      payload: &CachedSearch,
      ttl: Option<Duration>,
   ) -> bool {
      let bytes = match serde_json::to_vec(payload) {
         Ok(bytes) => bytes,
         Err(e) => {
            tracing::warn!(error = %e, "failed to serialize cache payload");
            return false;
         },
      };

      let size = bytes.len() as u64;
      if size > self.max_bytes / MAX_ENTRY_FRACTION {
         tracing::warn!(bytes = size, budget = self.max_bytes, "payload too large for cache");
         return false;
      }

      let ttl = ttl.unwrap_or_else(|| self.config.ttl_for(lookup.mode));
      let key = lookup.key();
      let now = self.clock.now_ms();

      let mut locators: Vec<String> = payload
         .results
         .iter()
         .map(|r| r.source.url.clone())
         .filter(|url| !url.is_empty())
         .collect();
      locators.sort();
      locators.dedup();

      let entry = CacheEntry {
         key: key.clone(),
         query: lookup.query.trim().to_string(),
         locators,
         payload: bytes,
         created_ms: now,
         last_access_ms: now,
         access_count: 0,
         ttl_ms: ttl.as_millis() as i64,
         size,
      };

      let mut state = self.state.lock();
      state.remove(&key);

      while state.total_bytes + size > self.max_bytes {
         let Some(victim) = state.eviction_victim(now) else {
            break;
         };
         if let Some(evicted) = state.remove(&victim) {
            state.counters.evictions += 1;
            tracing::debug!(key = %victim, bytes = evicted.size, "cache eviction");
         }
      }

      state.insert(entry);
      tracing::debug!(%key, bytes = size, ttl_ms = ttl.as_millis() as u64, "cache set");
      true
   }

   /// Drops every entry whose TTL has elapsed.
   pub fn sweep_expired(&self) -> usize {
      let now = self.clock.now_ms();
      let mut state = self.state.lock();
      let removed = state.remove_where(|entry| entry.is_expired(now));
      state.counters.expirations += removed as u64;
      if removed > 0 {
         tracing::debug!(removed, "expired cache entries swept");
      }
      removed
   }

   /// Drops entries whose request text contains `pattern` (case-insensitive).
   pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
      let needle = pattern.to_lowercase();
      let removed = self
         .state
         .lock()
         .remove_where(|entry| entry.query.to_lowercase().contains(&needle));
      if removed > 0 {
         tracing::info!(removed, pattern, "cache invalidated by pattern");
      }
      removed
   }

   /// Drops entries holding any result from the given origin locator.
   pub fn invalidate_by_source(&self, url: &str) -> usize {
      let removed = self
         .state
         .lock()
         .remove_where(|entry| entry.locators.iter().any(|l| l == url));
      if removed > 0 {
         tracing::info!(removed, url, "cache invalidated by source");
      }
      removed
   }

   pub fn stats(&self) -> CacheStats {
      let state = self.state.lock();
      let counters = state.counters;
      let lookups = counters.hits + counters.misses;

      let oldest = state
         .entries
         .values()
         .min_by_key(|e| (e.created_ms, e.key.clone()));
      let newest = state
         .entries
         .values()
         .max_by_key(|e| (e.created_ms, e.key.clone()));

      CacheStats {
         total_entries:    state.entries.len(),
         total_size_bytes: state.total_bytes,
         max_size_bytes:   self.max_bytes,
         hits:             counters.hits,
         misses:           counters.misses,
         evictions:        counters.evictions,
         expirations:      counters.expirations,
         hit_rate:         if lookups == 0 {
            0.0
         } else {
            counters.hits as f64 / lookups as f64
         },
         avg_access_us:    if counters.timed_accesses == 0 {
            0.0
         } else {
            counters.total_access_us as f64 / counters.timed_accesses as f64
         },
         oldest_entry:     oldest.map(|e| e.key.clone()),
         newest_entry:     newest.map(|e| e.key.clone()),
      }
   }

   /// Request texts ranked by how often their cached entries were read.
   pub fn top_queries(&self, limit: usize) -> Vec<(String, u64)> {
      let mut counts: HashMap<String, u64> = HashMap::new();
      {
         let state = self.state.lock();
         for entry in state.entries.values() {
            if !entry.query.is_empty() {
               *counts.entry(entry.query.clone()).or_default() += entry.access_count;
            }
         }
      }

      let mut ranked: Vec<_> = counts.into_iter().collect();
      ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
      ranked.truncate(limit);
      ranked
   }

   /// Previously cached queries that extend `partial`.
   pub fn suggestions(&self, partial: &str, limit: usize) -> Vec<(String, u64)> {
      let needle = partial.trim().to_lowercase();
      self
         .top_queries(50)
         .into_iter()
         .filter(|(query, _)| {
            let lower = query.to_lowercase();
            lower.contains(&needle) && lower != needle
         })
         .take(limit)
         .collect()
   }

   /// Writes all still-valid entries to the snapshot store.
   pub async fn persist(&self) -> Result<usize> {
      let Some(store) = &self.store else {
         return Ok(0);
      };

      let snapshot = {
         let now = self.clock.now_ms();
         let state = self.state.lock();
         Snapshot {
            saved_at_ms: now,
            entries:     state
               .entries
               .values()
               .filter(|entry| !entry.is_expired(now))
               .cloned()
               .collect(),
            counters:    state.counters,
         }
      };

      let count = snapshot.entries.len();
      let blob = postcard::to_allocvec(&snapshot)?;
      store.save(SNAPSHOT_NAME, &blob).await?;
      tracing::debug!(entries = count, bytes = blob.len(), "cache snapshot persisted");
      Ok(count)
   }

   /// Reloads a snapshot no older than the configured staleness bound.
   /// Failures are logged and leave the cache empty.
   pub async fn restore(&self) -> usize {
      match self.try_restore().await {
         Ok(loaded) => loaded,
         Err(e) => {
            tracing::warn!(error = %e, "failed to restore cache snapshot");
            0
         },
      }
   }

   async fn try_restore(&self) -> Result<usize> {
      let Some(store) = &self.store else {
         return Ok(0);
      };
      let Some(blob) = store.load(SNAPSHOT_NAME).await? else {
         return Ok(0);
      };

      let snapshot: Snapshot = postcard::from_bytes(&blob)?;
      let now = self.clock.now_ms();
      let age_ms = now - snapshot.saved_at_ms;
      if age_ms > self.config.max_snapshot_age().as_millis() as i64 {
         tracing::info!(age_ms, "cache snapshot too old, ignoring");
         return Ok(0);
      }

      let mut state = self.state.lock();
      let mut loaded = 0;
      for entry in snapshot.entries {
         if entry.is_expired(now) || state.total_bytes + entry.size > self.max_bytes {
            continue;
         }
         state.remove(&entry.key);
         state.insert(entry);
         loaded += 1;
      }
      state.counters = snapshot.counters;

      tracing::info!(entries = loaded, "cache snapshot restored");
      Ok(loaded)
   }

   /// Empties memory and deletes the snapshot blob.
   pub async fn clear(&self) {
      {
         let mut state = self.state.lock();
         *state = CacheState::default();
      }

      if let Some(store) = &self.store
         && let Err(e) = store.remove(SNAPSHOT_NAME).await
      {
         tracing::warn!(error = %e, "failed to remove cache snapshot");
      }
      tracing::info!("cache cleared");
   }

   /// Flushes a final snapshot.
   pub async fn close(&self) {
      if let Err(e) = self.persist().await {
         tracing::warn!(error = %e, "failed to persist cache on close");
      }
   }
}
