//! The response cache.
//!
//! Holds the latest known result per [`Fingerprint`]. Entries are only
//! changed through [`ResponseCache`] methods; readers get clones.
//!
//! # Ordering
//!
//! Every write carries a generation from a cache-wide monotonic counter.
//! For each fingerprint the cache remembers the highest generation it has
//! accepted (its high-water mark), and [`ResponseCache::set_if_newer`]
//! drops writes at or below it. [`ResponseCache::invalidate_all`] raises a
//! cache-wide floor instead, which also covers fingerprints that have never
//! been written. A transport call that started before a newer write, or
//! before an invalidation, therefore cannot clobber it when it settles late.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::error::DraqulaError;
use crate::fingerprint::Fingerprint;
use crate::logging::targets;

/// Configuration for cache behavior.
///
/// Both limits are off by default: entries never go stale on their own and
/// are only removed by explicit invalidation.
#[derive(Debug, Clone, Default)]
pub struct CacheConfig {
    /// How long data is considered fresh.
    ///
    /// Once stale, queries serve the cached data and revalidate in the
    /// background.
    pub stale_after: Option<Duration>,

    /// How long an entry is retained before [`ResponseCache::collect_garbage`]
    /// may remove it.
    pub cache_time: Option<Duration>,
}

impl CacheConfig {
    /// Creates a cache configuration with the given stale and retention times.
    pub const fn new(stale_after: Option<Duration>, cache_time: Option<Duration>) -> Self {
        Self {
            stale_after,
            cache_time,
        }
    }
}

/// A cached result.
///
/// The result is either data or an error, never both.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    fingerprint: Fingerprint,
    result: Result<Value, DraqulaError>,
    fetched_at: Instant,
    stale_after: Option<Duration>,
    generation: u64,
}

impl CacheEntry {
    /// The fingerprint this entry belongs to.
    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    /// The cached data, if the request succeeded.
    pub fn data(&self) -> Option<&Value> {
        self.result.as_ref().ok()
    }

    /// The cached error, if the request failed.
    pub fn error(&self) -> Option<&DraqulaError> {
        self.result.as_ref().err()
    }

    /// The cached result.
    pub fn result(&self) -> &Result<Value, DraqulaError> {
        &self.result
    }

    /// Consume the entry, returning its result.
    pub fn into_result(self) -> Result<Value, DraqulaError> {
        self.result
    }

    /// When the result was written.
    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    /// Freshness window the entry was written with.
    pub fn stale_after(&self) -> Option<Duration> {
        self.stale_after
    }

    /// The generation of the write that produced this entry.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Check whether the freshness window has elapsed.
    pub fn is_stale(&self) -> bool {
        self.stale_after
            .is_some_and(|window| self.fetched_at.elapsed() > window)
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    high_water: HashMap<Fingerprint, u64>,
    /// Generation of the last `invalidate_all`; applies to every fingerprint.
    wiped_at: u64,
}

impl CacheState {
    fn accepts(&self, fingerprint: &Fingerprint, generation: u64) -> bool {
        let mark = self.high_water.get(fingerprint).copied().unwrap_or(0);
        generation > mark.max(self.wiped_at)
    }
}

/// Session-scoped response cache shared by every consumer of a client.
pub struct ResponseCache {
    state: Mutex<CacheState>,
    next_generation: AtomicU64,
    config: CacheConfig,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl ResponseCache {
    /// Create an empty cache.
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            next_generation: AtomicU64::new(1),
            config,
        }
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Allocate a generation newer than every generation handed out so far.
    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    /// Get a clone of the entry for `fingerprint`.
    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        self.state.lock().entries.get(fingerprint).cloned()
    }

    /// Check whether an entry exists for `fingerprint`.
    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.state.lock().entries.contains_key(fingerprint)
    }

    /// Write a result unconditionally, replacing any prior entry.
    pub fn set(&self, fingerprint: Fingerprint, result: Result<Value, DraqulaError>) -> CacheEntry {
        let generation = self.next_generation();
        let mut state = self.state.lock();
        Self::write(&mut state, fingerprint, generation, result, self.config.stale_after)
    }

    /// Write a result that was requested at `generation`.
    ///
    /// Returns the new entry, or `None` if a newer write or an invalidation
    /// already happened for this fingerprint.
    pub fn set_if_newer(
        &self,
        fingerprint: Fingerprint,
        generation: u64,
        result: Result<Value, DraqulaError>,
    ) -> Option<CacheEntry> {
        let mut state = self.state.lock();
        if !state.accepts(&fingerprint, generation) {
            tracing::debug!(
                target: targets::CACHE,
                %fingerprint,
                generation,
                "discarding out-of-order write"
            );
            return None;
        }
        Some(Self::write(
            &mut state,
            fingerprint,
            generation,
            result,
            self.config.stale_after,
        ))
    }

    fn write(
        state: &mut CacheState,
        fingerprint: Fingerprint,
        generation: u64,
        result: Result<Value, DraqulaError>,
        stale_after: Option<Duration>,
    ) -> CacheEntry {
        let entry = CacheEntry {
            fingerprint,
            result,
            fetched_at: Instant::now(),
            stale_after,
            generation,
        };
        state.high_water.insert(fingerprint, generation);
        state.entries.insert(fingerprint, entry.clone());
        tracing::trace!(target: targets::CACHE, %fingerprint, generation, "cache write");
        entry
    }

    /// Patch the data of a successful entry in place.
    ///
    /// `patch` receives the current data and returns the replacement, or
    /// `None` to leave the entry untouched. Error entries are never patched.
    pub fn update<F>(&self, fingerprint: &Fingerprint, patch: F) -> Option<CacheEntry>
    where
        F: FnOnce(&Value) -> Option<Value>,
    {
        let generation = self.next_generation();
        let mut state = self.state.lock();
        let data = state.entries.get(fingerprint)?.data()?;
        let patched = patch(data)?;
        Some(Self::write(
            &mut state,
            *fingerprint,
            generation,
            Ok(patched),
            self.config.stale_after,
        ))
    }

    /// Remove the entry for `fingerprint`.
    ///
    /// Returns `true` if an entry was removed. Results of transport calls
    /// that started before the invalidation are not cached afterwards.
    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        let generation = self.next_generation();
        let mut state = self.state.lock();
        state.high_water.insert(*fingerprint, generation);
        let removed = state.entries.remove(fingerprint).is_some();
        tracing::debug!(target: targets::CACHE, %fingerprint, removed, "invalidate");
        removed
    }

    /// Remove every entry, returning the fingerprints that were cached.
    ///
    /// Results of transport calls that started before this point are not
    /// cached afterwards, including calls for fingerprints with no entry yet.
    pub fn invalidate_all(&self) -> Vec<Fingerprint> {
        let generation = self.next_generation();
        let mut state = self.state.lock();
        let removed: Vec<Fingerprint> = state.entries.drain().map(|(fp, _)| fp).collect();
        // Every mark is at or below the new floor.
        state.high_water.clear();
        state.wiped_at = generation;
        tracing::debug!(target: targets::CACHE, count = removed.len(), "invalidate all");
        removed
    }

    /// Remove entries older than the configured `cache_time`.
    ///
    /// Entries for which `retain` returns `true` are kept regardless of age.
    /// Returns the fingerprints removed. Does nothing without a `cache_time`.
    pub fn collect_garbage<F>(&self, retain: F) -> Vec<Fingerprint>
    where
        F: Fn(&Fingerprint) -> bool,
    {
        let Some(cache_time) = self.config.cache_time else {
            return Vec::new();
        };
        let mut state = self.state.lock();
        let expired: Vec<Fingerprint> = state
            .entries
            .iter()
            .filter(|(fp, entry)| entry.fetched_at.elapsed() > cache_time && !retain(fp))
            .map(|(fp, _)| *fp)
            .collect();
        for fingerprint in &expired {
            state.entries.remove(fingerprint);
        }
        if !expired.is_empty() {
            tracing::debug!(target: targets::CACHE, count = expired.len(), "garbage collected");
        }
        expired
    }

    /// Fingerprints of every cached entry.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.state.lock().entries.keys().copied().collect()
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("len", &self.len())
            .field("config", &self.config)
            .finish()
    }
}
