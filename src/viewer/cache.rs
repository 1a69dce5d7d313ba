//! Bounded page cache for rendered pages
//!
//! Unlike a plain LRU, entries are ranked by how far their page is from the
//! active page (the *anchor*): the farthest page is the least relevant, and
//! among equally distant pages the oldest insertion goes first.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::types::{PagePayload, RenderKey};

/// A rendered page held by the cache. Never mutated after insertion.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: RenderKey,
    pub payload: Arc<PagePayload>,
    /// Logical insertion time
    pub inserted_at: u64,
}

/// Cache occupancy counters, for diagnostics only
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    /// Soft bound enforced lazily by the scheduler
    pub capacity: usize,
    /// Hard bound enforced on every insert
    pub ceiling: usize,
    /// Entries removed by eviction since creation
    pub evictions: u64,
    pub hits: u64,
    pub misses: u64,
}

struct CacheState {
    entries: HashMap<RenderKey, CacheEntry>,
    clock: u64,
    anchor: usize,
    stats: CacheStats,
}

impl CacheState {
    /// Key of the least relevant entry, if any
    fn least_relevant(&self) -> Option<RenderKey> {
        let anchor = self.anchor;
        self.entries
            .values()
            .max_by(|a, b| {
                a.key
                    .distance(anchor)
                    .cmp(&b.key.distance(anchor))
                    .then(b.inserted_at.cmp(&a.inserted_at))
            })
            .map(|entry| entry.key)
    }

    fn remove(&mut self, key: &RenderKey) -> bool {
        if self.entries.remove(key).is_some() {
            self.stats.evictions += 1;
            true
        } else {
            false
        }
    }
}

/// Thread-safe page cache.
///
/// `put` never lets the cache grow past its ceiling; everything else about
/// eviction is decided by the caller through [`PageCache::evict_except`] and
/// [`PageCache::trim_to`].
pub struct PageCache {
    state: Mutex<CacheState>,
    capacity: usize,
    ceiling: usize,
}

impl PageCache {
    /// Create a cache with soft bound `capacity` and hard bound
    /// `capacity + window`
    #[must_use]
    pub fn new(capacity: usize, window: usize) -> Self {
        let capacity = capacity.max(1);
        let ceiling = capacity.saturating_add(window);
        Self {
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                clock: 0,
                anchor: 1,
                stats: CacheStats {
                    capacity,
                    ceiling,
                    ..CacheStats::default()
                },
            }),
            capacity,
            ceiling,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a rendered page
    #[must_use]
    pub fn get(&self, key: &RenderKey) -> Option<Arc<PagePayload>> {
        let mut state = self.lock();
        let found = state.entries.get(key).map(|entry| entry.payload.clone());
        if found.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        found
    }

    /// Check for a key without touching hit/miss counters
    #[must_use]
    pub fn contains(&self, key: &RenderKey) -> bool {
        self.lock().entries.contains_key(key)
    }

    /// Insert or replace a page. If a new key would push the cache past its
    /// ceiling, the least relevant entry is evicted first.
    pub fn put(&self, key: RenderKey, payload: Arc<PagePayload>) {
        let mut state = self.lock();
        state.clock += 1;
        let inserted_at = state.clock;

        if !state.entries.contains_key(&key) && state.entries.len() >= self.ceiling {
            if let Some(victim) = state.least_relevant() {
                log::debug!("Cache at ceiling {}, evicting {victim}", self.ceiling);
                state.remove(&victim);
            }
        }

        state.entries.insert(
            key,
            CacheEntry {
                key,
                payload,
                inserted_at,
            },
        );
        state.stats.entries = state.entries.len();
    }

    /// Remove every entry whose key is not in `keep`, farthest first.
    /// Returns the number of entries removed.
    pub fn evict_except(&self, keep: &HashSet<RenderKey>) -> usize {
        let mut state = self.lock();
        let anchor = state.anchor;
        let mut victims: Vec<(usize, u64, RenderKey)> = state
            .entries
            .values()
            .filter(|entry| !keep.contains(&entry.key))
            .map(|entry| (entry.key.distance(anchor), entry.inserted_at, entry.key))
            .collect();
        victims.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, _, key) in &victims {
            log::debug!("Evicting {key}");
            state.remove(key);
        }
        state.stats.entries = state.entries.len();
        victims.len()
    }

    /// Evict least relevant entries until at most `limit` remain.
    /// Returns the number of entries removed.
    pub fn trim_to(&self, limit: usize) -> usize {
        let mut state = self.lock();
        let mut removed = 0;
        while state.entries.len() > limit {
            let Some(victim) = state.least_relevant() else {
                break;
            };
            log::debug!("Trimming {victim}");
            state.remove(&victim);
            removed += 1;
        }
        state.stats.entries = state.entries.len();
        removed
    }

    /// Set the page that relevance is measured against
    pub fn set_anchor(&self, page: usize) {
        self.lock().anchor = page;
    }

    /// Drop every entry. Not counted as eviction.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.stats.entries = 0;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Soft bound
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Hard bound
    #[must_use]
    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Resident page numbers, sorted
    #[must_use]
    pub fn pages(&self) -> Vec<usize> {
        let mut pages: Vec<usize> = self.lock().entries.keys().map(|key| key.page).collect();
        pages.sort_unstable();
        pages
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.lock().stats
    }
}
