//! Prefetch scheduler - decides what to render and what to evict
//!
//! Workers only render. Every decision (in-flight bookkeeping, staleness,
//! caching, eviction) is taken here, on the thread that drains the response
//! channel, so none of it races with navigation.

use std::collections::HashSet;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};

use super::cache::{CacheStats, PageCache};
use super::error::{RenderError, ViewerError};
use super::inflight::{Begin, InFlightRegistry};
use super::renderer::PageRenderer;
use super::request::{Priority, RenderRequest, RenderResponse};
use super::types::{DocumentHandle, PagePayload, RenderKey, ScaleBucket};
use super::worker::render_worker;

/// Scheduler tuning
#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Pages kept resident on each side of the active page
    pub prefetch_radius: usize,
    /// Soft cache bound; eviction runs once the cache grows past it
    pub max_cache_size: usize,
    /// Renders older than this are abandoned
    pub render_timeout: Duration,
    pub workers: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            prefetch_radius: 2,
            max_cache_size: 5,
            render_timeout: Duration::from_secs(10),
            workers: 5,
        }
    }
}

impl SchedulerConfig {
    /// Number of pages in a full prefetch window
    #[must_use]
    pub fn window_size(&self) -> usize {
        self.prefetch_radius.saturating_mul(2).saturating_add(1)
    }
}

/// What the scheduler should keep resident
#[derive(Clone, Debug)]
pub struct Target {
    pub document: DocumentHandle,
    /// Active page (1-indexed)
    pub page: usize,
    pub bucket: ScaleBucket,
    pub total_pages: usize,
}

impl Target {
    #[must_use]
    pub fn active_key(&self) -> RenderKey {
        RenderKey::new(self.document.id(), self.page, self.bucket)
    }
}

/// Result of a recompute
#[derive(Debug, Default)]
pub struct Recompute {
    /// The active page, when it was already cached
    pub cached: Option<Arc<PagePayload>>,
    /// Keys sent to the workers, active page first
    pub dispatched: Vec<RenderKey>,
}

/// Completion that concerns the page currently on display
#[derive(Debug)]
pub enum SchedulerEvent {
    Ready {
        key: RenderKey,
        payload: Arc<PagePayload>,
    },
    Failed {
        key: RenderKey,
        error: RenderError,
    },
}

/// Pages within `radius` of `page`, clipped to `1..=total_pages`
#[must_use]
pub fn prefetch_window(page: usize, total_pages: usize, radius: usize) -> RangeInclusive<usize> {
    let first = page.saturating_sub(radius).max(1);
    let last = page.saturating_add(radius).min(total_pages);
    first..=last
}

/// Window keys ordered by dispatch priority: active page, then outwards,
/// next page before previous page at each distance
#[must_use]
pub fn target_keys(target: &Target, radius: usize) -> Vec<RenderKey> {
    let window = prefetch_window(target.page, target.total_pages, radius);
    let key = |page| RenderKey::new(target.document.id(), page, target.bucket);

    let mut keys = vec![target.active_key()];
    for offset in 1..=radius {
        let next = target.page + offset;
        if window.contains(&next) {
            keys.push(key(next));
        }
        if target.page > offset && window.contains(&(target.page - offset)) {
            keys.push(key(target.page - offset));
        }
    }
    keys
}

/// The first `limit` of [`target_keys`]: the pages worth rendering when the
/// cache cannot hold the whole window
#[must_use]
pub fn resident_keys(target: &Target, radius: usize, limit: usize) -> Vec<RenderKey> {
    let mut keys = target_keys(target, radius);
    keys.truncate(limit.max(1));
    keys
}

/// Keeps the cache populated around the active page
pub struct PrefetchScheduler {
    config: SchedulerConfig,
    cache: Arc<PageCache>,
    in_flight: Arc<InFlightRegistry>,
    priority_tx: Sender<RenderRequest>,
    background_tx: Sender<RenderRequest>,
    response_rx: Receiver<RenderResponse>,
    target: Option<Target>,
    dispatched_total: u64,
}

impl PrefetchScheduler {
    /// Spawn the worker pool and create an empty cache
    #[must_use]
    pub fn new(renderer: Arc<dyn PageRenderer>, config: SchedulerConfig) -> Self {
        let cache = Arc::new(PageCache::new(config.max_cache_size, config.window_size()));
        let in_flight = Arc::new(InFlightRegistry::new());

        let (priority_tx, priority_rx) = flume::unbounded();
        let (background_tx, background_rx) = flume::unbounded();
        let (response_tx, response_rx) = flume::unbounded();

        let workers = config.workers.max(1);
        for _ in 0..workers {
            let renderer = renderer.clone();
            let priority_rx = priority_rx.clone();
            let background_rx = background_rx.clone();
            let response_tx = response_tx.clone();

            thread::spawn(move || {
                render_worker(renderer, priority_rx, background_rx, response_tx);
            });
        }

        Self {
            config: SchedulerConfig { workers, ..config },
            cache,
            in_flight,
            priority_tx,
            background_tx,
            response_rx,
            target: None,
            dispatched_total: 0,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    #[must_use]
    pub fn in_flight(&self) -> &Arc<InFlightRegistry> {
        &self.in_flight
    }

    #[must_use]
    pub fn target(&self) -> Option<&Target> {
        self.target.as_ref()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Renders sent to workers since creation
    #[must_use]
    pub fn dispatched_total(&self) -> u64 {
        self.dispatched_total
    }

    /// True when no render is outstanding
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    fn active_key(&self) -> Option<RenderKey> {
        self.target.as_ref().map(Target::active_key)
    }

    /// Retarget on a page or scale change: surface a cached active page,
    /// dispatch renders for missing window pages, then evict lazily.
    ///
    /// When the window is wider than the cache only the nearest
    /// `max_cache_size` pages are dispatched, so nothing rendered here is
    /// trimmed away as soon as it lands.
    pub fn recompute(&mut self, target: Target) -> Recompute {
        let keys = resident_keys(
            &target,
            self.config.prefetch_radius,
            self.config.max_cache_size,
        );
        self.cache.set_anchor(target.page);
        let document = target.document.clone();
        self.target = Some(target);

        let mut result = Recompute::default();
        let mut keys = keys.into_iter();

        if let Some(active) = keys.next() {
            match self.cache.get(&active) {
                Some(payload) => {
                    log::debug!("Cache hit for active {active}");
                    result.cached = Some(payload);
                }
                None => {
                    if self.request(active, &document, Priority::Active) {
                        result.dispatched.push(active);
                    }
                }
            }
        }

        for key in keys {
            if !self.cache.contains(&key) && self.request(key, &document, Priority::Background) {
                result.dispatched.push(key);
            }
        }

        self.evict_if_over_capacity();
        result
    }

    /// Claim `key` and send it to a worker. Returns false when the key was
    /// already in flight or the workers are gone.
    fn request(&mut self, key: RenderKey, document: &DocumentHandle, priority: Priority) -> bool {
        let token = match self.in_flight.try_begin(key) {
            Begin::Fresh(token) => token,
            Begin::AlreadyInFlight => {
                log::debug!("{key} already in flight");
                return false;
            }
        };

        let request = RenderRequest::Page {
            id: token.id,
            key,
            document: document.clone(),
            priority,
            cancel: token.cancel.clone(),
        };
        let queue = match priority {
            Priority::Active => &self.priority_tx,
            Priority::Background => &self.background_tx,
        };

        if queue.send(request).is_err() {
            log::error!("Render workers are gone, dropping request for {key}");
            self.in_flight.complete(&token);
            return false;
        }

        log::debug!("Dispatched {key} ({priority:?})");
        self.dispatched_total += 1;
        true
    }

    /// Evict outside the window once the cache is over its soft bound; if
    /// the window alone is bigger than the bound, trim by relevance.
    fn evict_if_over_capacity(&self) -> usize {
        let limit = self.config.max_cache_size.max(1);
        if self.cache.len() <= limit {
            return 0;
        }

        let keep: HashSet<RenderKey> = match &self.target {
            Some(target) => target_keys(target, self.config.prefetch_radius)
                .into_iter()
                .collect(),
            None => HashSet::new(),
        };

        let mut evicted = self.cache.evict_except(&keep);
        if self.cache.len() > limit {
            evicted += self.cache.trim_to(limit);
        }
        if evicted > 0 {
            log::debug!(
                "Evicted {evicted} entries, {} resident",
                self.cache.len()
            );
        }
        evicted
    }

    /// Drain completed renders without blocking
    pub fn poll(&mut self) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        while let Ok(response) = self.response_rx.try_recv() {
            events.extend(self.handle_response(response));
        }
        events.extend(self.abandon_expired(Instant::now()));
        events
    }

    /// Block up to `timeout` for at least one completion, then drain
    pub fn wait(&mut self, timeout: Duration) -> Vec<SchedulerEvent> {
        let mut events = Vec::new();
        let timeout = timeout.min(self.config.render_timeout);
        match self.response_rx.recv_timeout(timeout) {
            Ok(response) => events.extend(self.handle_response(response)),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("Render workers disconnected");
            }
        }
        events.extend(self.poll());
        events
    }

    fn handle_response(&mut self, response: RenderResponse) -> Option<SchedulerEvent> {
        let key = response.key();
        if !self.in_flight.complete_id(&key, response.id()) {
            log::debug!("Discarding result for {key}: request was abandoned");
            return None;
        }

        let is_current_document = self
            .target
            .as_ref()
            .is_some_and(|target| target.document.id() == key.document);
        let is_active = self.active_key() == Some(key);

        match response {
            RenderResponse::Rendered {
                payload, priority, ..
            } => {
                if !is_current_document {
                    log::debug!(
                        "Discarding result for {key}: {}",
                        ViewerError::DocumentClosed
                    );
                    return None;
                }
                self.cache.put(key, payload.clone());
                self.evict_if_over_capacity();

                if is_active {
                    log::debug!("Rendered active {key}");
                    Some(SchedulerEvent::Ready { key, payload })
                } else {
                    log::debug!("Cached {key} ({priority:?})");
                    None
                }
            }

            RenderResponse::Failed { error, .. } if is_active => {
                log::warn!("Failed to render {key}: {error}");
                Some(SchedulerEvent::Failed { key, error })
            }

            RenderResponse::Failed { error, .. } => {
                log::debug!("Prefetch of {key} failed: {error}");
                None
            }

            RenderResponse::Cancelled { .. } => {
                log::debug!("{key}: {}", RenderError::Cancelled);
                None
            }
        }
    }

    fn abandon_expired(&mut self, now: Instant) -> Vec<SchedulerEvent> {
        let timeout = self.config.render_timeout;
        let active = self.active_key();
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);

        self.in_flight
            .abandon_expired(now, timeout)
            .into_iter()
            .filter_map(|key| {
                if Some(key) == active {
                    log::warn!("Render of active {key} timed out after {millis} ms");
                    Some(SchedulerEvent::Failed {
                        key,
                        error: RenderError::Timeout { millis },
                    })
                } else {
                    log::debug!("Abandoned prefetch of {key} after {millis} ms");
                    None
                }
            })
            .collect()
    }

    /// Cancel every outstanding render and drop every cached page
    pub fn reset(&mut self) {
        let cancelled = self.in_flight.cancel_all();
        self.cache.clear();
        self.target = None;
        if cancelled > 0 {
            log::debug!("Cancelled {cancelled} outstanding renders");
        }
    }

    /// Stop the worker threads
    pub fn shutdown(&self) {
        for _ in 0..self.config.workers {
            let _ = self.priority_tx.send(RenderRequest::Shutdown);
        }
    }
}

impl Drop for PrefetchScheduler {
    fn drop(&mut self) {
        self.in_flight.cancel_all();
        self.cache.clear();
        self.shutdown();
    }
}
