//! Registry of renders currently in progress
//!
//! `try_begin` is the only place that decides whether a render may be
//! dispatched, so two callers asking for the same key can never both win.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use super::request::RequestId;
use super::types::RenderKey;

/// Cooperative cancellation flag shared between the registry and a worker
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent; every clone observes it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Proof that the holder owns the in-flight slot for `key`
#[derive(Clone, Debug)]
pub struct InFlightToken {
    pub id: RequestId,
    pub key: RenderKey,
    pub cancel: CancellationToken,
}

/// Outcome of [`InFlightRegistry::try_begin`]
#[derive(Debug)]
pub enum Begin {
    /// The caller owns the slot and must dispatch exactly one render
    Fresh(InFlightToken),
    /// Someone else is already rendering this key
    AlreadyInFlight,
}

#[derive(Debug)]
struct InFlightRequest {
    id: RequestId,
    cancel: CancellationToken,
    started: Instant,
}

struct RegistryState {
    requests: HashMap<RenderKey, InFlightRequest>,
    next_id: u64,
}

/// Thread-safe map of keys currently being rendered
pub struct InFlightRegistry {
    state: Mutex<RegistryState>,
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InFlightRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistryState {
                requests: HashMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Atomically claim `key`. Only a `Fresh` result may dispatch a render.
    pub fn try_begin(&self, key: RenderKey) -> Begin {
        let mut state = self.lock();
        if state.requests.contains_key(&key) {
            return Begin::AlreadyInFlight;
        }

        let id = RequestId::new(state.next_id);
        state.next_id += 1;
        let cancel = CancellationToken::new();
        state.requests.insert(
            key,
            InFlightRequest {
                id,
                cancel: cancel.clone(),
                started: Instant::now(),
            },
        );

        Begin::Fresh(InFlightToken { id, key, cancel })
    }

    /// Release the slot held by `token`, whatever the render's outcome.
    ///
    /// Returns `false` when the slot was already released or now belongs to
    /// a newer request (the token was abandoned or the registry was reset).
    pub fn complete(&self, token: &InFlightToken) -> bool {
        self.complete_id(&token.key, token.id)
    }

    /// Same as [`InFlightRegistry::complete`] for callers holding only the
    /// key and request id (e.g. from a worker response)
    pub fn complete_id(&self, key: &RenderKey, id: RequestId) -> bool {
        let mut state = self.lock();
        match state.requests.get(key) {
            Some(request) if request.id == id => {
                state.requests.remove(key);
                true
            }
            _ => false,
        }
    }

    /// True when `id` still owns the slot for `key`
    #[must_use]
    pub fn is_current(&self, key: &RenderKey, id: RequestId) -> bool {
        self.lock()
            .requests
            .get(key)
            .is_some_and(|request| request.id == id)
    }

    #[must_use]
    pub fn contains(&self, key: &RenderKey) -> bool {
        self.lock().requests.contains_key(key)
    }

    /// Cancel and release every request older than `timeout`.
    /// Returns the keys that were abandoned.
    pub fn abandon_expired(&self, now: Instant, timeout: Duration) -> Vec<RenderKey> {
        let mut state = self.lock();
        let expired: Vec<RenderKey> = state
            .requests
            .iter()
            .filter(|(_, request)| now.saturating_duration_since(request.started) >= timeout)
            .map(|(key, _)| *key)
            .collect();

        for key in &expired {
            if let Some(request) = state.requests.remove(key) {
                request.cancel.cancel();
            }
        }
        expired
    }

    /// Signal cancellation to every outstanding request and forget them.
    /// Late completions of these requests are no-ops.
    pub fn cancel_all(&self) -> usize {
        let mut state = self.lock();
        let count = state.requests.len();
        for request in state.requests.values() {
            request.cancel.cancel();
        }
        state.requests.clear();
        count
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().requests.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().requests.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::types::{DocumentId, ScaleBucket};
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key(page: usize) -> RenderKey {
        RenderKey::new(DocumentId::next(), page, ScaleBucket::from_tenths(10))
    }

    #[test]
    fn second_begin_for_same_key_is_rejected() {
        let registry = InFlightRegistry::new();
        let k = key(1);

        assert!(matches!(registry.try_begin(k), Begin::Fresh(_)));
        assert!(matches!(registry.try_begin(k), Begin::AlreadyInFlight));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn complete_frees_the_slot() {
        let registry = InFlightRegistry::new();
        let k = key(1);

        let Begin::Fresh(token) = registry.try_begin(k) else {
            panic!("expected fresh token");
        };
        assert!(registry.complete(&token));
        assert!(registry.is_empty());
        assert!(!registry.complete(&token));
        assert!(matches!(registry.try_begin(k), Begin::Fresh(_)));
    }

    #[test]
    fn stale_token_cannot_release_newer_request() {
        let registry = InFlightRegistry::new();
        let k = key(1);

        let Begin::Fresh(old) = registry.try_begin(k) else {
            panic!("expected fresh token");
        };
        registry.cancel_all();
        assert!(old.cancel.is_cancelled());

        let Begin::Fresh(new) = registry.try_begin(k) else {
            panic!("expected fresh token");
        };
        assert!(!registry.complete(&old));
        assert!(registry.contains(&k));
        assert!(registry.is_current(&k, new.id));
        assert!(registry.complete(&new));
    }

    #[test]
    fn concurrent_begin_has_exactly_one_winner() {
        let registry = Arc::new(InFlightRegistry::new());
        let k = key(7);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    matches!(registry.try_begin(k), Begin::Fresh(_))
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn expired_requests_are_cancelled_and_released() {
        let registry = InFlightRegistry::new();
        let k = key(3);
        let Begin::Fresh(token) = registry.try_begin(k) else {
            panic!("expected fresh token");
        };

        let none = registry.abandon_expired(Instant::now(), Duration::from_secs(60));
        assert!(none.is_empty());

        let later = Instant::now() + Duration::from_secs(61);
        let expired = registry.abandon_expired(later, Duration::from_secs(60));
        assert_eq!(expired, vec![k]);
        assert!(token.cancel.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn cancellation_token_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
